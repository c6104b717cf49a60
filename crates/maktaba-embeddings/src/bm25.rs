//! Per-book BM25 sparse encoding.
//!
//! Each book gets its own encoder, fitted on the book's chunk texts.
//! Token indices are therefore only meaningful within one book's chunk
//! set, which is fine: the vector store treats sparse entries as opaque
//! floats, and retrieval quality comes from the per-corpus weighting.

use std::collections::HashMap;

use maktaba::types::SparseVector;
use maktaba::{Error, Result};
use unicode_normalization::UnicodeNormalization;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// BM25 encoder fitted on one corpus.
#[derive(Debug, Clone, Default)]
pub struct Bm25Encoder {
    vocab: HashMap<String, u32>,
    idf: Vec<f32>,
    avg_doc_len: f32,
}

impl Bm25Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit vocabulary and document frequencies on a corpus.
    pub fn fit(&mut self, corpus: &[String]) -> Result<()> {
        if corpus.is_empty() {
            return Err(Error::validation("BM25 corpus must not be empty"));
        }

        let tokenized: Vec<Vec<String>> = corpus.iter().map(|doc| tokenize(doc)).collect();
        let doc_count = tokenized.len() as f32;
        let total_len: usize = tokenized.iter().map(Vec::len).sum();
        self.avg_doc_len = total_len as f32 / doc_count;

        self.vocab.clear();
        let mut doc_freq: Vec<u32> = Vec::new();

        for tokens in &tokenized {
            let mut seen: Vec<u32> = Vec::new();
            for token in tokens {
                let index = match self.vocab.get(token) {
                    Some(&index) => index,
                    None => {
                        let index = self.vocab.len() as u32;
                        self.vocab.insert(token.clone(), index);
                        doc_freq.push(0);
                        index
                    }
                };
                if !seen.contains(&index) {
                    seen.push(index);
                    doc_freq[index as usize] += 1;
                }
            }
        }

        // Lucene-style IDF, always positive.
        self.idf = doc_freq
            .iter()
            .map(|&df| {
                let df = df as f32;
                ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln()
            })
            .collect();

        Ok(())
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Encode documents against the fitted vocabulary. Tokens never
    /// seen at fit time contribute nothing.
    #[must_use]
    pub fn encode_documents(&self, docs: &[String]) -> Vec<SparseVector> {
        docs.iter().map(|doc| self.encode_document(doc)).collect()
    }

    fn encode_document(&self, doc: &str) -> SparseVector {
        let tokens = tokenize(doc);
        let doc_len = tokens.len() as f32;

        let mut term_freq: HashMap<u32, f32> = HashMap::new();
        for token in &tokens {
            if let Some(&index) = self.vocab.get(token) {
                *term_freq.entry(index).or_insert(0.0) += 1.0;
            }
        }

        let norm = K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(f32::EPSILON));
        term_freq
            .into_iter()
            .map(|(index, tf)| {
                let weight = self.idf[index as usize] * (tf * (K1 + 1.0)) / (tf + norm);
                (index, weight)
            })
            .collect()
    }
}

/// Arabic-aware tokenization: NFKC-normalize, keep Arabic letters,
/// Arabic-Indic digits, and ASCII alphanumerics, treat everything else
/// (harakat, tatweel, punctuation) as a separator.
fn tokenize(text: &str) -> Vec<String> {
    text.nfkc()
        .map(|c| if is_token_char(c) { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_token_char(c: char) -> bool {
    ('\u{0621}'..='\u{064A}').contains(&c)
        || ('\u{0660}'..='\u{0669}').contains(&c)
        || ('\u{06F0}'..='\u{06F9}').contains(&c)
        || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<String> {
        vec![
            "الوضوء شرط لصحة الصلاة".to_string(),
            "الصلاة عماد الدين".to_string(),
            "الوضوء قبل الصلاة سنة مؤكدة عند بعض الفقهاء".to_string(),
        ]
    }

    #[test]
    fn test_tokenize_strips_decorations() {
        let tokens = tokenize("قَالَ: نعم، والحمدُ لله.");
        assert_eq!(tokens, vec!["قال", "نعم", "والحمد", "لله"]);
    }

    #[test]
    fn test_fit_rejects_empty_corpus() {
        let mut encoder = Bm25Encoder::new();
        assert!(encoder.fit(&[]).is_err());
    }

    #[test]
    fn test_encode_produces_positive_weights() {
        let mut encoder = Bm25Encoder::new();
        encoder.fit(&corpus()).unwrap();

        let vectors = encoder.encode_documents(&corpus());
        assert_eq!(vectors.len(), 3);
        for vector in &vectors {
            assert!(!vector.is_empty());
            assert!(vector.iter().all(|(_, &w)| w > 0.0));
        }
    }

    #[test]
    fn test_rare_terms_outweigh_common_ones() {
        let mut encoder = Bm25Encoder::new();
        encoder.fit(&corpus()).unwrap();

        // "الصلاة" appears in all three docs, "عماد" in one.
        let vectors = encoder.encode_documents(&["الصلاة عماد".to_string()]);
        let vector = &vectors[0];
        let common = encoder.vocab["الصلاة"];
        let rare = encoder.vocab["عماد"];
        assert!(vector.0[&rare] > vector.0[&common]);
    }

    #[test]
    fn test_unseen_tokens_are_ignored() {
        let mut encoder = Bm25Encoder::new();
        encoder.fit(&corpus()).unwrap();

        let vectors = encoder.encode_documents(&["كلمة غريبة تماما".to_string()]);
        assert!(vectors[0].is_empty());
    }

    #[test]
    fn test_vocab_is_per_fit() {
        let mut encoder = Bm25Encoder::new();
        encoder.fit(&corpus()).unwrap();
        let first_size = encoder.vocab_size();

        encoder.fit(&["نص واحد فقط".to_string()]).unwrap();
        assert_ne!(encoder.vocab_size(), first_size);
        assert_eq!(encoder.vocab_size(), 3);
    }
}
