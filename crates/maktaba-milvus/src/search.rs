//! Hybrid search request/response types.

use maktaba::types::SparseVector;
use maktaba::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ranker::Ranker;

/// The closed set of scalar fields a search may project.
pub const OUTPUT_FIELDS: &[&str] = &[
    "id",
    "book_id",
    "book_name",
    "order",
    "author",
    "category",
    "part_title",
    "start_page_id",
    "page_offset",
    "page_num_range",
    "text",
];

/// One query embedding: dense and sparse sides of the same text, plus
/// the per-side ANN parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEmbedding {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    /// IVF probe count for the dense side.
    #[serde(default = "default_n_probe")]
    pub n_probe: u32,
    /// Fraction of low-weight sparse dimensions dropped at search time.
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio_search: f64,
}

fn default_n_probe() -> u32 {
    10
}

fn default_drop_ratio() -> f64 {
    0.2
}

impl SearchEmbedding {
    #[must_use]
    pub fn new(dense: Vec<f32>, sparse: SparseVector) -> Self {
        Self {
            dense,
            sparse,
            n_probe: default_n_probe(),
            drop_ratio_search: default_drop_ratio(),
        }
    }
}

/// A validated hybrid search over one collection.
#[derive(Debug, Clone)]
pub struct HybridSearchRequest {
    pub embeddings: Vec<SearchEmbedding>,
    pub k: usize,
    pub ranker: Ranker,
    pub partition_names: Vec<String>,
    pub output_fields: Vec<String>,
}

impl HybridSearchRequest {
    /// Validate partitions and output fields against their closed sets.
    /// `available_partitions` comes from the store at startup rather
    /// than from a hard-coded list.
    pub fn validate(&self, available_partitions: &[String]) -> Result<()> {
        if self.embeddings.is_empty() {
            return Err(Error::validation("at least one embedding is required"));
        }
        if self.k == 0 {
            return Err(Error::validation("k must be positive"));
        }
        for partition in &self.partition_names {
            if !available_partitions.contains(partition) {
                return Err(Error::validation(format!(
                    "The partition names must be within list: {}",
                    available_partitions.join(", ")
                )));
            }
        }
        for field in &self.output_fields {
            if !OUTPUT_FIELDS.contains(&field.as_str()) {
                return Err(Error::validation(format!(
                    "The output fields must be within list: {}",
                    OUTPUT_FIELDS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// One fused search hit: the fused score plus the projected fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub distance: f32,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl SearchHit {
    /// Convenience accessor for an integer field.
    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    /// Convenience accessor for a string field.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(partitions: Vec<String>, fields: Vec<String>) -> HybridSearchRequest {
        HybridSearchRequest {
            embeddings: vec![SearchEmbedding::new(vec![0.0; 4], SparseVector::new())],
            k: 5,
            ranker: Ranker::Rrf { k: 60 },
            partition_names: partitions,
            output_fields: fields,
        }
    }

    #[test]
    fn test_validate_accepts_known_sets() {
        let available = vec!["_default".to_string(), "_iqeedah".to_string()];
        let req = request(
            vec!["_default".into()],
            vec!["book_name".into(), "text".into()],
        );
        assert!(req.validate(&available).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_partition() {
        let available = vec!["_default".to_string()];
        let req = request(vec!["_hadith".into()], vec![]);
        let err = req.validate(&available).unwrap_err();
        assert!(err.to_string().contains("partition"));
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let req = request(vec![], vec!["knowledge".into()]);
        let err = req.validate(&["_default".to_string()]).unwrap_err();
        assert!(err.to_string().contains("output fields"));
    }

    #[test]
    fn test_validate_rejects_empty_embeddings() {
        let mut req = request(vec![], vec![]);
        req.embeddings.clear();
        assert!(req.validate(&["_default".to_string()]).is_err());
    }

    #[test]
    fn test_hit_accessors() {
        let json = r#"{"distance": 0.87, "book_id": 42, "book_name": "Example"}"#;
        let hit: SearchHit = serde_json::from_str(json).unwrap();
        assert!((hit.distance - 0.87).abs() < f32::EPSILON);
        assert_eq!(hit.get_i64("book_id"), Some(42));
        assert_eq!(hit.get_str("book_name"), Some("Example"));
        assert_eq!(hit.get_i64("missing"), None);
    }
}
