//! Small text helpers shared by the processor.

use maktaba::types::ProcessedBook;

/// Punctuation that ends a sentence or a quoted passage; a page ending
/// on one of these starts a fresh paragraph in the assembled markdown.
const TERMINAL_MARKS: &[&str] = &[".", "؟", "?", "!", "***", "»", "]", "\""];

/// Convert Arabic-Indic digits (٠١٢٣٤٥٦٧٨٩) to ASCII digits, leaving
/// everything else untouched.
#[must_use]
pub fn arabic_to_english_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            other => other,
        })
        .collect()
}

/// Whether trimmed `text` ends with terminal punctuation.
#[must_use]
pub fn ends_with_terminal_punctuation(text: &str) -> bool {
    let trimmed = text.trim_end();
    TERMINAL_MARKS.iter().any(|mark| trimmed.ends_with(mark))
}

/// Whether trimmed `text` starts with an Arabic or Latin letter.
#[must_use]
pub fn starts_with_letter(text: &str) -> bool {
    match text.trim_start().chars().next() {
        Some(c) => ('\u{0621}'..='\u{064A}').contains(&c) || c.is_ascii_alphabetic(),
        None => false,
    }
}

/// Concatenate a book's cleaned pages into one markdown-like string.
///
/// Pages whose predecessor did not end a sentence, and which themselves
/// begin with a letter, are joined with a single space; every other
/// page starts a new paragraph.
#[must_use]
pub fn assemble_markdown(book: &ProcessedBook) -> String {
    let mut full = String::new();
    let mut previous: Option<String> = None;

    for page in book.pages_in_order() {
        let current = page.cleaned_text.trim();
        if current.is_empty() {
            continue;
        }

        let join_with_space = previous
            .as_deref()
            .is_some_and(|prev| !ends_with_terminal_punctuation(prev) && starts_with_letter(current));

        if join_with_space {
            full.truncate(full.trim_end().len());
            full.push(' ');
            full.push_str(current);
        } else {
            full.push_str("\n\n");
            full.push_str(current);
        }
        previous = Some(current.to_string());
    }

    collapse_blank_runs(full.trim()).to_string()
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(c);
            }
        } else {
            newline_run = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use maktaba::types::PageRecord;
    use std::collections::BTreeMap;

    #[test]
    fn test_digit_normalization() {
        assert_eq!(arabic_to_english_digits("ص: ٣٤"), "ص: 34");
        assert_eq!(arabic_to_english_digits("ص: 12"), "ص: 12");
        assert_eq!(arabic_to_english_digits("٠٩"), "09");
    }

    #[test]
    fn test_terminal_punctuation() {
        assert!(ends_with_terminal_punctuation("انتهى الكلام."));
        assert!(ends_with_terminal_punctuation("هل هذا صحيح؟"));
        assert!(ends_with_terminal_punctuation("قال: «كذا»"));
        assert!(ends_with_terminal_punctuation("نهاية ***  "));
        assert!(!ends_with_terminal_punctuation("ثم قال"));
        assert!(!ends_with_terminal_punctuation("الكلمة:"));
    }

    #[test]
    fn test_starts_with_letter() {
        assert!(starts_with_letter("والحمد لله"));
        assert!(starts_with_letter("  chapter one"));
        assert!(!starts_with_letter("(1) حاشية"));
        assert!(!starts_with_letter("١٢ باب"));
        assert!(!starts_with_letter(""));
    }

    fn book_with_pages(texts: &[&str]) -> ProcessedBook {
        let mut pages = BTreeMap::new();
        pages.insert(
            "".to_string(),
            texts
                .iter()
                .enumerate()
                .map(|(i, text)| PageRecord {
                    page_id: i as i64 + 1,
                    page_num: Some(i as i64 + 1),
                    part_title: String::new(),
                    cleaned_text: (*text).to_string(),
                    display_elem: String::new(),
                })
                .collect(),
        );
        ProcessedBook {
            book_id: 1,
            book_name: "x".into(),
            parts: vec!["".into()],
            pages,
            ..Default::default()
        }
    }

    #[test]
    fn test_markdown_joins_mid_sentence_pages() {
        let book = book_with_pages(&["قال المصنف رحمه الله", "والحمد لله رب العالمين."]);
        let text = assemble_markdown(&book);
        assert_eq!(text, "قال المصنف رحمه الله والحمد لله رب العالمين.");
    }

    #[test]
    fn test_markdown_breaks_after_terminal_punctuation() {
        let book = book_with_pages(&["انتهى الباب الأول.", "الباب الثاني"]);
        let text = assemble_markdown(&book);
        assert_eq!(text, "انتهى الباب الأول.\n\nالباب الثاني");
    }

    #[test]
    fn test_markdown_breaks_before_non_letter() {
        let book = book_with_pages(&["ثم قال", "(تنبيه) هذا مهم"]);
        let text = assemble_markdown(&book);
        assert!(text.contains("\n\n(تنبيه)"));
    }

    #[test]
    fn test_blank_runs_collapse() {
        assert_eq!(collapse_blank_runs("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n\nb"), "a\n\nb");
    }
}
