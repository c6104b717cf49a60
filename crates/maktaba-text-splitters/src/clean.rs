//! Strict normalization and HTML stripping.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static RE_FOOTNOTE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r#"(?s)<div class="footnote">.*?</div>"#).unwrap()
});
static RE_PAGEHEAD: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r#"(?s)<div class="PageHead">.*?</div>"#).unwrap()
});
static RE_SUP: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"(?s)<sup[^>]*>.*?</sup>").unwrap()
});
static RE_SUB: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"(?s)<sub[^>]*>.*?</sub>").unwrap()
});
static RE_EMPTY_P: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"<p></p>").unwrap()
});
static RE_BR: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"<br\s*/?>").unwrap()
});
static RE_HR: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"<hr[^>]*/?>").unwrap()
});
static RE_ALL_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"<[^>]+>").unwrap()
});
static RE_MULTI_NEWLINE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"\n{3,}").unwrap()
});

/// Convert an HTML fragment to plain text: drop footnote divs, page
/// heads, and superscripts; turn empty paragraphs and `<br>` into line
/// breaks; drop every remaining tag; collapse blank runs.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let text = RE_FOOTNOTE.replace_all(html, "");
    let text = RE_PAGEHEAD.replace_all(&text, "");
    let text = RE_SUP.replace_all(&text, "");
    let text = RE_SUB.replace_all(&text, "");
    let text = RE_EMPTY_P.replace_all(&text, "\n\n");
    let text = RE_BR.replace_all(&text, "\n");
    let text = RE_HR.replace_all(&text, "");
    let text = RE_ALL_TAGS.replace_all(&text, "");
    let text = RE_MULTI_NEWLINE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Strict normalization for length matching.
///
/// NFKC-normalizes, then keeps only Arabic letters (U+0621–U+064A),
/// Arabic-Indic digits (both ranges), and ASCII alphanumerics. Harakat,
/// tatweel, zero-width and direction marks, control characters,
/// punctuation, and all whitespace fall out of the keep set, so the
/// result is a bare letter-and-digit string whose character count is
/// stable across HTML re-rendering.
#[must_use]
pub fn clean(text: &str) -> String {
    text.nfkc().filter(|&c| is_kept(c)).collect()
}

fn is_kept(c: char) -> bool {
    ('\u{0621}'..='\u{064A}').contains(&c)
        || ('\u{0660}'..='\u{0669}').contains(&c)
        || ('\u{06F0}'..='\u{06F9}').contains(&c)
        || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_html_drops_footnotes_and_heads() {
        let html = r#"<div class="PageText">
            <div class="PageHead"><span class="PageNumber">ص: 3</span></div>
            <p>النص الأصلي<sup>1</sup></p>
            <div class="footnote"><p>(1) حاشية طويلة</p></div>
        </div>"#;
        let text = strip_html(html);
        assert!(text.contains("النص الأصلي"));
        assert!(!text.contains("حاشية"));
        assert!(!text.contains("ص: 3"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_strip_html_breaks() {
        assert_eq!(strip_html("a<p></p>b"), "a\n\nb");
        assert_eq!(strip_html("a<br/>b"), "a\nb");
        assert_eq!(strip_html("a<br >b"), "a\nb");
        assert_eq!(strip_html("a<hr />b"), "ab");
    }

    #[test]
    fn test_strip_html_collapses_blank_runs() {
        assert_eq!(strip_html("a<p></p><p></p><p></p>b"), "a\n\nb");
    }

    #[test]
    fn test_clean_strips_diacritics_and_tatweel() {
        // بِسْمِ with harakat and a tatweel
        assert_eq!(clean("بِسْـمِ"), "بسم");
    }

    #[test]
    fn test_clean_removes_whitespace_and_punctuation() {
        assert_eq!(clean("قال: نعم. (تمت)"), "قالنعمتمت");
        assert_eq!(clean("a b\tc\nd"), "abcd");
    }

    #[test]
    fn test_clean_keeps_digits() {
        assert_eq!(clean("صفحة ١٢ و 34"), "صفحة١٢و34");
    }

    #[test]
    fn test_clean_removes_invisible_marks() {
        // Zero-width joiner, non-joiner, RLM, BOM, soft hyphen.
        assert_eq!(clean("ك\u{200C}ت\u{200D}ا\u{200F}ب\u{FEFF}\u{00AD}"), "كتاب");
    }

    #[test]
    fn test_clean_normalizes_presentation_forms() {
        // NFKC folds Arabic presentation forms back to base letters.
        assert_eq!(clean("\u{FED3}"), "ف");
    }

    proptest! {
        #[test]
        fn prop_clean_is_idempotent(s in "\\PC{0,200}") {
            let once = clean(&s);
            prop_assert_eq!(clean(&once), once);
        }

        #[test]
        fn prop_clean_has_no_whitespace(s in "\\PC{0,200}") {
            prop_assert!(!clean(&s).chars().any(char::is_whitespace));
        }
    }
}
