//! Token and word counting.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

static ENCODER: LazyLock<CoreBPE> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // The vocabulary ships with the binary
    tiktoken_rs::o200k_base().expect("o200k_base vocabulary loads")
});

/// Count BPE tokens (o200k_base) in `text`.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    ENCODER.encode_ordinary(text).len()
}

/// Count whitespace-separated words in `text`.
#[must_use]
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_scales_with_text() {
        assert_eq!(count_tokens(""), 0);
        let short = count_tokens("بسم الله الرحمن الرحيم");
        let long = count_tokens(&"بسم الله الرحمن الرحيم ".repeat(10));
        assert!(short > 0);
        assert!(long > short * 5);
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("  واحد  اثنان\nثلاثة "), 3);
        assert_eq!(count_words("one two three four five six seven"), 7);
    }
}
