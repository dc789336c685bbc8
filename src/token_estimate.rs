//! Token-count estimation without a tokenizer dependency.
//!
//! This crate's dependency tree, like the codebase it's built from, carries
//! no `tiktoken`-family crate. A whitespace/punctuation word-count
//! heuristic (~0.75 tokens per word) is close enough for the Context Pack
//! Builder's soft size budget and the classifier's length signal; neither
//! needs exact provider-side tokenization.

/// Approximate token count for `text`.
///
/// Rounds up so budget checks stay conservative (slight over-estimate,
/// never under).
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 0.75).ceil() as usize + punctuation_bonus(text)
}

/// Punctuation and code-fence markers often tokenize as extra tokens beyond
/// the word count; add a small flat bonus per occurrence so short,
/// punctuation-heavy text (e.g. code) isn't under-counted.
fn punctuation_bonus(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c, '`' | '{' | '}' | '(' | ')' | ';' | ':'))
        .count()
        / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn longer_text_estimates_more_tokens() {
        let short = estimate_tokens("one two three");
        let long = estimate_tokens("one two three four five six seven eight nine ten");
        assert!(long > short);
    }

    #[test]
    fn estimate_is_monotonic_in_word_count() {
        let a = estimate_tokens("a b c d");
        let b = estimate_tokens("a b c d e f g h");
        assert!(b >= a);
    }
}
