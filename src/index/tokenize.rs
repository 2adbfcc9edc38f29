//! Query and document tokenization.
//!
//! One tokenizer serves both sides of the index: lowercase, split on
//! non-alphanumeric boundaries, emit unigrams of at least two characters.
//! Stopwords are kept — a user typing "how do i" must be able to match
//! those words, and the TF-IDF weighting already discounts them.

/// Minimum emitted token length. Single characters are noise in both
/// documents and queries.
pub const MIN_TOKEN_LEN: usize = 2;

/// Tokenize `text` into lowercase unigrams, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    tokenize_with_positions(text)
        .into_iter()
        .map(|(token, _)| token)
        .collect()
}

/// Tokenize with each token's ordinal position among emitted tokens.
pub fn tokenize_with_positions(text: &str) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    let mut position = 0u32;
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let token = raw.to_lowercase();
        if token.chars().count() >= MIN_TOKEN_LEN {
            out.push((token, position));
            position += 1;
        }
    }
    out
}
