//! Shared text utilities: tokenization and content hashing.
//!
//! Every component that turns catalog text into terms — the catalog keyword
//! bag, the sparse index, and query parsing — goes through [`tokenize`] so
//! that indexed terms and query terms always agree.

use sha2::{Digest, Sha256};

/// Split text into lowercase alphanumeric runs.
///
/// Any character outside `[a-z0-9]` (after lowercasing) is a delimiter.
/// No stemming, no stop words.
///
/// ```rust
/// use phenotype_index::text::tokenize;
///
/// assert_eq!(tokenize("Type-2 Diabetes"), vec!["type", "2", "diabetes"]);
/// assert_eq!(tokenize(""), Vec::<String>::new());
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// SHA-256 content hash of a text, hex-encoded.
///
/// Used as the key for the embedding cache: identical embedding input text
/// always maps to the same cache entry across rebuilds.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(
            tokenize("Atrial Fibrillation (AFib)"),
            vec!["atrial", "fibrillation", "afib"]
        );
    }

    #[test]
    fn test_tokenize_digits_kept() {
        assert_eq!(tokenize("ICD-10 E11.9"), vec!["icd", "10", "e11", "9"]);
    }

    #[test]
    fn test_tokenize_empty_and_punctuation() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("--- ;; !!").is_empty());
    }

    #[test]
    fn test_hash_text_stable() {
        let a = hash_text("heart failure");
        let b = hash_text("heart failure");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_text("heart failure "));
    }
}
