//! Tokenization shared by checklist linkage and fuzzy outcome matching.
//!
//! Both stages compare free text (issue criteria) with code identifiers
//! (symbols, paths, test names), so the tokenizer splits on camelCase
//! boundaries as well as punctuation, and folds common English suffixes so
//! that `confirmation`, `confirmed` and `confirm` share a token.
//!
//! # Pipeline
//!
//! ```text
//! "sendConfirmation_email" -> [send, Confirmation, email]   (split)
//!                          -> [send, confirmation, email]   (lowercase)
//!                          -> [send, confirm, email]        (stem)
//!                          -> {confirm, email, send}        (stopwords, min length)
//! ```

use std::collections::BTreeSet;

/// Tokens shorter than this are not significant.
pub const DEFAULT_MIN_TOKEN_LEN: usize = 3;

/// Words that never count as a shared token.
///
/// English function words plus identifiers that appear in every derived test
/// name or path and would otherwise match everything.
pub const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "autoqa", "be", "by", "can", "each",
    "for", "from", "in", "index", "into", "is", "it", "lib", "main", "mod", "must", "of", "on",
    "or", "shall", "should", "src", "app", "test", "tests", "that", "the", "this", "to", "when",
    "will", "with",
];

/// Suffixes folded by [`stem`], tried in order.
const SUFFIXES: &[&str] = &[
    "ations", "ation", "ated", "ate", "ions", "ion", "ings", "ing", "ers", "er", "ed", "es", "s",
    "e",
];

/// Minimum stem length left after removing a suffix.
const MIN_STEM_LEN: usize = 4;

/// Folds one common suffix off a lowercase word.
///
/// A suffix is removed only when at least four characters remain; otherwise
/// the next suffix is tried. Words ending in `ss` keep their final `s`.
#[must_use]
pub fn stem(word: &str) -> String {
    for suffix in SUFFIXES {
        if *suffix == "s" && word.ends_with("ss") {
            continue;
        }
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.chars().count() >= MIN_STEM_LEN {
                return stem.to_string();
            }
        }
    }
    word.to_string()
}

/// Splits text into lowercase words on non-alphanumerics and camelCase
/// boundaries, preserving order.
#[must_use]
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    for chunk in text.split(|c: char| !c.is_alphanumeric()) {
        if chunk.is_empty() {
            continue;
        }
        split_camel(chunk, &mut words);
    }
    words
}

fn split_camel(chunk: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = chunk.chars().collect();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // fooBar | HTTPServer
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Replaces every non-alphanumeric character with `_`.
#[must_use]
pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Configurable tokenizer producing significant, stemmed tokens.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    min_len: usize,
    stopwords: BTreeSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TOKEN_LEN)
    }
}

impl Tokenizer {
    /// Creates a tokenizer with the built-in stopwords.
    #[must_use]
    pub fn new(min_len: usize) -> Self {
        Self {
            min_len,
            stopwords: STOPWORDS.iter().map(|word| (*word).to_string()).collect(),
        }
    }

    /// Adds stopwords on top of the built-in list.
    #[must_use]
    pub fn with_extra_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stopwords
            .extend(words.into_iter().map(|word| word.as_ref().to_lowercase()));
        self
    }

    /// Minimum significant token length.
    #[must_use]
    pub const fn min_len(&self) -> usize {
        self.min_len
    }

    /// Whether `word` (lowercase) is a stopword.
    #[must_use]
    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// Significant tokens in order of first appearance, without duplicates.
    #[must_use]
    pub fn token_list(&self, text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut tokens = Vec::new();
        for word in split_words(text) {
            if self.is_stopword(&word) {
                continue;
            }
            let token = stem(&word);
            if token.chars().count() < self.min_len || self.is_stopword(&token) {
                continue;
            }
            if seen.insert(token.clone()) {
                tokens.push(token);
            }
        }
        tokens
    }

    /// Significant tokens as a set.
    #[must_use]
    pub fn tokens(&self, text: &str) -> BTreeSet<String> {
        self.token_list(text).into_iter().collect()
    }
}
