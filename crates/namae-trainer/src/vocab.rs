//! Token and character vocabularies for the neural path.
//!
//! Index 0 is the padding symbol and index 1 the unknown symbol; corpus
//! entries start at 2, so a pad id can never collide with a real entry.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use namae_core::checkpoint::write_atomic;
use namae_core::{NamaeError, Sentence};

use crate::error::Result;

pub const PAD_TOKEN: &str = "<pad>";
pub const PAD_ID: u32 = 0;
pub const UNK_TOKEN: &str = "<unk>";
pub const UNK_ID: u32 = 1;

/// A frozen id mapping over words or characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocab {
    entries: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl Vocab {
    fn from_entries(entries: Vec<String>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        Self { entries, index }
    }

    /// Build a word vocabulary from a corpus, most frequent first.
    /// Words below `threshold` occurrences map to `<unk>`.
    pub fn build(
        sentences: &[Sentence],
        lowercase: bool,
        threshold: usize,
    ) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for sentence in sentences {
            for token in sentence.tokens() {
                let form = if lowercase {
                    token.form.to_lowercase()
                } else {
                    token.form.clone()
                };
                *counts.entry(form).or_insert(0) += 1;
            }
        }
        Self::from_counts(counts, threshold)
    }

    /// Build a character vocabulary from a corpus.
    pub fn build_chars(sentences: &[Sentence], threshold: usize) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for sentence in sentences {
            for token in sentence.tokens() {
                for c in token.form.chars() {
                    *counts.entry(c.to_string()).or_insert(0) += 1;
                }
            }
        }
        Self::from_counts(counts, threshold)
    }

    fn from_counts(counts: HashMap<String, usize>, threshold: usize) -> Self {
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n >= threshold.max(1))
            .collect();
        // Frequency order, ties alphabetical: deterministic ids.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut entries = vec![PAD_TOKEN.to_string(), UNK_TOKEN.to_string()];
        entries.extend(ranked.into_iter().map(|(w, _)| w));
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map an entry to its id, falling back to `<unk>`.
    pub fn id(&self, entry: &str) -> u32 {
        self.index.get(entry).copied().unwrap_or(UNK_ID)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| NamaeError::Checkpoint(format!("cannot serialize vocabulary: {e}")))?;
        write_atomic(path.as_ref(), &bytes)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let entries: Vec<String> = serde_json::from_slice(&bytes).map_err(|e| {
            NamaeError::Checkpoint(format!("cannot parse vocabulary {}: {e}", path.display()))
        })?;
        if entries.len() < 2 || entries[0] != PAD_TOKEN || entries[1] != UNK_TOKEN {
            return Err(NamaeError::Checkpoint(format!(
                "vocabulary {} is missing the <pad>/<unk> prefix",
                path.display()
            ))
            .into());
        }
        Ok(Self::from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namae_core::Token;

    fn corpus() -> Vec<Sentence> {
        vec![
            Sentence::new(vec![
                Token::new("the"),
                Token::new("EU"),
                Token::new("the"),
            ]),
            Sentence::new(vec![Token::new("Madrid")]),
        ]
    }

    #[test]
    fn pad_and_unk_are_reserved() {
        let vocab = Vocab::build(&corpus(), false, 1);
        assert_eq!(vocab.id(PAD_TOKEN), PAD_ID);
        assert_eq!(vocab.id(UNK_TOKEN), UNK_ID);
        assert_eq!(vocab.id("never-seen"), UNK_ID);
        // `the` occurs twice and ranks first after the prefix.
        assert_eq!(vocab.id("the"), 2);
        assert!(vocab.id("Madrid") > 1);
    }

    #[test]
    fn lowercasing_folds_forms() {
        let sentences = vec![Sentence::new(vec![Token::new("Madrid"), Token::new("madrid")])];
        let plain = Vocab::build(&sentences, false, 1);
        let folded = Vocab::build(&sentences, true, 1);
        assert_eq!(plain.len(), 4);
        assert_eq!(folded.len(), 3);
    }

    #[test]
    fn threshold_drops_rare_words() {
        let vocab = Vocab::build(&corpus(), false, 2);
        assert_eq!(vocab.id("Madrid"), UNK_ID);
        assert_eq!(vocab.id("the"), 2);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let vocab = Vocab::build(&corpus(), false, 1);
        vocab.save(&path).unwrap();
        let loaded = Vocab::load(&path).unwrap();
        assert_eq!(loaded.len(), vocab.len());
        assert_eq!(loaded.id("the"), vocab.id("the"));
    }

    #[test]
    fn char_vocab_covers_corpus() {
        let vocab = Vocab::build_chars(&corpus(), 1);
        assert!(vocab.id("M") > 1);
        assert_eq!(vocab.id("@"), UNK_ID);
    }
}
