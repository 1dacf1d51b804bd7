//! Token sequences consumed by the CRF engine.
//!
//! The core is agnostic to file syntax; readers hand over pre-parsed
//! sequences and sequences are immutable once built.

use crate::error::{NamaeError, Result};
use crate::tags::Tag;

/// A single token: raw text form plus an optional POS tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub form: String,
    pub pos: Option<String>,
}

impl Token {
    pub fn new(form: impl Into<String>) -> Self {
        Self {
            form: form.into(),
            pos: None,
        }
    }

    pub fn with_pos(form: impl Into<String>, pos: impl Into<String>) -> Self {
        Self {
            form: form.into(),
            pos: Some(pos.into()),
        }
    }
}

/// An ordered token sequence, optionally carrying gold labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    tokens: Vec<Token>,
    gold: Option<Vec<Tag>>,
}

impl Sentence {
    /// An unlabeled sequence (inference input).
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, gold: None }
    }

    /// A labeled sequence (training input). The label array must match the
    /// token array in length.
    pub fn labeled(tokens: Vec<Token>, gold: Vec<Tag>) -> Result<Self> {
        if tokens.len() != gold.len() {
            return Err(NamaeError::data(format!(
                "sequence has {} tokens but {} labels",
                tokens.len(),
                gold.len()
            )));
        }
        Ok(Self {
            tokens,
            gold: Some(gold),
        })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn gold(&self) -> Option<&[Tag]> {
        self.gold.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
