//! Hand-engineered features for the feature-based CRF path.
//!
//! Each position of a sequence maps to a sparse set of named attributes
//! drawn from a fixed window (previous/current/next token). Extraction is
//! a pure function of the sequence and position; there is no hidden state.

use crate::error::{NamaeError, Result};
use crate::sequence::Sentence;

/// A sparse feature: attribute name plus value (1.0 for booleans).
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub value: f64,
}

impl Feature {
    fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 1.0,
        }
    }
}

/// Fixed UPOS tag to single-character mapping. Unmapped tags fall back to
/// the catch-all `X`.
fn pos_char(pos: &str) -> char {
    match pos {
        "ADJ" => 'A',
        "ADP" => 'S',
        "ADV" => 'R',
        "AUX" | "VERB" => 'V',
        "CCONJ" => 'C',
        "DET" => 'D',
        "INTJ" => 'I',
        "NOUN" => 'N',
        "NUM" => 'Z',
        "PART" => 'Y',
        "PRON" => 'P',
        "PROPN" => 'E',
        "PUNCT" => 'F',
        "SCONJ" => 'B',
        _ => 'X',
    }
}

/// Window feature extractor.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    with_pos: bool,
}

impl FeatureExtractor {
    pub fn new(with_pos: bool) -> Self {
        Self { with_pos }
    }

    pub fn with_pos(&self) -> bool {
        self.with_pos
    }

    /// Extract the features of position `i`.
    ///
    /// With POS features enabled, a token without a POS field is a
    /// configuration error: the dataset does not match the requested
    /// feature template.
    pub fn extract(&self, sentence: &Sentence, i: usize) -> Result<Vec<Feature>> {
        let tokens = sentence.tokens();
        let word = &tokens[i].form;

        let mut features = Vec::with_capacity(16);
        features.push(Feature::flag("bias"));
        features.push(Feature::flag(format!("low={}", word.to_lowercase())));
        features.push(Feature::flag(format!("suf3={}", suffix3(word))));
        if is_upper(word) {
            features.push(Feature::flag("isupper"));
        }
        if is_title(word) {
            features.push(Feature::flag("istitle"));
        }
        if is_digit(word) {
            features.push(Feature::flag("isdigit"));
        }
        if self.with_pos {
            features.push(Feature::flag(format!("pos={}", self.pos_of(sentence, i)?)));
        }

        if i > 0 {
            let prev = &tokens[i - 1].form;
            features.push(Feature::flag(format!("-1:low={}", prev.to_lowercase())));
            if is_title(prev) {
                features.push(Feature::flag("-1:istitle"));
            }
            if is_upper(prev) {
                features.push(Feature::flag("-1:isupper"));
            }
            if self.with_pos {
                features.push(Feature::flag(format!(
                    "-1:pos={}",
                    self.pos_of(sentence, i - 1)?
                )));
            }
        } else {
            features.push(Feature::flag("bos"));
        }

        if i + 1 < tokens.len() {
            let next = &tokens[i + 1].form;
            features.push(Feature::flag(format!("+1:low={}", next.to_lowercase())));
            if is_title(next) {
                features.push(Feature::flag("+1:istitle"));
            }
            if is_upper(next) {
                features.push(Feature::flag("+1:isupper"));
            }
            if self.with_pos {
                features.push(Feature::flag(format!(
                    "+1:pos={}",
                    self.pos_of(sentence, i + 1)?
                )));
            }
        } else {
            features.push(Feature::flag("eos"));
        }

        Ok(features)
    }

    /// Extract features for every position of a sequence.
    pub fn extract_all(&self, sentence: &Sentence) -> Result<Vec<Vec<Feature>>> {
        (0..sentence.len()).map(|i| self.extract(sentence, i)).collect()
    }

    fn pos_of(&self, sentence: &Sentence, i: usize) -> Result<char> {
        let token = &sentence.tokens()[i];
        let pos = token.pos.as_deref().ok_or_else(|| {
            NamaeError::Config(format!(
                "POS features requested but token `{}` has no POS field",
                token.form
            ))
        })?;
        Ok(pos_char(pos))
    }
}

/// Last three characters of the form, or the whole form when shorter.
fn suffix3(s: &str) -> String {
    let n = s.chars().count();
    s.chars().skip(n.saturating_sub(3)).collect()
}

/// At least one cased character and no lowercase ones.
fn is_upper(s: &str) -> bool {
    let mut cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

/// Title-cased: uppercase only at the start of each cased run.
fn is_title(s: &str) -> bool {
    let mut cased = false;
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if prev_cased {
                return false;
            }
            prev_cased = true;
            cased = true;
        } else if c.is_lowercase() {
            if !prev_cased {
                return false;
            }
            prev_cased = true;
            cased = true;
        } else {
            prev_cased = false;
        }
    }
    cased
}

fn is_digit(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
