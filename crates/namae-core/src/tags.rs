//! # IOB2 Tags for Named Entity Recognition
//!
//! Defines the label alphabet for sequence labeling. Uses the IOB2 tagging
//! scheme: `B-` marks the first token of an entity span, `I-` marks
//! continuation tokens, `O` marks non-entity tokens.

use serde::{Deserialize, Serialize};

use crate::error::{NamaeError, Result};

/// A single IOB2 tag. Entity kinds are indices into the owning [`TagSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Non-entity token.
    Outside,
    /// First token of an entity span of the given kind.
    Begin(usize),
    /// Continuation token of an entity span of the given kind.
    Inside(usize),
}

impl Tag {
    /// Check if this is a `B-` tag.
    pub fn is_begin(&self) -> bool {
        matches!(self, Tag::Begin(_))
    }

    /// Check if this is an `I-` tag.
    pub fn is_inside(&self) -> bool {
        matches!(self, Tag::Inside(_))
    }

    /// The entity kind index, if any.
    pub fn kind(&self) -> Option<usize> {
        match self {
            Tag::Outside => None,
            Tag::Begin(k) | Tag::Inside(k) => Some(*k),
        }
    }
}

/// The fixed, closed label alphabet of a model.
///
/// Index layout: `O` is 0, then `B-kind` at `1 + 2*k` and `I-kind` at
/// `2 + 2*k` in entity-kind order. The layout is part of the checkpoint
/// contract and must not change between training and inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    kinds: Vec<String>,
}

impl TagSet {
    /// Build an alphabet from entity kind names.
    pub fn new(kinds: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        if kinds.is_empty() {
            return Err(NamaeError::Config(
                "tag set needs at least one entity kind".into(),
            ));
        }
        for (i, a) in kinds.iter().enumerate() {
            if a.is_empty() || a.contains(char::is_whitespace) {
                return Err(NamaeError::Config(format!("invalid entity kind {a:?}")));
            }
            if kinds[..i].contains(a) {
                return Err(NamaeError::Config(format!("duplicate entity kind {a:?}")));
            }
        }
        Ok(Self { kinds })
    }

    /// The CoNLL-2002/2003 alphabet: LOC, MISC, ORG, PER.
    pub fn conll() -> Self {
        Self {
            kinds: ["LOC", "MISC", "ORG", "PER"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Number of distinct labels (`1 + 2 * kinds`).
    pub fn len(&self) -> usize {
        1 + 2 * self.kinds.len()
    }

    /// Always false: a valid tag set has at least `O` plus one kind.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Entity kind names in index order.
    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    /// Label index of a tag.
    pub fn index_of(&self, tag: Tag) -> usize {
        match tag {
            Tag::Outside => 0,
            Tag::Begin(k) => 1 + 2 * k,
            Tag::Inside(k) => 2 + 2 * k,
        }
    }

    /// Tag at a label index.
    pub fn tag(&self, index: usize) -> Option<Tag> {
        if index == 0 {
            Some(Tag::Outside)
        } else if index < self.len() {
            let k = (index - 1) / 2;
            if (index - 1) % 2 == 0 {
                Some(Tag::Begin(k))
            } else {
                Some(Tag::Inside(k))
            }
        } else {
            None
        }
    }

    /// All tags in index order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        (0..self.len()).filter_map(|i| self.tag(i))
    }

    /// Surface form of a tag (`O`, `B-LOC`, `I-PER`, ...).
    pub fn name(&self, tag: Tag) -> String {
        match tag {
            Tag::Outside => "O".to_string(),
            Tag::Begin(k) => format!("B-{}", self.kinds[k]),
            Tag::Inside(k) => format!("I-{}", self.kinds[k]),
        }
    }

    /// Parse a surface form. Unknown symbols are data errors.
    pub fn parse(&self, s: &str) -> Result<Tag> {
        if s == "O" {
            return Ok(Tag::Outside);
        }
        let (prefix, kind) = s
            .split_once('-')
            .ok_or_else(|| NamaeError::data(format!("unknown tag symbol `{s}`")))?;
        let k = self
            .kinds
            .iter()
            .position(|n| n == kind)
            .ok_or_else(|| NamaeError::data(format!("unknown entity kind in tag `{s}`")))?;
        match prefix {
            "B" => Ok(Tag::Begin(k)),
            "I" => Ok(Tag::Inside(k)),
            _ => Err(NamaeError::data(format!("unknown tag symbol `{s}`"))),
        }
    }

    /// Whether `from -> to` respects the IOB2 scheme: an `I-kind` may only
    /// directly follow `B-kind` or `I-kind` of the same kind.
    ///
    /// The decoder does not hard-mask invalid transitions; the model is
    /// expected to learn to avoid them. Gold sequences are rejected through
    /// [`validate_gold`](Self::validate_gold) instead.
    pub fn is_valid_transition(&self, from: Tag, to: Tag) -> bool {
        match to {
            Tag::Inside(k) => matches!(from, Tag::Begin(f) | Tag::Inside(f) if f == k),
            _ => true,
        }
    }

    /// Reject gold label sequences that violate the IOB2 scheme.
    ///
    /// An `I-` tag at the start of a sequence, or following a tag that is
    /// not `B-`/`I-` of the same kind, is a data error rather than a
    /// silently-scored path.
    pub fn validate_gold(&self, gold: &[Tag]) -> Result<()> {
        let mut prev = None;
        for (t, &tag) in gold.iter().enumerate() {
            if let Tag::Inside(k) = tag {
                let ok = matches!(prev, Some(Tag::Begin(f) | Tag::Inside(f)) if f == k);
                if !ok {
                    return Err(NamaeError::data_at(
                        format!(
                            "illegal gold transition into `{}` with no preceding B-{}/I-{}",
                            self.name(tag),
                            self.kinds[k],
                            self.kinds[k]
                        ),
                        format!("position {t}"),
                    ));
                }
            }
            prev = Some(tag);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_index_roundtrip() {
        let tags = TagSet::conll();
        assert_eq!(tags.len(), 9);
        for tag in tags.tags().collect::<Vec<_>>() {
            let idx = tags.index_of(tag);
            assert_eq!(tags.tag(idx), Some(tag));
        }
        assert_eq!(tags.tag(9), None);
    }

    #[test]
    fn surface_forms() {
        let tags = TagSet::conll();
        assert_eq!(tags.name(Tag::Outside), "O");
        assert_eq!(tags.name(Tag::Begin(0)), "B-LOC");
        assert_eq!(tags.name(Tag::Inside(3)), "I-PER");

        assert_eq!(tags.parse("O").unwrap(), Tag::Outside);
        assert_eq!(tags.parse("B-ORG").unwrap(), Tag::Begin(2));
        assert!(tags.parse("B-XYZ").is_err());
        assert!(tags.parse("S-LOC").is_err());
        assert!(tags.parse("MISC").is_err());
    }

    #[test]
    fn transition_validity() {
        let tags = TagSet::conll();
        assert!(tags.is_valid_transition(Tag::Begin(0), Tag::Inside(0)));
        assert!(tags.is_valid_transition(Tag::Inside(0), Tag::Inside(0)));
        assert!(tags.is_valid_transition(Tag::Outside, Tag::Begin(1)));
        assert!(tags.is_valid_transition(Tag::Begin(0), Tag::Outside));
        assert!(!tags.is_valid_transition(Tag::Outside, Tag::Inside(0)));
        assert!(!tags.is_valid_transition(Tag::Begin(0), Tag::Inside(1)));
    }

    #[test]
    fn gold_validation_rejects_orphan_inside() {
        let tags = TagSet::conll();
        // B-PER I-PER O B-LOC O is fine.
        let ok = [
            Tag::Begin(3),
            Tag::Inside(3),
            Tag::Outside,
            Tag::Begin(0),
            Tag::Outside,
        ];
        assert!(tags.validate_gold(&ok).is_ok());

        // O I-ORG has no preceding B-ORG.
        let bad = [Tag::Outside, Tag::Inside(2)];
        let err = tags.validate_gold(&bad).unwrap_err();
        assert!(err.to_string().contains("I-ORG"));

        // I-LOC at sequence start.
        assert!(tags.validate_gold(&[Tag::Inside(0)]).is_err());

        // I- after B- of a different kind.
        assert!(tags.validate_gold(&[Tag::Begin(0), Tag::Inside(1)]).is_err());
    }

    #[test]
    fn custom_alphabet() {
        let tags = TagSet::new(["TITLE", "GROUP"]).unwrap();
        assert_eq!(tags.len(), 5);
        assert_eq!(tags.parse("I-GROUP").unwrap(), Tag::Inside(1));
        assert!(TagSet::new(Vec::<String>::new()).is_err());
        assert!(TagSet::new(["LOC", "LOC"]).is_err());
    }
}
