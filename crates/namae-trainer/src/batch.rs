//! Padded, masked, length-sorted batches for the neural path.
//!
//! Sequences are grouped into fixed-size batches, sorted within each batch
//! by descending true length (stable, so equal lengths keep their original
//! order), and padded to the batch maximum. The sort permutation is
//! carried explicitly so predictions can be restored to the original
//! order: `unsort(sort(x)) == x` for every batch.

use namae_core::{NamaeError, Sentence, TagSet};

use crate::error::Result;
use crate::vocab::{PAD_ID, Vocab};

/// One encoded sequence: word ids, per-token character ids, label ids.
#[derive(Debug, Clone)]
pub struct Example {
    pub words: Vec<u32>,
    pub chars: Vec<Vec<u32>>,
    pub labels: Vec<u32>,
}

impl Example {
    /// Encode a labeled sequence through the vocabularies.
    pub fn encode(
        sentence: &Sentence,
        vocab: &Vocab,
        char_vocab: &Vocab,
        tags: &TagSet,
        lowercase: bool,
    ) -> Result<Self> {
        let gold = sentence
            .gold()
            .ok_or_else(|| NamaeError::data("training sequence has no gold labels"))?;
        if sentence.is_empty() {
            return Err(NamaeError::data("cannot encode an empty sequence").into());
        }
        let words = sentence
            .tokens()
            .iter()
            .map(|t| {
                if lowercase {
                    vocab.id(&t.form.to_lowercase())
                } else {
                    vocab.id(&t.form)
                }
            })
            .collect();
        let chars = sentence
            .tokens()
            .iter()
            .map(|t| t.form.chars().map(|c| char_vocab.id(&c.to_string())).collect())
            .collect();
        let labels = gold.iter().map(|&t| tags.index_of(t) as u32).collect();
        Ok(Self {
            words,
            chars,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A padded batch plus the bookkeeping to undo its internal sort.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `B x T` word ids, padded with [`PAD_ID`].
    pub words: Vec<Vec<u32>>,
    /// `B x T x W` character ids, padded with [`PAD_ID`].
    pub chars: Vec<Vec<Vec<u32>>>,
    /// `B x T` label ids, padded with the reserved label pad id.
    pub labels: Vec<Vec<u32>>,
    /// `B x T`; `true` marks a padded position.
    pub mask: Vec<Vec<bool>>,
    /// True lengths, descending.
    pub lengths: Vec<usize>,
    /// `orig_idx[j]` is the original position of sorted row `j`.
    orig_idx: Vec<usize>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.words.len()
    }

    pub fn max_len(&self) -> usize {
        self.lengths.first().copied().unwrap_or(0)
    }

    /// Restore per-row results to the order the sequences arrived in.
    pub fn unsort<T: Clone>(&self, sorted: &[T]) -> Vec<T> {
        debug_assert_eq!(sorted.len(), self.orig_idx.len());
        let mut out = sorted.to_vec();
        for (j, item) in sorted.iter().enumerate() {
            out[self.orig_idx[j]] = item.clone();
        }
        out
    }
}

/// Groups encoded sequences into padded batches.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    batch_size: usize,
    /// One past the label alphabet; never a real label and always masked.
    label_pad: u32,
}

impl Batcher {
    pub fn new(batch_size: usize, num_labels: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(NamaeError::Config("batch_size must be positive".into()).into());
        }
        Ok(Self {
            batch_size,
            label_pad: num_labels as u32,
        })
    }

    pub fn label_pad(&self) -> u32 {
        self.label_pad
    }

    /// Chunk the dataset in arrival order, then sort and pad each chunk.
    pub fn batches(&self, examples: &[Example]) -> Vec<Batch> {
        examples
            .chunks(self.batch_size)
            .map(|chunk| self.pack(chunk))
            .collect()
    }

    fn pack(&self, chunk: &[Example]) -> Batch {
        let mut order: Vec<usize> = (0..chunk.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(chunk[i].len()));

        let max_len = order.first().map(|&i| chunk[i].len()).unwrap_or(0);
        let max_word = chunk
            .iter()
            .flat_map(|e| e.chars.iter().map(Vec::len))
            .max()
            .unwrap_or(0);

        let mut words = Vec::with_capacity(chunk.len());
        let mut chars = Vec::with_capacity(chunk.len());
        let mut labels = Vec::with_capacity(chunk.len());
        let mut mask = Vec::with_capacity(chunk.len());
        let mut lengths = Vec::with_capacity(chunk.len());

        for &i in &order {
            let example = &chunk[i];
            let len = example.len();

            let mut w = example.words.clone();
            w.resize(max_len, PAD_ID);
            words.push(w);

            let mut cs: Vec<Vec<u32>> = example
                .chars
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.resize(max_word, PAD_ID);
                    c
                })
                .collect();
            cs.resize(max_len, vec![PAD_ID; max_word]);
            chars.push(cs);

            let mut l = example.labels.clone();
            l.resize(max_len, self.label_pad);
            labels.push(l);

            let mut m = vec![false; len];
            m.resize(max_len, true);
            mask.push(m);

            lengths.push(len);
        }

        Batch {
            words,
            chars,
            labels,
            mask,
            lengths,
            orig_idx: order,
        }
    }
}
