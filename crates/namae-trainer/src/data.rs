//! IOB2 dataset loading and prediction output.
//!
//! File format: UTF-8 text, one token record per line, blank lines between
//! sentences. A record is `token tag` or `token POS tag`, whitespace
//! delimited. Malformed records and unknown tag symbols carry their line
//! number; in lenient mode the offending sentence is skipped with a
//! warning, otherwise loading fails.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::warn;

use namae_core::{NamaeError, Sentence, Tag, TagSet, Token};

use crate::error::Result;

/// Load a labeled IOB2 file.
pub fn load_iob2(path: impl AsRef<Path>, tags: &TagSet, lenient: bool) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| NamaeError::Config(format!("cannot open dataset {}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut sentences = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();
    let mut gold: Vec<Tag> = Vec::new();
    // Line number of the first record of the pending sentence, for context.
    let mut sentence_start = 0usize;
    let mut skip_current = false;

    let mut flush = |tokens: &mut Vec<Token>,
                     gold: &mut Vec<Tag>,
                     skip: &mut bool,
                     start: usize|
     -> Result<()> {
        if *skip {
            tokens.clear();
            gold.clear();
            *skip = false;
            return Ok(());
        }
        if tokens.is_empty() {
            return Ok(());
        }
        let sentence = Sentence::labeled(std::mem::take(tokens), std::mem::take(gold))?;
        match tags.validate_gold(sentence.gold().unwrap_or_default()) {
            Ok(()) => sentences.push(sentence),
            Err(e) if lenient => {
                warn!(line = start, error = %e, "skipping sentence with illegal gold labels")
            }
            Err(e) => {
                return Err(NamaeError::data_at(
                    e.to_string(),
                    format!("sentence starting at line {start}"),
                )
                .into());
            }
        }
        Ok(())
    };

    for (lineno, line) in reader.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            flush(&mut tokens, &mut gold, &mut skip_current, sentence_start)?;
            continue;
        }
        if skip_current {
            continue;
        }
        if tokens.is_empty() {
            sentence_start = lineno;
        }

        match parse_record(line, tags) {
            Ok((token, tag)) => {
                tokens.push(token);
                gold.push(tag);
            }
            Err(e) if lenient => {
                warn!(line = lineno, error = %e, "skipping sentence with malformed record");
                skip_current = true;
                tokens.clear();
                gold.clear();
            }
            Err(e) => {
                return Err(NamaeError::data_at(e.to_string(), format!("line {lineno}")).into());
            }
        }
    }
    flush(&mut tokens, &mut gold, &mut skip_current, sentence_start)?;

    Ok(sentences)
}

fn parse_record(line: &str, tags: &TagSet) -> namae_core::Result<(Token, Tag)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (token, tag) = match fields.as_slice() {
        [form, tag] => (Token::new(*form), tag),
        [form, pos, tag] => (Token::with_pos(*form, *pos), tag),
        _ => {
            return Err(NamaeError::data(format!(
                "record `{line}` has {} fields, expected `token tag` or `token POS tag`",
                fields.len()
            )));
        }
    };
    Ok((token, tags.parse(tag)?))
}

/// Emit decoded labels in the IOB2 convention of the input: one
/// `token label` pair per line, blank line between sequences, original
/// token order.
pub fn write_predictions<W: Write>(
    out: &mut W,
    sentences: &[Sentence],
    predictions: &[Vec<String>],
) -> Result<()> {
    for (sentence, labels) in sentences.iter().zip(predictions) {
        for (token, label) in sentence.tokens().iter().zip(labels) {
            writeln!(out, "{} {}", token.form, label)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
