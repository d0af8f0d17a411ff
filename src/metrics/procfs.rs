//! Parsing helpers for kernel-exposed text files.
//!
//! Everything here works on text that has already been fetched; nothing
//! touches the remote host. Lines that do not fit the expected shape are
//! skipped rather than reported, since real `/proc` files routinely carry
//! blank or non-conforming trailing lines.

use crate::error::{ExporterError, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// Parse a trimmed base-10 integer.
pub fn as_integer(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .map_err(|e| ExporterError::format_error(format!("{:?} is not an integer: {}", trimmed, e)))
}

/// Parse a trimmed base-10 float.
pub fn as_float(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    trimmed
        .parse::<f64>()
        .map_err(|e| ExporterError::format_error(format!("{:?} is not a number: {}", trimmed, e)))
}

/// Split trimmed text on runs of whitespace.
pub fn as_tokens(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Split trimmed text on a separator pattern.
pub fn as_tokens_by<'a>(text: &'a str, separator: &Regex) -> Vec<&'a str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    separator.split(trimmed).collect()
}

/// Key/value lines plus any header rows that preceded them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTable<V> {
    /// The skipped leading lines, verbatim
    pub header: Vec<String>,
    /// Entries ordered by key
    pub entries: BTreeMap<String, V>,
}

impl<V> ParsedTable<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Skip `skip_rows` lines, then split every remaining line on the first
/// `separator`. Later duplicates overwrite earlier ones.
pub fn as_key_value(text: &str, separator: &str, skip_rows: usize) -> ParsedTable<String> {
    let mut entries = BTreeMap::new();
    let header = split_rows(text, separator, skip_rows, |key, value| {
        entries.insert(key, value);
    });
    ParsedTable { header, entries }
}

/// Like [`as_key_value`], but repeated keys collect their values in order.
pub fn as_key_value_list(
    text: &str,
    separator: &str,
    skip_rows: usize,
) -> ParsedTable<Vec<String>> {
    let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let header = split_rows(text, separator, skip_rows, |key, value| {
        entries.entry(key).or_default().push(value);
    });
    ParsedTable { header, entries }
}

fn split_rows<F>(text: &str, separator: &str, skip_rows: usize, mut sink: F) -> Vec<String>
where
    F: FnMut(String, String),
{
    let mut lines = text.lines();
    let header: Vec<String> = lines.by_ref().take(skip_rows).map(str::to_string).collect();

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(separator) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        sink(key.to_string(), value.trim().to_string());
    }

    header
}
