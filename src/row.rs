//! Row types flowing through an import.
//!
//! A [`RawRow`] is what the file said, kept for error reporting. A
//! [`MappedRow`] is the same record keyed by canonical field, produced once by
//! [`HeaderMapping::map_record`](crate::header::HeaderMapping::map_record) and
//! consumed by validation and the write paths.

use std::sync::Arc;

use serde::{Serialize, Serializer, ser::SerializeMap};

/// Original header → value pairs in file order. Serializes as a JSON object
/// whose keys keep that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == header)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let value = self.values.get(idx).map(String::as_str).unwrap_or("");
                (header.as_str(), value)
            })
    }
}

impl Serialize for RawRow {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.headers.len()))?;
        for (header, value) in self.iter() {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRow {
    /// 1-based physical line where the record starts (the header is line 1).
    pub line: u64,
    pub raw: RawRow,
    pub name: Option<String>,
    pub email: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub socials: Vec<String>,
    pub author_links: Vec<String>,
    pub outlets: Option<String>,
    pub beats: Option<String>,
    pub countries: Option<String>,
}

impl MappedRow {
    pub fn empty(line: u64, raw: RawRow) -> Self {
        Self {
            line,
            raw,
            name: None,
            email: None,
            title: None,
            bio: None,
            socials: Vec::new(),
            author_links: Vec::new(),
            outlets: None,
            beats: None,
            countries: None,
        }
    }
}

/// Trimmed value, or `None` when nothing but whitespace is left.
pub fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits a comma-separated reference into trimmed, non-empty names.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
