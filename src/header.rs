//! Header normalization and column → canonical field mapping.
//!
//! Headers are cleaned (leading byte-order mark stripped, whitespace trimmed)
//! and then matched by their snake-case form against an alias table, so
//! `E-mail`, `Email Address` and `emailAddress` all land on
//! [`CanonicalField::Email`]. Socials and author links may be spread across
//! several columns (`social_1`, `Twitter`, `LinkedIn`, ...); every other field
//! binds to the first matching column and later repeats are reported as
//! unmapped.
//!
//! Mapping fails, before any row is read, when a required field has no
//! column. `first_name`/`last_name` columns satisfy `name`.

use std::{fmt, sync::Arc};

use csv::StringRecord;
use heck::ToSnakeCase;
use log::{debug, warn};

use crate::{
    error::HeaderError,
    row::{MappedRow, RawRow, non_blank, split_list},
};

const BYTE_ORDER_MARK: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Name,
    Email,
    Title,
    Bio,
    Socials,
    AuthorLinks,
    Outlets,
    Beats,
    Countries,
    FirstName,
    LastName,
}

impl CanonicalField {
    pub const REQUIRED: [CanonicalField; 2] = [CanonicalField::Name, CanonicalField::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Name => "name",
            CanonicalField::Email => "email",
            CanonicalField::Title => "title",
            CanonicalField::Bio => "bio",
            CanonicalField::Socials => "socials",
            CanonicalField::AuthorLinks => "author_links",
            CanonicalField::Outlets => "outlets",
            CanonicalField::Beats => "beats",
            CanonicalField::Countries => "countries",
            CanonicalField::FirstName => "first_name",
            CanonicalField::LastName => "last_name",
        }
    }

    fn allows_multiple_columns(&self) -> bool {
        matches!(self, CanonicalField::Socials | CanonicalField::AuthorLinks)
    }

    /// Resolves a cleaned header to its canonical field, if any.
    pub fn from_header(header: &str) -> Option<Self> {
        let key = header.to_snake_case();
        if let Some(field) = Self::from_key(&key) {
            return Some(field);
        }
        // Numbered repeats such as `social_2` or `author_link3`.
        let base = key
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches('_');
        if base.len() < key.len() {
            return Self::from_key(base).filter(|field| field.allows_multiple_columns());
        }
        None
    }

    fn from_key(key: &str) -> Option<Self> {
        let field = match key {
            "name" | "full_name" | "contact_name" => CanonicalField::Name,
            "email" | "e_mail" | "email_address" => CanonicalField::Email,
            "title" | "job_title" | "position" | "role" => CanonicalField::Title,
            "bio" | "biography" | "about" => CanonicalField::Bio,
            "socials" | "social" | "social_links" | "social_media" | "twitter" | "linked_in"
            | "linkedin" | "instagram" | "facebook" | "bluesky" | "mastodon" | "threads" => {
                CanonicalField::Socials
            }
            "author_links" | "author_link" | "author_url" | "author_page" => {
                CanonicalField::AuthorLinks
            }
            "outlet" | "outlets" | "publication" | "publications" | "media_outlet" => {
                CanonicalField::Outlets
            }
            "beat" | "beats" | "topic" | "topics" => CanonicalField::Beats,
            "country" | "countries" => CanonicalField::Countries,
            "first_name" | "firstname" | "given_name" => CanonicalField::FirstName,
            "last_name" | "lastname" | "surname" | "family_name" => CanonicalField::LastName,
            _ => return None,
        };
        Some(field)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips a leading byte-order mark and surrounding whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches(BYTE_ORDER_MARK).trim().to_string()
}

#[derive(Debug, Clone)]
pub struct HeaderMapping {
    headers: Arc<[String]>,
    columns: Vec<Option<CanonicalField>>,
    unmapped: Vec<String>,
}

impl HeaderMapping {
    pub fn from_headers<S: AsRef<str>>(raw_headers: &[S]) -> Result<Self, HeaderError> {
        let headers: Vec<String> = raw_headers
            .iter()
            .map(|h| normalize_header(h.as_ref()))
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(HeaderError::Empty);
        }

        let mut columns = Vec::with_capacity(headers.len());
        let mut unmapped = Vec::new();
        let mut bound: Vec<CanonicalField> = Vec::new();
        for header in &headers {
            let field = CanonicalField::from_header(header).filter(|field| {
                field.allows_multiple_columns() || !bound.contains(field)
            });
            match field {
                Some(field) => {
                    debug!("Column '{header}' -> {field}");
                    bound.push(field);
                }
                None if !header.is_empty() => unmapped.push(header.clone()),
                None => {}
            }
            columns.push(field);
        }

        let missing: Vec<String> = CanonicalField::REQUIRED
            .iter()
            .filter(|required| {
                let legacy_name =
                    **required == CanonicalField::Name && bound.contains(&CanonicalField::FirstName);
                !bound.contains(required) && !legacy_name
            })
            .map(|field| field.as_str().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(HeaderError::MissingRequired(missing));
        }
        if !unmapped.is_empty() {
            warn!("Ignoring unmapped column(s): {}", unmapped.join(", "));
        }

        Ok(Self {
            headers: headers.into(),
            columns,
            unmapped,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    pub fn field_for(&self, header: &str) -> Option<CanonicalField> {
        self.headers
            .iter()
            .position(|h| h == header)
            .and_then(|idx| self.columns[idx])
    }

    /// Applies the column table to one record. Legacy first/last name columns
    /// fill `name` when no full-name value is present.
    pub fn map_record(&self, line: u64, record: &StringRecord) -> MappedRow {
        let values: Vec<String> = (0..self.headers.len())
            .map(|idx| record.get(idx).unwrap_or("").to_string())
            .collect();
        let mut row = MappedRow::empty(line, RawRow::new(self.headers.clone(), Vec::new()));
        let mut first_name = None;
        let mut last_name = None;

        for (field, value) in self.columns.iter().zip(&values) {
            let Some(field) = field else {
                continue;
            };
            match field {
                CanonicalField::Name => row.name = non_blank(value),
                CanonicalField::Email => row.email = non_blank(value),
                CanonicalField::Title => row.title = non_blank(value),
                CanonicalField::Bio => row.bio = non_blank(value),
                CanonicalField::Socials => row.socials.extend(split_list(value)),
                CanonicalField::AuthorLinks => row.author_links.extend(split_list(value)),
                CanonicalField::Outlets => row.outlets = non_blank(value),
                CanonicalField::Beats => row.beats = non_blank(value),
                CanonicalField::Countries => row.countries = non_blank(value),
                CanonicalField::FirstName => first_name = non_blank(value),
                CanonicalField::LastName => last_name = non_blank(value),
            }
        }

        if row.name.is_none() {
            let parts: Vec<String> = first_name.into_iter().chain(last_name).collect();
            if !parts.is_empty() {
                row.name = Some(parts.join(" "));
            }
        }
        row.raw = RawRow::new(self.headers.clone(), values);
        row
    }
}

/// A record whose every field is empty or whitespace carries no data.
pub fn is_blank_record(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}
