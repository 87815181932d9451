//! Field-level rules for a mapped row. Pure: no I/O, no storage.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::row::{MappedRow, split_list};

/// A message scoped to one field of one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A row that passed validation. Relationship references are already split
/// into trimmed names but not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedContact {
    pub name: String,
    pub email: String,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub socials: Vec<String>,
    pub author_links: Vec<String>,
    pub outlets: Vec<String>,
    pub beats: Vec<String>,
    pub countries: Vec<String>,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
    })
}

pub fn is_valid_email(value: &str) -> bool {
    email_pattern().is_match(value)
}

/// Checks required fields and formats, collecting every failure rather than
/// stopping at the first.
pub fn validate_row(row: &MappedRow) -> Result<ValidatedContact, Vec<FieldError>> {
    let mut errors = Vec::new();

    if row.name.is_none() {
        errors.push(FieldError::new("name", "Name is required"));
    }
    match row.email.as_deref() {
        None => errors.push(FieldError::new("email", "Email is required")),
        Some(email) if !is_valid_email(email) => {
            errors.push(FieldError::new("email", format!("Invalid email address '{email}'")))
        }
        Some(_) => {}
    }

    let (Some(name), Some(email)) = (row.name.clone(), row.email.clone()) else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let list = |value: &Option<String>| value.as_deref().map(split_list).unwrap_or_default();
    Ok(ValidatedContact {
        name,
        email,
        title: row.title.clone(),
        bio: row.bio.clone(),
        socials: row.socials.clone(),
        author_links: row.author_links.clone(),
        outlets: list(&row.outlets),
        beats: list(&row.beats),
        countries: list(&row.countries),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::row::RawRow;

    fn row(name: Option<&str>, email: Option<&str>) -> MappedRow {
        let headers: Arc<[String]> = Vec::<String>::new().into();
        let mut row = MappedRow::empty(1, RawRow::new(headers, Vec::new()));
        row.name = name.map(str::to_string);
        row.email = email.map(str::to_string);
        row
    }

    #[test]
    fn accepts_well_formed_row() {
        let mut input = row(Some("Ada"), Some("ada@example.com"));
        input.outlets = Some("Acme Times, ,Daily Ledger".into());
        let contact = validate_row(&input).expect("valid");
        assert_eq!(contact.outlets, vec!["Acme Times", "Daily Ledger"]);
        assert!(contact.countries.is_empty());
    }

    #[test]
    fn collects_all_field_errors() {
        let errors = validate_row(&row(None, None)).unwrap_err();
        let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "email"]);
    }

    #[test]
    fn rejects_malformed_email() {
        let errors = validate_row(&row(Some("Ada"), Some("ada@example"))).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("ada@example"));
    }

    #[test]
    fn email_format_rules() {
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaced out@example.com"));
    }
}
