//! Export filter predicates.
//!
//! Filters use the same small grammar as the command line: `field=value`,
//! `field!=value`, `field contains value`, `startswith`, `endswith`, and the
//! ordering operators (`>`, `>=`, `<`, `<=`) which are only meaningful on `id`.
//! Multi-valued fields (outlets, beats, countries, socials, author links)
//! match when any element matches; `!=` matches when no element is equal.

use anyhow::{Result, anyhow};

use crate::{columns::ContactField, model::Contact};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub field: ContactField,
    pub operator: ComparisonOperator,
    pub raw_value: String,
}

/// A conjunction of conditions. The empty filter matches every contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactFilter {
    pub conditions: Vec<FilterCondition>,
}

impl ContactFilter {
    pub fn parse(filters: &[String]) -> Result<Self> {
        Ok(Self {
            conditions: parse_filters(filters)?,
        })
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        self.conditions
            .iter()
            .all(|condition| evaluate_condition(condition, contact))
    }
}

pub fn parse_filters(filters: &[String]) -> Result<Vec<FilterCondition>> {
    filters.iter().map(|f| parse_filter(f)).collect()
}

fn parse_filter(filter: &str) -> Result<FilterCondition> {
    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty filter expression"));
    }

    let lowered = trimmed.to_ascii_lowercase();
    for (needle, op) in [
        (" contains ", ComparisonOperator::Contains),
        (" startswith ", ComparisonOperator::StartsWith),
        (" endswith ", ComparisonOperator::EndsWith),
    ] {
        if let Some(idx) = lowered.find(needle) {
            let (left, right_with_space) = trimmed.split_at(idx);
            let right = right_with_space[needle.len()..].trim();
            return build_condition(left, op, right);
        }
    }

    // Two-character operators first so `<=` is not read as `<`.
    for (needle, op) in [
        ("!=", ComparisonOperator::NotEq),
        (">=", ComparisonOperator::Ge),
        ("<=", ComparisonOperator::Le),
        ("=", ComparisonOperator::Eq),
        (">", ComparisonOperator::Gt),
        ("<", ComparisonOperator::Lt),
    ] {
        if let Some(idx) = trimmed.find(needle) {
            return build_condition(&trimmed[..idx], op, &trimmed[idx + needle.len()..]);
        }
    }

    Err(anyhow!("Failed to parse filter expression '{trimmed}'"))
}

fn build_condition(left: &str, operator: ComparisonOperator, right: &str) -> Result<FilterCondition> {
    let field: ContactField = left.trim().parse()?;
    let raw_value = unquote(right.trim()).to_string();
    let ordering = matches!(
        operator,
        ComparisonOperator::Gt | ComparisonOperator::Ge | ComparisonOperator::Lt | ComparisonOperator::Le
    );
    if ordering {
        if field != ContactField::Id {
            return Err(anyhow!(
                "Ordering comparisons are only supported on 'id', not '{field}'"
            ));
        }
        raw_value
            .parse::<u64>()
            .map_err(|_| anyhow!("Filter value '{raw_value}' for 'id' is not a number"))?;
    }
    Ok(FilterCondition {
        field,
        operator,
        raw_value,
    })
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn evaluate_condition(condition: &FilterCondition, contact: &Contact) -> bool {
    use ComparisonOperator::*;

    if condition.field == ContactField::Id {
        let Ok(rhs) = condition.raw_value.parse::<u64>() else {
            return matches!(condition.operator, NotEq);
        };
        let id = contact.id;
        return match condition.operator {
            Eq => id == rhs,
            NotEq => id != rhs,
            Gt => id > rhs,
            Ge => id >= rhs,
            Lt => id < rhs,
            Le => id <= rhs,
            Contains | StartsWith | EndsWith => {
                text_matches(condition.operator, &id.to_string(), &condition.raw_value)
            }
        };
    }

    let values = condition.field.values(contact);
    match condition.operator {
        NotEq => values.iter().all(|v| v != &condition.raw_value),
        Gt | Ge | Lt | Le => false,
        op => values
            .iter()
            .any(|value| text_matches(op, value, &condition.raw_value)),
    }
}

/// Equality is exact; substring operators ignore case.
fn text_matches(operator: ComparisonOperator, value: &str, needle: &str) -> bool {
    match operator {
        ComparisonOperator::Eq => value == needle,
        ComparisonOperator::Contains => value.to_lowercase().contains(&needle.to_lowercase()),
        ComparisonOperator::StartsWith => {
            value.to_lowercase().starts_with(&needle.to_lowercase())
        }
        ComparisonOperator::EndsWith => value.to_lowercase().ends_with(&needle.to_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::EntityRef;

    fn contact() -> Contact {
        let now = Utc::now();
        Contact {
            id: 7,
            name: "Dana Reyes".into(),
            email: "dana@example.com".into(),
            title: Some("Editor".into()),
            bio: None,
            socials: vec!["@dana".into()],
            author_links: Vec::new(),
            email_verified: false,
            outlets: vec![
                EntityRef {
                    id: 1,
                    name: "Acme Times".into(),
                },
                EntityRef {
                    id: 2,
                    name: "Daily Ledger".into(),
                },
            ],
            beats: Vec::new(),
            countries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parses_word_and_symbol_operators() {
        let conditions = parse_filters(&[
            "outlets contains acme".into(),
            "title = 'Editor'".into(),
            "id >= 3".into(),
        ])
        .expect("filters");
        assert_eq!(conditions[0].operator, ComparisonOperator::Contains);
        assert_eq!(conditions[0].field, ContactField::Outlets);
        assert_eq!(conditions[1].raw_value, "Editor");
        assert_eq!(conditions[2].operator, ComparisonOperator::Ge);
    }

    #[test]
    fn multi_valued_fields_match_any_element() {
        let filter = ContactFilter::parse(&["outlets=Daily Ledger".into()]).unwrap();
        assert!(filter.matches(&contact()));
        let filter = ContactFilter::parse(&["outlets!=Daily Ledger".into()]).unwrap();
        assert!(!filter.matches(&contact()));
    }

    #[test]
    fn unset_optional_field_never_equals() {
        let filter = ContactFilter::parse(&["bio contains x".into()]).unwrap();
        assert!(!filter.matches(&contact()));
        let filter = ContactFilter::parse(&["bio!=x".into()]).unwrap();
        assert!(filter.matches(&contact()));
    }

    #[test]
    fn ordering_is_rejected_outside_id() {
        assert!(parse_filters(&["name > b".into()]).is_err());
        assert!(parse_filters(&["id > abc".into()]).is_err());
    }

    #[test]
    fn id_ordering_compares_numerically() {
        let filter = ContactFilter::parse(&["id > 6".into(), "id<10".into()]).unwrap();
        assert!(filter.matches(&contact()));
    }
}
