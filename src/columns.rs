//! Contact fields addressable by export columns and filter predicates.
//!
//! Column names are matched after snake-case normalization, so `Author Links`,
//! `authorLinks` and `author_links` all name the same field.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use heck::ToSnakeCase;
use itertools::Itertools;

use crate::model::{Contact, EntityRef};

/// Separator used when a multi-valued field is rendered into one cell. Chosen
/// so exported files re-import through the relationship splitter unchanged.
pub const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactField {
    Id,
    Name,
    Email,
    Title,
    Bio,
    Socials,
    AuthorLinks,
    Outlets,
    Beats,
    Countries,
    EmailVerified,
    CreatedAt,
    UpdatedAt,
}

impl ContactField {
    pub const ALL: [ContactField; 13] = [
        ContactField::Id,
        ContactField::Name,
        ContactField::Email,
        ContactField::Title,
        ContactField::Bio,
        ContactField::Socials,
        ContactField::AuthorLinks,
        ContactField::Outlets,
        ContactField::Beats,
        ContactField::Countries,
        ContactField::EmailVerified,
        ContactField::CreatedAt,
        ContactField::UpdatedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactField::Id => "id",
            ContactField::Name => "name",
            ContactField::Email => "email",
            ContactField::Title => "title",
            ContactField::Bio => "bio",
            ContactField::Socials => "socials",
            ContactField::AuthorLinks => "author_links",
            ContactField::Outlets => "outlets",
            ContactField::Beats => "beats",
            ContactField::Countries => "countries",
            ContactField::EmailVerified => "email_verified",
            ContactField::CreatedAt => "created_at",
            ContactField::UpdatedAt => "updated_at",
        }
    }

    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            ContactField::Socials
                | ContactField::AuthorLinks
                | ContactField::Outlets
                | ContactField::Beats
                | ContactField::Countries
        )
    }

    /// Every value the field holds for `contact`, one entry per element for
    /// multi-valued fields and an empty list for unset optional fields.
    pub fn values(&self, contact: &Contact) -> Vec<String> {
        match self {
            ContactField::Id => vec![contact.id.to_string()],
            ContactField::Name => vec![contact.name.clone()],
            ContactField::Email => vec![contact.email.clone()],
            ContactField::Title => contact.title.iter().cloned().collect(),
            ContactField::Bio => contact.bio.iter().cloned().collect(),
            ContactField::Socials => contact.socials.clone(),
            ContactField::AuthorLinks => contact.author_links.clone(),
            ContactField::Outlets => names(&contact.outlets),
            ContactField::Beats => names(&contact.beats),
            ContactField::Countries => names(&contact.countries),
            ContactField::EmailVerified => vec![contact.email_verified.to_string()],
            ContactField::CreatedAt => vec![contact.created_at.to_rfc3339()],
            ContactField::UpdatedAt => vec![contact.updated_at.to_rfc3339()],
        }
    }

    pub fn render(&self, contact: &Contact) -> String {
        self.values(contact).join(LIST_SEPARATOR)
    }
}

fn names(refs: &[EntityRef]) -> Vec<String> {
    refs.iter().map(|r| r.name.clone()).collect()
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_snake_case();
        let field = match key.as_str() {
            "id" => ContactField::Id,
            "name" | "full_name" => ContactField::Name,
            "email" | "e_mail" | "email_address" => ContactField::Email,
            "title" | "job_title" => ContactField::Title,
            "bio" | "biography" => ContactField::Bio,
            "socials" | "social" | "social_links" => ContactField::Socials,
            "author_links" | "author_link" => ContactField::AuthorLinks,
            "outlets" | "outlet" => ContactField::Outlets,
            "beats" | "beat" => ContactField::Beats,
            "countries" | "country" => ContactField::Countries,
            "email_verified" | "verified" => ContactField::EmailVerified,
            "created_at" | "created" => ContactField::CreatedAt,
            "updated_at" | "updated" => ContactField::UpdatedAt,
            _ => {
                return Err(anyhow!(
                    "Unknown contact column '{}'. Expected one of: {}",
                    value.trim(),
                    ContactField::ALL.iter().map(|f| f.as_str()).join(", ")
                ));
            }
        };
        Ok(field)
    }
}

/// Parses a comma-separated (and repeatable) column selection, preserving
/// order and dropping repeats.
pub fn parse_columns(specs: &[String]) -> Result<Vec<ContactField>> {
    let fields = specs
        .iter()
        .flat_map(|s| s.split(','))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ContactField::from_str)
        .collect::<Result<Vec<_>>>()?;
    Ok(fields.into_iter().unique().collect())
}
