//! Persisted record types shared by the repository and the pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ContactId = u64;
pub type EntityId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Outlet,
    Beat,
    Country,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Outlet => "outlet",
            EntityKind::Beat => "beat",
            EntityKind::Country => "country",
        }
    }

    /// Countries are a fixed reference set; the pipeline only looks them up.
    pub fn is_creatable(&self) -> bool {
        !matches!(self, EntityKind::Country)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Entity {
    pub fn as_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// A related entity as seen from a contact: id plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub email: String,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub socials: Vec<String>,
    pub author_links: Vec<String>,
    pub email_verified: bool,
    pub outlets: Vec<EntityRef>,
    pub beats: Vec<EntityRef>,
    pub countries: Vec<EntityRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn relation_ids(&self) -> RelationIds {
        let ids = |refs: &[EntityRef]| refs.iter().map(|r| r.id).collect();
        RelationIds {
            outlets: ids(&self.outlets),
            beats: ids(&self.beats),
            countries: ids(&self.countries),
        }
    }
}

/// Resolved relationship ids for one contact, one set per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationIds {
    pub outlets: Vec<EntityId>,
    pub beats: Vec<EntityId>,
    pub countries: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub email: String,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub socials: Vec<String>,
    pub author_links: Vec<String>,
    pub relations: RelationIds,
}

/// Selective update: `None` leaves the stored value untouched. Relationship
/// sets are always replaced, the empty set included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub socials: Option<Vec<String>>,
    pub author_links: Option<Vec<String>>,
    pub relations: RelationIds,
}

impl NewContact {
    /// The update applied when this contact turns out to exist already.
    pub fn as_update(&self) -> ContactUpdate {
        ContactUpdate {
            name: Some(self.name.clone()),
            title: self.title.clone(),
            bio: self.bio.clone(),
            socials: non_empty(&self.socials),
            author_links: non_empty(&self.author_links),
            relations: self.relations.clone(),
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
