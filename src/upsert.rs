//! Create-or-update of a single contact keyed by email.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;

use crate::{
    error::RepositoryResult,
    locks::KeyedLocks,
    model::{Contact, ContactUpdate, EntityKind, NewContact, RelationIds},
    repository::Repository,
    resolve::RelationshipResolver,
    validate::{FieldError, ValidatedContact},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    /// Every field this row carries was already set by a later row.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub contact: Contact,
    pub action: UpsertAction,
    pub warnings: Vec<FieldError>,
}

/// A validated contact with its relationship names turned into ids.
#[derive(Debug, Clone)]
pub struct ResolvedContact {
    pub contact: NewContact,
    pub warnings: Vec<FieldError>,
}

pub struct UpsertEngine<R: Repository + ?Sized> {
    repo: Arc<R>,
    resolver: RelationshipResolver<R>,
    locks: Arc<KeyedLocks>,
    ledger: LineLedger,
}

impl<R: Repository + ?Sized> UpsertEngine<R> {
    pub fn new(repo: Arc<R>, locks: Arc<KeyedLocks>, suggestion_limit: usize) -> Self {
        Self {
            resolver: RelationshipResolver::new(Arc::clone(&repo), Arc::clone(&locks), suggestion_limit),
            repo,
            locks,
            ledger: LineLedger::default(),
        }
    }

    /// Resolves outlets and beats (creating them as needed) and countries
    /// (lookup only). Unknown countries become warnings, not errors.
    pub async fn resolve(&self, contact: ValidatedContact) -> RepositoryResult<ResolvedContact> {
        let outlets = self
            .resolver
            .resolve_creatable(EntityKind::Outlet, &contact.outlets)
            .await?;
        let beats = self
            .resolver
            .resolve_creatable(EntityKind::Beat, &contact.beats)
            .await?;
        let countries = self
            .resolver
            .resolve_validated(EntityKind::Country, &contact.countries)
            .await?;

        let warnings = countries
            .warning(EntityKind::Country)
            .map(|message| vec![FieldError::new("countries", message)])
            .unwrap_or_default();

        Ok(ResolvedContact {
            contact: NewContact {
                name: contact.name,
                email: contact.email,
                title: contact.title,
                bio: contact.bio,
                socials: contact.socials,
                author_links: contact.author_links,
                relations: RelationIds {
                    outlets,
                    beats,
                    countries: countries.valid_ids,
                },
            },
            warnings,
        })
    }

    /// Writes one contact. An existing record gets a selective update with
    /// every relationship set replaced; a new one is created unverified.
    pub async fn upsert(&self, contact: ValidatedContact, line: u64) -> RepositoryResult<UpsertOutcome> {
        let resolved = self.resolve(contact).await?;
        self.write(resolved, line).await
    }

    /// `line` orders rows that share an email: whatever arrives first, the
    /// stored record ends up as if the rows had been applied in line order.
    pub async fn write(&self, resolved: ResolvedContact, line: u64) -> RepositoryResult<UpsertOutcome> {
        let ResolvedContact { contact, warnings } = resolved;
        let email = contact.email.clone();
        let _guard = self.locks.lock(format!("contact:{email}")).await;
        let mut lines = self.ledger.get(&email);

        let (contact, action) = match self.repo.find_contact_by_email(&email).await? {
            Some(existing) => {
                match lines.admit(line, contact.as_update(), existing.relation_ids()) {
                    Some(update) => {
                        debug!("Updating contact {} ({}) from line {line}", existing.id, existing.email);
                        let updated = self.repo.update_contact(existing.id, update).await?;
                        (updated, UpsertAction::Updated)
                    }
                    None => {
                        debug!("Line {line} for {email} is superseded by a later row");
                        (existing, UpsertAction::Superseded)
                    }
                }
            }
            None => {
                lines = FieldLines::created(line, &contact);
                let created = self.repo.create_contact(contact).await?;
                debug!("Created contact {} ({})", created.id, created.email);
                (created, UpsertAction::Created)
            }
        };
        self.ledger.set(email, lines);
        Ok(UpsertOutcome {
            contact,
            action,
            warnings,
        })
    }
}

/// Line of the latest row that set each field of one record during this
/// run. Zero means no row has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldLines {
    name: u64,
    title: u64,
    bio: u64,
    socials: u64,
    author_links: u64,
    relations: u64,
}

impl FieldLines {
    fn created(line: u64, contact: &NewContact) -> Self {
        let present = |set: bool| if set { line } else { 0 };
        Self {
            name: line,
            title: present(contact.title.is_some()),
            bio: present(contact.bio.is_some()),
            socials: present(!contact.socials.is_empty()),
            author_links: present(!contact.author_links.is_empty()),
            relations: line,
        }
    }

    /// Narrows `update` to the fields no later row has set yet and claims
    /// them for `line`. Superseded relationship sets keep `current`.
    /// `None` when nothing is left to write.
    fn admit(&mut self, line: u64, update: ContactUpdate, current: RelationIds) -> Option<ContactUpdate> {
        let relations_win = line > self.relations;
        let admitted = ContactUpdate {
            name: claim(&mut self.name, line, update.name),
            title: claim(&mut self.title, line, update.title),
            bio: claim(&mut self.bio, line, update.bio),
            socials: claim(&mut self.socials, line, update.socials),
            author_links: claim(&mut self.author_links, line, update.author_links),
            relations: if relations_win {
                self.relations = line;
                update.relations
            } else {
                current
            },
        };
        let changed = relations_win
            || admitted.name.is_some()
            || admitted.title.is_some()
            || admitted.bio.is_some()
            || admitted.socials.is_some()
            || admitted.author_links.is_some();
        changed.then_some(admitted)
    }
}

fn claim<T>(slot: &mut u64, line: u64, value: Option<T>) -> Option<T> {
    let value = value.filter(|_| line > *slot)?;
    *slot = line;
    Some(value)
}

/// Per-email [`FieldLines`] for one run. Read and written only while the
/// email's key lock is held.
#[derive(Default)]
struct LineLedger {
    entries: Mutex<HashMap<String, FieldLines>>,
}

impl LineLedger {
    fn get(&self, email: &str) -> FieldLines {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(email)
            .copied()
            .unwrap_or_default()
    }

    fn set(&self, email: String, lines: FieldLines) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(email, lines);
    }
}
