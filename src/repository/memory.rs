//! In-memory [`Repository`] with optional JSON snapshot persistence.
//!
//! State lives behind a `std::sync::RwLock`; every trait method takes the
//! lock once, so each call is atomic with respect to the others. The CLI
//! loads a snapshot before a run and saves it afterwards, which is enough to
//! give the tool durable state without an external database.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NameMatch, Repository, Transaction, TransactionReceipt};
use crate::{
    error::{RepositoryError, RepositoryResult},
    filter::ContactFilter,
    model::{
        Contact, ContactId, ContactUpdate, Entity, EntityId, EntityKind, EntityRef, NewContact,
        RelationIds,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredContact {
    id: ContactId,
    name: String,
    email: String,
    title: Option<String>,
    bio: Option<String>,
    socials: Vec<String>,
    author_links: Vec<String>,
    email_verified: bool,
    relations: RelationIds,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// On-disk layout. Indexes are rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    next_contact_id: ContactId,
    #[serde(default)]
    next_entity_id: EntityId,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    contacts: Vec<StoredContact>,
}

#[derive(Debug, Default)]
struct State {
    next_contact_id: ContactId,
    next_entity_id: EntityId,
    contacts: BTreeMap<ContactId, StoredContact>,
    by_email: HashMap<String, ContactId>,
    entities: BTreeMap<EntityId, Entity>,
    by_name: HashMap<(EntityKind, String), EntityId>,
}

impl State {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = State {
            next_contact_id: snapshot.next_contact_id,
            next_entity_id: snapshot.next_entity_id,
            ..State::default()
        };
        for entity in snapshot.entities {
            state.next_entity_id = state.next_entity_id.max(entity.id);
            state
                .by_name
                .insert((entity.kind, entity.name.clone()), entity.id);
            state.entities.insert(entity.id, entity);
        }
        for contact in snapshot.contacts {
            state.next_contact_id = state.next_contact_id.max(contact.id);
            state.by_email.insert(contact.email.clone(), contact.id);
            state.contacts.insert(contact.id, contact);
        }
        state
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_contact_id: self.next_contact_id,
            next_entity_id: self.next_entity_id,
            entities: self.entities.values().cloned().collect(),
            contacts: self.contacts.values().cloned().collect(),
        }
    }

    fn insert_entity(&mut self, kind: EntityKind, name: &str) -> Entity {
        self.next_entity_id += 1;
        let entity = Entity {
            id: self.next_entity_id,
            kind,
            name: name.to_string(),
            description: None,
            website: None,
        };
        self.by_name.insert((kind, entity.name.clone()), entity.id);
        self.entities.insert(entity.id, entity.clone());
        entity
    }

    fn check_relations(&self, relations: &RelationIds) -> RepositoryResult<()> {
        for (kind, ids) in [
            (EntityKind::Outlet, &relations.outlets),
            (EntityKind::Beat, &relations.beats),
            (EntityKind::Country, &relations.countries),
        ] {
            for id in ids {
                let known = self
                    .entities
                    .get(id)
                    .is_some_and(|entity| entity.kind == kind);
                if !known {
                    return Err(RepositoryError::NotFound {
                        entity: kind.as_str(),
                        key: id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn insert_contact(&mut self, contact: NewContact) -> ContactId {
        let now = Utc::now();
        self.next_contact_id += 1;
        let id = self.next_contact_id;
        self.by_email.insert(contact.email.clone(), id);
        self.contacts.insert(
            id,
            StoredContact {
                id,
                name: contact.name,
                email: contact.email,
                title: contact.title,
                bio: contact.bio,
                socials: contact.socials,
                author_links: contact.author_links,
                email_verified: false,
                relations: dedup_relations(contact.relations),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn apply_update(&mut self, id: ContactId, update: ContactUpdate) -> RepositoryResult<()> {
        let stored = self
            .contacts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "contact",
                key: id.to_string(),
            })?;
        if let Some(name) = update.name {
            stored.name = name;
        }
        if let Some(title) = update.title {
            stored.title = Some(title);
        }
        if let Some(bio) = update.bio {
            stored.bio = Some(bio);
        }
        if let Some(socials) = update.socials {
            stored.socials = socials;
        }
        if let Some(links) = update.author_links {
            stored.author_links = links;
        }
        stored.relations = dedup_relations(update.relations);
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn view(&self, stored: &StoredContact) -> Contact {
        let refs = |ids: &[EntityId]| -> Vec<EntityRef> {
            ids.iter()
                .filter_map(|id| self.entities.get(id))
                .map(Entity::as_ref)
                .collect()
        };
        Contact {
            id: stored.id,
            name: stored.name.clone(),
            email: stored.email.clone(),
            title: stored.title.clone(),
            bio: stored.bio.clone(),
            socials: stored.socials.clone(),
            author_links: stored.author_links.clone(),
            email_verified: stored.email_verified,
            outlets: refs(&stored.relations.outlets),
            beats: refs(&stored.relations.beats),
            countries: refs(&stored.relations.countries),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }

    fn contact(&self, id: ContactId) -> RepositoryResult<Contact> {
        self.contacts
            .get(&id)
            .map(|stored| self.view(stored))
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "contact",
                key: id.to_string(),
            })
    }
}

fn dedup_relations(relations: RelationIds) -> RelationIds {
    fn dedup(ids: Vec<EntityId>) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        ids.into_iter().filter(|id| seen.insert(*id)).collect()
    }
    RelationIds {
        outlets: dedup(relations.outlets),
        beats: dedup(relations.beats),
        countries: dedup(relations.countries),
    }
}

pub struct MemoryRepository {
    state: RwLock<State>,
    writes: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            writes: AtomicU64::new(0),
        }
    }

    /// Repository pre-seeded with the given country reference set.
    pub fn with_countries<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let repo = Self::new();
        if let Ok(mut state) = repo.state.write() {
            for name in names {
                let name = name.as_ref().trim();
                if !name.is_empty() && !state.by_name.contains_key(&(EntityKind::Country, name.to_string())) {
                    state.insert_entity(EntityKind::Country, name);
                }
            }
        }
        repo
    }

    /// Adds countries that are not present yet. Returns how many were added.
    pub fn seed_countries<I, S>(&self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.write().context("Seeding countries")?;
        let mut added = 0;
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || state.by_name.contains_key(&(EntityKind::Country, name.to_string())) {
                continue;
            }
            state.insert_entity(EntityKind::Country, name);
            added += 1;
        }
        Ok(added)
    }

    /// Loads a snapshot, or starts empty when `path` does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path).with_context(|| format!("Opening store file {path:?}"))?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing store file {path:?}"))?;
        Ok(Self {
            state: RwLock::new(State::from_snapshot(snapshot)),
            writes: AtomicU64::new(0),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.read().context("Reading store state")?.to_snapshot();
        let file = File::create(path).with_context(|| format!("Creating store file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)
            .with_context(|| format!("Writing store file {path:?}"))
    }

    /// Number of successful mutating calls since construction.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        self.read()
            .map(|state| {
                state
                    .entities
                    .values()
                    .filter(|entity| entity.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> RepositoryResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> RepositoryResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".into()))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_contact_by_email(&self, email: &str) -> RepositoryResult<Option<Contact>> {
        let state = self.read()?;
        Ok(state
            .by_email
            .get(email)
            .and_then(|id| state.contacts.get(id))
            .map(|stored| state.view(stored)))
    }

    async fn find_contacts_by_emails(&self, emails: &[String]) -> RepositoryResult<Vec<Contact>> {
        let state = self.read()?;
        let unique: HashSet<&String> = emails.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|email| state.by_email.get(email))
            .filter_map(|id| state.contacts.get(id))
            .map(|stored| state.view(stored))
            .collect())
    }

    async fn create_contact(&self, contact: NewContact) -> RepositoryResult<Contact> {
        let mut state = self.write()?;
        if state.by_email.contains_key(&contact.email) {
            return Err(RepositoryError::UniqueViolation {
                field: "email",
                value: contact.email,
            });
        }
        state.check_relations(&contact.relations)?;
        let id = state.insert_contact(contact);
        self.record_write();
        state.contact(id)
    }

    async fn update_contact(
        &self,
        id: ContactId,
        update: ContactUpdate,
    ) -> RepositoryResult<Contact> {
        let mut state = self.write()?;
        state.check_relations(&update.relations)?;
        state.apply_update(id, update)?;
        self.record_write();
        state.contact(id)
    }

    async fn create_many_contacts(
        &self,
        contacts: Vec<NewContact>,
        skip_duplicates: bool,
    ) -> RepositoryResult<u64> {
        let mut state = self.write()?;
        let accepted = admit_creates(&state, contacts, skip_duplicates)?;
        let created = accepted.len() as u64;
        for contact in accepted {
            state.insert_contact(contact);
        }
        if created > 0 {
            self.record_write();
        }
        Ok(created)
    }

    async fn transact(&self, tx: Transaction) -> RepositoryResult<TransactionReceipt> {
        let mut state = self.write()?;
        // Everything that can fail is checked before the first write.
        let accepted = admit_creates(&state, tx.creates, tx.skip_duplicates)?;
        for (id, update) in &tx.updates {
            if !state.contacts.contains_key(id) {
                return Err(RepositoryError::NotFound {
                    entity: "contact",
                    key: id.to_string(),
                });
            }
            state.check_relations(&update.relations)?;
        }

        let created = accepted.len() as u64;
        for contact in accepted {
            state.insert_contact(contact);
        }
        let updated = tx.updates.len() as u64;
        for (id, update) in tx.updates {
            state.apply_update(id, update)?;
        }
        if created + updated > 0 {
            self.record_write();
        }
        Ok(TransactionReceipt { created, updated })
    }

    async fn find_entity(
        &self,
        kind: EntityKind,
        name: &str,
        matching: NameMatch,
    ) -> RepositoryResult<Option<Entity>> {
        let state = self.read()?;
        let found = match matching {
            NameMatch::Exact => state
                .by_name
                .get(&(kind, name.to_string()))
                .and_then(|id| state.entities.get(id)),
            NameMatch::IgnoreCase => {
                let wanted = name.to_lowercase();
                state
                    .entities
                    .values()
                    .find(|entity| entity.kind == kind && entity.name.to_lowercase() == wanted)
            }
        };
        Ok(found.cloned())
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> RepositoryResult<Entity> {
        if !kind.is_creatable() {
            return Err(RepositoryError::Immutable(kind));
        }
        let mut state = self.write()?;
        if state.by_name.contains_key(&(kind, name.to_string())) {
            return Err(RepositoryError::UniqueViolation {
                field: "name",
                value: name.to_string(),
            });
        }
        let entity = state.insert_entity(kind, name);
        self.record_write();
        Ok(entity)
    }

    async fn search_entities(
        &self,
        kind: EntityKind,
        needle: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<Entity>> {
        let state = self.read()?;
        let needle = needle.to_lowercase();
        Ok(state
            .entities
            .values()
            .filter(|entity| entity.kind == kind && entity.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn contacts_page(
        &self,
        filter: &ContactFilter,
        after: Option<ContactId>,
        limit: usize,
    ) -> RepositoryResult<Vec<Contact>> {
        let state = self.read()?;
        let start = after.map_or(0, |id| id.saturating_add(1));
        Ok(state
            .contacts
            .range(start..)
            .map(|(_, stored)| state.view(stored))
            .filter(|contact| filter.matches(contact))
            .take(limit)
            .collect())
    }

    async fn count_contacts(&self) -> RepositoryResult<u64> {
        Ok(self.read()?.contacts.len() as u64)
    }
}

/// Applies unique-email semantics to a pending create-many, including
/// duplicates inside the same call.
fn admit_creates(
    state: &State,
    contacts: Vec<NewContact>,
    skip_duplicates: bool,
) -> RepositoryResult<Vec<NewContact>> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let duplicate =
            state.by_email.contains_key(&contact.email) || !seen.insert(contact.email.clone());
        if duplicate {
            if skip_duplicates {
                continue;
            }
            return Err(RepositoryError::UniqueViolation {
                field: "email",
                value: contact.email,
            });
        }
        state.check_relations(&contact.relations)?;
        accepted.push(contact);
    }
    Ok(accepted)
}
