//! Storage contract consumed by the import/export pipeline.
//!
//! The pipeline never owns a storage client. Every component takes an
//! injected `Arc<R>` where `R: Repository`, so the same code runs against the
//! JSON-snapshot [`memory::MemoryRepository`], a production backend, or a test
//! double. [`timed::TimedRepository`] decorates any backend with a per-call
//! deadline.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_contact_by_email`](Repository::find_contact_by_email) | Unique lookup on the natural key |
//! | [`find_contacts_by_emails`](Repository::find_contacts_by_emails) | Batched existence check |
//! | [`create_contact`](Repository::create_contact) | Insert one contact with relations |
//! | [`update_contact`](Repository::update_contact) | Selective update, relation sets replaced |
//! | [`create_many_contacts`](Repository::create_many_contacts) | Bulk insert, optionally duplicate-tolerant |
//! | [`transact`](Repository::transact) | Atomic create-many plus updates |
//! | [`find_entity`](Repository::find_entity) | Unique lookup of an outlet/beat/country by name |
//! | [`create_entity`](Repository::create_entity) | Create an outlet or beat |
//! | [`search_entities`](Repository::search_entities) | Case-insensitive substring search |
//! | [`contacts_page`](Repository::contacts_page) | Cursor page of filtered contacts |

pub mod memory;
pub mod timed;

use async_trait::async_trait;

use crate::{
    error::RepositoryResult,
    filter::ContactFilter,
    model::{Contact, ContactId, ContactUpdate, Entity, EntityKind, NewContact},
};

/// How an entity name lookup compares names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact,
    IgnoreCase,
}

/// Writes applied atomically by [`Repository::transact`]: either every write
/// lands or none does.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub creates: Vec<NewContact>,
    pub skip_duplicates: bool,
    pub updates: Vec<(ContactId, ContactUpdate)>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub created: u64,
    pub updated: u64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_contact_by_email(&self, email: &str) -> RepositoryResult<Option<Contact>>;

    /// Returns the contacts that exist among `emails`, in no particular order.
    async fn find_contacts_by_emails(&self, emails: &[String]) -> RepositoryResult<Vec<Contact>>;

    /// Fails with `UniqueViolation` when the email is taken.
    async fn create_contact(&self, contact: NewContact) -> RepositoryResult<Contact>;

    async fn update_contact(
        &self,
        id: ContactId,
        update: ContactUpdate,
    ) -> RepositoryResult<Contact>;

    /// Inserts all `contacts`. With `skip_duplicates`, a record whose email is
    /// taken is silently skipped; otherwise the whole call fails. Returns the
    /// number inserted.
    async fn create_many_contacts(
        &self,
        contacts: Vec<NewContact>,
        skip_duplicates: bool,
    ) -> RepositoryResult<u64>;

    async fn transact(&self, tx: Transaction) -> RepositoryResult<TransactionReceipt>;

    async fn find_entity(
        &self,
        kind: EntityKind,
        name: &str,
        matching: NameMatch,
    ) -> RepositoryResult<Option<Entity>>;

    /// Fails with `Immutable` for countries and `UniqueViolation` when the
    /// name already exists.
    async fn create_entity(&self, kind: EntityKind, name: &str) -> RepositoryResult<Entity>;

    async fn search_entities(
        &self,
        kind: EntityKind,
        needle: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<Entity>>;

    /// Up to `limit` contacts matching `filter` with id strictly greater than
    /// `after`, ordered by ascending id.
    async fn contacts_page(
        &self,
        filter: &ContactFilter,
        after: Option<ContactId>,
        limit: usize,
    ) -> RepositoryResult<Vec<Contact>>;

    async fn count_contacts(&self) -> RepositoryResult<u64>;
}
