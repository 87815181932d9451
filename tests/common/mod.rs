#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use contact_ledger::{
    error::{RepositoryError, RepositoryResult},
    filter::ContactFilter,
    model::{Contact, ContactId, ContactUpdate, Entity, EntityKind, NewContact, RelationIds},
    repository::{
        NameMatch, Repository, Transaction, TransactionReceipt, memory::MemoryRepository,
    },
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

/// `name,email` CSV with `count` distinct, valid contacts.
pub fn contacts_csv(count: usize) -> String {
    let mut csv = String::from("name,email\n");
    for idx in 0..count {
        csv.push_str(&format!("Person {idx},person{idx}@example.com\n"));
    }
    csv
}

pub fn new_contact(email: &str) -> NewContact {
    NewContact {
        name: format!("Contact {email}"),
        email: email.to_string(),
        title: None,
        bio: None,
        socials: Vec::new(),
        author_links: Vec::new(),
        relations: RelationIds::default(),
    }
}

/// Wraps a [`MemoryRepository`], counting calls and optionally injecting
/// faults or latency.
pub struct InstrumentedRepository {
    pub inner: MemoryRepository,
    page_sizes: Mutex<Vec<usize>>,
    writes: AtomicU64,
    /// Write calls allowed to succeed before every further write fails with
    /// `Unavailable`.
    fail_writes_after: Option<u64>,
    /// Latency added to every contact lookup by email.
    lookup_delay: Duration,
    lookups_in_flight: AtomicU64,
    peak_lookups: AtomicU64,
}

impl InstrumentedRepository {
    pub fn new(inner: MemoryRepository) -> Self {
        Self {
            inner,
            page_sizes: Mutex::new(Vec::new()),
            writes: AtomicU64::new(0),
            fail_writes_after: None,
            lookup_delay: Duration::ZERO,
            lookups_in_flight: AtomicU64::new(0),
            peak_lookups: AtomicU64::new(0),
        }
    }

    pub fn failing_writes_after(mut self, allowed: u64) -> Self {
        self.fail_writes_after = Some(allowed);
        self
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Sizes of every page returned by `contacts_page`, in call order.
    pub fn page_sizes(&self) -> Vec<usize> {
        self.page_sizes.lock().unwrap().clone()
    }

    /// Mutating calls attempted, successful or not.
    pub fn write_attempts(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Most email lookups ever running at the same time.
    pub fn peak_concurrent_lookups(&self) -> u64 {
        self.peak_lookups.load(Ordering::SeqCst)
    }

    fn admit_write(&self) -> RepositoryResult<()> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst);
        match self.fail_writes_after {
            Some(allowed) if attempt >= allowed => {
                Err(RepositoryError::Unavailable("injected storage outage".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Repository for InstrumentedRepository {
    async fn find_contact_by_email(&self, email: &str) -> RepositoryResult<Option<Contact>> {
        let running = self.lookups_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_lookups.fetch_max(running, Ordering::SeqCst);
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
        let found = self.inner.find_contact_by_email(email).await;
        self.lookups_in_flight.fetch_sub(1, Ordering::SeqCst);
        found
    }

    async fn find_contacts_by_emails(&self, emails: &[String]) -> RepositoryResult<Vec<Contact>> {
        self.inner.find_contacts_by_emails(emails).await
    }

    async fn create_contact(&self, contact: NewContact) -> RepositoryResult<Contact> {
        self.admit_write()?;
        self.inner.create_contact(contact).await
    }

    async fn update_contact(
        &self,
        id: ContactId,
        update: ContactUpdate,
    ) -> RepositoryResult<Contact> {
        self.admit_write()?;
        self.inner.update_contact(id, update).await
    }

    async fn create_many_contacts(
        &self,
        contacts: Vec<NewContact>,
        skip_duplicates: bool,
    ) -> RepositoryResult<u64> {
        self.admit_write()?;
        self.inner
            .create_many_contacts(contacts, skip_duplicates)
            .await
    }

    async fn transact(&self, tx: Transaction) -> RepositoryResult<TransactionReceipt> {
        self.admit_write()?;
        self.inner.transact(tx).await
    }

    async fn find_entity(
        &self,
        kind: EntityKind,
        name: &str,
        matching: NameMatch,
    ) -> RepositoryResult<Option<Entity>> {
        self.inner.find_entity(kind, name, matching).await
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> RepositoryResult<Entity> {
        self.admit_write()?;
        self.inner.create_entity(kind, name).await
    }

    async fn search_entities(
        &self,
        kind: EntityKind,
        needle: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<Entity>> {
        self.inner.search_entities(kind, needle, limit).await
    }

    async fn contacts_page(
        &self,
        filter: &ContactFilter,
        after: Option<ContactId>,
        limit: usize,
    ) -> RepositoryResult<Vec<Contact>> {
        let page = self.inner.contacts_page(filter, after, limit).await?;
        self.page_sizes.lock().unwrap().push(page.len());
        Ok(page)
    }

    async fn count_contacts(&self) -> RepositoryResult<u64> {
        self.inner.count_contacts().await
    }
}
