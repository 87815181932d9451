//! Deadline decorator for any [`Repository`].
//!
//! A storage call that does not finish within the configured duration fails
//! with [`RepositoryError::Timeout`], which the pipeline records against the
//! row being processed instead of stalling the batch.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use super::{NameMatch, Repository, Transaction, TransactionReceipt};
use crate::{
    error::{RepositoryError, RepositoryResult},
    filter::ContactFilter,
    model::{Contact, ContactId, ContactUpdate, Entity, EntityKind, NewContact},
};

pub struct TimedRepository<R: ?Sized> {
    inner: Arc<R>,
    limit: Duration,
}

impl<R: Repository + ?Sized> TimedRepository<R> {
    pub fn new(inner: Arc<R>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn guard<T, F>(&self, operation: &'static str, call: F) -> RepositoryResult<T>
    where
        F: Future<Output = RepositoryResult<T>>,
    {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout {
                operation,
                elapsed: self.limit,
            }),
        }
    }
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for TimedRepository<R> {
    async fn find_contact_by_email(&self, email: &str) -> RepositoryResult<Option<Contact>> {
        self.guard("find_contact_by_email", self.inner.find_contact_by_email(email))
            .await
    }

    async fn find_contacts_by_emails(&self, emails: &[String]) -> RepositoryResult<Vec<Contact>> {
        self.guard(
            "find_contacts_by_emails",
            self.inner.find_contacts_by_emails(emails),
        )
        .await
    }

    async fn create_contact(&self, contact: NewContact) -> RepositoryResult<Contact> {
        self.guard("create_contact", self.inner.create_contact(contact))
            .await
    }

    async fn update_contact(
        &self,
        id: ContactId,
        update: ContactUpdate,
    ) -> RepositoryResult<Contact> {
        self.guard("update_contact", self.inner.update_contact(id, update))
            .await
    }

    async fn create_many_contacts(
        &self,
        contacts: Vec<NewContact>,
        skip_duplicates: bool,
    ) -> RepositoryResult<u64> {
        self.guard(
            "create_many_contacts",
            self.inner.create_many_contacts(contacts, skip_duplicates),
        )
        .await
    }

    async fn transact(&self, tx: Transaction) -> RepositoryResult<TransactionReceipt> {
        self.guard("transact", self.inner.transact(tx)).await
    }

    async fn find_entity(
        &self,
        kind: EntityKind,
        name: &str,
        matching: NameMatch,
    ) -> RepositoryResult<Option<Entity>> {
        self.guard("find_entity", self.inner.find_entity(kind, name, matching))
            .await
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> RepositoryResult<Entity> {
        self.guard("create_entity", self.inner.create_entity(kind, name))
            .await
    }

    async fn search_entities(
        &self,
        kind: EntityKind,
        needle: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<Entity>> {
        self.guard(
            "search_entities",
            self.inner.search_entities(kind, needle, limit),
        )
        .await
    }

    async fn contacts_page(
        &self,
        filter: &ContactFilter,
        after: Option<ContactId>,
        limit: usize,
    ) -> RepositoryResult<Vec<Contact>> {
        self.guard("contacts_page", self.inner.contacts_page(filter, after, limit))
            .await
    }

    async fn count_contacts(&self) -> RepositoryResult<u64> {
        self.guard("count_contacts", self.inner.count_contacts())
            .await
    }
}
