//! Bulk write path for creation-heavy batches.
//!
//! A batch is partitioned by one existence query into new and existing
//! contacts. New ones go through a single duplicate-tolerant create-many;
//! existing ones get individual selective updates. Both halves run in one
//! repository transaction, so a failure leaves the batch unwritten.

use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{
    error::RepositoryResult,
    model::NewContact,
    repository::{Repository, Transaction},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub created: u64,
    pub updated: u64,
    /// Records dropped as duplicates, within the batch or by the store.
    pub skipped: u64,
}

impl BulkSummary {
    pub fn written(&self) -> u64 {
        self.created + self.updated
    }
}

pub struct BulkWriter<R: Repository + ?Sized> {
    repo: Arc<R>,
}

impl<R: Repository + ?Sized> BulkWriter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn write_batch(&self, records: Vec<NewContact>) -> RepositoryResult<BulkSummary> {
        let submitted = records.len() as u64;
        let records = keep_last_per_email(records);
        let emails: Vec<String> = records.iter().map(|r| r.email.clone()).collect();
        let existing: HashMap<String, u64> = self
            .repo
            .find_contacts_by_emails(&emails)
            .await?
            .into_iter()
            .map(|contact| (contact.email, contact.id))
            .collect();

        let mut tx = Transaction {
            skip_duplicates: true,
            ..Transaction::default()
        };
        for record in records {
            match existing.get(&record.email) {
                Some(id) => tx.updates.push((*id, record.as_update())),
                None => tx.creates.push(record),
            }
        }
        if tx.is_empty() {
            return Ok(BulkSummary::default());
        }

        let new_count = tx.creates.len();
        let receipt = self.repo.transact(tx).await?;
        let summary = BulkSummary {
            created: receipt.created,
            updated: receipt.updated,
            skipped: submitted.saturating_sub(receipt.created + receipt.updated),
        };
        debug!(
            "Bulk batch: {} new ({} created), {} updated, {} skipped",
            new_count, summary.created, summary.updated, summary.skipped
        );
        Ok(summary)
    }
}

/// Later rows win: for repeated emails only the last record survives, in
/// its original position relative to the others.
fn keep_last_per_email(records: Vec<NewContact>) -> Vec<NewContact> {
    let mut last = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        last.insert(record.email.clone(), idx);
    }
    records
        .into_iter()
        .enumerate()
        .filter(|(idx, record)| last.get(&record.email) == Some(idx))
        .map(|(_, record)| record)
        .collect()
}
