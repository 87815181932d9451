//! Per-batch row processing.
//!
//! The orchestrator hands every full batch to a [`BatchHandler`]. Rows are
//! handled in file order and every row ends up either accepted or rejected
//! in the returned [`BatchOutcome`]; nothing a single row does can make the
//! handler return early. An infrastructure fault (storage unavailable) stops
//! the batch: the rows it did not reach are rejected with the fault as their
//! message and the outcome carries a `failure`.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;

use crate::{
    bulk::BulkWriter,
    config::WriteMode,
    error::RepositoryError,
    locks::KeyedLocks,
    report::BatchOutcome,
    repository::Repository,
    row::{MappedRow, RawRow},
    upsert::{UpsertAction, UpsertEngine},
    validate::{FieldError, validate_row},
};

#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn process(&self, rows: Vec<MappedRow>) -> BatchOutcome;
}

/// Validates without touching storage. Backs the dry-run command.
pub struct ValidateOnly;

#[async_trait]
impl BatchHandler for ValidateOnly {
    async fn process(&self, rows: Vec<MappedRow>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            rows: rows.len() as u64,
            ..BatchOutcome::default()
        };
        for row in rows {
            match validate_row(&row) {
                Ok(_) => outcome.accept(row.line, row.raw, Vec::new()),
                Err(errors) => outcome.reject(row.line, row.raw, errors),
            }
        }
        outcome
    }
}

pub struct WriteHandler<R: Repository + ?Sized> {
    engine: UpsertEngine<R>,
    bulk: BulkWriter<R>,
    mode: WriteMode,
}

impl<R: Repository + ?Sized> WriteHandler<R> {
    pub fn new(repo: Arc<R>, locks: Arc<KeyedLocks>, mode: WriteMode, suggestion_limit: usize) -> Self {
        Self {
            engine: UpsertEngine::new(Arc::clone(&repo), locks, suggestion_limit),
            bulk: BulkWriter::new(repo),
            mode,
        }
    }

    async fn upsert_rows(&self, rows: Vec<MappedRow>, outcome: &mut BatchOutcome) {
        let mut rows = rows.into_iter();
        while let Some(row) = rows.next() {
            let contact = match validate_row(&row) {
                Ok(contact) => contact,
                Err(errors) => {
                    outcome.reject(row.line, row.raw, errors);
                    continue;
                }
            };
            match self.engine.upsert(contact, row.line).await {
                Ok(written) => {
                    match written.action {
                        UpsertAction::Created => outcome.created += 1,
                        UpsertAction::Updated => outcome.updated += 1,
                        UpsertAction::Superseded => outcome.skipped += 1,
                    }
                    outcome.accept(row.line, row.raw, written.warnings);
                }
                Err(err) if err.is_infrastructure() => {
                    abort_remaining(outcome, row, rows, &err);
                    return;
                }
                Err(err) => outcome.reject(row.line, row.raw, vec![write_error(&err)]),
            }
        }
    }

    async fn bulk_rows(&self, rows: Vec<MappedRow>, outcome: &mut BatchOutcome) {
        let mut pending = Vec::with_capacity(rows.len());
        let mut rows = rows.into_iter();
        while let Some(row) = rows.next() {
            let contact = match validate_row(&row) {
                Ok(contact) => contact,
                Err(errors) => {
                    outcome.reject(row.line, row.raw, errors);
                    continue;
                }
            };
            match self.engine.resolve(contact).await {
                Ok(resolved) => pending.push((row.line, row.raw, resolved)),
                Err(err) if err.is_infrastructure() => {
                    for (line, raw, _) in pending {
                        outcome.reject(line, raw, vec![aborted(&err)]);
                    }
                    abort_remaining(outcome, row, rows, &err);
                    return;
                }
                Err(err) => outcome.reject(row.line, row.raw, vec![write_error(&err)]),
            }
        }
        if pending.is_empty() {
            return;
        }

        let records = pending.iter().map(|(_, _, r)| r.contact.clone()).collect();
        match self.bulk.write_batch(records).await {
            Ok(summary) => {
                outcome.created += summary.created;
                outcome.updated += summary.updated;
                outcome.skipped += summary.skipped;
                for (line, raw, resolved) in pending {
                    outcome.accept(line, raw, resolved.warnings);
                }
            }
            Err(err) => {
                // The transaction wrote nothing; only this batch is lost.
                warn!("Bulk transaction failed for {} row(s): {err}", pending.len());
                for (line, raw, _) in pending {
                    outcome.reject(line, raw, vec![write_error(&err)]);
                }
                if err.is_infrastructure() {
                    outcome.failure = Some(err.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl<R: Repository + ?Sized> BatchHandler for WriteHandler<R> {
    async fn process(&self, rows: Vec<MappedRow>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            rows: rows.len() as u64,
            ..BatchOutcome::default()
        };
        match self.mode {
            WriteMode::Upsert => self.upsert_rows(rows, &mut outcome).await,
            WriteMode::Bulk => self.bulk_rows(rows, &mut outcome).await,
        }
        outcome
    }
}

fn write_error(err: &RepositoryError) -> FieldError {
    FieldError::new("row", format!("Write failed: {err}"))
}

fn aborted(err: &RepositoryError) -> FieldError {
    FieldError::new("row", format!("Batch aborted: {err}"))
}

fn abort_remaining(
    outcome: &mut BatchOutcome,
    current: MappedRow,
    rest: impl Iterator<Item = MappedRow>,
    err: &RepositoryError,
) {
    let rest: Vec<(u64, RawRow)> = rest.map(|row| (row.line, row.raw)).collect();
    warn!(
        "Batch stopped at line {}: {err}; {} later row(s) not attempted",
        current.line,
        rest.len()
    );
    outcome.reject(current.line, current.raw, vec![aborted(err)]);
    for (line, raw) in rest {
        outcome.reject(line, raw, vec![aborted(err)]);
    }
    outcome.failure = Some(err.to_string());
}
