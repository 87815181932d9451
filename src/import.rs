//! Streaming batch orchestrator.
//!
//! A run has three stages:
//!
//! 1. **Prepare** (blocking): settle the delimiter, map the header row and
//!    count the non-blank records so progress has an exact total. A header
//!    problem or an unreadable file ends the run here, before any storage
//!    call.
//! 2. **Stream**: a blocking parser maps records as they are read and feeds
//!    them through a bounded channel. The orchestrator cuts them into
//!    batches and spawns each one on a [`JoinSet`], keeping at most
//!    `max_concurrent_batches` in flight. At the limit it waits for a batch
//!    to finish before reading more input.
//! 3. **Finish**: flush the partial batch, drain the set, sort the report.
//!    A run stopped early still waits for the batches already in flight,
//!    so the counters match what reached storage.
//!
//! Only the orchestrator touches the report; batch results come back
//! through task joins.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinSet},
};

use crate::{
    batch::{BatchHandler, ValidateOnly, WriteHandler},
    config::ImportSettings,
    header::{HeaderMapping, is_blank_record},
    io_utils::{open_csv_reader_from_path, printable_delimiter, sniff_delimiter},
    locks::KeyedLocks,
    progress::{ImportProgress, Operation, ProgressSink},
    report::{BatchOutcome, ImportReport, ImportResult},
    repository::{Repository, timed::TimedRepository},
    row::MappedRow,
};

/// Where to read an import from and how to decode it.
#[derive(Debug, Clone)]
pub struct ImportSource {
    pub path: PathBuf,
    /// `None` samples the first line.
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl ImportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: None,
            encoding: UTF_8,
        }
    }

    pub fn with_delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

pub struct Importer<R: Repository + ?Sized + 'static> {
    repo: Arc<TimedRepository<R>>,
    locks: Arc<KeyedLocks>,
    settings: ImportSettings,
}

impl<R: Repository + ?Sized + 'static> Importer<R> {
    /// Every storage call made on behalf of the import is bounded by
    /// `settings.operation_timeout_ms`.
    pub fn new(repo: Arc<R>, settings: ImportSettings) -> Self {
        let limit = settings.operation_timeout();
        Self {
            repo: Arc::new(TimedRepository::new(repo, limit)),
            locks: Arc::new(KeyedLocks::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Imports `source`. Never fails: every problem ends up in the result.
    pub async fn run(&self, source: &ImportSource, progress: &dyn ProgressSink) -> ImportResult {
        let handler: Arc<dyn BatchHandler> = Arc::new(WriteHandler::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.locks),
            self.settings.write_mode,
            self.settings.suggestion_limit,
        ));
        let result = self.drive(source, handler, progress).await;
        if result.success && self.settings.remove_source_on_success {
            remove_source(&source.path);
        }
        result
    }

    /// Maps and validates `source` without writing anything.
    pub async fn validate(&self, source: &ImportSource, progress: &dyn ProgressSink) -> ImportResult {
        self.drive(source, Arc::new(ValidateOnly), progress).await
    }

    async fn drive(
        &self,
        source: &ImportSource,
        handler: Arc<dyn BatchHandler>,
        progress: &dyn ProgressSink,
    ) -> ImportResult {
        if let Err(err) = self.settings.validate() {
            return ImportResult::fatal(format!("{err:#}"));
        }
        let prepared = match prepare(source.clone()).await {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!("Import of {:?} rejected: {err:#}", source.path);
                return ImportResult::fatal(format!("{err:#}"));
            }
        };
        let total = prepared.total;
        info!(
            "Importing {:?}: {} row(s), delimiter '{}', batch size {}, up to {} batch(es) in flight",
            source.path,
            total,
            printable_delimiter(prepared.delimiter),
            self.settings.batch_size,
            self.settings.max_concurrent_batches
        );
        progress.report(&ImportProgress::new(Operation::Parsing, 0, total));
        progress.report(&ImportProgress::new(Operation::Validating, 0, total));

        let batch_size = self.settings.batch_size;
        let (tx, mut rx) = mpsc::channel(batch_size);
        let parser = {
            let source = source.clone();
            tokio::task::spawn_blocking(move || {
                parse_rows(&source, prepared.delimiter, &prepared.mapping, tx)
            })
        };

        let mut dispatcher = Dispatcher {
            handler,
            tasks: JoinSet::new(),
            report: ImportReport::default(),
            total,
            progress,
            max_in_flight: self.settings.max_concurrent_batches,
            delay: self.settings.batch_delay(),
            fail_fast: self.settings.fail_fast,
            dispatched: 0,
        };
        let mut batch = Vec::with_capacity(batch_size);
        let mut fatal = None;

        while let Some(parsed) = rx.recv().await {
            let row = match parsed {
                Ok(row) => row,
                Err(err) => {
                    fatal = Some(format!("{err:#}"));
                    break;
                }
            };
            batch.push(row);
            if batch.len() < batch_size {
                continue;
            }
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if let Err(message) = dispatcher.dispatch(full).await {
                fatal = Some(message);
                break;
            }
        }
        // Unblocks the parser if we stopped early.
        drop(rx);

        if fatal.is_none() && !batch.is_empty() {
            if let Err(message) = dispatcher.dispatch(batch).await {
                fatal = Some(message);
            }
        }
        if fatal.is_none() {
            if let Err(message) = dispatcher.drain().await {
                fatal = Some(message);
            }
        }
        if fatal.is_some() {
            dispatcher.settle().await;
        }
        if let Err(err) = parser.await {
            fatal.get_or_insert_with(|| format!("Parser task failed: {err}"));
        }

        let report = dispatcher.report;
        match fatal {
            Some(message) => {
                warn!(
                    "Import of {:?} stopped after {} batch(es): {message}",
                    source.path, report.batches
                );
                report.finish(Some(message))
            }
            None => {
                progress.report(&ImportProgress::new(
                    Operation::Completed,
                    report.processed(),
                    report.total_rows,
                ));
                info!(
                    "Import of {:?} finished: {} valid, {} invalid, {} created, {} updated, {} skipped in {} batch(es)",
                    source.path,
                    report.valid_rows,
                    report.invalid_rows,
                    report.created,
                    report.updated,
                    report.skipped,
                    report.batches
                );
                report.finish(None)
            }
        }
    }
}

struct Prepared {
    delimiter: u8,
    mapping: HeaderMapping,
    total: u64,
}

async fn prepare(source: ImportSource) -> Result<Prepared> {
    tokio::task::spawn_blocking(move || scan(&source))
        .await
        .map_err(|err| anyhow!("Pre-scan task failed: {err}"))?
}

fn scan(source: &ImportSource) -> Result<Prepared> {
    let delimiter = match source.delimiter {
        Some(delimiter) => delimiter,
        None => sniff_delimiter(&source.path, source.encoding)?,
    };
    let mut reader = open_csv_reader_from_path(&source.path, delimiter, source.encoding)?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Reading header row of {:?}", source.path))?
        .iter()
        .map(str::to_string)
        .collect();
    let mapping = HeaderMapping::from_headers(&headers)?;
    debug!(
        "Mapped {} column(s), {} unmapped",
        headers.len() - mapping.unmapped().len(),
        mapping.unmapped().len()
    );

    let mut record = StringRecord::new();
    let mut total = 0u64;
    while reader
        .read_record(&mut record)
        .with_context(|| format!("Scanning {:?}", source.path))?
    {
        if !is_blank_record(&record) {
            total += 1;
        }
    }
    Ok(Prepared {
        delimiter,
        mapping,
        total,
    })
}

/// Runs on a blocking thread. Stops at the first read error (after sending
/// it) or when the receiving side goes away.
fn parse_rows(
    source: &ImportSource,
    delimiter: u8,
    mapping: &HeaderMapping,
    tx: mpsc::Sender<Result<MappedRow>>,
) {
    let mut reader = match open_csv_reader_from_path(&source.path, delimiter, source.encoding) {
        Ok(reader) => reader,
        Err(err) => {
            let _ = tx.blocking_send(Err(err));
            return;
        }
    };
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                let err = anyhow::Error::new(err).context(format!("Reading {:?}", source.path));
                let _ = tx.blocking_send(Err(err));
                break;
            }
        }
        if is_blank_record(&record) {
            continue;
        }
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        if tx.blocking_send(Ok(mapping.map_record(line, &record))).is_err() {
            break;
        }
    }
}

struct Dispatcher<'a> {
    handler: Arc<dyn BatchHandler>,
    tasks: JoinSet<BatchOutcome>,
    report: ImportReport,
    total: u64,
    progress: &'a dyn ProgressSink,
    max_in_flight: usize,
    delay: Duration,
    fail_fast: bool,
    dispatched: u64,
}

impl Dispatcher<'_> {
    /// Waits for room, spawns the batch, then folds in whatever already
    /// finished. `Err` carries the message that ends the run.
    async fn dispatch(&mut self, rows: Vec<MappedRow>) -> Result<(), String> {
        while self.tasks.len() >= self.max_in_flight {
            match self.tasks.join_next().await {
                Some(joined) => self.absorb(joined)?,
                None => break,
            }
        }

        self.dispatched += 1;
        debug!(
            "Dispatching batch {} ({} row(s), first line {})",
            self.dispatched,
            rows.len(),
            rows.first().map(|row| row.line).unwrap_or_default()
        );
        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move { handler.process(rows).await });

        while let Some(joined) = self.tasks.try_join_next() {
            self.absorb(joined)?;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), String> {
        while let Some(joined) = self.tasks.join_next().await {
            self.absorb(joined)?;
        }
        Ok(())
    }

    /// Waits out the batches still in flight once the run has been stopped.
    /// They were dispatched and may have written, so they are counted; no
    /// further batch is started.
    async fn settle(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Waiting for {} in-flight batch(es) before stopping", self.tasks.len());
        }
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(outcome) => self.record(outcome),
                Err(err) => warn!("Batch task failed while stopping: {err}"),
            }
        }
    }

    fn absorb(&mut self, joined: Result<BatchOutcome, JoinError>) -> Result<(), String> {
        let outcome = joined.map_err(|err| format!("Batch task failed: {err}"))?;
        let failure = outcome.failure.clone();
        self.record(outcome);
        match failure {
            Some(reason) if self.fail_fast => Err(format!("Batch failed: {reason}")),
            Some(reason) => {
                warn!("Batch failed, its unwritten rows are reported as errors: {reason}");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record(&mut self, outcome: BatchOutcome) {
        self.report.merge(outcome);
        self.progress.report(&ImportProgress::new(
            Operation::Importing,
            self.report.processed(),
            self.total,
        ));
    }
}

fn remove_source(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed source file {path:?}"),
        Err(err) => warn!("Could not remove source file {path:?}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Mutex};

    use tempfile::NamedTempFile;

    use super::*;
    use crate::repository::memory::MemoryRepository;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn settings(batch_size: usize) -> ImportSettings {
        ImportSettings {
            batch_size,
            batch_delay_ms: 0,
            ..ImportSettings::default()
        }
    }

    #[tokio::test]
    async fn blank_records_are_skipped_and_lines_are_physical() {
        let file = csv_file("name,email\nAda,ada@x.io\n,\n  ,  \nBob,not-an-email\n");
        let repo = Arc::new(MemoryRepository::new());
        let importer = Importer::new(Arc::clone(&repo), settings(10));
        let result = importer
            .run(&ImportSource::new(file.path()), &crate::progress::NoProgress)
            .await;

        assert!(result.success);
        assert_eq!(result.total_rows, 2);
        assert_eq!(result.valid_rows, 1);
        assert_eq!(result.invalid_rows, 1);
        assert_eq!(result.errors[0].line, 5);
    }

    #[tokio::test]
    async fn progress_is_exact_and_ends_at_one_hundred() {
        let mut contents = String::from("name,email\n");
        for idx in 0..25 {
            contents.push_str(&format!("Person {idx},p{idx}@x.io\n"));
        }
        let file = csv_file(&contents);
        let seen = Mutex::new(Vec::new());
        let sink = |p: &ImportProgress| seen.lock().unwrap().push(p.clone());

        let importer = Importer::new(Arc::new(MemoryRepository::new()), settings(10));
        let result = importer.run(&ImportSource::new(file.path()), &sink).await;
        assert_eq!(result.batches, 3);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first().map(|p| p.percentage), Some(0.0));
        assert!(seen.iter().all(|p| p.total == 25));
        let importing = seen
            .iter()
            .filter(|p| p.current_operation == Operation::Importing)
            .count();
        assert_eq!(importing, 3);
        let last = seen.last().unwrap();
        assert_eq!(last.current_operation, Operation::Completed);
        assert_eq!(last.processed, 25);
        assert_eq!(last.percentage, 100.0);
    }

    #[tokio::test]
    async fn validate_only_writes_nothing() {
        let file = csv_file("Name;Email\nAda;ada@x.io\nBob;\n");
        let repo = Arc::new(MemoryRepository::new());
        let importer = Importer::new(Arc::clone(&repo), settings(10));
        let result = importer
            .validate(&ImportSource::new(file.path()), &crate::progress::NoProgress)
            .await;
        assert_eq!(result.valid_rows, 1);
        assert_eq!(result.invalid_rows, 1);
        assert_eq!(repo.write_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_a_fatal_result() {
        let importer = Importer::new(Arc::new(MemoryRepository::new()), settings(10));
        let result = importer
            .run(
                &ImportSource::new("/nonexistent/contacts.csv"),
                &crate::progress::NoProgress,
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.total_rows, 0);
        assert!(result.error.unwrap().contains("Opening input file"));
    }

    #[tokio::test]
    async fn source_removed_only_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.csv");
        std::fs::write(&path, "name,email\nAda,ada@x.io\n").unwrap();
        let importer = Importer::new(
            Arc::new(MemoryRepository::new()),
            ImportSettings {
                remove_source_on_success: true,
                ..settings(10)
            },
        );
        let result = importer
            .run(&ImportSource::new(&path), &crate::progress::NoProgress)
            .await;
        assert!(result.success);
        assert!(!path.exists());

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "name\nAda\n").unwrap();
        let result = importer
            .run(&ImportSource::new(&bad), &crate::progress::NoProgress)
            .await;
        assert!(!result.success);
        assert!(bad.exists());
    }
}
