//! Import report accumulation and the final result shape.

use serde::Serialize;

use crate::{row::RawRow, validate::FieldError};

/// Everything that went wrong (or was merely suspicious) for one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowReport {
    pub line: u64,
    pub row: RawRow,
    pub errors: Vec<FieldError>,
}

/// Outcome of one batch, merged into the [`ImportReport`] by the
/// orchestrator as batches complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows: u64,
    pub valid: u64,
    pub invalid: u64,
    pub created: u64,
    pub updated: u64,
    /// Valid rows left unwritten because another row with the same email
    /// took precedence.
    pub skipped: u64,
    pub entries: Vec<RowReport>,
    /// Set when the batch stopped early on an infrastructure fault.
    pub failure: Option<String>,
}

impl BatchOutcome {
    pub fn reject(&mut self, line: u64, row: RawRow, errors: Vec<FieldError>) {
        self.invalid += 1;
        self.entries.push(RowReport { line, row, errors });
    }

    /// Counts a written row, attaching its warnings when there are any.
    pub fn accept(&mut self, line: u64, row: RawRow, warnings: Vec<FieldError>) {
        self.valid += 1;
        if !warnings.is_empty() {
            self.entries.push(RowReport {
                line,
                row,
                errors: warnings,
            });
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub total_rows: u64,
    pub valid_rows: u64,
    pub invalid_rows: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub batches: u64,
    pub entries: Vec<RowReport>,
}

impl ImportReport {
    pub fn merge(&mut self, outcome: BatchOutcome) {
        self.total_rows += outcome.rows;
        self.valid_rows += outcome.valid;
        self.invalid_rows += outcome.invalid;
        self.created += outcome.created;
        self.updated += outcome.updated;
        self.skipped += outcome.skipped;
        self.batches += 1;
        self.entries.extend(outcome.entries);
    }

    pub fn processed(&self) -> u64 {
        self.valid_rows + self.invalid_rows
    }

    /// Freezes the report. Entries are put back in file order, since batches
    /// complete in any order.
    pub fn finish(mut self, error: Option<String>) -> ImportResult {
        self.entries.sort_by_key(|entry| entry.line);
        ImportResult {
            success: error.is_none(),
            total_rows: self.total_rows,
            valid_rows: self.valid_rows,
            invalid_rows: self.invalid_rows,
            created: self.created,
            updated: self.updated,
            skipped: self.skipped,
            batches: self.batches,
            errors: self.entries,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub total_rows: u64,
    pub valid_rows: u64,
    pub invalid_rows: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub batches: u64,
    pub errors: Vec<RowReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportResult {
    /// Result for a run rejected before any row was read.
    pub fn fatal(message: impl Into<String>) -> Self {
        ImportReport::default().finish(Some(message.into()))
    }
}
