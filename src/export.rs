//! Cursor-paginated CSV export.
//!
//! Contacts are fetched `page_size` at a time with an id cursor and written
//! straight to the CSV writer, so memory holds at most one page. The header
//! row is written once even when nothing matches. A page shorter than
//! `page_size` (including an empty one) ends the export.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use log::{debug, info};

use crate::{
    columns::ContactField,
    filter::ContactFilter,
    io_utils::{DEFAULT_CSV_DELIMITER, csv_writer},
    model::ContactId,
    repository::Repository,
};

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub filter: ContactFilter,
    pub columns: Vec<ContactField>,
    pub page_size: usize,
    pub delimiter: u8,
}

impl ExportRequest {
    pub fn new(columns: Vec<ContactField>) -> Self {
        Self {
            filter: ContactFilter::default(),
            columns,
            page_size: 500,
            delimiter: DEFAULT_CSV_DELIMITER,
        }
    }

    pub fn with_filter(mut self, filter: ContactFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: u64,
    /// Storage round trips, the final short or empty page included.
    pub pages: u64,
}

pub async fn export_contacts<R, W>(
    repo: &R,
    request: &ExportRequest,
    writer: W,
) -> Result<ExportSummary>
where
    R: Repository + ?Sized,
    W: Write,
{
    if request.columns.is_empty() {
        return Err(anyhow!("At least one export column is required"));
    }
    if request.page_size == 0 {
        return Err(anyhow!("Export page size must be at least 1"));
    }

    let mut csv = csv_writer(writer, request.delimiter);
    csv.write_record(request.columns.iter().map(|c| c.as_str()))
        .context("Writing export header")?;

    let mut summary = ExportSummary::default();
    let mut cursor: Option<ContactId> = None;
    loop {
        let page = repo
            .contacts_page(&request.filter, cursor, request.page_size)
            .await
            .with_context(|| format!("Fetching export page {}", summary.pages + 1))?;
        summary.pages += 1;
        debug!(
            "Export page {}: {} contact(s) after {:?}",
            summary.pages,
            page.len(),
            cursor
        );

        for contact in &page {
            let record: Vec<String> = request
                .columns
                .iter()
                .map(|column| column.render(contact))
                .collect();
            csv.write_record(&record)
                .with_context(|| format!("Writing contact {}", contact.id))?;
        }
        csv.flush().context("Flushing export output")?;
        summary.rows += page.len() as u64;

        if page.len() < request.page_size {
            break;
        }
        cursor = page.last().map(|contact| contact.id);
    }

    info!(
        "Exported {} contact(s) in {} page(s)",
        summary.rows, summary.pages
    );
    Ok(summary)
}

/// Convenience wrapper that renders the whole export in memory.
pub async fn export_to_string<R>(repo: &R, request: &ExportRequest) -> Result<String>
where
    R: Repository + ?Sized,
{
    let mut buffer = Vec::new();
    export_contacts(repo, request, &mut buffer).await?;
    String::from_utf8(buffer).context("Export produced invalid UTF-8")
}
