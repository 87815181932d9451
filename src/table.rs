//! Plain-text tables for the import summary printed after a run.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::report::{ImportResult, RowReport};

/// Longest message shown in a cell before it is cut with an ellipsis.
const MAX_CELL_WIDTH: usize = 80;

/// Counter block followed by one line per reported problem.
pub fn render_import_summary(result: &ImportResult) -> String {
    let mut output = String::new();
    let status = if result.success { "ok" } else { "failed" };
    let counters = [
        ("status", status.to_string()),
        ("rows", result.total_rows.to_string()),
        ("valid", result.valid_rows.to_string()),
        ("invalid", result.invalid_rows.to_string()),
        ("created", result.created.to_string()),
        ("updated", result.updated.to_string()),
        ("skipped", result.skipped.to_string()),
        ("batches", result.batches.to_string()),
    ];
    let label_width = counters.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in counters {
        let _ = writeln!(output, "{label:<label_width$}  {value}");
    }
    if let Some(error) = &result.error {
        let _ = writeln!(output, "{:<label_width$}  {error}", "error");
    }
    if !result.errors.is_empty() {
        output.push('\n');
        output.push_str(&render_row_errors(&result.errors));
    }
    output
}

/// One table line per field error, keyed by source line and the row's email.
pub fn render_row_errors(entries: &[RowReport]) -> String {
    let headers = ["line", "email", "field", "message"].map(String::from);
    let rows: Vec<Vec<String>> = entries
        .iter()
        .flat_map(|entry| {
            let email = entry
                .row
                .iter()
                .find(|(header, _)| header.eq_ignore_ascii_case("email"))
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();
            entry.errors.iter().map(move |error| {
                vec![
                    entry.line.to_string(),
                    email.clone(),
                    error.path.clone(),
                    error.message.clone(),
                ]
            })
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn print_import_summary(result: &ImportResult) {
    print!("{}", render_import_summary(result));
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

/// Flattens control characters and cuts overlong values.
fn sanitize_cell(value: &str) -> Cow<'_, str> {
    let needs_flattening = value.contains(['\n', '\r', '\t']);
    let too_long = value.chars().count() > MAX_CELL_WIDTH;
    if !needs_flattening && !too_long {
        return Cow::Borrowed(value);
    }
    let mut sanitized: String = value
        .chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .collect();
    if too_long {
        sanitized = sanitized.chars().take(MAX_CELL_WIDTH - 1).collect();
        sanitized.push('…');
    }
    Cow::Owned(sanitized)
}
