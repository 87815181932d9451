//! Import progress reporting.
//!
//! The orchestrator emits an [`ImportProgress`] at 0%, after every completed
//! batch, and at 100%. Sinks decide where it goes: stderr as a human line,
//! stderr as one JSON object per line, nowhere, or any closure.

use std::io::Write;

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Parsing,
    Validating,
    Importing,
    Completed,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Parsing => "parsing",
            Operation::Validating => "validating",
            Operation::Importing => "importing",
            Operation::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub percentage: f64,
    pub processed: u64,
    pub total: u64,
    pub current_operation: Operation,
}

impl ImportProgress {
    pub fn new(operation: Operation, processed: u64, total: u64) -> Self {
        let percentage = match operation {
            Operation::Completed => 100.0,
            _ if total == 0 => 0.0,
            _ => ((processed as f64 / total as f64) * 100.0).min(100.0),
        };
        Self {
            percentage,
            processed,
            total,
            current_operation: operation,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &ImportProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&ImportProgress) + Send + Sync,
{
    fn report(&self, progress: &ImportProgress) {
        self(progress)
    }
}

/// "import  importing  1,200 / 5,000 rows (24.0%)" on stderr.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn report(&self, progress: &ImportProgress) {
        let line = format!(
            "import  {}  {} / {} rows ({:.1}%)\n",
            progress.current_operation.as_str(),
            format_number(progress.processed),
            format_number(progress.total),
            progress.percentage
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn report(&self, progress: &ImportProgress) {
        if let Ok(line) = serde_json::to_string(progress) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: &ImportProgress) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result
}
