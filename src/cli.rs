use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::WriteMode, progress::ProgressMode};

#[derive(Debug, Parser)]
#[command(author, version, about = "Bulk import and export of media contacts as CSV", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import contacts from a CSV file, creating or updating by email
    Import(ImportArgs),
    /// Check a CSV file's headers and rows without writing anything
    Validate(ValidateArgs),
    /// Export contacts to CSV, page by page in id order
    Export(ExportArgs),
    /// Write a configuration file populated with the defaults
    InitConfig(InitConfigArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// JSON snapshot holding contacts, outlets, beats, and countries (created if missing)
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// File of country names, one per line, added to the store before running
    #[arg(long)]
    pub countries: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// CSV file to read
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|'); detected from the header line when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// YAML configuration file; flags given here take precedence
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Rows per batch
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Write the full result as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Print the result as JSON instead of a summary table
    #[arg(long)]
    pub json: bool,
    /// Progress output on stderr
    #[arg(long, value_enum, default_value = "human")]
    pub progress: ProgressMode,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    /// Maximum batches processed concurrently
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// How each batch is written
    #[arg(long = "write-mode", value_enum)]
    pub write_mode: Option<WriteMode>,
    /// Stop the whole import at the first failed batch
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,
    /// Deadline for each storage operation in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    /// Delete the input file after a fully successful import
    #[arg(long = "remove-source")]
    pub remove_source: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// YAML configuration file; flags given here take precedence
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Output CSV file (stdout if omitted or '-')
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Columns to export, comma-separated and repeatable
    #[arg(short = 'C', long = "columns", action = clap::ArgAction::Append)]
    pub columns: Vec<String>,
    /// Filters such as `outlets=Acme Times`, `email endswith @example.com`, or `id>100`
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
    /// Contacts fetched per page
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,
    /// Delimiter for the output file
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InitConfigArgs {
    /// Destination YAML file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
