//! Pipeline configuration loaded from YAML.
//!
//! Every key is optional; missing keys take the defaults below. Command-line
//! flags are applied on top of the loaded file by the CLI handlers.
//!
//! ```yaml
//! import:
//!   batch_size: 100
//!   max_concurrent_batches: 3
//!   batch_delay_ms: 10
//!   operation_timeout_ms: 30000
//!   suggestion_limit: 5
//!   fail_fast: false
//!   write_mode: upsert   # or bulk
//!   remove_source_on_success: false
//! export:
//!   page_size: 500
//!   columns: [name, email, title, outlets]
//! ```

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::columns::ContactField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum WriteMode {
    /// Lookup-then-create/update for every row
    Upsert,
    /// Partition each batch and write it in one transaction
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub batch_delay_ms: u64,
    pub operation_timeout_ms: u64,
    pub suggestion_limit: usize,
    pub fail_fast: bool,
    pub write_mode: WriteMode,
    pub remove_source_on_success: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent_batches: 3,
            batch_delay_ms: 10,
            operation_timeout_ms: 30_000,
            suggestion_limit: 5,
            fail_fast: false,
            write_mode: WriteMode::Upsert,
            remove_source_on_success: false,
        }
    }
}

impl ImportSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("import.batch_size must be at least 1"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(anyhow!("import.max_concurrent_batches must be at least 1"));
        }
        if self.operation_timeout_ms == 0 {
            return Err(anyhow!("import.operation_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSettings {
    pub page_size: usize,
    pub columns: Vec<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            page_size: 500,
            columns: [
                ContactField::Name,
                ContactField::Email,
                ContactField::Title,
                ContactField::Bio,
                ContactField::Socials,
                ContactField::Outlets,
                ContactField::Beats,
                ContactField::Countries,
                ContactField::AuthorLinks,
            ]
            .iter()
            .map(|field| field.as_str().to_string())
            .collect(),
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(anyhow!("export.page_size must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub import: ImportSettings,
    pub export: ExportSettings,
}

impl PipelineConfig {
    /// Reads `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .with_context(|| format!("Reading config file {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_yaml::to_string(self).context("Serializing config")?;
        let mut file =
            File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.import.validate()?;
        self.export.validate()
    }
}
