pub mod batch;
pub mod bulk;
pub mod cli;
pub mod columns;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod header;
pub mod import;
pub mod io_utils;
pub mod locks;
pub mod model;
pub mod progress;
pub mod report;
pub mod repository;
pub mod resolve;
pub mod row;
pub mod table;
pub mod upsert;
pub mod validate;

use std::{
    env,
    fs::{self, File},
    io::BufWriter,
    path::Path,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, SourceArgs, StoreArgs},
    columns::parse_columns,
    config::{ImportSettings, PipelineConfig},
    export::{ExportRequest, export_contacts},
    filter::ContactFilter,
    import::{ImportSource, Importer},
    io_utils::{DEFAULT_CSV_DELIMITER, open_output, resolve_encoding},
    report::ImportResult,
    repository::memory::MemoryRepository,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("contact_ledger", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Validate(args) => handle_validate(&args.source),
        Commands::Export(args) => handle_export(&args),
        Commands::InitConfig(args) => {
            PipelineConfig::default().save(&args.output)?;
            info!("Default configuration written to {:?}", args.output);
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let mut config = PipelineConfig::load(args.source.config.as_deref())?;
    apply_source_overrides(&mut config.import, &args.source);
    if let Some(concurrency) = args.concurrency {
        config.import.max_concurrent_batches = concurrency;
    }
    if let Some(mode) = args.write_mode {
        config.import.write_mode = mode;
    }
    if let Some(timeout) = args.timeout_ms {
        config.import.operation_timeout_ms = timeout;
    }
    config.import.fail_fast |= args.fail_fast;
    config.import.remove_source_on_success |= args.remove_source;
    debug!("Import settings: {:?}", config.import);

    let repo = Arc::new(open_store(&args.store)?);
    let source = import_source(&args.source)?;
    let importer = Importer::new(Arc::clone(&repo), config.import);
    let sink = args.source.progress.sink();
    let result = runtime()?.block_on(importer.run(&source, sink.as_ref()));

    repo.save(&args.store.store)
        .with_context(|| format!("Saving store to {:?}", args.store.store))?;
    finish_import(&result, &args.source)
}

fn handle_validate(args: &SourceArgs) -> Result<()> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    apply_source_overrides(&mut config.import, args);
    let source = import_source(args)?;
    let importer = Importer::new(Arc::new(MemoryRepository::new()), config.import);
    let sink = args.progress.sink();
    let result = runtime()?.block_on(importer.validate(&source, sink.as_ref()));
    finish_import(&result, args)
}

fn handle_export(args: &cli::ExportArgs) -> Result<()> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let columns = if args.columns.is_empty() {
        parse_columns(&config.export.columns)?
    } else {
        parse_columns(&args.columns)?
    };
    let filter = ContactFilter::parse(&args.filters)?;
    let request = ExportRequest::new(columns)
        .with_filter(filter)
        .with_page_size(args.page_size.unwrap_or(config.export.page_size))
        .with_delimiter(args.delimiter.unwrap_or(DEFAULT_CSV_DELIMITER));
    let encoding = resolve_encoding(args.output_encoding.as_deref())?;

    let repo = open_store(&args.store)?;
    let writer = open_output(args.output.as_deref(), encoding)?;
    let summary = runtime()?.block_on(export_contacts(&repo, &request, writer))?;
    info!(
        "Exported {} contact(s) with {} column(s)",
        summary.rows,
        request.columns.len()
    );
    Ok(())
}

fn apply_source_overrides(settings: &mut ImportSettings, args: &SourceArgs) {
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
}

fn import_source(args: &SourceArgs) -> Result<ImportSource> {
    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    Ok(ImportSource::new(&args.input)
        .with_delimiter(args.delimiter)
        .with_encoding(encoding))
}

fn open_store(args: &StoreArgs) -> Result<MemoryRepository> {
    let repo = MemoryRepository::open(&args.store)?;
    if let Some(path) = &args.countries {
        let names = fs::read_to_string(path)
            .with_context(|| format!("Reading countries file {path:?}"))?;
        let added = repo.seed_countries(names.lines())?;
        info!("Seeded {added} new country name(s) from {path:?}");
    }
    Ok(repo)
}

fn finish_import(result: &ImportResult, args: &SourceArgs) -> Result<()> {
    if let Some(path) = &args.report {
        write_report(result, path)?;
    }
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Serializing import result")?
        );
    } else {
        table::print_import_summary(result);
    }
    match &result.error {
        Some(error) if !result.success => Err(anyhow!("Import failed: {error}")),
        _ => Ok(()),
    }
}

fn write_report(result: &ImportResult, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), result)
        .with_context(|| format!("Writing report file {path:?}"))?;
    info!("Import report written to {path:?}");
    Ok(())
}
