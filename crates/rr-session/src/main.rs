use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rr_core::core::{AnnotatorId, Corpus, UnitId, UnitKey};
use rr_session::bootstrap::{self, RuntimeConfig};
use rr_session::config::AppConfig;
use rr_session::logging;
use rr_store::{
    export_rows, export_to_csv, export_to_json, progress_summary, AnnotatorRecord, DocumentStore,
    ExportFilter, PersistenceGateway,
};

#[derive(Parser)]
#[command(name = "rr", about = "rewrite-annotator store administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Validate configuration file and exit.
    Validate,
    /// Store a corpus file as the unannotated template of a unit.
    Seed {
        file: PathBuf,
        /// Unit id; defaults to the file stem.
        #[arg(long)]
        unit: Option<String>,
    },
    /// Replace an annotator's queue of units.
    Assign {
        annotator: String,
        #[arg(required = true)]
        units: Vec<String>,
        /// Queue position to start from.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Export judgments from every working copy.
    Export {
        #[arg(long)]
        annotator: Option<String>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Leave out turns without a rewrite judgment.
        #[arg(long)]
        judged_only: bool,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show completion per working copy and queue position per annotator.
    Progress {
        #[arg(long)]
        annotator: Option<String>,
    },
    /// Write an annotator's working copy of a unit as corpus JSON.
    Dump {
        annotator: String,
        unit: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let runtime = match load_runtime(&cli.config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Config invalid: {e:#}");
            std::process::exit(1);
        }
    };

    if let Command::Validate = cli.command {
        println!("Config valid: {}", cli.config.display());
        return;
    }

    if let Err(e) = logging::init(&runtime.logging) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli.command, &runtime).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_runtime(path: &Path) -> Result<RuntimeConfig, anyhow::Error> {
    let config = AppConfig::from_file(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    bootstrap::into_runtime(config)
}

async fn run(command: Command, runtime: &RuntimeConfig) -> Result<(), anyhow::Error> {
    let store = bootstrap::open_store(&runtime.store)?;

    match command {
        Command::Validate => Ok(()),
        Command::Seed { file, unit } => seed(store.as_ref(), &file, unit),
        Command::Assign {
            annotator,
            units,
            index,
        } => assign(store.as_ref(), annotator, units, index),
        Command::Export {
            annotator,
            unit,
            format,
            judged_only,
            output,
        } => {
            let filter = ExportFilter {
                annotator: annotator.map(AnnotatorId::new),
                unit: unit.map(UnitId::new),
                judged_only,
            };
            let rows = export_rows(store.as_ref(), &filter)?;
            let rendered = match format {
                ExportFormat::Json => export_to_json(&rows)?,
                ExportFormat::Csv => export_to_csv(&rows),
            };
            tracing::info!(rows = rows.len(), ?format, "exported judgments");
            write_output(output.as_deref(), &rendered)
        }
        Command::Progress { annotator } => progress(store.as_ref(), annotator),
        Command::Dump {
            annotator,
            unit,
            output,
        } => {
            let gateway = PersistenceGateway::new(Arc::clone(&store));
            let key = UnitKey::new(AnnotatorId::new(annotator), UnitId::new(unit));
            let loaded = gateway.load(&key).await?;
            write_output(output.as_deref(), &loaded.corpus.to_json_pretty()?)
        }
    }
}

fn seed(store: &dyn DocumentStore, file: &Path, unit: Option<String>) -> Result<(), anyhow::Error> {
    let unit = match unit {
        Some(unit) => unit,
        None => file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("cannot derive a unit id from {}", file.display()))?,
    };
    ensure!(!unit.trim().is_empty(), "unit id must not be empty");

    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let corpus = Corpus::from_document(&document)
        .with_context(|| format!("{} is not a corpus", file.display()))?;

    let unit = UnitId::new(unit);
    let outcome = store.upsert_template(&unit, &document)?;
    let progress = corpus.progress();
    println!(
        "{} template {unit}: {} dialogs, {} turns to judge",
        if outcome.matched { "Replaced" } else { "Stored" },
        corpus.dialog_count(),
        progress.total
    );
    Ok(())
}

fn assign(
    store: &dyn DocumentStore,
    annotator: String,
    units: Vec<String>,
    index: usize,
) -> Result<(), anyhow::Error> {
    ensure!(!annotator.trim().is_empty(), "annotator name must not be empty");
    ensure!(
        index <= units.len(),
        "index {index} is past the end of a queue of {} units",
        units.len()
    );

    let units = units.into_iter().map(UnitId::new).collect::<Vec<_>>();
    for unit in &units {
        if store.find_template(unit)?.is_none() {
            eprintln!("Warning: no template stored for unit {unit}");
        }
    }

    let mut record = AnnotatorRecord::new(AnnotatorId::new(annotator), units);
    record.unit_index = index;
    store.upsert_annotator(&record)?;
    println!(
        "Assigned {} units to {}",
        record.units.len(),
        record.name
    );
    Ok(())
}

fn progress(store: &dyn DocumentStore, annotator: Option<String>) -> Result<(), anyhow::Error> {
    let filter = ExportFilter {
        annotator: annotator.map(AnnotatorId::new),
        ..ExportFilter::default()
    };

    for unit in progress_summary(store, &filter)? {
        println!(
            "{}/{}\t{}/{}{}\tupdated {}",
            unit.annotator,
            unit.unit,
            unit.completed,
            unit.total,
            if unit.is_finished() { " done" } else { "" },
            unit.updated_at.to_rfc3339()
        );
    }

    for record in store.list_annotators()? {
        if filter
            .annotator
            .as_ref()
            .is_some_and(|name| *name != record.name)
        {
            continue;
        }
        match record.current_unit() {
            Some(unit) => println!(
                "{}: unit {} of {} ({unit})",
                record.name,
                record.unit_index + 1,
                record.units.len()
            ),
            None => println!("{}: queue finished", record.name),
        }
    }
    Ok(())
}

fn write_output(output: Option<&Path>, content: &str) -> Result<(), anyhow::Error> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{content}");
            Ok(())
        }
    }
}
