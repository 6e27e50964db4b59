//! schemadelta CLI
//!
//! Command-line tool for comparing schema exports and rendering migrations.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use schemadelta::prelude::*;

/// Schema diff and migration planning for relational schema exports.
#[derive(Parser)]
#[command(name = "schemadelta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two schema exports and print the migration.
    Compare {
        /// Export describing the current schema (JSON array of rows).
        #[arg(short, long)]
        before: PathBuf,

        /// Export describing the desired schema (JSON array of rows).
        #[arg(short, long)]
        after: PathBuf,

        /// Target SQL dialect.
        #[arg(short, long, env = "SCHEMADELTA_DIALECT", default_value = "postgres")]
        dialect: Dialect,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = Format::Sql)]
        format: Format,

        /// Which side of the comparison is migrated.
        #[arg(long, value_enum, default_value_t = Direction::SourceToTarget)]
        direction: Direction,

        /// Render the rollback script instead of the forward one.
        #[arg(long)]
        rollback: bool,

        /// Matching options file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Treat every unmatched name as a drop plus an add.
        #[arg(long)]
        no_renames: bool,

        /// Score a pair must exceed to count as a rename.
        #[arg(long)]
        rename_threshold: Option<f64>,

        /// Write the result to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the normalized schema model of an export as JSON.
    Inspect {
        /// Export to inspect (JSON array of rows).
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Executable SQL script.
    Sql,
    /// Machine-readable plan report.
    Json,
    /// Plain-English summary grouped by risk.
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Direction {
    /// Migrate `--before` into `--after`.
    SourceToTarget,
    /// Migrate `--after` back into `--before`.
    TargetToSource,
}

/// JSON document written by `compare --format json`.
#[derive(Serialize)]
struct ComparisonReport {
    generated_at: DateTime<Utc>,
    dialect: Dialect,
    summary: RiskSummary,
    records: Vec<ChangeRecord>,
    warnings: Vec<PlanWarning>,
    script: String,
}

fn load_snapshot(path: &Path) -> anyhow::Result<SchemaSnapshot> {
    let rows = load_rows(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = build(&rows).with_context(|| format!("invalid schema in {}", path.display()))?;
    info!(
        "Loaded {} table(s) from {}",
        snapshot.len(),
        path.display()
    );
    Ok(snapshot)
}

fn emit(output: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Compare {
            before,
            after,
            dialect,
            format,
            direction,
            rollback,
            config,
            no_renames,
            rename_threshold,
            output,
        } => {
            let mut options = match config {
                Some(path) => MatchOptions::load(&path)
                    .with_context(|| format!("loading options from {}", path.display()))?,
                None => MatchOptions::default(),
            };
            if no_renames {
                options = options.with_rename_detection(false);
            }
            if let Some(threshold) = rename_threshold {
                options = options.with_threshold(threshold);
            }

            let (source, target) = match direction {
                Direction::SourceToTarget => (before, after),
                Direction::TargetToSource => (after, before),
            };
            let source = load_snapshot(&source)?;
            let target = load_snapshot(&target)?;

            let mut plan = compare(&source, &target, &options)?;
            if rollback {
                plan = plan
                    .rollback()
                    .context("the plan contains irreversible changes and cannot be rolled back")?;
            }
            if plan.summary().data_loss_risk > 0 {
                warn!(
                    "{} change(s) may destroy data",
                    plan.summary().data_loss_risk
                );
            }

            let renderer = dialect.renderer();
            let content = match format {
                Format::Sql => render(&plan, renderer.as_ref()),
                Format::Summary => PlainSummary.enrich(&plan)?,
                Format::Json => {
                    let report = ComparisonReport {
                        generated_at: Utc::now(),
                        dialect,
                        summary: *plan.summary(),
                        records: plan.records(),
                        warnings: plan.warnings().to_vec(),
                        script: render(&plan, renderer.as_ref()),
                    };
                    let mut json = serde_json::to_string_pretty(&report)?;
                    json.push('\n');
                    json
                }
            };
            emit(output.as_deref(), &content)?;
        }

        Commands::Inspect { path } => {
            let snapshot = load_snapshot(&path)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
