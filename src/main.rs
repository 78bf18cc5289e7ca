//! Siterake command-line interface
//!
//! Subcommands mirror the engine's lifecycle: validate and list specs,
//! run them, and inspect run history.

use anyhow::Context;
use clap::{Parser, Subcommand};
use siterake::config::{load_spec, scan_spec_dir, EngineConfig};
use siterake::history::RunHistoryStore;
use siterake::sink::SqliteSink;
use siterake::Orchestrator;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Siterake: declarative scraping for paginated web sources
#[derive(Parser, Debug)]
#[command(name = "siterake")]
#[command(version)]
#[command(about = "Declarative, rate-limited scraping engine", long_about = None)]
struct Cli {
    /// Directory containing site spec files
    #[arg(long, default_value = "./specs", global = true)]
    specs_dir: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all valid specs (or one site) to completion
    Run {
        /// Only run the spec with this site name
        #[arg(long)]
        site: Option<String>,

        /// Worker tasks in the pool
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Hard ceiling on requests in flight across all sites
        #[arg(long, default_value_t = 16)]
        max_concurrent: usize,

        /// Meta database recording run history
        #[arg(long, default_value = "./output/siterake_meta.db")]
        history_db: PathBuf,
    },

    /// Validate every spec file and report problems
    Validate,

    /// List discovered specs and their status
    List,

    /// Show last run results per site
    Status {
        /// Show recent history for one site instead of the overview
        #[arg(long)]
        site: Option<String>,

        #[arg(long, default_value_t = 5)]
        limit: u32,

        #[arg(long, default_value = "./output/siterake_meta.db")]
        history_db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            site,
            workers,
            max_concurrent,
            history_db,
        } => {
            let config = EngineConfig {
                specs_dir: cli.specs_dir.clone(),
                workers,
                global_concurrency: max_concurrent,
                history_db,
            };
            handle_run(config, site).await
        }
        Command::Validate => handle_validate(&cli.specs_dir),
        Command::List => handle_list(&cli.specs_dir),
        Command::Status {
            site,
            limit,
            history_db,
        } => handle_status(&history_db, site.as_deref(), limit),
    }
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("siterake=info,warn"),
            1 => EnvFilter::new("siterake=debug,info"),
            2 => EnvFilter::new("siterake=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn handle_run(config: EngineConfig, site: Option<String>) -> anyhow::Result<()> {
    let mut specs = scan_spec_dir(&config.specs_dir)
        .with_context(|| format!("cannot scan spec directory {}", config.specs_dir.display()))?;

    if let Some(site) = &site {
        specs.retain(|loaded| &loaded.spec.site_name == site);
        if specs.is_empty() {
            anyhow::bail!("no valid spec found for site '{}'", site);
        }
    }

    if specs.is_empty() {
        tracing::warn!("No valid specs in {}; nothing to do", config.specs_dir.display());
        return Ok(());
    }

    tracing::info!(
        "Starting run over {} site(s) with {} worker(s)",
        specs.len(),
        config.workers
    );

    let orchestrator = Orchestrator::new(config, specs, Box::new(SqliteSink::new()));

    // Ctrl-C cancels the run; in-flight fetches finish and partial
    // results stay in the sink
    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling run");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run().await?;
    println!("{}", summary.format_report());

    if summary.sites_failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_validate(specs_dir: &PathBuf) -> anyhow::Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(specs_dir)
        .with_context(|| format!("cannot read {}", specs_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    if paths.is_empty() {
        println!("No spec files found in {}", specs_dir.display());
        return Ok(());
    }

    let mut valid = 0;
    for path in &paths {
        match load_spec(path) {
            Ok(spec) => {
                valid += 1;
                println!("✓ {} ({})", spec.site_name, path.display());
            }
            Err(e) => {
                println!("✗ {}", path.display());
                println!("  - {}", e);
            }
        }
    }

    println!("\nSummary: {} of {} specs valid", valid, paths.len());
    if valid < paths.len() {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_list(specs_dir: &PathBuf) -> anyhow::Result<()> {
    let specs = scan_spec_dir(specs_dir)
        .with_context(|| format!("cannot scan {}", specs_dir.display()))?;

    if specs.is_empty() {
        println!("No valid spec files found in {}", specs_dir.display());
        return Ok(());
    }

    let rows: Vec<[String; 4]> = specs
        .iter()
        .map(|loaded| {
            [
                loaded.spec.site_name.clone(),
                loaded
                    .path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default(),
                loaded.spec.pagination.kind.as_str().to_string(),
                loaded.spec.renderer.as_str().to_string(),
            ]
        })
        .collect();

    print_table(&["Site Name", "File", "Pagination", "Renderer"], &rows);
    Ok(())
}

fn handle_status(history_db: &PathBuf, site: Option<&str>, limit: u32) -> anyhow::Result<()> {
    let store = RunHistoryStore::new(history_db)?;

    if let Some(site) = site {
        let history = store.site_history(site, limit)?;
        if history.is_empty() {
            println!("No run history found for site '{}'.", site);
            return Ok(());
        }

        println!("Status for site: {}", site);
        println!("{}", "-".repeat(40));
        for run in history {
            println!("Run finished: {}", run.finished_at);
            println!("Terminal:     {}", run.terminal);
            println!("Pages:        {}", run.pages_fetched);
            println!("Items:        {}", run.items_extracted);
            if let Some(error) = &run.last_error {
                println!("Last error:   {}", error);
            }
            println!("{}", "-".repeat(20));
        }
    } else {
        let runs = store.last_runs()?;
        if runs.is_empty() {
            println!("No run history found. Execute `siterake run` to begin scraping.");
            return Ok(());
        }

        let rows: Vec<[String; 4]> = runs
            .iter()
            .map(|run| {
                [
                    run.site_name.clone(),
                    run.finished_at.clone(),
                    run.items_extracted.to_string(),
                    run.terminal.to_string(),
                ]
            })
            .collect();
        print_table(&["Site Name", "Last Run", "Items", "Terminal"], &rows);
    }

    Ok(())
}

fn print_table(headers: &[&str; 4], rows: &[[String; 4]]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>()));
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ")
    );
    for row in rows {
        println!("{}", line(row));
    }
}
