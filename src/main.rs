// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use sw_collector::config::{DEFAULT_CONFIG_PATH, Settings};
use sw_collector::history::{ExtractionEngine, ExtractionOptions, LogSource};
use sw_collector::inventory::InventoryLister;
use sw_collector::logging::{DEFAULT_DEBUG_LEVEL, LogConfig};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "sw-collector")]
#[command(author, version, about = "Collect software events from the package manager history log", long_about = None)]
struct Cli {
    /// List the software identities in the inventory
    #[arg(short, long)]
    list: bool,

    /// Stop after this many new events (0 = no limit)
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    count: u32,

    /// Debug level (-1 silent, 0 warnings, 1 info, 2 debug, 3 trace)
    #[arg(short, long, value_name = "LEVEL", default_value_t = DEFAULT_DEBUG_LEVEL, allow_negative_numbers = true)]
    debug: i32,

    /// Suppress diagnostic messages on stderr
    #[arg(short, long)]
    quiet: bool,

    /// Settings file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let log = LogConfig::new(cli.debug, cli.quiet);
    log.init_tracing();

    match run(&cli, log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sw-collector: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, log: LogConfig) -> Result<()> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    settings.check_modules();

    let db_path = settings.database_path()?;

    if cli.list {
        list_identities(&db_path, log)
    } else {
        extract_history(cli, &settings, &db_path, log)
    }
}

fn extract_history(cli: &Cli, settings: &Settings, db_path: &str, log: LogConfig) -> Result<()> {
    let history = settings.history_path()?;

    if let Some(uri) = settings.rest_api_uri()? {
        debug!("REST verifier at {}", uri);
    }

    sw_collector::db::init(db_path)
        .with_context(|| format!("Failed to initialize database at {}", db_path))?;
    let mut conn = sw_collector::db::open(db_path)?;

    let source = LogSource::open(history)
        .with_context(|| format!("Failed to open history log {}", history.display()))?;
    info!("Opened {} ({} bytes)", history.display(), source.len());

    let options = ExtractionOptions {
        count: cli.count,
        zone: settings.timezone,
        os: settings.os.clone(),
    };
    let mut engine = ExtractionEngine::new(&mut conn, options, log);
    let report = engine.run(&source)?;

    debug!(
        "Recorded {} events ({} operations), {} identities installed",
        report.events_recorded, report.operations_recorded, report.inventory.installed
    );
    Ok(())
}

fn list_identities(db_path: &str, log: LogConfig) -> Result<()> {
    let conn = sw_collector::db::open(db_path)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    InventoryLister::new(&conn, log).enumerate(|identity| {
        writeln!(
            out,
            "{},{},{},{}",
            identity.name,
            identity.package,
            identity.version,
            u8::from(identity.installed)
        )?;
        Ok(())
    })?;

    out.flush()?;
    Ok(())
}
