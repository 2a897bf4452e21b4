//! CLI wiring for inspecting einforge result caches.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use einforge_autotune::{DeviceInfo, ResultCache};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "einforge", about = "Inspect einsum autotuning result caches")]
pub struct Cli {
    /// Result cache database.
    #[arg(long, env = "EINFORGE_DB", default_value = einforge_autotune::options::DEFAULT_DB_PATH)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List device tables and how many measurements each holds.
    Tables,
    /// Dump recorded measurements for a device as JSON.
    Records {
        #[arg(long)]
        device: String,
        #[arg(long)]
        transform_id: Option<String>,
    },
    /// Fastest recorded configuration of a transform space, per problem.
    Best {
        #[arg(long)]
        device: String,
        #[arg(long)]
        transform_id: String,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    execute(cli, &mut stdout.lock())
}

pub fn execute(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let Cli { db, command } = cli;
    if !db.is_file() {
        bail!("result cache {} does not exist", db.display());
    }

    match command {
        Command::Tables => {
            let tables = ResultCache::list_tables(&db)?;
            info!(path = %db.display(), tables = tables.len(), "listing device tables");
            for (name, rows) in tables {
                writeln!(out, "{name}\t{rows}")?;
            }
        }
        Command::Records {
            device,
            transform_id,
        } => {
            let cache = open(&db, device)?;
            let records = cache.records(transform_id.as_deref())?;
            writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
            cache.close()?;
        }
        Command::Best {
            device,
            transform_id,
        } => {
            let cache = open(&db, device)?;
            let best = cache.best_per_problem(&transform_id)?;
            if best.is_empty() {
                info!(%transform_id, table = cache.table_name(), "no measurements recorded");
            }
            writeln!(out, "{}", serde_json::to_string_pretty(&best)?)?;
            cache.close()?;
        }
    }
    Ok(())
}

fn open(db: &Path, device: String) -> Result<ResultCache> {
    // Only the device name selects the table.
    Ok(ResultCache::open_existing(db, DeviceInfo::new(device, String::new()))?)
}
