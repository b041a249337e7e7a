//! export_counts - print stored bucket counts as JSON

use anyhow::{anyhow, Result};
use clap::Parser;

use slope_density::SqliteEventSink;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the counts database.
    #[arg(long, env = "DENSITY_DB_PATH", default_value = "slope_density.db")]
    db_path: String,
    /// Maximum buckets to print, newest first.
    #[arg(long, default_value_t = 48)]
    limit: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if !std::path::Path::new(&args.db_path).exists() {
        return Err(anyhow!("database {} does not exist", args.db_path));
    }
    let sink = SqliteEventSink::open(&args.db_path)?;
    let buckets = sink.read_recent(args.limit)?;
    log::info!("read {} bucket(s) from {}", buckets.len(), args.db_path);
    println!("{}", serde_json::to_string_pretty(&buckets)?);
    Ok(())
}
