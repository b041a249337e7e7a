//! densityd - slope density counting daemon
//!
//! This daemon:
//! 1. Loads configuration (file from DENSITY_CONFIG, then env overrides)
//! 2. Samples frames from the configured source on a fixed poll interval
//! 3. Runs each frame through the motion / zone / occupancy pipeline
//! 4. Flushes one count per completed period to SQLite
//! 5. Enforces retention on the stored counts

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slope_density::config::DensitydConfig;
use slope_density::{now_s, open_source, DensityError, Pipeline, SqliteEventSink};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);
const RETENTION_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML when the name ends in .toml).
    #[arg(long, env = "DENSITY_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many loop iterations.
    #[arg(long)]
    max_passes: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => DensitydConfig::load_from(path)?,
        None => DensitydConfig::load()?,
    };
    let settings = cfg.pipeline_settings()?;

    let sink = SqliteEventSink::open(&cfg.db_path)?;
    let mut source = open_source(&cfg.source)?;
    let mut pipeline = Pipeline::new(&settings, sink, now_s()?)?;

    let zone_ids: Vec<&str> = pipeline.zones().iter().map(|z| z.id()).collect();
    log::info!("densityd running. writing to {}", cfg.db_path);
    log::info!(
        "source={} poll={}ms zones=[{}] granularity={}",
        source.describe(),
        cfg.source.poll_interval_ms,
        zone_ids.join(", "),
        cfg.granularity.as_str()
    );
    log::info!(
        "detection: area band ({}, {}) diff_threshold={} blur_radius={}",
        cfg.detection.min_area,
        cfg.detection.max_area,
        cfg.detection.diff_threshold,
        cfg.detection.blur_radius
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut last_health_log = Instant::now();
    let mut last_prune = Instant::now();
    let mut passes = 0u64;
    let mut entered_total = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        if args.max_passes.is_some_and(|max| passes >= max) {
            log::info!("reached --max-passes {}", passes);
            break;
        }
        passes += 1;

        // Close the period before the (possibly slow) fetch.
        pipeline.tick(now_s()?);

        match source.fetch() {
            Ok(raw) => match pipeline.process(&raw, now_s()?) {
                Ok(report) => {
                    for zone_id in &report.entered {
                        entered_total += 1;
                        log::info!(
                            "entered #{}: zone={} bucket={} running_count={}",
                            entered_total,
                            zone_id,
                            pipeline.aggregator().current().label(),
                            pipeline.aggregator().count()
                        );
                    }
                }
                Err(e @ DensityError::DimensionMismatch { .. }) => {
                    log::error!("frame size changed; stopping: {}", e);
                    return Err(e.into());
                }
                Err(e) => log::warn!("pass skipped: {}", e),
            },
            Err(e) => log::warn!("pass skipped: {}", e),
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} failures={} repeated={} src={}",
                source.is_healthy(),
                stats.frames_fetched,
                stats.fetch_failures,
                stats.repeated_snapshots,
                source.describe()
            );
            last_health_log = Instant::now();
        }

        if last_prune.elapsed() >= RETENTION_INTERVAL {
            match pipeline.sink_mut().enforce_retention(cfg.retention) {
                Ok(removed) => log::debug!("retention: removed {} bucket(s)", removed),
                Err(e) => log::warn!("retention failed: {}", e),
            }
            last_prune = Instant::now();
        }

        std::thread::sleep(cfg.source.poll_interval());
    }

    let agg = pipeline.aggregator();
    log::info!(
        "shutdown after {} pass(es); partial bucket {} count={} left unflushed",
        passes,
        agg.current().label(),
        agg.count()
    );
    Ok(())
}
