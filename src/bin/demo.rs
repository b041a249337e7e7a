//! demo - end-to-end synthetic run of the slope density pipeline
//!
//! Feeds the `stub://` scene through the pipeline at minute granularity on a
//! simulated clock and prints every flushed bucket as JSON.

use anyhow::Result;
use clap::Parser;

use slope_density::config::DensitydConfig;
use slope_density::ingest::SyntheticSource;
use slope_density::{
    now_s, FlushOutcome, FrameSource, Granularity, InMemoryEventSink, Pipeline, TimeBucket,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to process.
    #[arg(long, default_value_t = 160)]
    frames: u64,
    /// Simulated seconds between frames.
    #[arg(long, default_value_t = 5)]
    seconds_per_frame: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DensitydConfig::load()?;
    cfg.granularity = Granularity::Minute;
    let settings = cfg.pipeline_settings()?;

    let start = TimeBucket::for_granularity(now_s()?, Granularity::Minute).start_epoch_s;
    let mut clock = start;
    let mut source = SyntheticSource::new("demo");
    let mut pipeline = Pipeline::new(&settings, InMemoryEventSink::new(), clock)?;

    let mut entered = 0usize;
    for _ in 0..args.frames {
        let mut raw = source.fetch()?;
        raw.captured_at_s = clock;
        let report = pipeline.process(&raw, clock)?;
        entered += report.entered.len();
        if let Some(FlushOutcome::Delivered(bucket)) = &report.flushed {
            log::info!("minute {} -> {} event(s)", bucket.label, bucket.count);
        }
        clock += args.seconds_per_frame;
    }

    // Let the simulated clock finish the last period so it is flushed too.
    let period_end = pipeline.aggregator().current().end_epoch_s();
    pipeline.tick(period_end);

    log::info!(
        "processed {} frame(s) over {}s of simulated time; {} entered event(s)",
        args.frames,
        clock - start,
        entered
    );
    println!("{}", serde_json::to_string_pretty(pipeline.sink().flushed())?);
    Ok(())
}
