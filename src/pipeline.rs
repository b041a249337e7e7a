//! The pipeline driver.
//!
//! `Pipeline` owns every piece of cross-frame state: the previous frame, the
//! per-zone occupancy machine and the accumulating bucket. One call to
//! `process` is one pass; passes are independent and a failed pass leaves
//! the state as it was before the frame arrived.

use anyhow::{anyhow, Result};

use crate::bucket::{BucketAggregator, CompletedBucket};
use crate::detect::{MotionExtractor, RegionFilter, Zone, ZoneMatch, ZoneMatcher};
use crate::frame::{Frame, PreprocessSettings, Preprocessor, RawImage};
use crate::occupancy::OccupancyTracker;
use crate::storage::EventSink;
use crate::{DensityError, Granularity};

/// Everything a pipeline needs to know at construction time.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub zones: Vec<Zone>,
    pub min_area: f64,
    pub max_area: f64,
    pub diff_threshold: u8,
    pub preprocess: PreprocessSettings,
    pub granularity: Granularity,
}

/// Result of handing a completed bucket to the sink.
#[derive(Clone, Debug, PartialEq)]
pub enum FlushOutcome {
    Delivered(CompletedBucket),
    /// The bucket is gone either way; counts are not rolled back.
    Failed(CompletedBucket, DensityError),
}

impl FlushOutcome {
    pub fn bucket(&self) -> &CompletedBucket {
        match self {
            FlushOutcome::Delivered(bucket) | FlushOutcome::Failed(bucket, _) => bucket,
        }
    }
}

/// What happened during one pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    pub captured_at_s: u64,
    /// First usable frame: stored as the comparison baseline, nothing compared.
    pub baseline: bool,
    /// Frame was pixel-identical to the previous one; occupancy untouched.
    pub stale: bool,
    pub regions_extracted: usize,
    pub regions_kept: usize,
    pub matches: Vec<ZoneMatch>,
    /// Zone ids that fired an entered event this pass.
    pub entered: Vec<String>,
    pub flushed: Option<FlushOutcome>,
}

pub struct Pipeline<S: EventSink> {
    preprocessor: Preprocessor,
    extractor: MotionExtractor,
    filter: RegionFilter,
    matcher: ZoneMatcher,
    tracker: OccupancyTracker,
    aggregator: BucketAggregator,
    previous: Option<Frame>,
    sink: S,
}

impl<S: EventSink> Pipeline<S> {
    pub fn new(settings: &PipelineSettings, sink: S, now_s: u64) -> Result<Self> {
        if settings.zones.is_empty() {
            return Err(anyhow!("pipeline needs at least one zone"));
        }
        let filter = RegionFilter::new(settings.min_area, settings.max_area)?;
        let zone_ids = settings.zones.iter().map(|z| z.id().to_string()).collect();
        let matcher = ZoneMatcher::new(settings.zones.clone());
        let tracker = OccupancyTracker::new(matcher.len());

        Ok(Self {
            preprocessor: Preprocessor::new(settings.preprocess.clone()),
            extractor: MotionExtractor::new(settings.diff_threshold),
            filter,
            matcher,
            tracker,
            aggregator: BucketAggregator::new(settings.granularity, now_s, zone_ids),
            previous: None,
            sink,
        })
    }

    /// Close the accumulating bucket if the period has moved on, and hand it
    /// to the sink. A sink failure is logged and reported, never retried.
    pub fn tick(&mut self, now_s: u64) -> Option<FlushOutcome> {
        let completed = self.aggregator.tick(now_s)?;
        match self.sink.flush(&completed) {
            Ok(()) => {
                log::info!(
                    "bucket {} flushed: count={}",
                    completed.label,
                    completed.count
                );
                Some(FlushOutcome::Delivered(completed))
            }
            Err(e) => {
                let err = DensityError::Sink(format!("{:#}", e));
                log::warn!(
                    "bucket {} (count={}) dropped: {}",
                    completed.label,
                    completed.count,
                    err
                );
                Some(FlushOutcome::Failed(completed, err))
            }
        }
    }

    /// Run one pass over `raw`.
    ///
    /// The bucket tick runs after decoding, so a report carrying a flush is
    /// never discarded with a failed pass.
    ///
    /// - `Decode`: pass skipped, no tick, previous frame kept as the baseline.
    /// - `DimensionMismatch`: pass skipped, previous frame kept; the caller
    ///   decides whether to continue.
    pub fn process(&mut self, raw: &RawImage, now_s: u64) -> Result<PassReport, DensityError> {
        let frame = self.preprocessor.preprocess(raw)?;
        let mut report = PassReport {
            captured_at_s: raw.captured_at_s,
            flushed: self.tick(now_s),
            ..PassReport::default()
        };

        let Some(previous) = self.previous.as_ref() else {
            log::debug!(
                "baseline frame {}x{} stored",
                frame.width(),
                frame.height()
            );
            self.previous = Some(frame);
            report.baseline = true;
            return Ok(report);
        };

        if previous.same_pixels(&frame) {
            log::debug!("stale frame (pixel-identical); occupancy unchanged");
            self.previous = Some(frame);
            report.stale = true;
            return Ok(report);
        }

        let regions = self.extractor.extract(previous, &frame)?;
        report.regions_extracted = regions.len();
        let kept = self.filter.filter(regions);
        report.regions_kept = kept.len();

        let matches = self.matcher.match_regions(&kept);
        let occupied = self.matcher.occupancy(&matches);
        for zone_idx in self.tracker.observe(&occupied) {
            self.aggregator.record(zone_idx);
            if let Some(zone) = self.matcher.zones().get(zone_idx) {
                log::debug!("{} entered", zone.id());
                report.entered.push(zone.id().to_string());
            }
        }
        report.matches = matches;

        log::debug!(
            "pass: regions={} kept={} matches={} entered={}",
            report.regions_extracted,
            report.regions_kept,
            report.matches.len(),
            report.entered.len()
        );

        self.previous = Some(frame);
        Ok(report)
    }

    pub fn aggregator(&self) -> &BucketAggregator {
        &self.aggregator
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn zones(&self) -> &[Zone] {
        self.matcher.zones()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }
}
