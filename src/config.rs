use anyhow::{anyhow, Result};
use imageproc::point::Point;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::detect::{Zone, DEFAULT_DIFF_THRESHOLD, DEFAULT_MAX_AREA, DEFAULT_MIN_AREA};
use crate::frame::{PreprocessSettings, DEFAULT_BLUR_RADIUS, DEFAULT_BLUR_SIGMA};
use crate::ingest::{SourceSettings, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SOURCE_URL, DEFAULT_TIMEOUT_MS};
use crate::pipeline::PipelineSettings;
use crate::Granularity;

const DEFAULT_DB_PATH: &str = "slope_density.db";
const DEFAULT_ZONE_ID: &str = "zone:collision_box";
const DEFAULT_ZONE_RECT: RectConfig = RectConfig {
    x: 0.0,
    y: 450.0,
    w: 900.0,
    h: 50.0,
};
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Deserialize, Default)]
struct DensitydConfigFile {
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    zones: Option<Vec<ZoneConfig>>,
    buckets: Option<BucketConfigFile>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    poll_interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    prefetch: Option<bool>,
    loop_files: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_area: Option<f64>,
    max_area: Option<f64>,
    diff_threshold: Option<u8>,
    blur_radius: Option<u32>,
    blur_sigma: Option<f32>,
    expected_width: Option<u32>,
    expected_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BucketConfigFile {
    granularity: Option<Granularity>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

/// One configured zone: either an explicit polygon or an axis-aligned rect.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ZoneConfig {
    pub id: String,
    #[serde(default)]
    pub points: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub rect: Option<RectConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RectConfig {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl ZoneConfig {
    pub fn to_zone(&self) -> Result<Zone> {
        match (&self.points, &self.rect) {
            (Some(points), None) => Zone::new(
                &self.id,
                points.iter().map(|&[x, y]| Point::new(x, y)).collect(),
            ),
            (None, Some(r)) => Zone::rect(&self.id, r.x, r.y, r.w, r.h),
            (Some(_), Some(_)) => Err(anyhow!(
                "zone {} must set either points or rect, not both",
                self.id
            )),
            (None, None) => Err(anyhow!("zone {} needs points or rect", self.id)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_area: f64,
    pub max_area: f64,
    pub diff_threshold: u8,
    pub blur_radius: u32,
    pub blur_sigma: f32,
    pub expected_dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct DensitydConfig {
    pub db_path: String,
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub zones: Vec<ZoneConfig>,
    pub granularity: Granularity,
    pub retention: Duration,
    expected_width: Option<u32>,
    expected_height: Option<u32>,
}

impl DensitydConfig {
    /// Read `DENSITY_CONFIG` (if set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DENSITY_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        Self::build(file_cfg.unwrap_or_default())
    }

    /// Like `load`, with an explicit config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(read_config_file(path)?)
    }

    fn build(file: DensitydConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DensitydConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let src = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: src.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            poll_interval_ms: src.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            timeout_ms: src.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            prefetch: src.prefetch.unwrap_or(false),
            loop_files: src.loop_files.unwrap_or(true),
        };
        let det = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            min_area: det.min_area.unwrap_or(DEFAULT_MIN_AREA),
            max_area: det.max_area.unwrap_or(DEFAULT_MAX_AREA),
            diff_threshold: det.diff_threshold.unwrap_or(DEFAULT_DIFF_THRESHOLD),
            blur_radius: det.blur_radius.unwrap_or(DEFAULT_BLUR_RADIUS),
            blur_sigma: det.blur_sigma.unwrap_or(DEFAULT_BLUR_SIGMA),
            expected_dimensions: None,
        };
        let zones = file.zones.unwrap_or_else(|| {
            vec![ZoneConfig {
                id: DEFAULT_ZONE_ID.to_string(),
                points: None,
                rect: Some(DEFAULT_ZONE_RECT),
            }]
        });
        let granularity = file
            .buckets
            .and_then(|b| b.granularity)
            .unwrap_or_default();
        let retention = Duration::from_secs(
            file.retention
                .and_then(|r| r.seconds)
                .unwrap_or(DEFAULT_RETENTION_SECS),
        );
        Self {
            db_path,
            source,
            detection,
            zones,
            granularity,
            retention,
            expected_width: det.expected_width,
            expected_height: det.expected_height,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DENSITY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("DENSITY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(interval) = std::env::var("DENSITY_POLL_INTERVAL_MS") {
            if !interval.trim().is_empty() {
                self.source.poll_interval_ms = interval.trim().parse().map_err(|_| {
                    anyhow!("DENSITY_POLL_INTERVAL_MS must be an integer number of milliseconds")
                })?;
            }
        }
        if let Ok(granularity) = std::env::var("DENSITY_GRANULARITY") {
            if !granularity.trim().is_empty() {
                self.granularity = granularity.parse()?;
            }
        }
        if let Ok(retention) = std::env::var("DENSITY_RETENTION_SECS") {
            if !retention.trim().is_empty() {
                let seconds: u64 = retention.trim().parse().map_err(|_| {
                    anyhow!("DENSITY_RETENTION_SECS must be an integer number of seconds")
                })?;
                self.retention = Duration::from_secs(seconds);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.zones.is_empty() {
            return Err(anyhow!("at least one zone must be configured"));
        }
        let mut seen = HashSet::new();
        for zone in &mut self.zones {
            crate::validate_zone_id(&zone.id)?;
            zone.id = zone.id.to_lowercase();
            if !seen.insert(zone.id.clone()) {
                return Err(anyhow!("duplicate zone id {}", zone.id));
            }
            zone.to_zone()?;
        }

        let det = &self.detection;
        if !det.min_area.is_finite() || !det.max_area.is_finite() {
            return Err(anyhow!("detection area bounds must be finite"));
        }
        if det.min_area < 0.0 || det.min_area >= det.max_area {
            return Err(anyhow!(
                "detection requires 0 <= min_area < max_area (got {} / {})",
                det.min_area,
                det.max_area
            ));
        }
        if det.blur_radius > 0 && (det.blur_sigma.is_nan() || det.blur_sigma <= 0.0) {
            return Err(anyhow!("blur_sigma must be > 0 when blur_radius > 0"));
        }

        self.detection.expected_dimensions = match (self.expected_width, self.expected_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "expected_width and expected_height must be set together and be > 0"
                ))
            }
        };

        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        Ok(())
    }

    pub fn build_zones(&self) -> Result<Vec<Zone>> {
        self.zones.iter().map(ZoneConfig::to_zone).collect()
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            zones: self.build_zones()?,
            min_area: self.detection.min_area,
            max_area: self.detection.max_area,
            diff_threshold: self.detection.diff_threshold,
            preprocess: PreprocessSettings {
                blur_radius: self.detection.blur_radius,
                blur_sigma: self.detection.blur_sigma,
                expected_dimensions: self.detection.expected_dimensions,
            },
            granularity: self.granularity,
        })
    }
}

fn read_config_file(path: &Path) -> Result<DensitydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
