//! Frame sources.
//!
//! This module provides the sources a pipeline can sample from:
//! - HTTP(S) snapshot endpoints (feature: ingest-http, on by default)
//! - Local image files, a single file or a directory replayed in order
//! - Synthetic scene (`stub://`) for tests and the demo
//!
//! Any source can be wrapped in a `PrefetchSource`, which fetches the next
//! frame on a worker thread while the current one is processed.
//!
//! A source is responsible for:
//! - Delivering a decoded pixel buffer stamped with its capture time
//! - Mapping every acquisition failure to `DensityError::Decode`
//!
//! A source MUST NOT:
//! - Store frames to disk
//! - Promise fresh content on every call (identical snapshots are legal)

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

use crate::frame::RawImage;
use crate::DensityError;

mod file;
#[cfg(feature = "ingest-http")]
mod http;
mod prefetch;
mod synthetic;

pub use file::FileSource;
#[cfg(feature = "ingest-http")]
pub use http::HttpSnapshotSource;
pub use prefetch::PrefetchSource;
pub use synthetic::SyntheticSource;

/// A frame supplier. `fetch` blocks until a frame is available or fails.
pub trait FrameSource {
    fn fetch(&mut self) -> Result<RawImage, DensityError>;

    /// True while the source is delivering frames.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Short human-readable identity for logs.
    fn describe(&self) -> String;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn fetch(&mut self) -> Result<RawImage, DensityError> {
        (**self).fetch()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Running counters for a source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_fetched: u64,
    pub fetch_failures: u64,
    /// Snapshots byte-identical to the one before (camera served a cached image).
    pub repeated_snapshots: u64,
}

pub const DEFAULT_SOURCE_URL: &str = "stub://slope";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Where frames come from and how often.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://...`, `http(s)://...`, or a local file/directory path.
    pub url: String,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub prefetch: bool,
    /// Replay a file directory from the start once it is exhausted.
    pub loop_files: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            prefetch: false,
            loop_files: true,
        }
    }
}

impl SourceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Open the source named by `settings.url`, dispatching on its scheme.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource + Send>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }

    let source: Box<dyn FrameSource + Send> = match url.split_once("://") {
        Some(("stub", name)) => Box::new(SyntheticSource::new(name)),
        Some((scheme, _)) if scheme == "http" || scheme == "https" => open_http(url, settings)?,
        Some((scheme, _)) => {
            return Err(anyhow!(
                "unsupported source scheme '{}'; expected stub, http(s), or a local path",
                scheme
            ))
        }
        None => Box::new(FileSource::open(url, settings.loop_files)?),
    };

    if settings.prefetch {
        return Ok(Box::new(PrefetchSource::spawn(source)?));
    }
    Ok(source)
}

#[cfg(feature = "ingest-http")]
fn open_http(url: &str, settings: &SourceSettings) -> Result<Box<dyn FrameSource + Send>> {
    Ok(Box::new(HttpSnapshotSource::new(url, settings.timeout())?))
}

#[cfg(not(feature = "ingest-http"))]
fn open_http(_url: &str, _settings: &SourceSettings) -> Result<Box<dyn FrameSource + Send>> {
    Err(anyhow!("http sources require the ingest-http feature"))
}
