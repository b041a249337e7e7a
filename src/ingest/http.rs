//! HTTP snapshot source.
//!
//! Each `fetch` issues one GET against a camera snapshot endpoint and decodes
//! the JPEG/PNG body in memory. Many cameras serve the previous image when
//! nothing new has been captured; those repeats are counted (SHA-256 of the
//! body) and passed through unchanged.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::time::Duration;
use url::Url;

use crate::frame::RawImage;
use crate::DensityError;

use super::{FrameSource, SourceStats};

const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;

pub struct HttpSnapshotSource {
    url: String,
    agent: ureq::Agent,
    stats: SourceStats,
    last_digest: Option<[u8; 32]>,
    last_error: Option<String>,
    has_fetched: bool,
}

impl HttpSnapshotSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).context("parse snapshot url")?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            url: parsed.to_string(),
            agent,
            stats: SourceStats::default(),
            last_digest: None,
            last_error: None,
            has_fetched: false,
        })
    }

    fn fetch_bytes(&self) -> Result<Vec<u8>, DensityError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| DensityError::decode(format!("fetch snapshot from {}: {}", self.url, e)))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| DensityError::decode(format!("read snapshot body: {}", e)))?;
        if bytes.is_empty() {
            return Err(DensityError::decode("empty snapshot body"));
        }
        if bytes.len() as u64 > MAX_SNAPSHOT_BYTES {
            return Err(DensityError::decode(format!(
                "snapshot exceeds {} bytes",
                MAX_SNAPSHOT_BYTES
            )));
        }
        Ok(bytes)
    }

    fn note_digest(&mut self, bytes: &[u8]) {
        let digest: [u8; 32] = Sha256::digest(bytes).into();
        if self.last_digest == Some(digest) {
            self.stats.repeated_snapshots += 1;
            log::trace!("{} served a repeated snapshot", self.url);
        }
        self.last_digest = Some(digest);
    }

    fn fetch_once(&mut self) -> Result<RawImage, DensityError> {
        let bytes = self.fetch_bytes()?;
        let captured_at_s =
            crate::now_s().map_err(|e| DensityError::decode(format!("clock: {}", e)))?;
        self.note_digest(&bytes);
        RawImage::decode(&bytes, captured_at_s)
    }
}

impl FrameSource for HttpSnapshotSource {
    fn fetch(&mut self) -> Result<RawImage, DensityError> {
        self.has_fetched = true;
        match self.fetch_once() {
            Ok(image) => {
                self.stats.frames_fetched += 1;
                self.last_error = None;
                Ok(image)
            }
            Err(e) => {
                self.stats.fetch_failures += 1;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.has_fetched && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        assert!(HttpSnapshotSource::new("ftp://camera/snap.jpg", Duration::from_secs(1)).is_err());
        assert!(HttpSnapshotSource::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn repeated_bodies_are_counted() {
        let mut source =
            HttpSnapshotSource::new("http://127.0.0.1:9/snap.jpg", Duration::from_secs(1)).unwrap();
        source.note_digest(b"frame-a");
        source.note_digest(b"frame-a");
        source.note_digest(b"frame-b");
        assert_eq!(source.stats().repeated_snapshots, 1);
        assert!(!source.is_healthy());
    }

    #[test]
    fn unreachable_endpoint_is_a_decode_error() {
        // Port 9 (discard) is closed on test hosts; the connection is refused.
        let mut source =
            HttpSnapshotSource::new("http://127.0.0.1:9/snap.jpg", Duration::from_millis(500)).unwrap();
        assert!(matches!(source.fetch(), Err(DensityError::Decode(_))));
        assert_eq!(source.stats().fetch_failures, 1);
        assert!(!source.is_healthy());
    }
}
