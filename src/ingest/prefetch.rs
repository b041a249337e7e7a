//! Single-slot prefetching.
//!
//! The worker thread owns the wrapped source and fetches exactly one frame
//! per request. The caller hands out the next request right after taking a
//! frame, so acquisition overlaps processing with at most one fetch in
//! flight and at most one finished frame waiting.

use anyhow::Result;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::frame::RawImage;
use crate::DensityError;

use super::{FrameSource, SourceStats};

#[derive(Clone, Debug, Default)]
struct WorkerStatus {
    healthy: bool,
    stats: SourceStats,
}

pub struct PrefetchSource {
    requests: Option<SyncSender<()>>,
    responses: Receiver<Result<RawImage, DensityError>>,
    in_flight: bool,
    status: Arc<Mutex<WorkerStatus>>,
    inner: String,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchSource {
    pub fn spawn<S>(source: S) -> Result<Self>
    where
        S: FrameSource + Send + 'static,
    {
        let inner = source.describe();
        let (req_tx, req_rx) = sync_channel::<()>(1);
        let (resp_tx, resp_rx) = sync_channel(1);
        let status = Arc::new(Mutex::new(WorkerStatus {
            healthy: source.is_healthy(),
            stats: source.stats(),
        }));

        let worker_status = status.clone();
        let worker = std::thread::Builder::new()
            .name("frame-prefetch".to_string())
            .spawn(move || {
                let mut source = source;
                while req_rx.recv().is_ok() {
                    let result = source.fetch();
                    if let Ok(mut s) = worker_status.lock() {
                        s.healthy = source.is_healthy();
                        s.stats = source.stats();
                    }
                    if resp_tx.send(result).is_err() {
                        break;
                    }
                }
                log::debug!("prefetch worker for {} stopped", source.describe());
            })?;

        Ok(Self {
            requests: Some(req_tx),
            responses: resp_rx,
            in_flight: false,
            status,
            inner,
            worker: Some(worker),
        })
    }

    fn request(&mut self) -> bool {
        let Some(requests) = self.requests.as_ref() else {
            return false;
        };
        self.in_flight = requests.send(()).is_ok();
        self.in_flight
    }
}

impl FrameSource for PrefetchSource {
    fn fetch(&mut self) -> Result<RawImage, DensityError> {
        if !self.in_flight && !self.request() {
            return Err(DensityError::decode("prefetch worker is not running"));
        }
        let result = self
            .responses
            .recv()
            .map_err(|_| DensityError::decode("prefetch worker stopped"))?;
        self.in_flight = false;
        self.request();
        result
    }

    fn is_healthy(&self) -> bool {
        self.status.lock().map(|s| s.healthy).unwrap_or(false)
    }

    fn stats(&self) -> SourceStats {
        self.status
            .lock()
            .map(|s| s.stats.clone())
            .unwrap_or_default()
    }

    fn describe(&self) -> String {
        format!("prefetch({})", self.inner)
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            // Unblock a worker waiting to hand over a finished frame.
            while self.responses.try_recv().is_ok() {}
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        calls: Arc<AtomicU64>,
    }

    impl FrameSource for Counting {
        fn fetch(&mut self) -> Result<RawImage, DensityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawImage::new(vec![n as u8; 4], 2, 2, PixelLayout::Luma8, n))
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_fetched: self.calls.load(Ordering::SeqCst),
                ..SourceStats::default()
            }
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn frames_arrive_in_order() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut source = PrefetchSource::spawn(Counting { calls: calls.clone() }).unwrap();
        for expected in 0..5u64 {
            assert_eq!(source.fetch().unwrap().captured_at_s, expected);
        }
        assert_eq!(source.describe(), "prefetch(counting)");
        // Five delivered plus at most one prefetched.
        let total = calls.load(Ordering::SeqCst);
        assert!(total == 5 || total == 6, "unexpected fetch count {}", total);
    }

    #[test]
    fn drop_joins_worker() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut source = PrefetchSource::spawn(Counting { calls: calls.clone() }).unwrap();
        source.fetch().unwrap();
        drop(source);
        let settled = calls.load(Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }
}
