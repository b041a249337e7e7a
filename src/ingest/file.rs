//! Local image file source.
//!
//! Replays `.jpg`/`.jpeg`/`.png` files from a directory in lexical order, or
//! serves one file over and over. Capture time is the time of the read.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::RawImage;
use crate::DensityError;

use super::{FrameSource, SourceStats};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct FileSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    stats: SourceStats,
    last_ok: bool,
}

impl FileSource {
    /// Open a directory or a single image file. A single file always repeats.
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root)
            .with_context(|| format!("open frame source path {}", root.display()))?;

        let (files, looping) = if meta.is_dir() {
            (list_images(&root)?, looping)
        } else {
            if !has_image_extension(&root) {
                return Err(anyhow!(
                    "{} is not a jpg/jpeg/png file",
                    root.display()
                ));
            }
            (vec![root.clone()], true)
        };
        if files.is_empty() {
            return Err(anyhow!("no jpg/jpeg/png files in {}", root.display()));
        }
        log::info!(
            "file source: {} image(s) from {} (loop={})",
            files.len(),
            root.display(),
            looping
        );
        Ok(Self {
            root,
            files,
            next: 0,
            looping,
            stats: SourceStats::default(),
            last_ok: true,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn read_next(&mut self) -> Result<RawImage, DensityError> {
        if self.next >= self.files.len() {
            if !self.looping {
                return Err(DensityError::decode(format!(
                    "{} exhausted after {} file(s)",
                    self.root.display(),
                    self.files.len()
                )));
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;

        let bytes = std::fs::read(path)
            .map_err(|e| DensityError::decode(format!("read {}: {}", path.display(), e)))?;
        let captured_at_s =
            crate::now_s().map_err(|e| DensityError::decode(format!("clock: {}", e)))?;
        RawImage::decode(&bytes, captured_at_s)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl FrameSource for FileSource {
    fn fetch(&mut self) -> Result<RawImage, DensityError> {
        match self.read_next() {
            Ok(image) => {
                self.stats.frames_fetched += 1;
                self.last_ok = true;
                Ok(image)
            }
            Err(e) => {
                self.stats.fetch_failures += 1;
                self.last_ok = false;
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.last_ok
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
