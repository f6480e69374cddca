//! Frame acquisition.

use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// A captured colour frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic capture counter assigned by the source.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Placeholder for a transient glitch; the verification loop skips it.
    pub fn empty(sequence: u64) -> Self {
        Self::new(RgbImage::new(0, 0), sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("frame source: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking supplier of frames.
///
/// `Ok(None)` marks the end of the stream; `Err` is a fatal capture failure.
/// Transient glitches are reported as empty frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Replays still images from a directory in file-name order.
pub struct DirectorySource {
    pending: VecDeque<PathBuf>,
    sequence: u64,
}

impl DirectorySource {
    /// List the decodable images in `dir`. Fails if the directory cannot be read.
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && image::ImageFormat::from_path(p).is_ok())
            .collect();
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened frame directory");
        Ok(Self {
            pending: paths.into(),
            sequence: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let sequence = self.sequence;
        self.sequence += 1;

        match image::open(&path) {
            Ok(img) => Ok(Some(Frame::new(img.to_rgb8(), sequence))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "undecodable frame, skipping");
                Ok(Some(Frame::empty(sequence)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::textured_rgb;

    #[test]
    fn test_empty_frame() {
        assert!(Frame::empty(3).is_empty());
        assert!(!Frame::new(RgbImage::new(2, 2), 0).is_empty());
    }

    #[test]
    fn test_directory_source_order_and_end() {
        let dir = tempfile::tempdir().unwrap();
        textured_rgb(8, 8, 1).save(dir.path().join("b.png")).unwrap();
        textured_rgb(6, 6, 2).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.image.dimensions(), (6, 6));
        assert_eq!(first.sequence, 0);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.image.dimensions(), (8, 8));
        assert_eq!(second.sequence, 1);

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_directory_source_corrupt_frame_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"definitely not png").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_directory_source_missing_dir() {
        assert!(DirectorySource::open(Path::new("/nonexistent/frames")).is_err());
    }
}
