//! Presentation of annotated frames.

use crate::source::Frame;
use crate::types::FaceVerdict;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A frame with its verdicts already drawn on it.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub faces: Vec<FaceVerdict>,
}

impl AnnotatedFrame {
    pub fn matched_count(&self) -> usize {
        self.faces.iter().filter(|f| f.result.matched).count()
    }
}

/// Consumer of annotated frames.
///
/// `show` is fire-and-forget: sinks log their own failures. `poll_termination`
/// is checked before every frame acquisition, whether or not a frame was shown.
pub trait PresentationSink {
    fn show(&mut self, frame: &AnnotatedFrame);

    fn poll_termination(&mut self) -> bool;
}

/// Shared "please stop" signal, set from outside the verification loop.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Logs one event per face; terminates when its stop flag is raised.
pub struct LogSink {
    stop: StopFlag,
}

impl LogSink {
    pub fn new(stop: StopFlag) -> Self {
        Self { stop }
    }
}

impl PresentationSink for LogSink {
    fn show(&mut self, frame: &AnnotatedFrame) {
        for face in &frame.faces {
            if face.result.matched {
                tracing::info!(
                    frame = frame.frame.sequence,
                    good = face.result.good_matches,
                    region = ?face.region,
                    "face matched"
                );
            } else {
                tracing::info!(
                    frame = frame.frame.sequence,
                    good = face.result.good_matches,
                    region = ?face.region,
                    "face not matched"
                );
            }
        }
    }

    fn poll_termination(&mut self) -> bool {
        self.stop.is_stopped()
    }
}

/// Writes every annotated frame as `frame_NNNNNN.png` into a directory.
pub struct DirectorySink {
    dir: PathBuf,
    stop: StopFlag,
    log: LogSink,
}

impl DirectorySink {
    pub fn create(dir: &Path, stop: StopFlag) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(|source| SinkError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            log: LogSink::new(stop.clone()),
            stop,
        })
    }

    pub fn frame_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame_{sequence:06}.png"))
    }
}

impl PresentationSink for DirectorySink {
    fn show(&mut self, frame: &AnnotatedFrame) {
        self.log.show(frame);
        let path = self.frame_path(frame.frame.sequence);
        if let Err(e) = frame.frame.image.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write annotated frame");
        }
    }

    fn poll_termination(&mut self) -> bool {
        self.stop.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{region, textured_rgb};
    use crate::types::VerificationResult;

    fn annotated(sequence: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            frame: Frame::new(textured_rgb(16, 16, sequence), sequence),
            faces: vec![FaceVerdict {
                region: region(1, 1, 8, 8),
                result: VerificationResult {
                    matched: true,
                    good_matches: 17,
                },
            }],
        }
    }

    #[test]
    fn test_stop_flag_shared() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_stopped());
        flag.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_log_sink_follows_flag() {
        let flag = StopFlag::new();
        let mut sink = LogSink::new(flag.clone());
        sink.show(&annotated(0));
        assert!(!sink.poll_termination());
        flag.stop();
        assert!(sink.poll_termination());
    }

    #[test]
    fn test_directory_sink_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(&dir.path().join("out"), StopFlag::new()).unwrap();
        let frame = annotated(7);
        sink.show(&frame);

        let written = image::open(sink.frame_path(7)).unwrap().to_rgb8();
        assert_eq!(written, frame.frame.image);
        assert_eq!(frame.matched_count(), 1);
    }

    #[test]
    fn test_directory_sink_create_over_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        std::fs::write(&blocker, b"x").unwrap();

        let err = DirectorySink::create(&blocker.join("out"), StopFlag::new()).err().unwrap();
        assert!(matches!(err, SinkError::CreateDir { .. }));
    }
}
