//! The verification loop: acquire → detect → describe → match → annotate → present.

use crate::detector::{DetectorError, RegionDetector};
use crate::enrollment::ReferenceSet;
use crate::extractor::DescriptorExtractor;
use crate::matcher::RatioTestMatcher;
use crate::overlay;
use crate::sink::{AnnotatedFrame, PresentationSink};
use crate::source::{CaptureError, Frame, FrameSource};
use crate::types::{FaceVerdict, Region, VerificationResult};
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Loop tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Evaluate the regions of a frame on the rayon pool.
    pub parallel_regions: bool,
    /// Stop after this many processed (non-empty) frames.
    pub max_frames: Option<u64>,
}

/// Why [`VerificationSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    Terminated,
    FrameLimit,
}

/// Counters for a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub faces_seen: u64,
    pub faces_matched: u64,
    pub stop_reason: StopReason,
}

/// A verification session against one enrolled reference.
///
/// The reference set and matcher are fixed at construction and only read
/// afterwards.
pub struct VerificationSession<R, E: DescriptorExtractor> {
    detector: R,
    extractor: E,
    matcher: RatioTestMatcher<E::Metric>,
    reference: ReferenceSet<E::Descriptor>,
    config: SessionConfig,
}

impl<R, E> VerificationSession<R, E>
where
    R: RegionDetector,
    E: DescriptorExtractor,
{
    pub fn new(
        detector: R,
        extractor: E,
        matcher: RatioTestMatcher<E::Metric>,
        reference: ReferenceSet<E::Descriptor>,
    ) -> Self {
        Self {
            detector,
            extractor,
            matcher,
            reference,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reference(&self) -> &ReferenceSet<E::Descriptor> {
        &self.reference
    }

    /// Compare every region of `gray` against the reference.
    pub fn verify_regions(&self, gray: &GrayImage, regions: &[Region]) -> Vec<FaceVerdict> {
        // Borrow fields individually: the detector need not be Sync.
        let (extractor, matcher, reference) = (&self.extractor, &self.matcher, &self.reference);
        let evaluate = |region: &Region| FaceVerdict {
            region: *region,
            result: verify_region(extractor, matcher, reference, gray, region),
        };

        if self.config.parallel_regions && regions.len() > 1 {
            regions.par_iter().map(evaluate).collect()
        } else {
            regions.iter().map(evaluate).collect()
        }
    }

    /// Detect, verify and annotate a single non-empty frame.
    pub fn process_frame(&mut self, mut frame: Frame) -> Result<AnnotatedFrame, SessionError> {
        let gray = image::imageops::grayscale(&frame.image);
        let regions = self.detector.detect(&gray)?;
        let faces = self.verify_regions(&gray, &regions);

        overlay::draw_verdicts(&mut frame.image, &faces);

        tracing::debug!(
            frame = frame.sequence,
            faces = faces.len(),
            matched = faces.iter().filter(|f| f.result.matched).count(),
            latency_ms = frame.captured_at.elapsed().as_millis() as u64,
            "frame processed"
        );

        Ok(AnnotatedFrame { frame, faces })
    }

    /// Run until the source ends, the sink asks to stop, or the frame limit is hit.
    ///
    /// The stop condition is checked before every acquisition, including after
    /// skipped empty frames. A capture or detector failure ends the session with
    /// an error.
    pub fn run<S, P>(
        &mut self,
        source: &mut S,
        sink: &mut P,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource + ?Sized,
        P: PresentationSink + ?Sized,
    {
        tracing::info!(
            reference_descriptors = self.reference.len(),
            parallel = self.config.parallel_regions,
            "verification loop started"
        );

        let mut frames_processed = 0u64;
        let mut frames_skipped = 0u64;
        let mut faces_seen = 0u64;
        let mut faces_matched = 0u64;

        let stop_reason = loop {
            if sink.poll_termination() {
                break StopReason::Terminated;
            }
            if self.config.max_frames.is_some_and(|max| frames_processed >= max) {
                break StopReason::FrameLimit;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::EndOfStream,
                Err(e) => {
                    tracing::error!(error = %e, frames_processed, "capture failed, stopping");
                    return Err(e.into());
                }
            };

            if frame.is_empty() {
                frames_skipped += 1;
                tracing::debug!(frame = frame.sequence, "empty frame, skipping");
                continue;
            }

            let annotated = self.process_frame(frame)?;
            frames_processed += 1;
            faces_seen += annotated.faces.len() as u64;
            faces_matched += annotated.matched_count() as u64;

            sink.show(&annotated);
        };

        let summary = SessionSummary {
            frames_processed,
            frames_skipped,
            faces_seen,
            faces_matched,
            stop_reason,
        };
        tracing::info!(?summary, "verification loop finished");
        Ok(summary)
    }
}

/// Crop, describe and match one region.
fn verify_region<E>(
    extractor: &E,
    matcher: &RatioTestMatcher<E::Metric>,
    reference: &ReferenceSet<E::Descriptor>,
    gray: &GrayImage,
    region: &Region,
) -> VerificationResult
where
    E: DescriptorExtractor,
{
    let (width, height) = gray.dimensions();
    if !region.fits_within(width, height) {
        tracing::debug!(?region, width, height, "region outside frame, not matched");
        return VerificationResult::no_match();
    }

    let crop = image::imageops::crop_imm(gray, region.x, region.y, region.width, region.height);
    let features = extractor.extract(&crop.to_image());
    matcher.compare(reference.descriptors(), features.descriptors())
}
