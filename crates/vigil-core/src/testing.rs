//! Fakes and fixtures shared by the unit tests.

use crate::descriptor::{Euclidean, FloatDescriptor};
use crate::detector::{DetectorError, RegionDetector};
use crate::extractor::DescriptorExtractor;
use crate::sink::{AnnotatedFrame, PresentationSink, StopFlag};
use crate::source::{CaptureError, Frame, FrameSource};
use crate::types::{FeatureSet, Keypoint, Region};
use image::{GrayImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub fn region(x: u32, y: u32, width: u32, height: u32) -> Region {
    Region {
        x,
        y,
        width,
        height,
        confidence: 1.0,
    }
}

/// Per-pixel random colour noise.
pub fn textured_rgb(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
}

/// Per-pixel random gray noise stored as RGB.
pub fn noise_patch(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| {
        let v: u8 = rng.gen();
        Rgb([v, v, v])
    })
}

pub fn paste(frame: &mut RgbImage, patch: &RgbImage, x: u32, y: u32) {
    image::imageops::replace(frame, patch, x as i64, y as i64);
}

/// Returns the same regions for every image.
pub struct FixedDetector {
    regions: Vec<Region>,
    pub calls: usize,
}

impl FixedDetector {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions, calls: 0 }
    }
}

impl RegionDetector for FixedDetector {
    fn detect(&mut self, _image: &GrayImage) -> Result<Vec<Region>, DetectorError> {
        self.calls += 1;
        Ok(self.regions.clone())
    }
}

/// One descriptor per pixel row: the row's intensities.
pub struct RowExtractor;

impl DescriptorExtractor for RowExtractor {
    type Descriptor = FloatDescriptor;
    type Metric = Euclidean;

    fn extract(&self, image: &GrayImage) -> FeatureSet<FloatDescriptor> {
        let (width, height) = image.dimensions();
        let keypoints = (0..height)
            .map(|y| Keypoint {
                x: 0.0,
                y: y as f32,
                angle: 0.0,
                octave: 0,
                size: width as f32,
                response: 1.0,
            })
            .collect();
        let descriptors = (0..height)
            .map(|y| FloatDescriptor((0..width).map(|x| image.get_pixel(x, y)[0] as f32).collect()))
            .collect();
        FeatureSet::new(keypoints, descriptors)
    }

    fn metric(&self) -> Euclidean {
        Euclidean
    }
}

/// Never finds anything.
pub struct NoFeatures;

impl DescriptorExtractor for NoFeatures {
    type Descriptor = FloatDescriptor;
    type Metric = Euclidean;

    fn extract(&self, _image: &GrayImage) -> FeatureSet<FloatDescriptor> {
        FeatureSet::empty()
    }

    fn metric(&self) -> Euclidean {
        Euclidean
    }
}

/// Plays back a fixed script of capture outcomes, then reports end of stream.
pub struct ScriptedSource {
    script: VecDeque<Result<Option<Frame>, CaptureError>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Option<Frame>, CaptureError>>) -> Self {
        Self { script: script.into() }
    }

    pub fn frames(images: Vec<RgbImage>) -> Self {
        Self::new(
            images
                .into_iter()
                .enumerate()
                .map(|(i, image)| Ok(Some(Frame::new(image, i as u64))))
                .collect(),
        )
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }
}

/// Serves empty frames, raising `stop` once `after` of them have gone out.
///
/// Ends the stream after a large bound so a loop that ignores `stop` still returns.
pub struct StoppingSource {
    stop: StopFlag,
    after: usize,
    served: usize,
}

impl StoppingSource {
    pub fn new(stop: StopFlag, after: usize) -> Self {
        Self {
            stop,
            after,
            served: 0,
        }
    }
}

impl FrameSource for StoppingSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.served >= 10_000 {
            return Ok(None);
        }
        self.served += 1;
        if self.served >= self.after {
            self.stop.stop();
        }
        Ok(Some(Frame::empty(self.served as u64)))
    }
}

/// Keeps every presented frame; optionally raises a stop flag after `n` frames.
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Vec<AnnotatedFrame>,
    stop: Option<(StopFlag, usize)>,
}

impl RecordingSink {
    pub fn with_stop(flag: StopFlag, after: usize) -> Self {
        Self {
            frames: Vec::new(),
            stop: Some((flag, after)),
        }
    }
}

impl PresentationSink for RecordingSink {
    fn show(&mut self, frame: &AnnotatedFrame) {
        self.frames.push(frame.clone());
        if let Some((flag, after)) = &self.stop {
            if self.frames.len() >= *after {
                flag.stop();
            }
        }
    }

    fn poll_termination(&mut self) -> bool {
        self.stop.as_ref().is_some_and(|(flag, _)| flag.is_stopped())
    }
}
