//! Face region detection.
//!
//! [`RegionDetector`] is the seam the pipeline depends on; [`ScrfdDetector`] runs the
//! SCRFD model (anchor-free, three strides) through ONNX Runtime and post-processes
//! with non-maximum suppression.

use crate::types::Region;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Score and bbox heads per stride; keypoint heads, when exported, are ignored.
const SCRFD_MIN_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds face regions in an image.
///
/// Regions are returned in detector order and always lie inside the image.
/// An empty list is a normal outcome.
pub trait RegionDetector: Send {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<Region>, DetectorError>;
}

/// SCRFD tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrfdConfig {
    /// Side of the square letterboxed network input; must be a multiple of 32.
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for ScrfdConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Scale and padding applied when fitting a frame into the network input.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn fit(width: u32, height: u32, input_size: usize) -> (Self, u32, u32) {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size as u32);
        let pad_x = (input_size as u32 - new_w) as f32 / 2.0;
        let pad_y = (input_size as u32 - new_h) as f32 / 2.0;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    /// Map a point from network input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Raw scored box in frame coordinates, before clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based region detector.
pub struct ScrfdDetector {
    session: Session,
    config: ScrfdConfig,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, config: ScrfdConfig) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }
        if config.input_size == 0 || config.input_size % 32 != 0 {
            return Err(DetectorError::InferenceFailed(format!(
                "input size {} is not a positive multiple of 32",
                config.input_size
            )));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads.max(1))?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            input_size = config.input_size,
            "loaded SCRFD model"
        );

        if output_names.len() < SCRFD_MIN_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs at least {SCRFD_MIN_OUTPUTS} outputs, got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            config,
            stride_indices,
        })
    }

    /// Letterbox a grayscale image into a normalized NCHW tensor.
    fn preprocess(&self, image: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
        let size = self.config.input_size;
        let (letterbox, new_w, new_h) = LetterboxInfo::fit(image.width(), image.height(), size);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let pad_x = letterbox.pad_x.floor() as u32;
        let pad_y = letterbox.pad_y.floor() as u32;

        // Padding uses the mean so it normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let normalized = (pixel[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
            for channel in 0..3 {
                tensor[[0, channel, ty, tx]] = normalized;
            }
        }

        (tensor, letterbox)
    }
}

impl RegionDetector for ScrfdDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<Region>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.config.input_size,
                &letterbox,
                self.config.confidence_threshold,
            ));
        }

        let regions: Vec<Region> = nms(candidates, self.config.nms_threshold)
            .into_iter()
            .filter_map(|c| Region::clamped(c.x1, c.y1, c.x2, c.y2, c.score, width, height))
            .collect();

        tracing::debug!(count = regions.len(), "SCRFD detections");
        Ok(regions)
    }
}

/// Map stride slots to output tensors.
///
/// Uses names like "score_8" / "bbox_16" when the export provides them, otherwise
/// the standard positional layout [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections above `threshold` for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut candidates = Vec::new();
    for idx in 0..num_anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        let Some(offsets) = bboxes.get(bbox_off..bbox_off + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * s;
        let anchor_y = (cell / grid) as f32 * s;

        let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * s, anchor_y - offsets[1] * s);
        let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * s, anchor_y + offsets[3] * s);

        candidates.push(Candidate { x1, y1, x2, y2, score });
    }

    candidates
}

/// Non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
