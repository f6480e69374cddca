use serde::{Deserialize, Serialize};

/// Axis-aligned face region in pixel coordinates of the image it was detected in.
///
/// Always non-empty and fully inside the source image; use [`Region::clamped`]
/// to build one from raw detector output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence, 0.0 when the detector does not score its output.
    pub confidence: f32,
}

impl Region {
    /// Clip a floating-point box `[x1, y1) .. [x2, y2)` to an image of `width` × `height`.
    ///
    /// Returns `None` when nothing of the box survives clipping.
    pub fn clamped(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        confidence: f32,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let left = x1.min(x2).max(0.0).floor() as u32;
        let top = y1.min(y2).max(0.0).floor() as u32;
        let right = (x1.max(x2).ceil() as i64).clamp(0, width as i64) as u32;
        let bottom = (y1.max(y2).ceil() as i64).clamp(0, height as i64) as u32;

        if left >= right || top >= bottom {
            return None;
        }

        Some(Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
            confidence,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// True when the region lies entirely inside a `width` × `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

/// Location and orientation of a local feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Sub-pixel position in the coordinates of the extracted image (pyramid level 0).
    pub x: f32,
    pub y: f32,
    /// Dominant orientation in radians.
    pub angle: f32,
    /// Pyramid level the feature was found on.
    pub octave: u8,
    /// Diameter of the described patch, in level-0 pixels.
    pub size: f32,
    /// Corner response; higher is stronger.
    pub response: f32,
}

/// Keypoints and their descriptors from a single extraction call.
///
/// `keypoints[i]` is described by `descriptors[i]`.
#[derive(Debug, Clone)]
pub struct FeatureSet<D> {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<D>,
}

impl<D> FeatureSet<D> {
    /// Pair up keypoints and descriptors. Extra entries on the longer side are dropped.
    pub fn new(mut keypoints: Vec<Keypoint>, mut descriptors: Vec<D>) -> Self {
        let n = keypoints.len().min(descriptors.len());
        keypoints.truncate(n);
        descriptors.truncate(n);
        Self {
            keypoints,
            descriptors,
        }
    }

    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[D] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<D> {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Two nearest reference descriptors for one candidate descriptor, nearest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPair {
    pub candidate_idx: usize,
    pub nearest_idx: usize,
    pub nearest_distance: f32,
    pub second_idx: usize,
    pub second_distance: f32,
}

/// Outcome of comparing one face region against the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub matched: bool,
    /// Number of candidate descriptors that passed the ratio test.
    pub good_matches: usize,
}

impl VerificationResult {
    pub const fn no_match() -> Self {
        Self {
            matched: false,
            good_matches: 0,
        }
    }
}

/// Verification outcome for one detected region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceVerdict {
    pub region: Region,
    pub result: VerificationResult,
}
