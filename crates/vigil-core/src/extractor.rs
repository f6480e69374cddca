//! Local feature extraction: oriented FAST corners with steered BRIEF descriptors.
//!
//! Corners are found with FAST-9 on every level of a scale pyramid, oriented by the
//! intensity centroid of a circular patch, and described by 256 pairwise intensity
//! tests on a Gaussian-smoothed level rotated to the corner orientation.

use crate::descriptor::{BinaryDescriptor, DistanceMetric, Hamming, BINARY_DESCRIPTOR_BYTES};
use crate::types::{FeatureSet, Keypoint};
use image::imageops::FilterType;
use image::GrayImage;
use imageproc::corners::corners_fast9;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const DESCRIPTOR_BITS: usize = BINARY_DESCRIPTOR_BYTES * 8;
const PATTERN_SEED: u64 = 0x0b1e_5eed;
const SMOOTHING_SIGMA: f32 = 2.0;
/// Test points are drawn from a square this far inside the patch edge, so that
/// rotated offsets stay within the patch diagonal.
const PATTERN_INSET: i32 = 2;

/// Produces keypoints and descriptors from a grayscale image.
///
/// The metric that compares this extractor's descriptors ships with it, so the
/// matcher never assumes a descriptor kind.
pub trait DescriptorExtractor: Send + Sync {
    type Descriptor: Clone + Send + Sync;
    type Metric: DistanceMetric<Self::Descriptor> + Clone;

    fn extract(&self, image: &GrayImage) -> FeatureSet<Self::Descriptor>;

    fn metric(&self) -> Self::Metric;
}

/// ORB parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    /// Upper bound on features returned across all pyramid levels.
    pub max_features: usize,
    /// Downscale ratio between consecutive pyramid levels.
    pub scale_factor: f32,
    pub n_levels: usize,
    /// Corners closer than this to a level's border are discarded.
    pub edge_threshold: u32,
    /// Side of the square patch used for orientation and descriptor tests.
    pub patch_size: u32,
    pub fast_threshold: u8,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            patch_size: 31,
            fast_threshold: 20,
        }
    }
}

/// A pair of pixel offsets compared by one descriptor bit.
type TestPair = [(f32, f32); 2];

/// ORB-style extractor producing 256-bit [`BinaryDescriptor`]s.
pub struct OrbExtractor {
    config: OrbConfig,
    pattern: Vec<TestPair>,
}

impl OrbExtractor {
    pub fn new(config: OrbConfig) -> Self {
        let pattern = sampling_pattern(half_patch(&config));
        Self { config, pattern }
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    /// Minimum distance from a level border for a corner to be described.
    fn border(&self) -> u32 {
        let half = half_patch(&self.config) as f32;
        let reach = (half - PATTERN_INSET as f32) * std::f32::consts::SQRT_2;
        let rotated_reach = reach.ceil() as u32 + 1;
        self.config.edge_threshold.max(rotated_reach).max(half as u32 + 1)
    }

    /// Number of features to keep on each pyramid level, summing to `max_features`.
    fn features_per_level(&self, levels: usize) -> Vec<usize> {
        let total = self.config.max_features;
        if levels <= 1 {
            return vec![total];
        }

        let factor = 1.0 / self.config.scale_factor;
        let mut per_level = Vec::with_capacity(levels);
        let mut desired = total as f32 * (1.0 - factor) / (1.0 - factor.powi(levels as i32));
        let mut assigned = 0usize;

        for _ in 0..levels - 1 {
            let n = (desired.round() as usize).min(total - assigned);
            per_level.push(n);
            assigned += n;
            desired *= factor;
        }
        per_level.push(total - assigned);
        per_level
    }

    /// Scaled copies of `image`; level 0 is the input itself.
    fn pyramid(&self, image: &GrayImage) -> Vec<(f32, GrayImage)> {
        let min_side = 2 * self.border() + 1;
        let levels = if self.config.scale_factor > 1.0 {
            self.config.n_levels.max(1)
        } else {
            1
        };

        let mut pyramid = Vec::with_capacity(levels);
        for level in 0..levels {
            let scale = self.config.scale_factor.powi(level as i32);
            let width = (image.width() as f32 / scale).round() as u32;
            let height = (image.height() as f32 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }
            let scaled = if level == 0 {
                image.clone()
            } else {
                image::imageops::resize(image, width, height, FilterType::Triangle)
            };
            pyramid.push((scale, scaled));
        }
        pyramid
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

impl DescriptorExtractor for OrbExtractor {
    type Descriptor = BinaryDescriptor;
    type Metric = Hamming;

    fn extract(&self, image: &GrayImage) -> FeatureSet<BinaryDescriptor> {
        let pyramid = self.pyramid(image);
        if pyramid.is_empty() || self.config.max_features == 0 {
            return FeatureSet::empty();
        }

        let quotas = self.features_per_level(pyramid.len());
        let border = self.border();
        let radius = half_patch(&self.config) as i32;

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for (octave, ((scale, level), quota)) in pyramid.iter().zip(quotas).enumerate() {
            if quota == 0 {
                continue;
            }

            let (w, h) = level.dimensions();
            let mut corners: Vec<_> = corners_fast9(level, self.config.fast_threshold)
                .into_iter()
                .filter(|c| c.x >= border && c.y >= border && c.x < w - border && c.y < h - border)
                .collect();
            if corners.is_empty() {
                continue;
            }

            corners.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then((a.y, a.x).cmp(&(b.y, b.x)))
            });
            corners.truncate(quota);

            let smoothed = imageproc::filter::gaussian_blur_f32(level, SMOOTHING_SIGMA);

            for corner in corners {
                let angle = intensity_centroid_angle(level, corner.x, corner.y, radius);
                let descriptor = steered_brief(&smoothed, corner.x, corner.y, angle, &self.pattern);
                descriptors.push(descriptor);
                keypoints.push(Keypoint {
                    x: corner.x as f32 * scale,
                    y: corner.y as f32 * scale,
                    angle,
                    octave: octave as u8,
                    size: self.config.patch_size as f32 * scale,
                    response: corner.score,
                });
            }
        }

        tracing::trace!(count = descriptors.len(), levels = pyramid.len(), "extracted features");
        FeatureSet::new(keypoints, descriptors)
    }

    fn metric(&self) -> Hamming {
        Hamming
    }
}

fn half_patch(config: &OrbConfig) -> u32 {
    (config.patch_size / 2).max(PATTERN_INSET as u32 + 1)
}

/// Reproducible random test pairs inside the patch, identical for every extractor
/// with the same patch size so that descriptors stay comparable across runs.
fn sampling_pattern(half_patch: u32) -> Vec<TestPair> {
    let reach = half_patch as i32 - PATTERN_INSET;
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut offset = || {
        (
            rng.gen_range(-reach..=reach) as f32,
            rng.gen_range(-reach..=reach) as f32,
        )
    };

    (0..DESCRIPTOR_BITS).map(|_| [offset(), offset()]).collect()
}

/// Orientation of the vector from the patch centre to its intensity centroid.
fn intensity_centroid_angle(image: &GrayImage, cx: u32, cy: u32, radius: i32) -> f32 {
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;

    for dy in -radius..=radius {
        let span = ((radius * radius - dy * dy) as f32).sqrt() as i32;
        for dx in -span..=span {
            let value = pixel_at(image, cx as i64 + dx as i64, cy as i64 + dy as i64) as f32;
            m10 += dx as f32 * value;
            m01 += dy as f32 * value;
        }
    }

    m01.atan2(m10)
}

fn steered_brief(
    image: &GrayImage,
    x: u32,
    y: u32,
    angle: f32,
    pattern: &[TestPair],
) -> BinaryDescriptor {
    let (sin, cos) = angle.sin_cos();
    let rotate = |(dx, dy): (f32, f32)| -> (i64, i64) {
        (
            x as i64 + (dx * cos - dy * sin).round() as i64,
            y as i64 + (dx * sin + dy * cos).round() as i64,
        )
    };

    let mut bytes = [0u8; BINARY_DESCRIPTOR_BYTES];
    for (bit, [a, b]) in pattern.iter().enumerate() {
        let (ax, ay) = rotate(*a);
        let (bx, by) = rotate(*b);
        if pixel_at(image, ax, ay) < pixel_at(image, bx, by) {
            bytes[bit / 8] |= 1 << (bit % 8);
        }
    }
    BinaryDescriptor(bytes)
}

/// Intensity at `(x, y)`, zero outside the image.
fn pixel_at(image: &GrayImage, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 {
        return 0;
    }
    image
        .get_pixel_checked(x as u32, y as u32)
        .map(|p| p[0])
        .unwrap_or(0)
}
