//! Descriptor representations and the distance functions that compare them.

use serde::{Deserialize, Serialize};

/// Number of bytes in a [`BinaryDescriptor`] (256 tests).
pub const BINARY_DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary descriptor, one bit per intensity comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryDescriptor(pub [u8; BINARY_DESCRIPTOR_BYTES]);

impl BinaryDescriptor {
    /// Number of differing bits.
    pub fn hamming(&self, other: &BinaryDescriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Real-valued descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatDescriptor(pub Vec<f32>);

impl FloatDescriptor {
    /// Euclidean distance. Dimensions beyond the shorter vector are ignored.
    pub fn euclidean(&self, other: &FloatDescriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Distance between two descriptors of the same kind.
///
/// Must be non-negative and return 0.0 for identical descriptors. Lower means
/// more similar.
pub trait DistanceMetric<D>: Send + Sync {
    fn distance(&self, a: &D, b: &D) -> f32;
}

/// Bit-count distance for binary descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hamming;

impl DistanceMetric<BinaryDescriptor> for Hamming {
    fn distance(&self, a: &BinaryDescriptor, b: &BinaryDescriptor) -> f32 {
        a.hamming(b) as f32
    }
}

/// L2 distance for real-valued descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl DistanceMetric<FloatDescriptor> for Euclidean {
    fn distance(&self, a: &FloatDescriptor, b: &FloatDescriptor) -> f32 {
        a.euclidean(b)
    }
}
