//! vigil-core: live face verification engine.
//!
//! Enrolls one reference face from a still image, then checks every face found in
//! a stream of frames against it: SCRFD regions, ORB descriptors, ratio-test matching.

pub mod descriptor;
pub mod detector;
pub mod enrollment;
pub mod extractor;
pub mod matcher;
pub mod overlay;
pub mod session;
pub mod sink;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

pub use descriptor::{BinaryDescriptor, DistanceMetric, Euclidean, FloatDescriptor, Hamming};
pub use detector::{DetectorError, RegionDetector, ScrfdConfig, ScrfdDetector};
pub use enrollment::{
    enroll, load_reference, open_reference_image, Enrollment, EnrollmentError, EnrollmentRecord,
    ReferenceSet, ReferenceStore,
};
pub use extractor::{DescriptorExtractor, OrbConfig, OrbExtractor};
pub use matcher::{RatioTestMatcher, MATCH_COUNT_THRESHOLD, RATIO_THRESHOLD};
pub use session::{SessionConfig, SessionError, SessionSummary, StopReason, VerificationSession};
pub use sink::{AnnotatedFrame, DirectorySink, LogSink, PresentationSink, SinkError, StopFlag};
pub use source::{CaptureError, DirectorySource, Frame, FrameSource};
pub use types::{FaceVerdict, FeatureSet, Keypoint, MatchPair, Region, VerificationResult};
