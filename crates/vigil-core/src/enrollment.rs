//! Enrollment: turn a still reference image into the reference descriptor set.
//!
//! The cropped face is persisted next to a JSON record so an enrollment can be
//! inspected later and reloaded without running detection again.

use crate::detector::{DetectorError, RegionDetector};
use crate::extractor::DescriptorExtractor;
use crate::types::Region;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File stem used for the persisted face crop.
pub const REFERENCE_FACE_STEM: &str = "reference_face";

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("cannot read reference image {path}: {source}")]
    ReferenceUnreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in reference image")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("cannot write reference face {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot read reference face {path}: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("enrollment record {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable reference descriptors, shared read-only for the whole session.
///
/// Cloning is cheap and never copies descriptors.
#[derive(Debug)]
pub struct ReferenceSet<D> {
    descriptors: Arc<[D]>,
}

impl<D> Clone for ReferenceSet<D> {
    fn clone(&self) -> Self {
        Self {
            descriptors: Arc::clone(&self.descriptors),
        }
    }
}

impl<D> ReferenceSet<D> {
    pub fn new(descriptors: Vec<D>) -> Self {
        Self {
            descriptors: descriptors.into(),
        }
    }

    pub fn descriptors(&self) -> &[D] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Audit record written next to the persisted face crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub id: String,
    pub created_at: String,
    /// SHA-256 of the decoded reference image pixels (RGB8, row-major).
    pub source_sha256: String,
    pub source_width: u32,
    pub source_height: u32,
    pub region: Region,
    pub descriptor_count: usize,
}

/// Where the reference face crop and its record live.
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    face_path: PathBuf,
}

impl ReferenceStore {
    pub fn new(face_path: impl Into<PathBuf>) -> Self {
        Self {
            face_path: face_path.into(),
        }
    }

    /// Store beside `reference_image`, keeping its extension (and so its encoding).
    pub fn beside(reference_image: &Path) -> Self {
        let ext = reference_image
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let dir = reference_image.parent().unwrap_or_else(|| Path::new(""));
        Self::new(dir.join(format!("{REFERENCE_FACE_STEM}.{ext}")))
    }

    pub fn face_path(&self) -> &Path {
        &self.face_path
    }

    pub fn record_path(&self) -> PathBuf {
        self.face_path.with_extension("json")
    }

    fn save_face(&self, face: &RgbImage) -> Result<(), EnrollmentError> {
        if let Some(dir) = self.face_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| EnrollmentError::ArtifactWrite {
                path: self.face_path.clone(),
                source: image::ImageError::IoError(e),
            })?;
        }
        face.save(&self.face_path)
            .map_err(|source| EnrollmentError::ArtifactWrite {
                path: self.face_path.clone(),
                source,
            })
    }

    fn save_record(&self, record: &EnrollmentRecord) -> Result<(), EnrollmentError> {
        let path = self.record_path();
        let json = serde_json::to_vec_pretty(record).map_err(|e| EnrollmentError::Record {
            path: path.clone(),
            source: e.into(),
        })?;
        std::fs::write(&path, json).map_err(|source| EnrollmentError::Record { path, source })
    }

    /// Read the persisted face crop.
    pub fn load_face(&self) -> Result<RgbImage, EnrollmentError> {
        image::open(&self.face_path)
            .map(|img| img.to_rgb8())
            .map_err(|source| EnrollmentError::ArtifactUnreadable {
                path: self.face_path.clone(),
                source,
            })
    }

    pub fn load_record(&self) -> Result<EnrollmentRecord, EnrollmentError> {
        let path = self.record_path();
        let bytes = std::fs::read(&path).map_err(|source| EnrollmentError::Record {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| EnrollmentError::Record {
            path,
            source: e.into(),
        })
    }
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment<D> {
    pub reference: ReferenceSet<D>,
    pub region: Region,
    pub face: RgbImage,
    pub record: EnrollmentRecord,
}

/// Decode the reference image from disk.
pub fn open_reference_image(path: &Path) -> Result<RgbImage, EnrollmentError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| EnrollmentError::ReferenceUnreadable {
            path: path.to_path_buf(),
            source,
        })
}

/// Enroll the face in `image`.
///
/// Uses the first region the detector reports, with no ranking by size or score.
/// Persists the crop through `store`, then describes the persisted copy. An empty descriptor set
/// is still a successful enrollment; such a reference never matches anything.
pub fn enroll<R, E>(
    image: &RgbImage,
    detector: &mut R,
    extractor: &E,
    store: &ReferenceStore,
) -> Result<Enrollment<E::Descriptor>, EnrollmentError>
where
    R: RegionDetector + ?Sized,
    E: DescriptorExtractor + ?Sized,
{
    let gray = image::imageops::grayscale(image);
    let regions = detector.detect(&gray)?;
    tracing::info!(faces = regions.len(), "enroll: detection complete");

    let region = *regions.first().ok_or(EnrollmentError::NoFaceDetected)?;
    if regions.len() > 1 {
        tracing::warn!(
            faces = regions.len(),
            "enroll: multiple faces in reference image, using the first"
        );
    }

    let crop = image::imageops::crop_imm(image, region.x, region.y, region.width, region.height);
    store.save_face(&crop.to_image())?;
    tracing::info!(path = %store.face_path().display(), ?region, "enroll: reference face saved");

    // Describe what was written, so a later `load_reference` sees the same descriptors.
    let face = store.load_face()?;

    let features = extractor.extract(&image::imageops::grayscale(&face));
    if features.is_empty() {
        tracing::warn!("enroll: no descriptors in reference face; it will never match");
    }

    let record = EnrollmentRecord {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        source_sha256: format!("{:x}", Sha256::digest(image.as_raw())),
        source_width: image.width(),
        source_height: image.height(),
        region,
        descriptor_count: features.len(),
    };
    store.save_record(&record)?;

    tracing::info!(id = %record.id, descriptors = features.len(), "enroll: complete");

    Ok(Enrollment {
        reference: ReferenceSet::new(features.into_descriptors()),
        region,
        face,
        record,
    })
}

/// Rebuild the reference set from a previously persisted face crop.
pub fn load_reference<E>(
    store: &ReferenceStore,
    extractor: &E,
) -> Result<ReferenceSet<E::Descriptor>, EnrollmentError>
where
    E: DescriptorExtractor + ?Sized,
{
    let face = store.load_face()?;
    let features = extractor.extract(&image::imageops::grayscale(&face));
    tracing::info!(
        path = %store.face_path().display(),
        descriptors = features.len(),
        "loaded reference face"
    );
    if features.is_empty() {
        tracing::warn!("reference face has no descriptors; it will never match");
    }
    Ok(ReferenceSet::new(features.into_descriptors()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::OrbExtractor;
    use crate::testing::{region, textured_rgb, FixedDetector, NoFeatures, RowExtractor};

    #[test]
    fn test_no_face_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.png"));
        let image = textured_rgb(120, 120, 1);

        let mut detector = FixedDetector::new(vec![]);
        let err = enroll(&image, &mut detector, &RowExtractor, &store).unwrap_err();

        assert!(matches!(err, EnrollmentError::NoFaceDetected));
        assert!(!store.face_path().exists());
        assert!(!store.record_path().exists());
    }

    #[test]
    fn test_single_face_reference_matches_crop_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.png"));
        let image = textured_rgb(120, 100, 2);
        let face = region(10, 20, 50, 40);

        let mut detector = FixedDetector::new(vec![face]);
        let enrollment = enroll(&image, &mut detector, &RowExtractor, &store).unwrap();

        let crop = image::imageops::crop_imm(&image, 10, 20, 50, 40).to_image();
        let expected = RowExtractor.extract(&image::imageops::grayscale(&crop));
        assert_eq!(enrollment.reference.len(), expected.len());
        assert_eq!(enrollment.reference.descriptors(), expected.descriptors());
        assert_eq!(enrollment.region, face);
        assert_eq!(enrollment.face.dimensions(), (50, 40));
    }

    #[test]
    fn test_first_region_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.png"));
        let image = textured_rgb(200, 200, 3);
        let small = region(5, 5, 30, 30);
        let large = region(60, 60, 120, 120);

        let mut detector = FixedDetector::new(vec![small, large]);
        let enrollment = enroll(&image, &mut detector, &RowExtractor, &store).unwrap();
        assert_eq!(enrollment.region, small);
        assert_eq!(enrollment.reference.len(), 30);
    }

    #[test]
    fn test_persists_face_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("nested/reference_face.png"));
        let image = textured_rgb(100, 100, 4);
        let face = region(20, 20, 40, 40);

        let mut detector = FixedDetector::new(vec![face]);
        let enrollment = enroll(&image, &mut detector, &RowExtractor, &store).unwrap();

        let saved = store.load_face().unwrap();
        assert_eq!(saved, enrollment.face);

        let record = store.load_record().unwrap();
        assert_eq!(record, enrollment.record);
        assert_eq!(record.region, face);
        assert_eq!(record.descriptor_count, 40);
        assert_eq!((record.source_width, record.source_height), (100, 100));
        assert_eq!(record.source_sha256.len(), 64);
    }

    #[test]
    fn test_empty_descriptors_still_enroll() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.png"));
        let image = textured_rgb(80, 80, 5);

        let mut detector = FixedDetector::new(vec![region(0, 0, 40, 40)]);
        let enrollment = enroll(&image, &mut detector, &NoFeatures, &store).unwrap();
        assert!(enrollment.reference.is_empty());
        assert!(store.face_path().exists());
    }

    #[test]
    fn test_load_reference_reproduces_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.png"));
        let image = textured_rgb(260, 260, 6);
        let extractor = OrbExtractor::default();

        let mut detector = FixedDetector::new(vec![region(20, 20, 200, 200)]);
        let enrollment = enroll(&image, &mut detector, &extractor, &store).unwrap();
        let reloaded = load_reference(&store, &extractor).unwrap();

        assert!(!reloaded.is_empty());
        assert_eq!(reloaded.descriptors(), enrollment.reference.descriptors());
    }

    #[test]
    fn test_lossy_artifact_reference_matches_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("reference_face.jpg"));
        let image = textured_rgb(120, 120, 7);
        let mut detector = FixedDetector::new(vec![region(10, 10, 64, 64)]);

        let enrollment = enroll(&image, &mut detector, &RowExtractor, &store).unwrap();
        let reloaded = load_reference(&store, &RowExtractor).unwrap();

        assert_eq!(detector.calls, 1);
        assert_eq!(enrollment.face, store.load_face().unwrap());
        assert_eq!(reloaded.descriptors(), enrollment.reference.descriptors());
        assert_eq!(store.load_record().unwrap().descriptor_count, reloaded.len());
    }

    #[test]
    fn test_load_reference_missing_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceStore::new(dir.path().join("absent.png"));
        let err = load_reference(&store, &RowExtractor).unwrap_err();
        assert!(matches!(err, EnrollmentError::ArtifactUnreadable { .. }));
    }

    #[test]
    fn test_open_reference_image_missing() {
        let err = open_reference_image(Path::new("/nonexistent/reference.jpg")).unwrap_err();
        assert!(matches!(err, EnrollmentError::ReferenceUnreadable { .. }));
    }

    #[test]
    fn test_store_beside_keeps_extension() {
        let store = ReferenceStore::beside(Path::new("/data/people/reference.jpg"));
        assert_eq!(store.face_path(), Path::new("/data/people/reference_face.jpg"));
        assert_eq!(store.record_path(), PathBuf::from("/data/people/reference_face.json"));
    }

    #[test]
    fn test_reference_set_clone_shares_storage() {
        let set = ReferenceSet::new(vec![1u8, 2, 3]);
        let other = set.clone();
        assert!(std::ptr::eq(set.descriptors().as_ptr(), other.descriptors().as_ptr()));
        assert_eq!(other.len(), 3);
    }
}
