use crate::{
    blob::Blob,
    error::{DetectError, ModelLoadError},
};
use kornia_image::{Image, allocator::CpuAllocator};
use std::path::{Path, PathBuf};

/// Directory holding the network artifacts, relative to the working directory.
pub const DEFAULT_MODEL_DIR: &str = "models";
/// Network topology file name.
pub const TOPOLOGY_FILE: &str = "deploy.prototxt";
/// Learned weights file name.
pub const WEIGHTS_FILE: &str = "res10_300x300_ssd_iter_140000.caffemodel";

/// Trait for the network that turns an input blob into raw SSD detections.
///
/// Implementations receive a `[1, 3, 300, 300]` BGR blob and must return the
/// flattened `[1, 1, N, 7]` output tensor, one row per detection slot laid out as
/// `[batch_id, class_id, confidence, x1, y1, x2, y2]` with normalized corners.
pub trait FaceNetwork {
    /// The error type that can be returned during inference.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Turns a decoded RGB image into the network input.
    ///
    /// Backends that ship their own preprocessing override this.
    fn prepare(&self, image: &Image<u8, 3, CpuAllocator>) -> Result<Blob, DetectError> {
        Blob::from_image(image)
    }

    /// Runs one forward pass over the given blob.
    fn forward(&mut self, blob: &Blob) -> Result<Vec<f32>, Self::Error>;
}

/// Location of the topology and weights files of the pre-trained detector.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelArtifacts {
    pub topology: PathBuf,
    pub weights: PathBuf,
}

impl ModelArtifacts {
    /// Artifacts with their standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            topology: dir.join(TOPOLOGY_FILE),
            weights: dir.join(WEIGHTS_FILE),
        }
    }

    /// Checks that both files exist so startup fails before the server binds.
    pub fn validate(&self) -> Result<(), ModelLoadError> {
        for path in [&self.topology, &self.weights] {
            if !path.is_file() {
                return Err(ModelLoadError::MissingArtifact(path.clone()));
            }
        }
        Ok(())
    }
}

impl Default for ModelArtifacts {
    fn default() -> Self {
        Self::in_dir(DEFAULT_MODEL_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_artifacts_live_under_models() {
        let artifacts = ModelArtifacts::default();
        assert_eq!(artifacts.topology, Path::new("models/deploy.prototxt"));
        assert_eq!(
            artifacts.weights,
            Path::new("models/res10_300x300_ssd_iter_140000.caffemodel")
        );
    }

    #[test]
    fn validate_reports_the_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOPOLOGY_FILE), b"name: \"test\"").unwrap();

        let artifacts = ModelArtifacts::in_dir(dir.path());
        match artifacts.validate() {
            Err(ModelLoadError::MissingArtifact(path)) => {
                assert_eq!(path, dir.path().join(WEIGHTS_FILE))
            }
            other => panic!("unexpected result: {other:?}"),
        }

        std::fs::write(dir.path().join(WEIGHTS_FILE), b"\0").unwrap();
        assert!(artifacts.validate().is_ok());
    }
}
