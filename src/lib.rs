//! Face detection over HTTP.
//!
//! A request carries an image URL; the image is downloaded into a scoped
//! temporary file, passed through a pre-trained SSD face detector and the face
//! boxes are returned as JSON.
//!
//! The network sits behind the [`FaceNetwork`] trait. The OpenCV Caffe backend
//! is available with the `opencv` feature.

pub mod blob;
#[cfg(feature = "opencv")]
pub mod caffe;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod server;

pub use blob::{Blob, INPUT_SIZE, MEAN_BGR};
#[cfg(feature = "opencv")]
pub use caffe::CaffeFaceNetwork;
pub use detector::{CONFIDENCE_THRESHOLD, FaceBox, FaceDetector, RawDetections, decode_detections};
pub use engine::{DetectionEngine, EngineState};
pub use error::{DetectError, EngineError, FetchError, ModelLoadError, ServiceError};
pub use fetch::{DownloadedImage, FetchConfig, ImageFetcher};
pub use model::{FaceNetwork, ModelArtifacts};
pub use server::{AppState, DETECTION_ROUTE, DetectionRequest, DetectionResult, ServerConfig, router};
