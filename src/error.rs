use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving or loading the network artifacts.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model artifact not found: {0}")]
    MissingArtifact(PathBuf),

    #[error("model artifact path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("failed to load network: {0}")]
    Backend(String),
}

/// Errors raised by the image fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("failed to store downloaded image: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether the failure is attributable to the remote image rather than to this host.
    pub fn is_download_failure(&self) -> bool {
        !matches!(self, FetchError::Io(_))
    }
}

/// Errors raised while turning an image file into face boxes.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("{0}")]
    Decode(String),

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("failed to resize image: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("inference failed: {0}")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("inference panicked: {0}")]
    Panicked(String),

    #[error("network output of {0} values is not a sequence of 7-value detections")]
    OutputShape(usize),
}

/// Errors raised by the detection engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("detection engine is not running")]
    Closed,

    #[error("detection queue is full")]
    Busy,

    #[error("detection timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Request-level failure, rendered as a plain-text HTTP response.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No image URL provided")]
    MissingImageUrl,

    #[error("Failed to download image from URL: {url}")]
    ImageDownload {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Error processing the image: {0}")]
    Processing(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingImageUrl | ServiceError::ImageDownload { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn from_fetch(url: &str, source: FetchError) -> Self {
        if source.is_download_failure() {
            ServiceError::ImageDownload {
                url: url.to_string(),
                source,
            }
        } else {
            ServiceError::Processing(source.to_string())
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        ServiceError::Processing(e.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ServiceError::ImageDownload { source, .. } => log::warn!("{self} ({source})"),
            ServiceError::MissingImageUrl => log::warn!("{self}"),
            ServiceError::Processing(_) => log::error!("{self}"),
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_the_wire_contract() {
        assert_eq!(
            ServiceError::MissingImageUrl.to_string(),
            "No image URL provided"
        );
        let e = ServiceError::ImageDownload {
            url: "http://example.com/a.jpg".to_string(),
            source: FetchError::Status(reqwest::StatusCode::NOT_FOUND),
        };
        assert_eq!(
            e.to_string(),
            "Failed to download image from URL: http://example.com/a.jpg"
        );
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);

        let e = ServiceError::from(EngineError::Detect(DetectError::Decode(
            "The image format could not be determined".to_string(),
        )));
        assert_eq!(
            e.to_string(),
            "Error processing the image: The image format could not be determined"
        );
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn local_io_failures_are_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let e = ServiceError::from_fetch("http://example.com", FetchError::Io(io));
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let e = ServiceError::from_fetch("http://example.com", FetchError::TooLarge { limit: 1 });
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
    }
}
