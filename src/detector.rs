use crate::{error::DetectError, model::FaceNetwork};
use image::ImageReader;
use kornia_image::{Image, ImageSize, allocator::CpuAllocator};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detections at or below this confidence are discarded.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

const ROW_LEN: usize = 7;

/// One detected face in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    /// Detection slot in the raw network output.
    pub index: usize,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Flattened `[1, 1, N, 7]` output tensor of the SSD head.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetections {
    data: Vec<f32>,
}

impl RawDetections {
    pub fn new(data: Vec<f32>) -> Result<Self, DetectError> {
        if data.len() % ROW_LEN != 0 {
            return Err(DetectError::OutputShape(data.len()));
        }
        Ok(Self { data })
    }

    pub fn from_rows(rows: &[[f32; ROW_LEN]]) -> Self {
        Self {
            data: rows.iter().flatten().copied().collect(),
        }
    }

    /// Number of detection slots.
    pub fn len(&self) -> usize {
        self.data.len() / ROW_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rows laid out as `[batch_id, class_id, confidence, x1, y1, x2, y2]`.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(ROW_LEN)
    }
}

/// Keeps confident rows and scales their corners to the original image size.
///
/// Coordinates are truncated toward zero and never clamped, so a box may reach
/// past the image border when the network says so.
pub fn decode_detections(raw: &RawDetections, width: usize, height: usize) -> Vec<FaceBox> {
    let (w, h) = (width as f32, height as f32);
    raw.rows()
        .enumerate()
        .filter(|(_, row)| row[2] > CONFIDENCE_THRESHOLD)
        .map(|(index, row)| {
            let x = (row[3] * w) as i32;
            let y = (row[4] * h) as i32;
            let x2 = (row[5] * w) as i32;
            let y2 = (row[6] * h) as i32;
            FaceBox {
                index,
                x,
                y,
                width: x2 - x,
                height: y2 - y,
            }
        })
        .collect()
}

/// Reads an image file, detecting the format from its content.
///
/// Grayscale, alpha and 16-bit inputs are converted to 8-bit RGB.
pub fn decode_image(path: &Path) -> Result<Image<u8, 3, CpuAllocator>, DetectError> {
    let io = |e: std::io::Error| DetectError::Decode(e.to_string());
    let rgb = ImageReader::open(path)
        .map_err(io)?
        .with_guessed_format()
        .map_err(io)?
        .decode()
        .map_err(|e| DetectError::Decode(e.to_string()))?
        .into_rgb8();

    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    if width == 0 || height == 0 {
        return Err(DetectError::InvalidDimensions { width, height });
    }

    Image::new(ImageSize { width, height }, rgb.into_raw(), CpuAllocator::default())
        .map_err(|e| DetectError::Decode(e.to_string()))
}

/// Runs the full decode, normalize, forward and decode pipeline over one image.
pub struct FaceDetector<N: FaceNetwork> {
    network: N,
}

impl<N: FaceNetwork> FaceDetector<N> {
    pub fn new(network: N) -> Self {
        Self { network }
    }

    pub fn detect_path(&mut self, path: &Path) -> Result<Vec<FaceBox>, DetectError> {
        let image = decode_image(path)?;
        self.detect_image(&image)
    }

    pub fn detect_image(
        &mut self,
        image: &Image<u8, 3, CpuAllocator>,
    ) -> Result<Vec<FaceBox>, DetectError> {
        let blob = self.network.prepare(image)?;
        log::debug!("Running forward pass on {}x{} image", image.width(), image.height());

        let output = self
            .network
            .forward(&blob)
            .map_err(|e| DetectError::Inference(Box::new(e)))?;
        let raw = RawDetections::new(output)?;

        let faces = decode_detections(&raw, image.width(), image.height());
        log::debug!("{} of {} detections above threshold", faces.len(), raw.len());
        Ok(faces)
    }
}
