use crate::error::DetectError;
use fast_image_resize as fr;
use fr::images::{Image as FrImage, ImageRef};
use fr::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use kornia_image::{Image, allocator::ImageAllocator};

/// Side length of the square network input.
pub const INPUT_SIZE: usize = 300;

/// Per-channel means (B, G, R) the detector was trained with.
pub const MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];

const PLANE: usize = INPUT_SIZE * INPUT_SIZE;

/// Network input tensor of shape `[1, 3, INPUT_SIZE, INPUT_SIZE]`, planar BGR.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    data: Vec<f32>,
}

impl Blob {
    /// Builds the blob from a decoded RGB image.
    pub fn from_image<A: ImageAllocator>(image: &Image<u8, 3, A>) -> Result<Self, DetectError> {
        Self::from_rgb8(image.as_slice(), image.width(), image.height())
    }

    /// Builds the blob from interleaved RGB8 pixels.
    ///
    /// The image is resized to the network input size with two-tap bilinear
    /// interpolation on 8-bit samples, reordered to BGR planes and
    /// mean-subtracted with a scale factor of 1.0.
    pub fn from_rgb8(pixels: &[u8], width: usize, height: usize) -> Result<Self, DetectError> {
        let invalid = || DetectError::InvalidDimensions { width, height };
        if width == 0 || height == 0 || pixels.len() != width * height * 3 {
            return Err(invalid());
        }

        let src = ImageRef::new(width as u32, height as u32, pixels, PixelType::U8x3)
            .map_err(|_| invalid())?;
        let mut dst = FrImage::new(INPUT_SIZE as u32, INPUT_SIZE as u32, PixelType::U8x3);
        Resizer::new().resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Interpolation(FilterType::Bilinear)),
        )?;

        let mut data = vec![0.0f32; 3 * PLANE];
        for (offset, rgb) in dst.buffer().chunks_exact(3).enumerate() {
            for (out_c, mean) in MEAN_BGR.iter().enumerate() {
                data[out_c * PLANE + offset] = f32::from(rgb[2 - out_c]) - mean;
            }
        }

        Ok(Self { data })
    }

    /// Wraps a tensor produced elsewhere, e.g. by a backend's own preprocessing.
    pub fn from_tensor(data: Vec<f32>) -> Result<Self, DetectError> {
        if data.len() != 3 * PLANE {
            return Err(DetectError::OutputShape(data.len()));
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> [usize; 4] {
        [1, 3, INPUT_SIZE, INPUT_SIZE]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
