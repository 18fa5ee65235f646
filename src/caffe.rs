use crate::{
    blob::{Blob, INPUT_SIZE, MEAN_BGR},
    error::{DetectError, ModelLoadError},
    model::{FaceNetwork, ModelArtifacts},
};
use kornia_image::{Image, allocator::CpuAllocator};
use opencv::{
    core::{CV_8UC3, CV_32F, Mat, Scalar, Size},
    dnn,
    prelude::*,
};
use std::path::Path;

/// The res10 SSD face detector executed by the OpenCV DNN engine.
pub struct CaffeFaceNetwork {
    net: dnn::Net,
}

impl CaffeFaceNetwork {
    /// Loads the Caffe topology and weights.
    ///
    /// With the `cuda` feature the network is placed on the CUDA backend.
    pub fn load(artifacts: &ModelArtifacts) -> Result<Self, ModelLoadError> {
        artifacts.validate()?;

        let backend = |e: opencv::Error| ModelLoadError::Backend(e.to_string());
        #[allow(unused_mut)]
        let mut net = dnn::read_net_from_caffe(
            utf8(&artifacts.topology)?,
            utf8(&artifacts.weights)?,
        )
        .map_err(backend)?;
        if net.empty().map_err(backend)? {
            return Err(ModelLoadError::Backend("network has no layers".to_string()));
        }

        #[cfg(feature = "cuda")]
        {
            net.set_preferable_backend(dnn::DNN_BACKEND_CUDA)
                .map_err(backend)?;
            net.set_preferable_target(dnn::DNN_TARGET_CUDA)
                .map_err(backend)?;
        }

        Ok(Self { net })
    }
}

impl FaceNetwork for CaffeFaceNetwork {
    type Error = opencv::Error;

    fn prepare(&self, image: &Image<u8, 3, CpuAllocator>) -> Result<Blob, DetectError> {
        let tensor = bgr_blob(image).map_err(|e| DetectError::Inference(Box::new(e)))?;
        Blob::from_tensor(tensor)
    }

    fn forward(&mut self, blob: &Blob) -> Result<Vec<f32>, Self::Error> {
        let shape = blob.shape().map(|d| d as i32);
        let mut input = Mat::new_nd_with_default(&shape, CV_32F, Scalar::all(0.0))?;
        input
            .data_typed_mut::<f32>()?
            .copy_from_slice(blob.as_slice());

        self.net.set_input(&input, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;
        Ok(output.data_typed::<f32>()?.to_vec())
    }
}

// OpenCV's own resize and mean subtraction, on a BGR copy of the pixels
fn bgr_blob(image: &Image<u8, 3, CpuAllocator>) -> opencv::Result<Vec<f32>> {
    let mut bgr = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )?;
    for (dst, src) in bgr
        .data_bytes_mut()?
        .chunks_exact_mut(3)
        .zip(image.as_slice().chunks_exact(3))
    {
        dst.copy_from_slice(&[src[2], src[1], src[0]]);
    }

    let size = INPUT_SIZE as i32;
    let [b, g, r] = MEAN_BGR.map(f64::from);
    let blob = dnn::blob_from_image(
        &bgr,
        1.0,
        Size::new(size, size),
        Scalar::new(b, g, r, 0.0),
        false,
        false,
        CV_32F,
    )?;
    Ok(blob.data_typed::<f32>()?.to_vec())
}

fn utf8(path: &Path) -> Result<&str, ModelLoadError> {
    path.to_str()
        .ok_or_else(|| ModelLoadError::NonUtf8Path(path.to_path_buf()))
}
