//! Global average pooling, the bridge between the convolutional stages and
//! the classification head. Works on arbitrary spatial dimensions, so the
//! head does not constrain the input image size.

use crate::models::{Layer, ModelError, ModelResult};
use crate::ImagePrecision;
use ndarray::{Array1, Array3, ArrayD, Ix1, Ix3};

pub struct GlobalAveragePooling {}

impl GlobalAveragePooling {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for GlobalAveragePooling {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for GlobalAveragePooling {
    /// (C, H, W) -> (C,), every channel reduced to its spatial mean.
    fn forward(&self, input: &ArrayD<ImagePrecision>) -> ModelResult<ArrayD<ImagePrecision>> {
        let image = input.view().into_dimensionality::<Ix3>()?;
        let (channels, height, width) = image.dim();
        if height * width == 0 {
            return Err(ModelError::BadInput {
                expected: "feature map with non-empty spatial dimensions",
                found: input.shape().to_vec(),
            });
        }
        let spatial = (height * width) as ImagePrecision;
        let mut pooled = Array1::zeros(channels);
        for c in 0..channels {
            pooled[c] = image.index_axis(ndarray::Axis(0), c).sum() / spatial;
        }
        Ok(pooled.into_dyn())
    }

    /// The channel gradient spreads uniformly over the H*W positions it was
    /// averaged from.
    fn backward(
        &self,
        input: &ArrayD<ImagePrecision>,
        grad_output: &ArrayD<ImagePrecision>,
    ) -> ModelResult<ArrayD<ImagePrecision>> {
        let image = input.view().into_dimensionality::<Ix3>()?;
        let grad_out = grad_output.view().into_dimensionality::<Ix1>()?;
        let (channels, height, width) = image.dim();
        if grad_out.len() != channels {
            return Err(ModelError::BadInput {
                expected: "one gradient entry per pooled channel",
                found: grad_output.shape().to_vec(),
            });
        }
        let spatial = (height * width) as ImagePrecision;
        let mut grad = Array3::zeros((channels, height, width));
        for c in 0..channels {
            grad.index_axis_mut(ndarray::Axis(0), c)
                .fill(grad_out[c] / spatial);
        }
        Ok(grad.into_dyn())
    }
}
