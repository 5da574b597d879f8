//! Activation functions for the visualization networks, exposed as a free
//! function as well as a layer.

use crate::models::{Layer, ModelError, ModelResult};
use crate::ImagePrecision;
use ndarray::{Array, ArrayD, Dimension, Zip};

/// Relu implementation
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

/// Relu as a layer. The backward pass masks the gradient wherever the
/// forward input was not strictly positive.
pub struct ReluLayer {}

impl ReluLayer {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ReluLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for ReluLayer {
    fn forward(&self, input: &ArrayD<ImagePrecision>) -> ModelResult<ArrayD<ImagePrecision>> {
        Ok(relu(input))
    }

    fn backward(
        &self,
        input: &ArrayD<ImagePrecision>,
        grad_output: &ArrayD<ImagePrecision>,
    ) -> ModelResult<ArrayD<ImagePrecision>> {
        if input.raw_dim() != grad_output.raw_dim() {
            return Err(ModelError::BadInput {
                expected: "gradient with the same shape as the layer input",
                found: grad_output.shape().to_vec(),
            });
        }
        let mut grad = grad_output.clone();
        Zip::from(&mut grad).and(input).for_each(|g, &x| {
            if x <= 0. {
                *g = 0.;
            }
        });
        Ok(grad)
    }
}
