//! Rust implementation of a feed forward layer.
//! The weight matrix shall have dimension (in that order)
//! output units x input units (to comply with the order in which pytorch
//! weights are saved).

use crate::models::{Layer, ModelError, ModelResult};
use crate::{ImagePrecision, WeightPrecision};
use ndarray::{Array1, Array2, ArrayD, Ix1};

pub struct FeedforwardLayer {
    weights: Array2<WeightPrecision>,
    bias: Array1<WeightPrecision>,
}

impl FeedforwardLayer {
    pub fn new(weights: Array2<WeightPrecision>, bias: Array1<WeightPrecision>) -> FeedforwardLayer {
        debug_assert_eq!(
            weights.nrows(),
            bias.len(),
            "one bias entry per output unit"
        );
        FeedforwardLayer { weights, bias }
    }

    pub fn forward_pass(&self, data: &Array1<ImagePrecision>) -> Array1<ImagePrecision> {
        self.weights.dot(data) + &self.bias
    }
}

impl Layer for FeedforwardLayer {
    fn forward(&self, input: &ArrayD<ImagePrecision>) -> ModelResult<ArrayD<ImagePrecision>> {
        let data = input.view().into_dimensionality::<Ix1>()?;
        if data.len() != self.weights.ncols() {
            return Err(ModelError::BadInput {
                expected: "one input entry per weight column",
                found: input.shape().to_vec(),
            });
        }
        Ok(self.forward_pass(&data.to_owned()).into_dyn())
    }

    /// Input gradient of an affine map: transpose of the weights applied to
    /// the incoming gradient. The bias does not appear.
    fn backward(
        &self,
        input: &ArrayD<ImagePrecision>,
        grad_output: &ArrayD<ImagePrecision>,
    ) -> ModelResult<ArrayD<ImagePrecision>> {
        let _ = input.view().into_dimensionality::<Ix1>()?;
        let grad_out = grad_output.view().into_dimensionality::<Ix1>()?;
        if grad_out.len() != self.weights.nrows() {
            return Err(ModelError::BadInput {
                expected: "one gradient entry per output unit",
                found: grad_output.shape().to_vec(),
            });
        }
        Ok(self.weights.t().dot(&grad_out.to_owned()).into_dyn())
    }
}
