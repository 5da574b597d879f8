//! Convolutional layer used by the visualization networks.
//!
//! The weight matrix shall have dimension (in that order)
//! output channels x input channels x kernel height x kernel width
//! (to comply with the order in which pytorch weights are saved).
//!
//! The forward pass delegates to the im2col implementation in
//! `convolutions-rs`; the backward pass (gradient with respect to the layer
//! input, never the kernel) is the direct scatter rule
//! `grad_input[ci, oh*s+kh-p, ow*s+kw-p] += kernel[co,ci,kh,kw] * grad_out[co,oh,ow]`.

use crate::models::{Layer, ModelError, ModelResult};
use crate::{ImagePrecision, WeightPrecision};
use convolutions_rs::convolutions::conv2d;
use convolutions_rs::Padding;
use ndarray::{s, Array3, Array4, ArrayD, Axis, Ix3};

pub struct ConvolutionLayer {
    /// Weight matrix of the kernel
    kernel: Array4<WeightPrecision>,
    kernel_height: usize,
    kernel_width: usize,
    stride: usize,
    padding: usize,
    num_input_channels: usize,
    num_output_channels: usize,
}

impl ConvolutionLayer {
    pub fn new(kernel: Array4<WeightPrecision>, stride: usize, padding: usize) -> ConvolutionLayer {
        let num_output_channels = kernel.len_of(Axis(0));
        let num_input_channels = kernel.len_of(Axis(1));
        let kernel_height = kernel.len_of(Axis(2));
        let kernel_width = kernel.len_of(Axis(3));

        debug_assert!(stride > 0, "Stride of 0 passed");

        ConvolutionLayer {
            kernel,
            kernel_height,
            kernel_width,
            stride,
            padding,
            num_input_channels,
            num_output_channels,
        }
    }

    /// Spatial output dimensions for an input of the given height and width,
    /// i.e. (h + 2p - kh) / s + 1 per axis.
    fn output_dim(&self, height: usize, width: usize) -> (usize, usize) {
        let out_h = (height + 2 * self.padding - self.kernel_height) / self.stride + 1;
        let out_w = (width + 2 * self.padding - self.kernel_width) / self.stride + 1;
        (out_h, out_w)
    }

    fn pad(&self, image: &Array3<ImagePrecision>) -> Array3<ImagePrecision> {
        if self.padding == 0 {
            return image.clone();
        }
        let (channels, height, width) = image.dim();
        let p = self.padding;
        let mut padded = Array3::zeros((channels, height + 2 * p, width + 2 * p));
        padded
            .slice_mut(s![.., p..p + height, p..p + width])
            .assign(image);
        padded
    }

    /// Performs a convolution on the given image data using this layers parameters.
    pub fn convolve(&self, image: &Array3<ImagePrecision>) -> Array3<ImagePrecision> {
        let padded = self.pad(image);
        conv2d(&self.kernel, &padded, Padding::Valid, self.stride)
    }

    /// Gradient of the convolution with respect to its input. Every output
    /// position scatters its incoming gradient back through the kernel taps
    /// it read from; taps that landed in the zero padding are dropped.
    fn input_gradient(
        &self,
        input: &Array3<ImagePrecision>,
        grad_output: &Array3<ImagePrecision>,
    ) -> Array3<ImagePrecision> {
        let (channels, height, width) = input.dim();
        let mut grad = Array3::zeros((channels, height, width));
        let p = self.padding as isize;

        for co in 0..self.num_output_channels {
            for oh in 0..grad_output.len_of(Axis(1)) {
                for ow in 0..grad_output.len_of(Axis(2)) {
                    let g = grad_output[[co, oh, ow]];
                    if g == 0. {
                        continue;
                    }
                    for ci in 0..self.num_input_channels {
                        for kh in 0..self.kernel_height {
                            for kw in 0..self.kernel_width {
                                let iy = (oh * self.stride + kh) as isize - p;
                                let ix = (ow * self.stride + kw) as isize - p;
                                if iy < 0 || ix < 0 || iy >= height as isize || ix >= width as isize
                                {
                                    continue;
                                }
                                grad[[ci, iy as usize, ix as usize]] +=
                                    self.kernel[[co, ci, kh, kw]] * g;
                            }
                        }
                    }
                }
            }
        }
        grad
    }
}

impl Layer for ConvolutionLayer {
    fn forward(&self, input: &ArrayD<ImagePrecision>) -> ModelResult<ArrayD<ImagePrecision>> {
        let image = input.view().into_dimensionality::<Ix3>()?;
        if image.len_of(Axis(0)) != self.num_input_channels {
            return Err(ModelError::BadInput {
                expected: "image with as many channels as the kernel has input channels",
                found: input.shape().to_vec(),
            });
        }
        Ok(self.convolve(&image.to_owned()).into_dyn())
    }

    fn backward(
        &self,
        input: &ArrayD<ImagePrecision>,
        grad_output: &ArrayD<ImagePrecision>,
    ) -> ModelResult<ArrayD<ImagePrecision>> {
        let image = input.view().into_dimensionality::<Ix3>()?.to_owned();
        let grad_out = grad_output.view().into_dimensionality::<Ix3>()?.to_owned();

        let (out_h, out_w) = self.output_dim(image.len_of(Axis(1)), image.len_of(Axis(2)));
        if grad_out.dim() != (self.num_output_channels, out_h, out_w) {
            return Err(ModelError::BadInput {
                expected: "gradient with the shape of the convolution output",
                found: grad_output.shape().to_vec(),
            });
        }
        Ok(self.input_gradient(&image, &grad_out).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn diagonal_layer() -> ConvolutionLayer {
        // 2x2 identity-diagonal kernel on a single channel
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1., 0., 0., 1.]).unwrap();
        ConvolutionLayer::new(kernel, 1, 0)
    }

    #[test]
    fn test_forward_2d_conv() {
        let image = array![[[1., 2., 3.], [4., 5., 6.], [7., 8., 9.]]];
        let expected = array![[[6., 8.], [12., 14.]]];

        let convolved = diagonal_layer().convolve(&image);
        assert_eq!(convolved, expected);
    }

    #[test]
    fn test_backward_scatters_through_kernel() {
        let image = array![[[1., 2., 3.], [4., 5., 6.], [7., 8., 9.]]];
        let grad_out = array![[[1., 1.], [1., 1.]]];
        // Each input pixel accumulates the kernel taps that read it.
        let expected = array![[[1., 1., 0.], [1., 2., 1.], [0., 1., 1.]]];

        let layer = diagonal_layer();
        let grad = layer
            .backward(&image.into_dyn(), &grad_out.into_dyn())
            .unwrap();
        assert_eq!(grad, expected.into_dyn());
    }

    #[test]
    fn test_padding_keeps_spatial_dims() {
        let kernel = Array::from_shape_vec((1, 1, 3, 3), vec![0., 0., 0., 0., 2., 0., 0., 0., 0.])
            .unwrap();
        let layer = ConvolutionLayer::new(kernel, 1, 1);
        let image = array![[[1., 2.], [3., 4.]]];

        let out = layer.convolve(&image);
        assert_eq!(out, array![[[2., 4.], [6., 8.]]]);

        let grad = layer
            .backward(&image.clone().into_dyn(), &out.into_dyn())
            .unwrap();
        assert_eq!(grad, array![[[4., 8.], [12., 16.]]].into_dyn());
    }

    #[test]
    fn test_backward_rejects_wrong_gradient_shape() {
        let image = array![[[1., 2., 3.], [4., 5., 6.], [7., 8., 9.]]];
        let grad_out = array![[[1., 1., 1.], [1., 1., 1.], [1., 1., 1.]]];

        let layer = diagonal_layer();
        assert!(layer
            .backward(&image.into_dyn(), &grad_out.into_dyn())
            .is_err());
    }
}
