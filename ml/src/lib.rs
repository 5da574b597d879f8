//! Differentiable building blocks for feature visualization.
//!
//! Every layer in this crate implements a forward pass and a backward pass
//! with respect to its *input* only. Model parameters are frozen by
//! construction: nothing here can accumulate a parameter gradient, which is
//! exactly the contract an image-optimization loop needs from its model.

pub mod activation_functions;
pub mod convolutions;
pub mod fully_connected;
pub mod models;
pub mod pooling;
pub mod weight_loader;

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;
