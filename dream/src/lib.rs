//! Gradient-ascent image optimization against a frozen feature extractor.
//!
//! The loop in this crate repeatedly perturbs an image so that an objective
//! computed from the model's intermediate activations grows: amplify what a
//! stage already sees, steer towards the features of a reference image, or
//! emphasize chosen output classes. The model itself never changes; only
//! the image receives gradient updates, and it is clamped to the model's
//! valid input range after every step.

pub mod errors;
pub mod normalize;
pub mod objectives;
pub mod optimizer;

pub use errors::{DreamError, DreamResult};
pub use normalize::{ClampBounds, Normalizer, IMAGENET_MEAN, IMAGENET_STD};
pub use objectives::{
    ClassEmphasis, GradientSeed, GuidedSimilarity, Objective, SelfAmplification,
};
pub use optimizer::{dream, DreamConfig};
