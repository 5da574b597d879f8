//! Frozen feature-extraction models.
//!
//! A [FeatureNetwork] is an ordered list of stages, each stage an ordered
//! list of layers. One forward evaluation yields the output tensor of every
//! stage; the backward evaluation injects a gradient seed at a chosen stage
//! and propagates it back to the input image. Parameters never receive
//! gradients, so the network is frozen by construction rather than by a
//! mutable evaluation-mode flag.

use crate::activation_functions::ReluLayer;
use crate::convolutions::ConvolutionLayer;
use crate::fully_connected::FeedforwardLayer;
use crate::pooling::GlobalAveragePooling;
use crate::weight_loader::{WeightError, WeightLoader};
use crate::ImagePrecision;
use ndarray::{Array3, ArrayD, Ix3, ShapeError};
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Tensor has the wrong dimensionality:\n {0}")]
    Shape(#[from] ShapeError),
    #[error("Layer expected {expected}, got a tensor of shape {found:?}")]
    BadInput {
        expected: &'static str,
        found: Vec<usize>,
    },
    #[error("Stage index {stage} out of range, the model has {stages} stages")]
    StageOutOfRange { stage: usize, stages: usize },
    #[error("Could not load model weights:\n {0}")]
    Weight(#[from] WeightError),
}

/// A frozen, differentiable layer. `backward` propagates a gradient to the
/// layer *input* only, given the same input the forward pass saw.
pub trait Layer {
    fn forward(&self, input: &ArrayD<ImagePrecision>) -> ModelResult<ArrayD<ImagePrecision>>;
    fn backward(
        &self,
        input: &ArrayD<ImagePrecision>,
        grad_output: &ArrayD<ImagePrecision>,
    ) -> ModelResult<ArrayD<ImagePrecision>>;
}

/// The model contract the dream loop consumes: one forward evaluation
/// produces the ordered per-stage feature list, and a backward evaluation
/// turns a gradient seed at one stage into a gradient on the input image.
pub trait FeatureModel {
    fn num_stages(&self) -> usize;

    /// Runs the image through the model and collects the output of every
    /// stage, in order.
    fn forward(&self, image: &Array3<ImagePrecision>) -> ModelResult<Vec<ArrayD<ImagePrecision>>>;

    /// Injects `seed` as the gradient of the given stage's output and
    /// propagates it back to the input image.
    fn backward(
        &self,
        image: &Array3<ImagePrecision>,
        stage: usize,
        seed: &ArrayD<ImagePrecision>,
    ) -> ModelResult<Array3<ImagePrecision>>;
}

type StageLayers = Vec<Box<dyn Layer>>;

/// Sequential stage container implementing [FeatureModel].
pub struct FeatureNetwork {
    stages: Vec<StageLayers>,
}

impl FeatureNetwork {
    pub fn new(stages: Vec<StageLayers>) -> FeatureNetwork {
        FeatureNetwork { stages }
    }

    pub fn push_stage(&mut self, layers: StageLayers) {
        self.stages.push(layers);
    }

    /// Recomputes the input of every layer up to and including `stage`.
    /// Intermediate activations are not cached across calls, so the network
    /// itself stays free of interior mutability.
    fn layer_inputs(
        &self,
        image: &Array3<ImagePrecision>,
        stage: usize,
    ) -> ModelResult<Vec<ArrayD<ImagePrecision>>> {
        let mut inputs = Vec::new();
        let mut current = image.clone().into_dyn();
        for stage_layers in &self.stages[..=stage] {
            for layer in stage_layers {
                inputs.push(current.clone());
                current = layer.forward(&current)?;
            }
        }
        Ok(inputs)
    }
}

impl FeatureModel for FeatureNetwork {
    fn num_stages(&self) -> usize {
        self.stages.len()
    }

    fn forward(&self, image: &Array3<ImagePrecision>) -> ModelResult<Vec<ArrayD<ImagePrecision>>> {
        let mut features = Vec::with_capacity(self.stages.len());
        let mut current = image.clone().into_dyn();
        for stage_layers in &self.stages {
            for layer in stage_layers {
                current = layer.forward(&current)?;
            }
            features.push(current.clone());
        }
        Ok(features)
    }

    fn backward(
        &self,
        image: &Array3<ImagePrecision>,
        stage: usize,
        seed: &ArrayD<ImagePrecision>,
    ) -> ModelResult<Array3<ImagePrecision>> {
        if stage >= self.stages.len() {
            return Err(ModelError::StageOutOfRange {
                stage,
                stages: self.stages.len(),
            });
        }

        let inputs = self.layer_inputs(image, stage)?;
        let layers: Vec<&dyn Layer> = self.stages[..=stage]
            .iter()
            .flat_map(|s| s.iter().map(|l| l.as_ref()))
            .collect();

        let mut grad = seed.clone();
        for i in (0..layers.len()).rev() {
            grad = layers[i].backward(&inputs[i], &grad)?;
        }
        Ok(grad.into_dimensionality::<Ix3>()?)
    }
}

/// Output channel widths of the three convolutional stages.
const STAGE_CHANNELS: [usize; 3] = [16, 32, 64];
const KERNEL_SIZE: usize = 3;

/// Builds the convolutional feature extractor: three conv3x3+relu stages
/// with stride 1 and padding 1, so feature maps keep the image's spatial
/// dimensions. Weight names follow the pytorch export convention
/// (`features.0.weight`, `features.2.weight`, ...).
pub fn feature_network<L: WeightLoader>(loader: &mut L) -> ModelResult<FeatureNetwork> {
    let mut stages: Vec<StageLayers> = Vec::new();
    let mut in_channels = 3;
    for (i, &out_channels) in STAGE_CHANNELS.iter().enumerate() {
        let name = format!("features.{}.weight", 2 * i);
        let kernel = loader.get_weight(&name, (out_channels, in_channels, KERNEL_SIZE, KERNEL_SIZE))?;
        stages.push(vec![
            Box::new(ConvolutionLayer::new(kernel, 1, 1)),
            Box::new(ReluLayer::new()),
        ]);
        in_channels = out_channels;
    }
    log::info!("built feature extractor with {} stages", stages.len());
    Ok(FeatureNetwork::new(stages))
}

/// The feature extractor plus a global-average-pool + linear logits stage,
/// for class-emphasis visualization.
pub fn classifier_network<L: WeightLoader>(
    loader: &mut L,
    num_classes: usize,
) -> ModelResult<FeatureNetwork> {
    let mut network = feature_network(loader)?;
    let last_width = *STAGE_CHANNELS.last().unwrap();
    let weights = loader.get_weight("classifier.weight", (num_classes, last_width))?;
    let bias = loader.get_weight("classifier.bias", num_classes)?;
    network.push_stage(vec![
        Box::new(GlobalAveragePooling::new()),
        Box::new(FeedforwardLayer::new(weights, bias)),
    ]);
    Ok(network)
}
