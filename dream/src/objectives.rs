//! Objective strategies for the dream loop.
//!
//! An objective consumes the ordered feature list of one forward pass and
//! produces the gradient seed to inject at a chosen stage. Objectives are
//! pure: everything they need (working stage, reference features, target
//! classes) is an explicit constructor parameter.

use crate::errors::{DreamError, DreamResult};
use ml::ImagePrecision as Pixel;
use ndarray::{Array2, ArrayD, Axis};

/// The gradient to inject at one stage of the forward model.
#[derive(Debug)]
pub struct GradientSeed {
    pub stage: usize,
    pub grad: ArrayD<Pixel>,
}

pub trait Objective {
    fn gradient_seed(&self, features: &[ArrayD<Pixel>]) -> DreamResult<GradientSeed>;
}

fn stage_feature<'a>(features: &'a [ArrayD<Pixel>], stage: usize) -> DreamResult<&'a ArrayD<Pixel>> {
    features.get(stage).ok_or(DreamError::StageOutOfRange {
        stage,
        stages: features.len(),
    })
}

/// Views a (C, ...) feature tensor as one column of length C per spatial
/// location.
fn feature_columns(tensor: &ArrayD<Pixel>) -> DreamResult<Array2<Pixel>> {
    if tensor.ndim() < 2 {
        return Err(DreamError::NotAFeatureMap(tensor.ndim()));
    }
    let channels = tensor.shape()[0];
    let locations: usize = tensor.shape()[1..].iter().product();
    Ok(Array2::from_shape_vec(
        (channels, locations),
        tensor.iter().cloned().collect(),
    )?)
}

/// Backpropagates a stage's own activations as its gradient, amplifying the
/// patterns the stage already responds to.
pub struct SelfAmplification {
    stage: usize,
}

impl SelfAmplification {
    pub fn new(stage: usize) -> SelfAmplification {
        SelfAmplification { stage }
    }
}

impl Objective for SelfAmplification {
    fn gradient_seed(&self, features: &[ArrayD<Pixel>]) -> DreamResult<GradientSeed> {
        let feature = stage_feature(features, self.stage)?;
        Ok(GradientSeed {
            stage: self.stage,
            grad: feature.clone(),
        })
    }
}

/// Steers the image towards patterns present in a reference image: for each
/// spatial location of the working stage, the best-matching reference
/// feature vector under the dot product becomes that location's gradient.
pub struct GuidedSimilarity {
    stage: usize,
    /// Reference activations flattened to one column per location.
    reference: Array2<Pixel>,
}

impl GuidedSimilarity {
    /// `reference` is the activation tensor of the same stage, precomputed
    /// from the guide image. Its spatial dimensions may differ from the
    /// working image's; the channel count must match at seed time.
    pub fn new(stage: usize, reference: &ArrayD<Pixel>) -> DreamResult<GuidedSimilarity> {
        Ok(GuidedSimilarity {
            stage,
            reference: feature_columns(reference)?,
        })
    }
}

impl Objective for GuidedSimilarity {
    fn gradient_seed(&self, features: &[ArrayD<Pixel>]) -> DreamResult<GradientSeed> {
        let feature = stage_feature(features, self.stage)?;
        let working = feature_columns(feature)?;
        if working.nrows() != self.reference.nrows() {
            return Err(DreamError::ChannelMismatch {
                reference: self.reference.nrows(),
                working: working.nrows(),
            });
        }

        // similarities[m, n] = <reference column m, working column n>
        let similarities = self.reference.t().dot(&working);

        let mut grad = Array2::<Pixel>::zeros(working.raw_dim());
        for (n, sims) in similarities.axis_iter(Axis(1)).enumerate() {
            let mut best = 0;
            let mut best_sim = Pixel::NEG_INFINITY;
            for (m, &s) in sims.iter().enumerate() {
                if s > best_sim {
                    best_sim = s;
                    best = m;
                }
            }
            grad.column_mut(n).assign(&self.reference.column(best));
        }

        Ok(GradientSeed {
            stage: self.stage,
            grad: grad.into_shape(feature.raw_dim())?,
        })
    }
}

/// Injects a one-hot (or multi-hot) vector over the class dimension at the
/// logits stage, steering the image towards the chosen classes.
#[derive(Debug)]
pub struct ClassEmphasis {
    stage: usize,
    classes: Vec<usize>,
}

impl ClassEmphasis {
    pub fn new(stage: usize, classes: Vec<usize>) -> DreamResult<ClassEmphasis> {
        if classes.is_empty() {
            return Err(DreamError::NoTargetClasses);
        }
        Ok(ClassEmphasis { stage, classes })
    }
}

impl Objective for ClassEmphasis {
    fn gradient_seed(&self, features: &[ArrayD<Pixel>]) -> DreamResult<GradientSeed> {
        let logits = stage_feature(features, self.stage)?;
        if logits.ndim() != 1 {
            return Err(DreamError::BadLogitsStage(logits.ndim()));
        }
        let num_classes = logits.len();

        let mut grad = ArrayD::zeros(logits.raw_dim());
        for &class in &self.classes {
            if class >= num_classes {
                return Err(DreamError::ClassOutOfRange {
                    index: class,
                    num_classes,
                });
            }
            grad[[class]] = 1.;
        }
        Ok(GradientSeed {
            stage: self.stage,
            grad,
        })
    }
}
