//! End-to-end behavior of the dream loop against a stub feature model.

use dream::{dream, DreamConfig, Normalizer, SelfAmplification};
use ml::models::{FeatureModel, ModelResult};
use ndarray::{Array3, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Forward model stub returning two feature stages of known constant
/// values, with a constant input gradient proportional to the seed.
struct ConstantStages {
    stage_0: f32,
    stage_1: f32,
}

impl FeatureModel for ConstantStages {
    fn num_stages(&self) -> usize {
        2
    }

    fn forward(&self, _image: &Array3<f32>) -> ModelResult<Vec<ArrayD<f32>>> {
        Ok(vec![
            ArrayD::from_elem(IxDyn(&[16, 32, 32]), self.stage_0),
            ArrayD::from_elem(IxDyn(&[16, 16, 16]), self.stage_1),
        ])
    }

    fn backward(
        &self,
        image: &Array3<f32>,
        _stage: usize,
        seed: &ArrayD<f32>,
    ) -> ModelResult<Array3<f32>> {
        Ok(Array3::from_elem(image.dim(), seed.sum() * 1e-4))
    }
}

fn gray(channels: usize, height: usize, width: usize) -> Array3<f32> {
    Array3::from_elem((channels, height, width), 0.5)
}

#[test]
fn dream_moves_the_image_and_stays_in_display_range() {
    let model = ConstantStages {
        stage_0: 0.7,
        stage_1: 0.,
    };
    let config = DreamConfig {
        iterations: 5,
        learning_rate: 0.02,
        jitter: 0,
    };
    let image = gray(3, 64, 64);
    let mut rng = StdRng::seed_from_u64(0);

    let out = dream(
        &model,
        &image,
        &SelfAmplification::new(0),
        &config,
        &Normalizer::imagenet(),
        &mut rng,
    )
    .unwrap();

    // Spatial dimensions survive the run untouched.
    assert_eq!(out.dim(), image.dim());
    // The clamp invariant holds for every element.
    assert!(out.iter().all(|&x| (0. ..=1.).contains(&x)));
    // A nonzero stage-0 gradient must move the image.
    assert!(out != image);
}

#[test]
fn dream_with_zero_stage_gradient_returns_the_input() {
    let model = ConstantStages {
        stage_0: 0.,
        stage_1: 0.,
    };
    let config = DreamConfig {
        iterations: 5,
        learning_rate: 0.02,
        jitter: 0,
    };
    let image = gray(3, 64, 64);
    let mut rng = StdRng::seed_from_u64(0);

    let out = dream(
        &model,
        &image,
        &SelfAmplification::new(0),
        &config,
        &Normalizer::imagenet(),
        &mut rng,
    )
    .unwrap();

    for (a, b) in out.iter().zip(image.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn dream_with_jitter_keeps_the_clamp_invariant() {
    let model = ConstantStages {
        stage_0: 1.5,
        stage_1: 0.,
    };
    let config = DreamConfig {
        iterations: 10,
        learning_rate: 0.5,
        jitter: 6,
    };
    let image = Array3::from_shape_fn((3, 32, 48), |(c, y, x)| {
        ((c + 1) * (y + 1) * (x + 1)) as f32 % 17. / 17.
    });
    let mut rng = StdRng::seed_from_u64(7);

    let out = dream(
        &model,
        &image,
        &SelfAmplification::new(0),
        &config,
        &Normalizer::imagenet(),
        &mut rng,
    )
    .unwrap();

    assert_eq!(out.dim(), image.dim());
    assert!(out.iter().all(|&x| (0. ..=1.).contains(&x)));
}
