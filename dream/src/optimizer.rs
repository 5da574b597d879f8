//! The gradient image optimizer.
//!
//! Each iteration runs one forward pass through the frozen model, asks the
//! objective for a gradient seed, propagates it back to the image, and takes
//! one normalized ascent step. The step is divided by the mean absolute
//! gradient magnitude, so the configured rate is invariant to the scale of
//! the objective. After every step the image is clamped to the per-channel
//! bounds derived from the normalization constants.
//!
//! Termination is the fixed iteration count; there is no convergence
//! criterion. Gradients are computed fresh against the current image each
//! iteration and never accumulate.

use crate::errors::{DreamError, DreamResult};
use crate::normalize::Normalizer;
use crate::objectives::Objective;
use log::{debug, trace};
use ml::models::FeatureModel;
use ml::ImagePrecision as Pixel;
use ndarray::Array3;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct DreamConfig {
    /// Number of optimization steps.
    pub iterations: usize,
    /// Step size after gradient normalization. A rate of 0 is accepted and
    /// makes every step a no-op.
    pub learning_rate: Pixel,
    /// Maximum random shift per spatial axis and iteration. 0 disables the
    /// jitter regularization entirely; no random numbers are drawn then.
    pub jitter: u32,
}

impl Default for DreamConfig {
    fn default() -> DreamConfig {
        DreamConfig {
            iterations: 20,
            learning_rate: 0.05,
            jitter: 8,
        }
    }
}

impl DreamConfig {
    fn validate(&self) -> DreamResult<()> {
        if !self.learning_rate.is_finite() || self.learning_rate < 0. {
            return Err(DreamError::InvalidConfig(format!(
                "learning rate must be finite and non-negative, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Circular shift of the spatial axes. The image never shrinks under
/// jitter: offsets wrap around, and the loop undoes the roll after the
/// update so the image stays aligned across iterations.
fn roll2d(image: &Array3<Pixel>, down: isize, right: isize) -> Array3<Pixel> {
    let (channels, height, width) = image.dim();
    let mut out = Array3::zeros((channels, height, width));
    let down = down.rem_euclid(height as isize) as usize;
    let right = right.rem_euclid(width as isize) as usize;
    for c in 0..channels {
        for y in 0..height {
            let ty = (y + down) % height;
            for x in 0..width {
                let tx = (x + right) % width;
                out[[c, ty, tx]] = image[[c, y, x]];
            }
        }
    }
    out
}

/// Runs the dream loop on a [0, 1] display image and returns the optimized
/// image, back in [0, 1] and with the input's spatial dimensions.
///
/// The model is a frozen evaluation handle: only the image receives
/// updates. Failures of the model or the objective abort the run unchanged;
/// there are no retries and no partial results.
pub fn dream<M, O, R>(
    model: &M,
    image: &Array3<Pixel>,
    objective: &O,
    config: &DreamConfig,
    normalizer: &Normalizer,
    rng: &mut R,
) -> DreamResult<Array3<Pixel>>
where
    M: FeatureModel + ?Sized,
    O: Objective + ?Sized,
    R: Rng,
{
    config.validate()?;
    let bounds = normalizer.bounds();
    let mut work = normalizer.normalize(image)?;

    for step in 0..config.iterations {
        let (down, right) = if config.jitter > 0 {
            (
                rng.gen_range(0..=config.jitter) as isize,
                rng.gen_range(0..=config.jitter) as isize,
            )
        } else {
            (0, 0)
        };
        if down != 0 || right != 0 {
            work = roll2d(&work, down, right);
        }

        let features = model.forward(&work)?;
        let seed = objective.gradient_seed(&features)?;
        let grad = model.backward(&work, seed.stage, &seed.grad)?;

        let mean_magnitude = grad.mapv(Pixel::abs).mean().unwrap_or(0.);
        if mean_magnitude > 0. {
            let scale = config.learning_rate / mean_magnitude;
            work.zip_mut_with(&grad, |w, g| *w += g * scale);
            trace!(
                "step {}: mean |grad| = {:e}, effective scale = {:e}",
                step,
                mean_magnitude,
                scale
            );
        } else {
            // Degenerate objective; stepping would divide by zero.
            debug!("step {}: zero gradient magnitude, skipping update", step);
        }

        bounds.clamp(&mut work);

        if down != 0 || right != 0 {
            work = roll2d(&work, -down, -right);
        }
    }

    let mut out = normalizer.unnormalize(&work)?;
    // Guard against numerical drift beyond the displayable range.
    out.mapv_inplace(|x| x.clamp(0., 1.));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectives::SelfAmplification;
    use ml::models::{FeatureModel, ModelResult};
    use ndarray::{Array3, ArrayD, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Model stub with two constant feature stages. The input gradient is a
    /// constant image proportional to the injected seed's sum.
    struct StubModel {
        stage_values: [Pixel; 2],
    }

    impl FeatureModel for StubModel {
        fn num_stages(&self) -> usize {
            2
        }

        fn forward(&self, _image: &Array3<Pixel>) -> ModelResult<Vec<ArrayD<Pixel>>> {
            Ok(vec![
                ArrayD::from_elem(IxDyn(&[4, 6, 6]), self.stage_values[0]),
                ArrayD::from_elem(IxDyn(&[8]), self.stage_values[1]),
            ])
        }

        fn backward(
            &self,
            image: &Array3<Pixel>,
            _stage: usize,
            seed: &ArrayD<Pixel>,
        ) -> ModelResult<Array3<Pixel>> {
            Ok(Array3::from_elem(image.dim(), seed.sum() * 1e-3))
        }
    }

    fn gray_image() -> Array3<Pixel> {
        Array3::from_elem((3, 16, 16), 0.5)
    }

    fn assert_close(a: &Array3<Pixel>, b: &Array3<Pixel>, tolerance: Pixel) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= tolerance, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_roll_is_cyclic_and_invertible() {
        let image = Array3::from_shape_fn((2, 3, 4), |(c, y, x)| (c * 12 + y * 4 + x) as Pixel);

        let rolled = roll2d(&image, 2, 3);
        assert_eq!(rolled[[0, 2, 3]], image[[0, 0, 0]]);
        assert_eq!(rolled.dim(), image.dim());

        let restored = roll2d(&rolled, -2, -3);
        assert_eq!(restored, image);
    }

    #[test]
    fn test_negative_learning_rate_is_rejected() {
        let config = DreamConfig {
            learning_rate: -0.1,
            ..DreamConfig::default()
        };
        let model = StubModel { stage_values: [1., 0.] };
        let mut rng = StdRng::seed_from_u64(0);

        let result = dream(
            &model,
            &gray_image(),
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng,
        );
        assert!(matches!(result, Err(DreamError::InvalidConfig(_))));
    }

    #[test]
    fn test_non_finite_learning_rate_is_rejected() {
        let config = DreamConfig {
            learning_rate: Pixel::NAN,
            ..DreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_learning_rate_leaves_the_image_unchanged() {
        let config = DreamConfig {
            iterations: 7,
            learning_rate: 0.,
            jitter: 0,
        };
        let model = StubModel { stage_values: [1., 0.] };
        let mut rng = StdRng::seed_from_u64(0);

        // Values outside [0, 1] exercise the clamp on the way through.
        let mut image = gray_image();
        image[[0, 0, 0]] = 1.25;
        image[[2, 5, 5]] = -0.5;

        let out = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng,
        )
        .unwrap();

        let expected = image.mapv(|x| x.clamp(0., 1.));
        assert_close(&out, &expected, 1e-5);
    }

    #[test]
    fn test_zero_iterations_run_no_optimization() {
        let config = DreamConfig {
            iterations: 0,
            learning_rate: 0.5,
            jitter: 4,
        };
        let model = StubModel { stage_values: [3., 0.] };
        let mut rng = StdRng::seed_from_u64(1);

        let image = gray_image();
        let out = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng,
        )
        .unwrap();

        assert_close(&out, &image, 1e-5);
    }

    #[test]
    fn test_zero_activations_are_a_defined_noop() {
        // All-zero stage activations make the self-amplification gradient
        // zero; the step must neither divide by zero nor move the image.
        let config = DreamConfig {
            iterations: 5,
            learning_rate: 0.1,
            jitter: 0,
        };
        let model = StubModel { stage_values: [0., 0.] };
        let mut rng = StdRng::seed_from_u64(2);

        let image = gray_image();
        let out = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng,
        )
        .unwrap();

        assert_close(&out, &image, 1e-5);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_runs_without_jitter_are_deterministic() {
        let config = DreamConfig {
            iterations: 6,
            learning_rate: 0.05,
            jitter: 0,
        };
        let model = StubModel { stage_values: [2., 0.] };
        let image = gray_image();

        let mut rng_a = StdRng::seed_from_u64(11);
        let mut rng_b = StdRng::seed_from_u64(99);
        let out_a = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng_a,
        )
        .unwrap();
        let out_b = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng_b,
        )
        .unwrap();

        // Different RNG seeds, identical results: no hidden randomness.
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_jittered_runs_reproduce_under_a_fixed_seed() {
        let config = DreamConfig {
            iterations: 6,
            learning_rate: 0.05,
            jitter: 4,
        };
        let model = StubModel { stage_values: [2., 0.] };
        let image = gray_image();

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let out_a = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng_a,
        )
        .unwrap();
        let out_b = dream(
            &model,
            &image,
            &SelfAmplification::new(0),
            &config,
            &Normalizer::imagenet(),
            &mut rng_b,
        )
        .unwrap();

        assert_eq!(out_a, out_b);
    }
}
