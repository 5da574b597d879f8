//! Per-channel affine normalization between display range and model range.
//!
//! Models are trained on inputs scaled as `(x - mean_c) / std_c`; the same
//! constants define the clamp bounds that keep the optimized image inside
//! the representable pixel range for the whole run.

use crate::errors::{DreamError, DreamResult};
use ml::ImagePrecision as Pixel;
use ndarray::Array3;

/// Per-channel statistics of the ImageNet training distribution, the
/// de-facto standard for pretrained vision models.
pub const IMAGENET_MEAN: [Pixel; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [Pixel; 3] = [0.229, 0.224, 0.225];

/// Fixed per-channel mean/std pair. Invariant for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mean: Vec<Pixel>,
    std: Vec<Pixel>,
}

impl Normalizer {
    pub fn new(mean: Vec<Pixel>, std: Vec<Pixel>) -> DreamResult<Normalizer> {
        if mean.len() != std.len() {
            return Err(DreamError::InvalidConfig(format!(
                "normalization needs one (mean, std) pair per channel, got {} means and {} stds",
                mean.len(),
                std.len()
            )));
        }
        if std.iter().any(|&s| !s.is_finite() || s <= 0.) {
            return Err(DreamError::InvalidConfig(
                "normalization stds must be finite and positive".to_string(),
            ));
        }
        Ok(Normalizer { mean, std })
    }

    pub fn imagenet() -> Normalizer {
        Normalizer {
            mean: IMAGENET_MEAN.to_vec(),
            std: IMAGENET_STD.to_vec(),
        }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    fn check_channels(&self, image: &Array3<Pixel>) -> DreamResult<()> {
        let channels = image.dim().0;
        if channels != self.channels() {
            return Err(DreamError::InvalidConfig(format!(
                "image has {} channels, normalizer is configured for {}",
                channels,
                self.channels()
            )));
        }
        Ok(())
    }

    /// Maps a [0, 1] display image into the model's input scale.
    pub fn normalize(&self, image: &Array3<Pixel>) -> DreamResult<Array3<Pixel>> {
        self.check_channels(image)?;
        let mut out = image.clone();
        for (c, mut plane) in out.outer_iter_mut().enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|x| (x - mean) / std);
        }
        Ok(out)
    }

    /// Inverse of [normalize](Self::normalize). The result is not clamped;
    /// callers clamp to [0, 1] where numerical drift matters.
    pub fn unnormalize(&self, image: &Array3<Pixel>) -> DreamResult<Array3<Pixel>> {
        self.check_channels(image)?;
        let mut out = image.clone();
        for (c, mut plane) in out.outer_iter_mut().enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|x| x * std + mean);
        }
        Ok(out)
    }

    /// The normalized representation of display values 0 and 1, per channel.
    pub fn bounds(&self) -> ClampBounds {
        let min = self
            .mean
            .iter()
            .zip(&self.std)
            .map(|(&m, &s)| (0. - m) / s)
            .collect();
        let max = self
            .mean
            .iter()
            .zip(&self.std)
            .map(|(&m, &s)| (1. - m) / s)
            .collect();
        ClampBounds { min, max }
    }
}

/// Per-channel [min, max] clamp bounds in normalized scale.
#[derive(Debug, Clone)]
pub struct ClampBounds {
    min: Vec<Pixel>,
    max: Vec<Pixel>,
}

impl ClampBounds {
    pub fn clamp(&self, image: &mut Array3<Pixel>) {
        debug_assert_eq!(image.dim().0, self.min.len());
        for (c, mut plane) in image.outer_iter_mut().enumerate() {
            let (lo, hi) = (self.min[c], self.max[c]);
            plane.mapv_inplace(|x| x.clamp(lo, hi));
        }
    }
}
