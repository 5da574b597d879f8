//! This crate ties the parts of the project together and provides a clean
//! command line interface for dreaming up feature visualizations.

use dream::{
    dream, ClassEmphasis, DreamConfig, GuidedSimilarity, Normalizer, Objective, SelfAmplification,
};
use dreamnet::{array_to_image, image_to_ndarray, to_pixel};
use env_logger::Builder;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use log::info;
use ml::models::{classifier_network, feature_network, FeatureModel};
use ml::weight_loader::NpzWeightLoader;
use ndarray::Array3;
use ndarray_npy::read_npy;
use quicli::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ffi::OsStr;
use std::path::PathBuf;
use structopt::StructOpt;

/// Options shared by every subcommand
#[derive(Debug, StructOpt)]
struct CommonOpts {
    /// Path to the image that should be optimized
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Path to the npz archive containing the network weights
    #[structopt(short = "w", long = "weights", parse(from_os_str))]
    weights: PathBuf,
    /// Output path, writes to /path/to/image-dream.png if not available
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// Number of optimization steps
    #[structopt(short = "n", long = "iterations", default_value = "20")]
    iterations: usize,
    /// Step size, applied after gradient normalization
    #[structopt(short = "l", long = "learning-rate", default_value = "0.05")]
    learning_rate: f32,
    /// Maximum random shift per spatial axis and step; 0 disables jitter
    #[structopt(short = "j", long = "jitter", default_value = "8")]
    jitter: u32,
    /// Seed for the jitter randomness, for reproducible runs
    #[structopt(long = "seed")]
    seed: Option<u64>,
    /// Scales the image down so its longest side has this many pixels
    #[structopt(long = "resize")]
    resize: Option<u32>,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Amplifies the patterns a feature stage already responds to
#[derive(Debug, StructOpt)]
struct AmplifyOpts {
    /// Feature stage whose activations are amplified
    #[structopt(short = "s", long = "stage", default_value = "2")]
    stage: usize,
    #[structopt(flatten)]
    common: CommonOpts,
}

/// Steers the image towards the features of a guide image
#[derive(Debug, StructOpt)]
struct GuidedOpts {
    /// Path to the guide image whose features are matched
    #[structopt(short = "g", long = "guide", parse(from_os_str))]
    guide: PathBuf,
    /// Feature stage at which working and guide features are compared
    #[structopt(short = "s", long = "stage", default_value = "2")]
    stage: usize,
    #[structopt(flatten)]
    common: CommonOpts,
}

/// Emphasizes the features associated with target classes
#[derive(Debug, StructOpt)]
struct ClassesOpts {
    /// Target class index, may be passed several times
    #[structopt(short = "c", long = "class")]
    classes: Vec<usize>,
    /// Number of classes the loaded classifier head was trained on
    #[structopt(long = "num-classes", default_value = "1000")]
    num_classes: usize,
    #[structopt(flatten)]
    common: CommonOpts,
}

/// Dream up feature visualizations with a neural network.
#[derive(Debug, StructOpt)]
#[structopt(name = "DreamNet")]
enum Dreamnet {
    #[structopt(
        name = "amplify",
        about = "Amplifies what a feature stage already sees in the image."
    )]
    Amplify(AmplifyOpts),
    #[structopt(
        name = "guided",
        about = "Steers the image towards patterns found in a second, guiding image."
    )]
    Guided(GuidedOpts),
    #[structopt(
        name = "classes",
        about = "Steers the image towards features associated with chosen output classes."
    )]
    Classes(ClassesOpts),
}

/// Trait for the subcommands that dreamnet uses
trait DreamnetOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

impl CommonOpts {
    fn config(&self) -> DreamConfig {
        DreamConfig {
            iterations: self.iterations,
            learning_rate: self.learning_rate,
            jitter: self.jitter,
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Runs the optimization loop and writes the resulting image.
    fn dream_to_file(&self, model: &dyn FeatureModel, objective: &dyn Objective) -> CliResult {
        let image = get_image(&self.image, self.resize)?;
        info!(
            "dreaming on a {:?} image for {} iterations",
            image.dim(),
            self.iterations
        );

        let mut rng = self.rng();
        let dreamed = dream(
            model,
            &image,
            objective,
            &self.config(),
            &Normalizer::imagenet(),
            &mut rng,
        )?;

        let output = match &self.output {
            Some(path) => path.clone(),
            None => {
                let stem = self.image.file_stem().unwrap_or_else(|| OsStr::new("out"));
                let new_filename = stem.to_string_lossy().into_owned() + "-dream.png";
                self.image.parent().unwrap_or_else(|| "".as_ref()).join(new_filename)
            }
        };
        array_to_image(dreamed.map(to_pixel)).save(&output)?;
        info!("wrote {}", output.display());
        Ok(())
    }
}

impl DreamnetOpts for AmplifyOpts {
    fn run(&self) -> CliResult {
        let mut loader = NpzWeightLoader::from_path(&self.common.weights)?;
        let model = feature_network(&mut loader)?;
        let objective = SelfAmplification::new(self.stage);
        self.common.dream_to_file(&model, &objective)
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.common.verbosity
    }
}

impl DreamnetOpts for GuidedOpts {
    fn run(&self) -> CliResult {
        let mut loader = NpzWeightLoader::from_path(&self.common.weights)?;
        let model = feature_network(&mut loader)?;

        // The guide's features are computed once, from its normalized form,
        // and then drive every iteration of the loop.
        let guide = get_image(&self.guide, self.common.resize)?;
        let normalized_guide = Normalizer::imagenet().normalize(&guide)?;
        let guide_features = model.forward(&normalized_guide)?;
        let reference = guide_features
            .get(self.stage)
            .ok_or(dream::DreamError::StageOutOfRange {
                stage: self.stage,
                stages: guide_features.len(),
            })?;

        let objective = GuidedSimilarity::new(self.stage, reference)?;
        self.common.dream_to_file(&model, &objective)
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.common.verbosity
    }
}

impl DreamnetOpts for ClassesOpts {
    fn run(&self) -> CliResult {
        let mut loader = NpzWeightLoader::from_path(&self.common.weights)?;
        let model = classifier_network(&mut loader, self.num_classes)?;
        // The logits live in the last stage of the classifier network.
        let objective = ClassEmphasis::new(model.num_stages() - 1, self.classes.clone())?;
        self.common.dream_to_file(&model, &objective)
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.common.verbosity
    }
}

impl DreamnetOpts for Dreamnet {
    fn run(&self) -> CliResult {
        match self {
            Dreamnet::Amplify(c) => c.run(),
            Dreamnet::Guided(c) => c.run(),
            Dreamnet::Classes(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Dreamnet::Amplify(c) => c.get_verbosity(),
            Dreamnet::Guided(c) => c.get_verbosity(),
            Dreamnet::Classes(c) => c.get_verbosity(),
        }
    }
}

/// Returns the preprocessed, [0, 1]-scaled image from the path buffer
fn get_image(im_path: &PathBuf, resize: Option<u32>) -> Result<Array3<f32>, Error> {
    match im_path.extension().and_then(OsStr::to_str) {
        Some("npy") => {
            let arr: Array3<f32> = read_npy(im_path)?;
            Ok(arr)
        }
        Some("png") | Some("jpg") | Some("jpeg") => {
            let mut img = ImageReader::open(im_path)?.decode()?;
            if let Some(max_side) = resize {
                img = img.resize(max_side, max_side, FilterType::CatmullRom);
            }
            Ok(image_to_ndarray(&img))
        }
        _ => panic!("Image had unrecognized type. Only .jpg, .png and .npy are supported."),
    }
}

fn main() -> CliResult {
    let args = Dreamnet::from_args();
    args.setup_env_logger()?;
    args.run()
}
