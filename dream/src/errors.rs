use ml::models::ModelError;
use ndarray::ShapeError;
use thiserror::Error;

pub type DreamResult<T> = std::result::Result<T, DreamError>;

#[derive(Error, Debug)]
pub enum DreamError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Objective refers to stage {stage}, but the model produced {stages} stages")]
    StageOutOfRange { stage: usize, stages: usize },
    #[error("Class emphasis needs at least one target class")]
    NoTargetClasses,
    #[error("Class index {index} out of range for a logits stage of size {num_classes}")]
    ClassOutOfRange { index: usize, num_classes: usize },
    #[error("Class emphasis expects a 1-dimensional logits stage, got {0} dimensions")]
    BadLogitsStage(usize),
    #[error("Expected a channels-first feature map, got a tensor with {0} dimensions")]
    NotAFeatureMap(usize),
    #[error("Guided reference has {reference} channels, the working features have {working}")]
    ChannelMismatch { reference: usize, working: usize },
    #[error("Feature stage has an unusable shape:\n {0}")]
    Shape(#[from] ShapeError),
    #[error("The forward model failed:\n {0}")]
    Model(#[from] ModelError),
}
