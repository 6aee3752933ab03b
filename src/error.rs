use crate::shape::{Shape, SpatialAxis};
use thiserror::Error;

/// Configuration errors found while propagating shapes, before any
/// parameter tensor is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("{layer}: output {axis} would be {dim}, which is not positive")]
    NonPositiveDimension {
        layer: String,
        axis: SpatialAxis,
        dim: i64,
    },

    #[error("{layer}: {axis} extent {extent} is not divisible by stride {stride}")]
    FractionalDimension {
        layer: String,
        axis: SpatialAxis,
        extent: usize,
        stride: usize,
    },

    #[error("{layer}: {what} must be positive")]
    ZeroExtent { layer: String, what: &'static str },

    #[error("feature-extraction stage {stage} is misconfigured: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: Box<ShapeError>,
    },

    #[error(
        "feature-extraction lists disagree in length: {activations} activations, \
         {filter_sizes} filter sizes, {feature_maps} feature maps, {pooling_sizes} pooling sizes"
    )]
    LengthMismatch {
        activations: usize,
        filter_sizes: usize,
        feature_maps: usize,
        pooling_sizes: usize,
    },

    #[error("classifier head has {activations} activations for {dims} widths")]
    HeadMismatch { activations: usize, dims: usize },

    #[error("classifier head needs at least one layer")]
    EmptyHead,

    #[error("shapes have not been resolved")]
    Unresolved,

    #[error("parameters have not been initialized")]
    Uninitialized,

    #[error("shapes were resolved for input {resolved}, cannot resolve again for {requested}")]
    AlreadyResolved { resolved: Shape, requested: Shape },

    #[error("expected per-example input {expected}, got {actual:?}")]
    InputMismatch { expected: Shape, actual: Vec<usize> },
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("tensor layout error: {0}")]
    Tensor(#[from] ndarray::ShapeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid dataset: {0}")]
    InvalidData(String),

    #[error("checkpoint does not match model: {0}")]
    RecordMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
