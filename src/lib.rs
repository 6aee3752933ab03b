mod activation;
pub mod data;
mod error;
mod hyperparameters;
mod initialization;
pub mod layers;
mod loss;
mod model;
mod optimizer;
mod shape;
pub mod train;

pub use activation::ActivationType;
pub use data::{Batch, DataStream, Dataset, IterationScheme};
pub use error::{NetworkError, Result, ShapeError};
pub use hyperparameters::Hyperparameters;
pub use initialization::{Initializer, ParameterInit};
pub use layers::{Layer, Parameter, ParameterRecord};
pub use loss::{misclassification_rate, predictions, Loss};
pub use model::{LeNet, LeNetConfig};
pub use optimizer::{total_gradient_norm, BatchOutcome, GradientDescent, StepRule};
pub use shape::{conv_output_dim, pool_output_dim, BorderMode, Shape, SpatialAxis};
pub use train::{Extension, LoopContext, MainLoop, TrainingLog};
