use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};
use crate::initialization::{Initializer, ParameterInit};

/// Hyperparameters for training the network
///
/// Every field may be omitted from a JSON file, in which case the default
/// is used.
///
/// ```json
/// { "learning_rate": 0.001, "batch_size": 100, "num_epochs": 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Learning rate for training
    pub learning_rate: f32,

    /// Number of training epochs
    pub num_epochs: usize,

    /// Batch size for training and monitoring
    pub batch_size: usize,

    /// Standard deviation of the Gaussian weight initialization
    pub weights_std: f32,

    /// Constant every bias starts at
    pub biases_init: f32,

    /// Seed for parameter initialization and shuffling
    pub seed: u64,

    /// Visit training examples in a new random order every epoch
    pub shuffle: bool,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            learning_rate: 0.001,
            num_epochs: 2,
            batch_size: 100,
            weights_std: 0.01,
            biases_init: 0.0,
            seed: 1,
            shuffle: false,
        }
    }
}

impl Hyperparameters {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let hyperparameters: Hyperparameters = serde_json::from_str(&contents)?;
        hyperparameters.validate()?;
        Ok(hyperparameters)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(NetworkError::InvalidConfig("learning_rate must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(NetworkError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.num_epochs == 0 {
            return Err(NetworkError::InvalidConfig("num_epochs must be positive".into()));
        }
        if !(self.weights_std >= 0.0) {
            return Err(NetworkError::InvalidConfig("weights_std must be non-negative".into()));
        }
        Ok(())
    }

    pub fn parameter_init(&self) -> ParameterInit {
        ParameterInit::new(
            Initializer::isotropic_gaussian(self.weights_std),
            Initializer::Constant(self.biases_init),
        )
    }
}
