use ndarray::{ArrayD, IxDyn};
use rand::distr::Uniform;
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result};

/// Strategy used to fill a freshly allocated parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Independent draws from `N(mean, std^2)`.
    IsotropicGaussian { mean: f32, std: f32 },
    Constant(f32),
    /// Uniform draws from `[mean - width / 2, mean + width / 2)`.
    Uniform { mean: f32, width: f32 },
}

impl Initializer {
    pub fn isotropic_gaussian(std: f32) -> Self {
        Initializer::IsotropicGaussian { mean: 0.0, std }
    }

    pub fn generate(&self, shape: &[usize], rng: &mut dyn RngCore) -> Result<ArrayD<f32>> {
        match *self {
            Initializer::IsotropicGaussian { mean, std } => {
                let normal = Normal::new(mean, std)
                    .map_err(|e| NetworkError::InvalidConfig(format!("gaussian init: {e}")))?;
                Ok(ArrayD::from_shape_fn(IxDyn(shape), |_| normal.sample(rng)))
            }
            Initializer::Constant(value) => Ok(ArrayD::from_elem(IxDyn(shape), value)),
            Initializer::Uniform { mean, width } => {
                if width == 0.0 {
                    return Ok(ArrayD::from_elem(IxDyn(shape), mean));
                }
                let half = width / 2.0;
                let uniform = Uniform::new(mean - half, mean + half)
                    .map_err(|e| NetworkError::InvalidConfig(format!("uniform init: {e}")))?;
                Ok(ArrayD::from_shape_fn(IxDyn(shape), |_| uniform.sample(rng)))
            }
        }
    }
}

/// Initializers applied to every weight and bias tensor of a network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterInit {
    pub weights: Initializer,
    pub biases: Initializer,
}

impl ParameterInit {
    pub fn new(weights: Initializer, biases: Initializer) -> Self {
        Self { weights, biases }
    }
}

impl Default for ParameterInit {
    fn default() -> Self {
        Self {
            weights: Initializer::isotropic_gaussian(0.01),
            biases: Initializer::Constant(0.0),
        }
    }
}
