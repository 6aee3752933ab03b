pub mod conv2d;
pub mod conv_pool;
pub mod feed_forward;
pub mod flatten;
pub mod max_pool;
pub mod mlp;
pub mod sequence;

use std::fmt::Debug;

use ndarray::{ArrayD, IxDyn};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::shape::Shape;

/// A learnable tensor together with its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: ArrayD<f32>,
    pub grad: ArrayD<f32>,
}

impl Parameter {
    /// A parameter whose shape is not known yet.
    pub fn unallocated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArrayD::zeros(IxDyn(&[0])),
            grad: ArrayD::zeros(IxDyn(&[0])),
        }
    }

    pub fn from_value(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn record(&self) -> ParameterRecord {
        ParameterRecord {
            name: self.name.clone(),
            shape: self.value.shape().to_vec(),
            values: self.value.iter().copied().collect(),
        }
    }

    pub fn load_record(&mut self, record: &ParameterRecord) -> Result<()> {
        if self.value.shape() != record.shape.as_slice() {
            return Err(NetworkError::RecordMismatch(format!(
                "{} has shape {:?}, checkpoint holds {:?}",
                self.name,
                self.value.shape(),
                record.shape
            )));
        }
        self.value = ArrayD::from_shape_vec(IxDyn(&record.shape), record.values.clone())?;
        self.zero_grad();
        Ok(())
    }
}

/// Serialized form of a [`Parameter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// One stage of a network pipeline.
///
/// Layers go through two explicit phases before they can run:
/// `resolve_shape` fixes every dimension from the input shape, then
/// `initialize` allocates and fills the parameters. Data is batched along
/// the first axis.
pub trait Layer: Debug {
    fn name(&self) -> &str;

    /// Computes and stores the output shape for `input`.
    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError>;

    fn output_shape(&self) -> Option<Shape>;

    /// Allocates parameters for the resolved shapes and fills them.
    fn initialize(&mut self, _init: &ParameterInit, _rng: &mut dyn RngCore) -> Result<()> {
        Ok(())
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Returns the gradient with respect to the input of the last `forward`
    /// call and adds parameter gradients to the accumulated ones.
    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn zero_grads(&mut self) {
        for param in self.parameters_mut() {
            param.zero_grad();
        }
    }
}

/// Checks that a batch carries `expected` per-example dimensions.
pub(crate) fn check_input(expected: Shape, input: &ArrayD<f32>) -> std::result::Result<(), ShapeError> {
    if input.ndim() == 0 || input.shape()[1..] != expected.dims()[..] {
        return Err(ShapeError::InputMismatch {
            expected,
            actual: input.shape().to_vec(),
        });
    }
    Ok(())
}

pub use conv2d::Conv2DLayer;
pub use conv_pool::ConvolutionalLayer;
pub use feed_forward::FeedForwardLayer;
pub use flatten::Flattener;
pub use max_pool::MaxPoolLayer;
pub use mlp::Mlp;
pub use sequence::ConvolutionalSequence;
