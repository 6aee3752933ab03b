use ndarray::ArrayD;
use rand::RngCore;

use super::{FeedForwardLayer, Layer, Parameter};
use crate::activation::ActivationType;
use crate::error::{Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::shape::Shape;

/// Stack of fully-connected layers.
///
/// `dims` holds the input width followed by every layer width. The layers
/// themselves only exist once the input width is known.
#[derive(Debug, Clone)]
pub struct Mlp {
    pub activations: Vec<ActivationType>,
    pub dims: Vec<usize>,
    layers: Vec<FeedForwardLayer>,
}

impl Mlp {
    /// `dims` are the layer widths, without the input width.
    pub fn new(activations: Vec<ActivationType>, dims: Vec<usize>) -> std::result::Result<Self, ShapeError> {
        if dims.is_empty() {
            return Err(ShapeError::EmptyHead);
        }
        if activations.len() != dims.len() {
            return Err(ShapeError::HeadMismatch {
                activations: activations.len(),
                dims: dims.len(),
            });
        }
        if dims.contains(&0) {
            return Err(ShapeError::ZeroExtent {
                layer: "mlp".to_string(),
                what: "layer width",
            });
        }

        let mut all_dims = Vec::with_capacity(dims.len() + 1);
        all_dims.push(0);
        all_dims.extend(dims);
        Ok(Self {
            activations,
            dims: all_dims,
            layers: Vec::new(),
        })
    }

    pub fn input_dim(&self) -> Option<usize> {
        (!self.layers.is_empty()).then(|| self.dims[0])
    }

    pub fn layers(&self) -> &[FeedForwardLayer] {
        &self.layers
    }

    /// Resizes the last layer. Rebuilds that layer without parameters if the
    /// stack has been resolved.
    pub fn set_output_dim(&mut self, value: usize) -> std::result::Result<(), ShapeError> {
        if value == 0 {
            return Err(ShapeError::ZeroExtent {
                layer: "mlp".to_string(),
                what: "output width",
            });
        }
        if let Some(last) = self.dims.last_mut() {
            *last = value;
        }
        if let Some(layer) = self.layers.last_mut() {
            let name = layer.name().to_string();
            *layer = FeedForwardLayer::new(name, layer.inputs, value, layer.activation);
        }
        Ok(())
    }
}

impl Layer for Mlp {
    fn name(&self) -> &str {
        "mlp"
    }

    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        let input_dim = input.size();
        if input_dim == 0 {
            return Err(ShapeError::ZeroExtent {
                layer: "mlp".to_string(),
                what: "input width",
            });
        }
        self.dims[0] = input_dim;

        self.layers = self
            .dims
            .windows(2)
            .zip(&self.activations)
            .enumerate()
            .map(|(i, (pair, &activation))| {
                FeedForwardLayer::new(format!("mlp/linear_{i}"), pair[0], pair[1], activation)
            })
            .collect();

        let output = *self.dims.last().ok_or(ShapeError::EmptyHead)?;
        Ok(Shape::Flat(output))
    }

    fn output_shape(&self) -> Option<Shape> {
        self.layers.last().map(|layer| Shape::Flat(layer.neurons))
    }

    fn initialize(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        if self.layers.is_empty() {
            return Err(ShapeError::Unresolved.into());
        }
        for layer in &mut self.layers {
            layer.initialize(init, rng)?;
        }
        Ok(())
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect()
    }
}
