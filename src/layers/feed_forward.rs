use crate::activation::ActivationType;
use crate::error::{Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::layers::{check_input, Layer, Parameter};
use crate::shape::Shape;
use ndarray::{Array2, ArrayD, Axis, Ix2};
use rand::RngCore;

/// Fully-connected layer, `activation(x W^T + b)`.
#[derive(Debug, Clone)]
pub struct FeedForwardLayer {
    name: String,
    pub inputs: usize,
    pub neurons: usize,
    pub activation: ActivationType,
    weights: Parameter,
    bias: Parameter,
    input_cache: Option<Array2<f32>>,
    preactivation_cache: Option<ArrayD<f32>>,
}

impl FeedForwardLayer {
    pub fn new(name: impl Into<String>, inputs: usize, neurons: usize, activation: ActivationType) -> Self {
        let name = name.into();
        FeedForwardLayer {
            weights: Parameter::unallocated(format!("{name}.W")),
            bias: Parameter::unallocated(format!("{name}.b")),
            name,
            inputs,
            neurons,
            activation,
            input_cache: None,
            preactivation_cache: None,
        }
    }
}

impl Layer for FeedForwardLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        if input.size() != self.inputs {
            return Err(ShapeError::InputMismatch {
                expected: Shape::Flat(self.inputs),
                actual: input.dims(),
            });
        }
        Ok(Shape::Flat(self.neurons))
    }

    fn output_shape(&self) -> Option<Shape> {
        Some(Shape::Flat(self.neurons))
    }

    fn initialize(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        // weights are (neurons × inputs)
        let weights = init.weights.generate(&[self.neurons, self.inputs], rng)?;
        let bias = init.biases.generate(&[self.neurons], rng)?;
        self.weights = Parameter::from_value(self.weights.name.clone(), weights);
        self.bias = Parameter::from_value(self.bias.name.clone(), bias);
        Ok(())
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if !self.weights.is_allocated() {
            return Err(ShapeError::Uninitialized.into());
        }
        check_input(Shape::Flat(self.inputs), input)?;

        let input = input.view().into_dimensionality::<Ix2>()?.to_owned();
        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;

        // input is (batch × inputs), result is (batch × neurons)
        let output = input.dot(&weights.t()) + &self.bias.value.view().into_dimensionality::<ndarray::Ix1>()?;
        let output = output.into_dyn();

        self.input_cache = Some(input);
        self.preactivation_cache = Some(output.clone());
        Ok(self.activation.forward(output))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (Some(input), Some(preactivation)) = (self.input_cache.as_ref(), self.preactivation_cache.as_ref())
        else {
            return Err(ShapeError::Uninitialized.into());
        };

        let dlayer = self.activation.backward(grad_output, preactivation);
        let dlayer = dlayer.into_dimensionality::<Ix2>()?;

        // (neurons × batch) · (batch × inputs) = (neurons × inputs)
        let weight_grads = dlayer.t().dot(input).into_dyn();
        let bias_grads = dlayer.sum_axis(Axis(0)).into_dyn();

        let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
        let grad_input = dlayer.dot(&weights).into_dyn();

        self.weights.grad += &weight_grads;
        self.bias.grad += &bias_grads;
        Ok(grad_input)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights, &mut self.bias]
    }
}
