use ndarray::ArrayD;
use rand::RngCore;

use super::{Conv2DLayer, Layer, MaxPoolLayer, Parameter};
use crate::activation::ActivationType;
use crate::error::{Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::shape::{BorderMode, Shape};

/// One feature-extraction stage: convolution, activation, then max pooling.
#[derive(Debug, Clone)]
pub struct ConvolutionalLayer {
    name: String,
    pub convolution: Conv2DLayer,
    pub pooling: MaxPoolLayer,
}

impl ConvolutionalLayer {
    pub fn new(
        name: impl Into<String>,
        activation: ActivationType,
        filter_size: (usize, usize),
        num_filters: usize,
        pooling_size: (usize, usize),
        conv_step: (usize, usize),
        border_mode: BorderMode,
    ) -> Self {
        let name = name.into();
        ConvolutionalLayer {
            convolution: Conv2DLayer::new(
                format!("{name}/convolution"),
                num_filters,
                filter_size,
                conv_step,
                border_mode,
                activation,
            ),
            pooling: MaxPoolLayer::new(format!("{name}/pooling"), pooling_size),
            name,
        }
    }
}

impl Layer for ConvolutionalLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        let convolved = self.convolution.resolve_shape(input)?;
        self.pooling.resolve_shape(convolved)
    }

    fn output_shape(&self) -> Option<Shape> {
        self.pooling.output_shape()
    }

    fn initialize(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        self.convolution.initialize(init, rng)
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let activated = self.convolution.forward(input)?;
        self.pooling.forward(&activated)
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let grad = self.pooling.backward(grad_output)?;
        self.convolution.backward(&grad)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.convolution.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.convolution.parameters_mut()
    }
}
