use ndarray::ArrayD;
use rand::RngCore;
use tracing::debug;

use super::{ConvolutionalLayer, Layer, Parameter};
use crate::error::{Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::shape::Shape;

/// Ordered feature-extraction stages, seeded with the input channel count
/// and image size.
#[derive(Debug, Clone)]
pub struct ConvolutionalSequence {
    pub layers: Vec<ConvolutionalLayer>,
    pub num_channels: usize,
    pub image_size: (usize, usize),
    resolved_input: Option<Shape>,
    output: Option<Shape>,
}

impl ConvolutionalSequence {
    pub fn new(layers: Vec<ConvolutionalLayer>, num_channels: usize, image_size: (usize, usize)) -> Self {
        Self {
            layers,
            num_channels,
            image_size,
            resolved_input: None,
            output: None,
        }
    }

    pub fn input_shape(&self) -> Shape {
        Shape::spatial(self.num_channels, self.image_size.0, self.image_size.1)
    }

    /// Resolves every stage from the seeded input shape.
    pub fn push_allocation_config(&mut self) -> std::result::Result<Shape, ShapeError> {
        self.resolve_shape(self.input_shape())
    }
}

impl Layer for ConvolutionalSequence {
    fn name(&self) -> &str {
        "conv_sequence"
    }

    /// Resolving again with the same input is a no-op; a different input is
    /// rejected because stage shapes have already been fixed.
    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        if let (Some(resolved), Some(output)) = (self.resolved_input, self.output) {
            if resolved == input {
                return Ok(output);
            }
            return Err(ShapeError::AlreadyResolved {
                resolved,
                requested: input,
            });
        }

        let mut shape = input;
        for (stage, layer) in self.layers.iter_mut().enumerate() {
            shape = layer.resolve_shape(shape).map_err(|source| ShapeError::Stage {
                stage,
                source: Box::new(source),
            })?;
            debug!(layer = layer.name(), output = %shape, "resolved stage");
        }

        self.resolved_input = Some(input);
        self.output = Some(shape);
        Ok(shape)
    }

    fn output_shape(&self) -> Option<Shape> {
        self.output
    }

    fn initialize(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        if self.output.is_none() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationType;
    use crate::shape::BorderMode;

    fn stage(i: usize, filters: usize) -> ConvolutionalLayer {
        ConvolutionalLayer::new(
            format!("conv_pool_{i}"),
            ActivationType::ReLU,
            (5, 5),
            filters,
            (2, 2),
            (1, 1),
            BorderMode::Full,
        )
    }

    #[test]
    fn test_lenet_stages_resolve() {
        let mut sequence = ConvolutionalSequence::new(vec![stage(0, 6), stage(1, 16)], 1, (28, 28));
        let output = sequence.push_allocation_config().unwrap();

        assert_eq!(sequence.layers[0].output_shape(), Some(Shape::spatial(6, 16, 16)));
        assert_eq!(output, Shape::spatial(16, 10, 10));
    }

    #[test]
    fn test_empty_sequence_is_identity() {
        let mut sequence = ConvolutionalSequence::new(Vec::new(), 3, (8, 8));
        assert_eq!(sequence.push_allocation_config().unwrap(), Shape::spatial(3, 8, 8));
    }

    #[test]
    fn test_second_resolution_with_other_input_rejected() {
        let mut sequence = ConvolutionalSequence::new(vec![stage(0, 6)], 1, (28, 28));
        let first = sequence.push_allocation_config().unwrap();
        assert_eq!(sequence.push_allocation_config().unwrap(), first);

        let err = sequence.resolve_shape(Shape::spatial(1, 32, 32)).unwrap_err();
        assert!(matches!(err, ShapeError::AlreadyResolved { .. }));
    }

    #[test]
    fn test_stage_error_carries_index() {
        let valid = |i| {
            ConvolutionalLayer::new(
                format!("conv_pool_{i}"),
                ActivationType::ReLU,
                (5, 5),
                4,
                (2, 2),
                (1, 1),
                BorderMode::Valid,
            )
        };
        // 12 -> 8 -> 4 -> 0
        let mut sequence = ConvolutionalSequence::new(vec![valid(0), valid(1)], 1, (12, 12));
        let err = sequence.push_allocation_config().unwrap_err();

        match err {
            ShapeError::Stage { stage, source } => {
                assert_eq!(stage, 1);
                assert!(matches!(*source, ShapeError::NonPositiveDimension { dim: 0, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(sequence.output_shape().is_none());
    }
}
