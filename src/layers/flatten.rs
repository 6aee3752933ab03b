use ndarray::{ArrayD, Axis, IxDyn};

use super::Layer;
use crate::error::{Result, ShapeError};
use crate::shape::Shape;

/// Flattens `(batch, ...)` into `(batch, features)`. Stateless apart from the
/// shape it remembers for the backward pass.
#[derive(Debug, Clone, Default)]
pub struct Flattener {
    input_shape: Option<Shape>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Flattener {
    fn name(&self) -> &str {
        "flattener"
    }

    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        self.input_shape = Some(input);
        Ok(Shape::Flat(input.size()))
    }

    fn output_shape(&self) -> Option<Shape> {
        self.input_shape.map(|shape| Shape::Flat(shape.size()))
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let batch_size = input.len_of(Axis(0));
        let features: usize = input.shape()[1..].iter().product();
        let flat = input.to_shape(IxDyn(&[batch_size, features]))?;
        Ok(flat.into_owned())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self.input_shape.ok_or(ShapeError::Unresolved)?;
        let batch_size = grad_output.len_of(Axis(0));
        let grad = grad_output.to_shape(IxDyn(&shape.batch_dims(batch_size)))?;
        Ok(grad.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_round_trip_shapes() {
        let mut flattener = Flattener::new();
        assert_eq!(flattener.resolve_shape(Shape::spatial(2, 3, 4)).unwrap(), Shape::Flat(24));

        let input = ArrayD::from_elem(vec![5, 2, 3, 4], 1.0_f32);
        let output = flattener.forward(&input).unwrap();
        assert_eq!(output.shape(), &[5, 24]);

        let grad = flattener.backward(&output).unwrap();
        assert_eq!(grad.shape(), &[5, 2, 3, 4]);
    }
}
