use ndarray::{Array4, ArrayD, Axis, Ix4};

use super::{check_input, Layer};
use crate::error::{Result, ShapeError};
use crate::shape::{pool_output_dim, Shape, SpatialAxis};

/// Non-overlapping max pooling. Windows that run past the bottom or right
/// border are pooled over their in-bounds part.
#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    name: String,
    pub pool_size: (usize, usize),
    pub input_shape: Option<(usize, usize, usize)>, // (channels, height, width)
    pub output_shape: Option<(usize, usize, usize)>,
    max_indices: Option<Array4<(usize, usize)>>,
}

impl MaxPoolLayer {
    pub fn new(name: impl Into<String>, pool_size: (usize, usize)) -> Self {
        MaxPoolLayer {
            name: name.into(),
            pool_size,
            input_shape: None,
            output_shape: None,
            max_indices: None,
        }
    }
}

impl Layer for MaxPoolLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_shape(&mut self, input: Shape) -> std::result::Result<Shape, ShapeError> {
        let Shape::Spatial {
            channels,
            height,
            width,
        } = input
        else {
            return Err(ShapeError::InputMismatch {
                expected: Shape::spatial(0, 0, 0),
                actual: input.dims(),
            });
        };

        let output_height = pool_output_dim(&self.name, SpatialAxis::Height, height, self.pool_size.0)?;
        let output_width = pool_output_dim(&self.name, SpatialAxis::Width, width, self.pool_size.1)?;

        self.input_shape = Some((channels, height, width));
        self.output_shape = Some((channels, output_height, output_width));
        Ok(Shape::spatial(channels, output_height, output_width))
    }

    fn output_shape(&self) -> Option<Shape> {
        self.output_shape.map(|(c, h, w)| Shape::spatial(c, h, w))
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (Some(input_shape), Some((channels, output_height, output_width))) =
            (self.input_shape, self.output_shape)
        else {
            return Err(ShapeError::Unresolved.into());
        };
        check_input(Shape::spatial(input_shape.0, input_shape.1, input_shape.2), input)?;

        let input = input.view().into_dimensionality::<Ix4>()?;
        let (batch_size, _, height, width) = input.dim();
        let (pool_h, pool_w) = self.pool_size;

        let mut output = Array4::<f32>::zeros((batch_size, channels, output_height, output_width));
        let mut max_indices =
            Array4::<(usize, usize)>::from_elem((batch_size, channels, output_height, output_width), (0, 0));

        for n in 0..batch_size {
            for c in 0..channels {
                for h in 0..output_height {
                    for w in 0..output_width {
                        let h_start = h * pool_h;
                        let w_start = w * pool_w;

                        let mut max_val = f32::NEG_INFINITY;
                        let mut argmax = (h_start, w_start);

                        // Find maximum in pooling window
                        for ih in h_start..(h_start + pool_h).min(height) {
                            for iw in w_start..(w_start + pool_w).min(width) {
                                let val = input[[n, c, ih, iw]];
                                if val > max_val {
                                    max_val = val;
                                    argmax = (ih, iw);
                                }
                            }
                        }

                        output[[n, c, h, w]] = max_val;
                        max_indices[[n, c, h, w]] = argmax;
                    }
                }
            }
        }

        self.max_indices = Some(max_indices);
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (Some((channels, height, width)), Some(max_indices)) =
            (self.input_shape, self.max_indices.as_ref())
        else {
            return Err(ShapeError::Unresolved.into());
        };

        let grad_output = grad_output.view().into_dimensionality::<Ix4>()?;
        let batch_size = grad_output.len_of(Axis(0));
        let mut input_gradient = Array4::<f32>::zeros((batch_size, channels, height, width));

        for ((n, c, h, w), &(ih, iw)) in max_indices.indexed_iter() {
            input_gradient[[n, c, ih, iw]] += grad_output[[n, c, h, w]];
        }

        Ok(input_gradient.into_dyn())
    }
}
