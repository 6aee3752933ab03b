use crate::activation::ActivationType;
use crate::error::{Result, ShapeError};
use crate::initialization::ParameterInit;
use crate::layers::{check_input, Layer, Parameter};
use crate::shape::{conv_output_dim, BorderMode, Shape, SpatialAxis};
use ndarray::{s, Array2, Array3, Array4, ArrayD, ArrayView3, Axis, Ix4};
use rand::RngCore;

/// 2D convolution followed by an elementwise activation.
///
/// The input channel count and spatial size are unknown until
/// `resolve_shape`; weights are `(filters, channels, kernel_h, kernel_w)`.
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    name: String,
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub border_mode: BorderMode,
    pub activation: ActivationType,
    pub input_shape: Option<(usize, usize, usize)>, // (channels, height, width)
    pub output_shape: Option<(usize, usize, usize)>,
    weights: Parameter,
    bias: Parameter,
    cached_cols: Vec<Array2<f32>>,
    preactivation_cache: Option<ArrayD<f32>>,
}

impl Conv2DLayer {
    pub fn new(
        name: impl Into<String>,
        filters: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        border_mode: BorderMode,
        activation: ActivationType,
    ) -> Self {
        let name = name.into();
        Conv2DLayer {
            weights: Parameter::unallocated(format!("{name}.W")),
            bias: Parameter::unallocated(format!("{name}.b")),
            name,
            filters,
            kernel_size,
            stride,
            border_mode,
            activation,
            input_shape: None,
            output_shape: None,
            cached_cols: Vec::new(),
            preactivation_cache: None,
        }
    }

    fn padding(&self) -> (usize, usize) {
        (
            self.border_mode.padding(self.kernel_size.0),
            self.border_mode.padding(self.kernel_size.1),
        )
    }

    fn resolved(&self) -> std::result::Result<((usize, usize, usize), (usize, usize, usize)), ShapeError> {
        match (self.input_shape, self.output_shape) {
            (Some(input), Some(output)) => Ok((input, output)),
            _ => Err(ShapeError::Unresolved),
        }
    }

    /// Unrolls every receptive field of one example into a column.
    fn im2col(&self, image: ArrayView3<f32>, output_hw: (usize, usize)) -> Array2<f32> {
        let (channels, height, width) = image.dim();
        let (kernel_h, kernel_w) = self.kernel_size;
        let (pad_h, pad_w) = self.padding();
        let (output_h, output_w) = output_hw;

        let mut cols = Array2::zeros((channels * kernel_h * kernel_w, output_h * output_w));
        for c in 0..channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (c * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..output_h {
                        let ih = (oh * self.stride.0 + kh) as isize - pad_h as isize;
                        if ih < 0 || ih >= height as isize {
                            continue;
                        }
                        for ow in 0..output_w {
                            let iw = (ow * self.stride.1 + kw) as isize - pad_w as isize;
                            if iw < 0 || iw >= width as isize {
                                continue;
                            }
                            cols[[row, oh * output_w + ow]] = image[[c, ih as usize, iw as usize]];
                        }
                    }
                }
            }
        }
        cols
    }

    /// Inverse of `im2col`: scatters column gradients back onto the input,
    /// summing overlapping receptive fields.
    fn col2im(&self, cols: &Array2<f32>, input: (usize, usize, usize), output_hw: (usize, usize)) -> Array3<f32> {
        let (channels, height, width) = input;
        let (kernel_h, kernel_w) = self.kernel_size;
        let (pad_h, pad_w) = self.padding();
        let (output_h, output_w) = output_hw;

        let mut image = Array3::zeros((channels, height, width));
        for c in 0..channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (c * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..output_h {
                        let ih = (oh * self.stride.0 + kh) as isize - pad_h as isize;
                        if ih < 0 || ih >= height as isize {
                            continue;
                        }
                        for ow in 0..output_w {
                            let iw = (ow * self.stride.1 + kw) as isize - pad_w as isize;
                            if iw < 0 || iw >= width as isize {
                                continue;
                            }
                            image[[c, ih as usize, iw as usize]] += cols[[row, oh * output_w + ow]];
                        }
                    }
                }
            }
        }
        image
    }
}

impl Layer for Conv2DLayer {
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
        if self.filters == 0 {
            return Err(ShapeError::ZeroExtent {
                layer: self.name.clone(),
                what: "number of filters",
            });
        }

        let output_height = conv_output_dim(
            &self.name,
            SpatialAxis::Height,
            height,
            self.kernel_size.0,
            self.stride.0,
            self.border_mode,
        )?;
        let output_width = conv_output_dim(
            &self.name,
            SpatialAxis::Width,
            width,
            self.kernel_size.1,
            self.stride.1,
            self.border_mode,
        )?;

        self.input_shape = Some((channels, height, width));
        self.output_shape = Some((self.filters, output_height, output_width));
        Ok(Shape::spatial(self.filters, output_height, output_width))
    }

    fn output_shape(&self) -> Option<Shape> {
        self.output_shape.map(|(c, h, w)| Shape::spatial(c, h, w))
    }

    fn initialize(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        let ((channels, _, _), _) = self.resolved()?;
        let (kernel_h, kernel_w) = self.kernel_size;

        let weights = init.weights.generate(&[self.filters, channels, kernel_h, kernel_w], rng)?;
        let bias = init.biases.generate(&[self.filters], rng)?;
        self.weights = Parameter::from_value(self.weights.name.clone(), weights);
        self.bias = Parameter::from_value(self.bias.name.clone(), bias);
        Ok(())
    }

    fn forward(&mut self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let ((channels, height, width), (filters, output_h, output_w)) = self.resolved()?;
        if !self.weights.is_allocated() {
            return Err(ShapeError::Uninitialized.into());
        }
        check_input(Shape::spatial(channels, height, width), input)?;

        let input = input.view().into_dimensionality::<Ix4>()?;
        let batch_size = input.len_of(Axis(0));
        let fan_in = channels * self.kernel_size.0 * self.kernel_size.1;
        let kernel = self.weights.value.view().into_shape_with_order((filters, fan_in))?;
        let bias = self.bias.value.view().into_shape_with_order((filters, 1))?;

        let mut output = Array4::<f32>::zeros((batch_size, filters, output_h, output_w));
        self.cached_cols.clear();
        for (i, image) in input.outer_iter().enumerate() {
            let cols = self.im2col(image, (output_h, output_w));

            // Convolution as matrix multiplication
            let mut out = kernel.dot(&cols);
            out += &bias;
            output
                .slice_mut(s![i, .., .., ..])
                .assign(&out.into_shape_with_order((filters, output_h, output_w))?);
            self.cached_cols.push(cols);
        }

        let output = output.into_dyn();
        self.preactivation_cache = Some(output.clone());
        Ok(self.activation.forward(output))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let (input_shape, (filters, output_h, output_w)) = self.resolved()?;
        let Some(preactivation) = self.preactivation_cache.as_ref() else {
            return Err(ShapeError::Uninitialized.into());
        };

        let dz = self.activation.backward(grad_output, preactivation);
        let dz = dz.into_dimensionality::<Ix4>()?;
        let fan_in = input_shape.0 * self.kernel_size.0 * self.kernel_size.1;
        let kernel = self.weights.value.view().into_shape_with_order((filters, fan_in))?;

        let (channels, height, width) = input_shape;
        let mut grad_input = Array4::<f32>::zeros((dz.len_of(Axis(0)), channels, height, width));
        let mut weight_grads = Array2::<f32>::zeros((filters, fan_in));
        let mut bias_grads = ndarray::Array1::<f32>::zeros(filters);

        for (i, cols) in self.cached_cols.iter().enumerate() {
            let dy = dz.slice(s![i, .., .., ..]);
            let dy = dy.to_shape((filters, output_h * output_w))?;

            weight_grads = weight_grads + dy.dot(&cols.t());
            bias_grads = bias_grads + dy.sum_axis(Axis(1));

            let dcols = kernel.t().dot(&dy);
            grad_input
                .slice_mut(s![i, .., .., ..])
                .assign(&self.col2im(&dcols, input_shape, (output_h, output_w)));
        }

        self.weights.grad += &weight_grads.into_shape_with_order(self.weights.value.raw_dim())?;
        self.bias.grad += &bias_grads.into_dyn();
        Ok(grad_input.into_dyn())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weights, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weights, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::Initializer;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ones_layer(border: BorderMode) -> Conv2DLayer {
        let mut layer = Conv2DLayer::new("conv", 1, (2, 2), (1, 1), border, ActivationType::Linear);
        layer.resolve_shape(Shape::spatial(1, 3, 3)).unwrap();
        let init = ParameterInit::new(Initializer::Constant(1.0), Initializer::Constant(0.0));
        layer.initialize(&init, &mut StdRng::seed_from_u64(0)).unwrap();
        layer
    }

    #[test]
    fn test_valid_convolution_sums_windows() {
        let mut layer = ones_layer(BorderMode::Valid);
        let input = Array::from_iter((1..=9).map(|v| v as f32))
            .into_shape_with_order((1, 1, 3, 3))
            .unwrap()
            .into_dyn();

        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 2, 2]);
        // [1 2 3; 4 5 6; 7 8 9] with a 2x2 box filter
        assert_eq!(output.iter().copied().collect::<Vec<_>>(), vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn test_full_convolution_pads_edges() {
        let mut layer = ones_layer(BorderMode::Full);
        let input = ArrayD::from_elem(vec![1, 1, 3, 3], 1.0_f32);

        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 1, 4, 4]);
        assert_eq!(output[[0, 0, 0, 0]], 1.0);
        assert_eq!(output[[0, 0, 1, 1]], 4.0);
        assert_eq!(output[[0, 0, 0, 1]], 2.0);
    }

    #[test]
    fn test_backward_counts_window_coverage() {
        let mut layer = ones_layer(BorderMode::Valid);
        let input = ArrayD::from_elem(vec![1, 1, 3, 3], 1.0_f32);
        layer.forward(&input).unwrap();

        let grad = layer.backward(&ArrayD::from_elem(vec![1, 1, 2, 2], 1.0)).unwrap();
        // Each input pixel receives one unit per output window covering it.
        assert_eq!(grad[[0, 0, 0, 0]], 1.0);
        assert_eq!(grad[[0, 0, 1, 1]], 4.0);
        assert_eq!(grad[[0, 0, 0, 1]], 2.0);

        let params = layer.parameters();
        assert!(params[0].grad.iter().all(|&g| g == 4.0));
        assert_eq!(params[1].grad[[0]], 4.0);
    }

    #[test]
    fn test_forward_before_initialize_fails() {
        let mut layer = Conv2DLayer::new("conv", 2, (3, 3), (1, 1), BorderMode::Valid, ActivationType::ReLU);
        layer.resolve_shape(Shape::spatial(1, 5, 5)).unwrap();
        let input = ArrayD::zeros(vec![1, 1, 5, 5]);
        assert!(layer.forward(&input).is_err());
    }
}
