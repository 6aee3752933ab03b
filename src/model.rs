use ndarray::{Array2, Array4, ArrayD, Ix2};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::activation::ActivationType;
use crate::error::{NetworkError, Result, ShapeError};
use crate::initialization::{Initializer, ParameterInit};
use crate::layers::{
    check_input, ConvolutionalLayer, ConvolutionalSequence, Flattener, Layer, Mlp, Parameter, ParameterRecord,
};
use crate::shape::{BorderMode, Shape};

/// Architecture of a LeNet-style network: convolution/pooling stages
/// followed by a fully-connected head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeNetConfig {
    /// Activation of each feature-extraction stage.
    pub conv_activations: Vec<ActivationType>,
    /// Number of channels in the input image.
    pub num_channels: usize,
    /// Input image (height, width).
    pub image_shape: (usize, usize),
    /// Filter (height, width) of each stage.
    pub filter_sizes: Vec<(usize, usize)>,
    /// Number of filters of each stage.
    pub feature_maps: Vec<usize>,
    /// Max-pooling (height, width) of each stage.
    pub pooling_sizes: Vec<(usize, usize)>,
    pub top_mlp_activations: Vec<ActivationType>,
    /// Hidden widths of the head; the last entry is the number of classes.
    pub top_mlp_dims: Vec<usize>,
    /// Convolution step shared by every stage.
    #[serde(default = "default_conv_step")]
    pub conv_step: (usize, usize),
    /// Border mode shared by every stage.
    #[serde(default)]
    pub border_mode: BorderMode,
}

fn default_conv_step() -> (usize, usize) {
    (1, 1)
}

impl LeNetConfig {
    /// The MNIST network: ReLU stages with square filters and pooling,
    /// "full" borders, a ReLU head and a softmax over 10 classes.
    pub fn mnist(feature_maps: Vec<usize>, mlp_hiddens: Vec<usize>, conv_sizes: Vec<usize>, pool_sizes: Vec<usize>) -> Self {
        let conv_activations = vec![ActivationType::ReLU; feature_maps.len()];
        let mut top_mlp_activations = vec![ActivationType::ReLU; mlp_hiddens.len()];
        top_mlp_activations.push(ActivationType::Softmax);
        let mut top_mlp_dims = mlp_hiddens;
        top_mlp_dims.push(10);

        LeNetConfig {
            conv_activations,
            num_channels: 1,
            image_shape: (28, 28),
            filter_sizes: conv_sizes.into_iter().map(|s| (s, s)).collect(),
            feature_maps,
            pooling_sizes: pool_sizes.into_iter().map(|s| (s, s)).collect(),
            top_mlp_activations,
            top_mlp_dims,
            conv_step: default_conv_step(),
            border_mode: BorderMode::Full,
        }
    }

    pub fn output_dim(&self) -> usize {
        self.top_mlp_dims.last().copied().unwrap_or(0)
    }

    /// Changes the number of classes. Zero is rejected like any other
    /// empty extent.
    pub fn set_output_dim(&mut self, value: usize) -> std::result::Result<(), ShapeError> {
        if value == 0 {
            return Err(ShapeError::ZeroExtent {
                layer: "mlp".to_string(),
                what: "output width",
            });
        }
        let last = self.top_mlp_dims.last_mut().ok_or(ShapeError::EmptyHead)?;
        *last = value;
        Ok(())
    }

    pub fn input_shape(&self) -> Shape {
        Shape::spatial(self.num_channels, self.image_shape.0, self.image_shape.1)
    }

    /// Feature-extraction lists must line up one entry per stage.
    fn check_stage_lists(&self) -> std::result::Result<(), ShapeError> {
        let n = self.conv_activations.len();
        if self.filter_sizes.len() != n || self.feature_maps.len() != n || self.pooling_sizes.len() != n {
            return Err(ShapeError::LengthMismatch {
                activations: n,
                filter_sizes: self.filter_sizes.len(),
                feature_maps: self.feature_maps.len(),
                pooling_sizes: self.pooling_sizes.len(),
            });
        }
        let input = self.input_shape();
        if input.size() == 0 {
            return Err(ShapeError::ZeroExtent {
                layer: "input".to_string(),
                what: "input shape",
            });
        }
        Ok(())
    }
}

impl Default for LeNetConfig {
    fn default() -> Self {
        LeNetConfig::mnist(vec![6, 16], vec![120, 84], vec![5, 5], vec![2, 2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configured,
    Resolved,
    Initialized,
}

/// LeNet convolutional network: a convolutional sequence, a flattener and
/// an MLP on top.
///
/// Shapes are propagated once by [`LeNet::resolve_shapes`] and parameters
/// are then allocated by [`LeNet::initialize_parameters`]; both must run,
/// in that order, before [`LeNet::apply`].
#[derive(Debug, Clone)]
pub struct LeNet {
    config: LeNetConfig,
    conv_sequence: ConvolutionalSequence,
    flattener: Flattener,
    top_mlp: Mlp,
    state: Lifecycle,
}

impl LeNet {
    pub fn new(config: LeNetConfig) -> Result<Self> {
        config.check_stage_lists()?;

        let params = config
            .conv_activations
            .iter()
            .zip(&config.filter_sizes)
            .zip(&config.feature_maps)
            .zip(&config.pooling_sizes);

        // Construct convolutional layers with corresponding parameters
        let layers = params
            .enumerate()
            .map(|(i, (((&activation, &filter_size), &num_filters), &pooling_size))| {
                ConvolutionalLayer::new(
                    format!("conv_pool_{i}"),
                    activation,
                    filter_size,
                    num_filters,
                    pooling_size,
                    config.conv_step,
                    config.border_mode,
                )
            })
            .collect();
        let conv_sequence = ConvolutionalSequence::new(layers, config.num_channels, config.image_shape);
        let top_mlp = Mlp::new(config.top_mlp_activations.clone(), config.top_mlp_dims.clone())?;

        Ok(LeNet {
            config,
            conv_sequence,
            flattener: Flattener::new(),
            top_mlp,
            state: Lifecycle::Configured,
        })
    }

    pub fn config(&self) -> &LeNetConfig {
        &self.config
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim()
    }

    /// Changes the number of classes. Once shapes are resolved this drops
    /// the last head layer's parameters, so `initialize_parameters` must run
    /// again before `apply`.
    pub fn set_output_dim(&mut self, value: usize) -> std::result::Result<(), ShapeError> {
        self.config.set_output_dim(value)?;
        self.top_mlp.set_output_dim(value)?;
        if self.state == Lifecycle::Initialized {
            self.state = Lifecycle::Resolved;
        }
        Ok(())
    }

    pub fn input_shape(&self) -> Shape {
        self.config.input_shape()
    }

    pub fn is_resolved(&self) -> bool {
        self.state != Lifecycle::Configured
    }

    pub fn is_initialized(&self) -> bool {
        self.state == Lifecycle::Initialized
    }

    /// Propagates shapes through every stage and sizes the head from the
    /// flattened feature maps. Calling it again is a no-op.
    pub fn resolve_shapes(&mut self) -> std::result::Result<Shape, ShapeError> {
        if self.state != Lifecycle::Configured {
            return self.top_mlp.output_shape().ok_or(ShapeError::Unresolved);
        }

        let conv_out = self.conv_sequence.push_allocation_config()?;
        let flat = self.flattener.resolve_shape(conv_out)?;
        let output = self.top_mlp.resolve_shape(flat)?;

        debug!(conv_output = %conv_out, head_dims = ?self.top_mlp.dims, "resolved LeNet shapes");
        self.state = Lifecycle::Resolved;
        Ok(output)
    }

    /// Number of features entering the head.
    pub fn flattened_dim(&self) -> std::result::Result<usize, ShapeError> {
        if self.state == Lifecycle::Configured {
            return Err(ShapeError::Unresolved);
        }
        self.flattener
            .output_shape()
            .map(|shape| shape.size())
            .ok_or(ShapeError::Unresolved)
    }

    pub fn conv_output_shape(&self) -> Option<Shape> {
        self.conv_sequence.output_shape()
    }

    /// Widths of the head, starting with the flattened feature count.
    pub fn head_dims(&self) -> &[usize] {
        &self.top_mlp.dims
    }

    pub fn initialize_parameters(&mut self, init: &ParameterInit, rng: &mut dyn RngCore) -> Result<()> {
        if self.state == Lifecycle::Configured {
            return Err(ShapeError::Unresolved.into());
        }
        for layer in self.pipeline_mut() {
            layer.initialize(init, rng)?;
        }
        self.state = Lifecycle::Initialized;
        info!(parameters = self.parameter_count(), "initialized LeNet parameters");
        Ok(())
    }

    fn pipeline_mut(&mut self) -> [&mut dyn Layer; 3] {
        [&mut self.conv_sequence, &mut self.flattener, &mut self.top_mlp]
    }

    /// Maps a `(batch, channels, height, width)` batch to class probabilities.
    pub fn apply(&mut self, features: &Array4<f32>) -> Result<Array2<f32>> {
        if self.state != Lifecycle::Initialized {
            return Err(ShapeError::Uninitialized.into());
        }
        let mut x: ArrayD<f32> = features.clone().into_dyn();
        check_input(self.input_shape(), &x)?;

        for layer in self.pipeline_mut() {
            x = layer.forward(&x)?;
        }
        Ok(x.into_dimensionality::<Ix2>()?)
    }

    /// Backpropagates the gradient of the cost with respect to the input of
    /// the final softmax, accumulating parameter gradients.
    pub fn backward(&mut self, grad_output: &Array2<f32>) -> Result<()> {
        if self.state != Lifecycle::Initialized {
            return Err(ShapeError::Uninitialized.into());
        }
        let mut grad = grad_output.clone().into_dyn();
        for layer in self.pipeline_mut().into_iter().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(())
    }

    pub fn zero_grads(&mut self) {
        for layer in self.pipeline_mut() {
            layer.zero_grads();
        }
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.conv_sequence.parameters();
        params.extend(self.top_mlp.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.conv_sequence.parameters_mut();
        params.extend(self.top_mlp.parameters_mut());
        params
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }

    pub fn record(&self) -> Vec<ParameterRecord> {
        self.parameters().iter().map(|p| p.record()).collect()
    }

    /// Overwrites every parameter with the record of the same name.
    pub fn load_record(&mut self, records: &[ParameterRecord]) -> Result<()> {
        if self.state != Lifecycle::Initialized {
            return Err(ShapeError::Uninitialized.into());
        }
        for param in self.parameters_mut() {
            let record = records
                .iter()
                .find(|r| r.name == param.name)
                .ok_or_else(|| NetworkError::RecordMismatch(format!("no values for {}", param.name)))?;
            param.load_record(record)?;
        }
        Ok(())
    }

    /// Rebuilds a network from its configuration and saved parameters.
    pub fn from_record(config: LeNetConfig, records: &[ParameterRecord]) -> Result<Self> {
        let mut model = LeNet::new(config)?;
        model.resolve_shapes()?;
        let zeros = ParameterInit::new(Initializer::Constant(0.0), Initializer::Constant(0.0));
        model.initialize_parameters(&zeros, &mut StdRng::seed_from_u64(0))?;
        model.load_record(records)?;
        Ok(model)
    }
}
