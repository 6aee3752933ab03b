use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Per-example shape of the data flowing between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

impl Shape {
    pub fn spatial(channels: usize, height: usize, width: usize) -> Self {
        Shape::Spatial {
            channels,
            height,
            width,
        }
    }

    /// Number of scalars per example.
    pub fn size(&self) -> usize {
        match *self {
            Shape::Spatial {
                channels,
                height,
                width,
            } => channels * height * width,
            Shape::Flat(n) => n,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match *self {
            Shape::Spatial {
                channels,
                height,
                width,
            } => vec![channels, height, width],
            Shape::Flat(n) => vec![n],
        }
    }

    /// Shape of a batch of `batch_size` examples.
    pub fn batch_dims(&self, batch_size: usize) -> Vec<usize> {
        let mut dims = vec![batch_size];
        dims.extend(self.dims());
        dims
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Spatial {
                channels,
                height,
                width,
            } => write!(f, "{channels}x{height}x{width}"),
            Shape::Flat(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialAxis {
    Height,
    Width,
}

impl fmt::Display for SpatialAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialAxis::Height => f.write_str("height"),
            SpatialAxis::Width => f.write_str("width"),
        }
    }
}

/// Edge handling of a sliding-window transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderMode {
    /// The kernel stays inside the input.
    #[default]
    Valid,
    /// The input is zero-padded by `kernel - 1` on every side, so the kernel
    /// touches each input position at every offset.
    Full,
}

impl BorderMode {
    pub fn padding(&self, kernel: usize) -> usize {
        match self {
            BorderMode::Valid => 0,
            BorderMode::Full => kernel.saturating_sub(1),
        }
    }
}

/// Output extent of a convolution along one axis.
pub fn conv_output_dim(
    layer: &str,
    axis: SpatialAxis,
    input: usize,
    kernel: usize,
    stride: usize,
    border: BorderMode,
) -> Result<usize, ShapeError> {
    if kernel == 0 {
        return Err(ShapeError::ZeroExtent {
            layer: layer.to_string(),
            what: "filter size",
        });
    }
    if stride == 0 {
        return Err(ShapeError::ZeroExtent {
            layer: layer.to_string(),
            what: "convolution step",
        });
    }

    let padding = border.padding(kernel) as i64;
    let span = input as i64 + 2 * padding - kernel as i64;
    if span < 0 {
        return Err(ShapeError::NonPositiveDimension {
            layer: layer.to_string(),
            axis,
            dim: span.div_euclid(stride as i64) + 1,
        });
    }

    let span = span as usize;
    if span % stride != 0 {
        return Err(ShapeError::FractionalDimension {
            layer: layer.to_string(),
            axis,
            extent: span,
            stride,
        });
    }
    Ok(span / stride + 1)
}

/// Output extent of non-overlapping pooling along one axis. A window that
/// runs past the border is pooled over its in-bounds part.
pub fn pool_output_dim(
    layer: &str,
    axis: SpatialAxis,
    input: usize,
    pool: usize,
) -> Result<usize, ShapeError> {
    if pool == 0 {
        return Err(ShapeError::ZeroExtent {
            layer: layer.to_string(),
            what: "pooling size",
        });
    }
    if input == 0 {
        return Err(ShapeError::NonPositiveDimension {
            layer: layer.to_string(),
            axis,
            dim: 0,
        });
    }
    Ok(input.div_ceil(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_border_grows_output() {
        let dim = conv_output_dim("c", SpatialAxis::Height, 28, 5, 1, BorderMode::Full).unwrap();
        assert_eq!(dim, 32);
    }

    #[test]
    fn test_valid_border_shrinks_output() {
        let dim = conv_output_dim("c", SpatialAxis::Width, 28, 5, 1, BorderMode::Valid).unwrap();
        assert_eq!(dim, 24);
    }

    #[test]
    fn test_strided_convolution() {
        let dim = conv_output_dim("c", SpatialAxis::Width, 28, 4, 2, BorderMode::Valid).unwrap();
        assert_eq!(dim, 13);
    }

    #[test]
    fn test_kernel_larger_than_input() {
        let err = conv_output_dim("c", SpatialAxis::Height, 3, 5, 1, BorderMode::Valid).unwrap_err();
        assert_eq!(
            err,
            ShapeError::NonPositiveDimension {
                layer: "c".to_string(),
                axis: SpatialAxis::Height,
                dim: -1,
            }
        );
    }

    #[test]
    fn test_fractional_stride() {
        let err = conv_output_dim("c", SpatialAxis::Width, 28, 5, 2, BorderMode::Valid).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::FractionalDimension { extent: 23, stride: 2, .. }
        ));
    }

    #[test]
    fn test_pooling_keeps_partial_windows() {
        assert_eq!(pool_output_dim("p", SpatialAxis::Height, 32, 2).unwrap(), 16);
        assert_eq!(pool_output_dim("p", SpatialAxis::Height, 5, 2).unwrap(), 3);
        assert_eq!(pool_output_dim("p", SpatialAxis::Height, 1, 3).unwrap(), 1);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(pool_output_dim("p", SpatialAxis::Height, 0, 2).is_err());
        assert!(pool_output_dim("p", SpatialAxis::Height, 4, 0).is_err());
        assert!(conv_output_dim("c", SpatialAxis::Height, 4, 0, 1, BorderMode::Full).is_err());
        assert!(conv_output_dim("c", SpatialAxis::Height, 4, 2, 0, BorderMode::Full).is_err());
    }

    #[test]
    fn test_shape_size() {
        assert_eq!(Shape::spatial(16, 10, 10).size(), 1600);
        assert_eq!(Shape::Flat(84).size(), 84);
        assert_eq!(Shape::spatial(1, 28, 28).batch_dims(4), vec![4, 1, 28, 28]);
    }
}
