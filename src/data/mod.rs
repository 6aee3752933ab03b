pub mod mnist;
pub mod stream;

use ndarray::{Array4, Axis};

use crate::error::{NetworkError, Result};

pub use stream::{DataStream, IterationScheme};

/// Images in `(examples, channels, height, width)` layout with one label
/// per example. Pixels keep their raw 0-255 range.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: Array4<f32>,
    labels: Vec<u8>,
}

impl Dataset {
    pub fn new(images: Array4<f32>, labels: Vec<u8>) -> Result<Self> {
        if images.len_of(Axis(0)) != labels.len() {
            return Err(NetworkError::InvalidData(format!(
                "{} images but {} labels",
                images.len_of(Axis(0)),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn num_examples(&self) -> usize {
        self.labels.len()
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            features: self.images.select(Axis(0), indices),
            targets: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Array4<f32>,
    pub targets: Vec<u8>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Maps raw pixels to roughly `[-0.5, 0.5)`.
pub fn normalize(features: &Array4<f32>) -> Array4<f32> {
    features.mapv(|x| x / 256.0 - 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_rejected() {
        let images = Array4::zeros((3, 1, 2, 2));
        assert!(Dataset::new(images, vec![0, 1]).is_err());
    }

    #[test]
    fn test_batch_selects_examples() {
        let images = Array4::from_shape_fn((4, 1, 1, 1), |(i, _, _, _)| i as f32);
        let dataset = Dataset::new(images, vec![10, 11, 12, 13]).unwrap();

        let batch = dataset.batch(&[3, 1]);
        assert_eq!(batch.targets, vec![13, 11]);
        assert_eq!(batch.features[[0, 0, 0, 0]], 3.0);
        assert_eq!(batch.features[[1, 0, 0, 0]], 1.0);
    }

    #[test]
    fn test_normalize_range() {
        let images = Array4::from_shape_fn((1, 1, 1, 2), |(_, _, _, j)| if j == 0 { 0.0 } else { 255.0 });
        let normalized = normalize(&images);
        assert_eq!(normalized[[0, 0, 0, 0]], -0.5);
        assert!(normalized[[0, 0, 0, 1]] < 0.5);
    }
}
