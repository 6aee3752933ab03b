use ndarray::{Array2, Axis};

use crate::error::{NetworkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loss {
    /// `-ln p[target]` averaged over the batch, for softmax outputs.
    #[default]
    CategoricalCrossEntropy,
}

impl Loss {
    pub fn calculate(&self, prediction: &Array2<f32>, targets: &[u8]) -> Result<f32> {
        check_targets(prediction, targets)?;
        match self {
            Loss::CategoricalCrossEntropy => {
                // Add small epsilon to avoid log(0)
                let epsilon = 1e-7;
                let total: f32 = prediction
                    .outer_iter()
                    .zip(targets)
                    .map(|(row, &target)| -row[target as usize].clamp(epsilon, 1.0).ln())
                    .sum();
                Ok(total / targets.len().max(1) as f32)
            }
        }
    }

    /// Gradient of the batch cost with respect to the softmax input.
    pub fn gradient(&self, prediction: &Array2<f32>, targets: &[u8]) -> Result<Array2<f32>> {
        check_targets(prediction, targets)?;
        match self {
            Loss::CategoricalCrossEntropy => {
                let batch_size = targets.len().max(1) as f32;
                let mut grad = prediction.clone();
                for (mut row, &target) in grad.outer_iter_mut().zip(targets) {
                    row[target as usize] -= 1.0;
                }
                Ok(grad / batch_size)
            }
        }
    }
}

/// One target per row, each a valid column index.
fn check_targets(prediction: &Array2<f32>, targets: &[u8]) -> Result<()> {
    let (rows, classes) = prediction.dim();
    if rows != targets.len() {
        return Err(NetworkError::InvalidData(format!(
            "{rows} predictions but {} targets",
            targets.len()
        )));
    }
    if let Some(&bad) = targets.iter().find(|&&t| t as usize >= classes) {
        return Err(NetworkError::InvalidData(format!(
            "target {bad} is out of range for {classes} classes"
        )));
    }
    Ok(())
}

/// Index of the largest entry in every row.
pub fn predictions(prediction: &Array2<f32>) -> Vec<usize> {
    prediction
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                .0
        })
        .collect()
}

/// Fraction of examples whose most probable class is not the target.
pub fn misclassification_rate(prediction: &Array2<f32>, targets: &[u8]) -> f32 {
    if targets.is_empty() {
        return 0.0;
    }
    let wrong = predictions(prediction)
        .into_iter()
        .zip(targets)
        .filter(|&(predicted, &target)| predicted != target as usize)
        .count();
    wrong as f32 / targets.len() as f32
}
