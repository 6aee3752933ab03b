use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    Sigmoid,
    ReLU,
    Tanh,
    Linear,
    /// Normalizes the last axis into a probability distribution.
    Softmax,
}

impl ActivationType {
    /// Applies the activation function to a given input
    ///
    /// Softmax is not elementwise; applied to a single value it is the
    /// identity. Use [`ActivationType::forward`] for arrays.
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationType::ReLU => x.max(0.0),
            ActivationType::Tanh => x.tanh(),
            ActivationType::Linear | ActivationType::Softmax => x,
        }
    }

    /// Computes the derivative of the activation function at the
    /// pre-activation value `x`
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => {
                let sigmoid = 1.0 / (1.0 + (-x).exp());
                sigmoid * (1.0 - sigmoid)
            }
            ActivationType::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationType::Tanh => 1.0 - x.tanh().powi(2),
            ActivationType::Linear | ActivationType::Softmax => 1.0,
        }
    }

    pub fn forward(&self, mut input: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            ActivationType::Softmax => {
                let last = Axis(input.ndim().saturating_sub(1));
                for mut lane in input.lanes_mut(last) {
                    let max = lane.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
                    lane.mapv_inplace(|x| (x - max).exp());
                    let sum = lane.sum();
                    lane.mapv_inplace(|x| x / sum);
                }
                input
            }
            _ => {
                input.mapv_inplace(|x| self.apply(x));
                input
            }
        }
    }

    /// Multiplies an upstream gradient by the activation derivative at the
    /// cached pre-activations.
    ///
    /// Softmax passes the gradient through: it is only used as the output of
    /// a network trained with categorical cross-entropy, whose gradient is
    /// taken with respect to the softmax input.
    pub fn backward(&self, grad_output: &ArrayD<f32>, preactivation: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            ActivationType::Softmax | ActivationType::Linear => grad_output.clone(),
            _ => grad_output * &preactivation.mapv(|x| self.derivative(x)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::f32::EPSILON;

    #[test]
    fn test_scalar_apply_and_derivative() {
        let cases = [
            (ActivationType::Sigmoid, 0.0, 0.5, 0.25),
            (ActivationType::ReLU, -1.0, 0.0, 0.0),
            (ActivationType::ReLU, 2.0, 2.0, 1.0),
            (ActivationType::Tanh, 0.0, 0.0, 1.0),
            (ActivationType::Linear, 5.0, 5.0, 1.0),
            (ActivationType::Softmax, -3.0, -3.0, 1.0),
        ];
        for (activation, x, value, slope) in cases {
            assert_abs_diff_eq!(activation.apply(x), value, epsilon = EPSILON);
            assert_abs_diff_eq!(activation.derivative(x), slope, epsilon = EPSILON);
        }
    }

    #[test]
    fn test_softmax_backward_passes_gradient_through() {
        let grad = array![[0.5_f32, -0.5], [1.0, 0.0]].into_dyn();
        let pre = array![[3.0_f32, -2.0], [0.0, 7.0]].into_dyn();
        assert_eq!(ActivationType::Softmax.backward(&grad, &pre), grad);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits = array![[1.0_f32, 2.0, 3.0], [1000.0, 1000.0, 1000.0]].into_dyn();
        let probs = ActivationType::Softmax.forward(logits);

        for row in probs.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(probs[[1, 0]], 1.0 / 3.0, epsilon = 1e-6);
        assert!(probs[[0, 2]] > probs[[0, 1]]);
    }

    #[test]
    fn test_relu_backward_masks_gradient() {
        let grad = array![[1.0_f32, 1.0], [2.0, 2.0]].into_dyn();
        let pre = array![[-1.0_f32, 3.0], [0.5, -0.5]].into_dyn();
        let out = ActivationType::ReLU.backward(&grad, &pre);
        assert_eq!(out, array![[0.0_f32, 1.0], [2.0, 0.0]].into_dyn());
    }

    #[test]
    fn test_serde_names() {
        let parsed: ActivationType = serde_json::from_str("\"relu\"").unwrap();
        assert_eq!(parsed, ActivationType::ReLU);
        assert_eq!(serde_json::to_string(&ActivationType::Softmax).unwrap(), "\"softmax\"");
    }
}
