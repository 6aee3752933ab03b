use serde::{Deserialize, Serialize};

use crate::data::{normalize, Batch};
use crate::error::Result;
use crate::layers::Parameter;
use crate::loss::{misclassification_rate, Loss};
use crate::model::LeNet;

/// How a gradient is turned into a parameter step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRule {
    /// `step = learning_rate * gradient`
    Scale { learning_rate: f32 },
}

impl StepRule {
    pub fn apply(&self, param: &mut Parameter) {
        match *self {
            StepRule::Scale { learning_rate } => param.value.scaled_add(-learning_rate, &param.grad),
        }
    }
}

/// Values computed while training on one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    pub cost: f32,
    pub error_rate: f32,
    pub total_gradient_norm: f32,
    pub examples: usize,
}

/// Plain minibatch gradient descent on the categorical cross-entropy.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    pub step_rule: StepRule,
    pub loss: Loss,
}

impl GradientDescent {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            step_rule: StepRule::Scale { learning_rate },
            loss: Loss::CategoricalCrossEntropy,
        }
    }

    /// Forward pass, backward pass and one parameter update.
    pub fn process_batch(&self, model: &mut LeNet, batch: &Batch) -> Result<BatchOutcome> {
        model.zero_grads();

        let probs = model.apply(&normalize(&batch.features))?;
        let cost = self.loss.calculate(&probs, &batch.targets)?;
        let error_rate = misclassification_rate(&probs, &batch.targets);

        model.backward(&self.loss.gradient(&probs, &batch.targets)?)?;
        let total_gradient_norm = total_gradient_norm(&model.parameters());

        for param in model.parameters_mut() {
            self.step_rule.apply(param);
        }

        Ok(BatchOutcome {
            cost,
            error_rate,
            total_gradient_norm,
            examples: batch.len(),
        })
    }
}

/// L2 norm of all gradients taken together.
pub fn total_gradient_norm(params: &[&Parameter]) -> f32 {
    params
        .iter()
        .map(|p| p.grad.iter().map(|g| g * g).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}
