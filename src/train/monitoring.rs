use tracing::debug;

use super::{Extension, LoopContext};
use crate::data::{normalize, DataStream};
use crate::error::Result;
use crate::loss::{misclassification_rate, Loss};
use crate::optimizer::BatchOutcome;

/// Evaluates the model on a held-out stream before training and after
/// every epoch, recording `{prefix}_cost` and `{prefix}_error_rate`.
#[derive(Debug)]
pub struct DataStreamMonitoring {
    stream: DataStream,
    prefix: String,
    loss: Loss,
}

impl DataStreamMonitoring {
    pub fn new(stream: DataStream, prefix: impl Into<String>) -> Self {
        Self {
            stream,
            prefix: prefix.into(),
            loss: Loss::CategoricalCrossEntropy,
        }
    }

    fn evaluate(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        let mut cost = 0.0f64;
        let mut errors = 0.0f64;
        let mut examples = 0usize;

        for batch in self.stream.iter_epoch() {
            let probs = ctx.model.apply(&normalize(&batch.features))?;
            let n = batch.len() as f64;
            cost += f64::from(self.loss.calculate(&probs, &batch.targets)?) * n;
            errors += f64::from(misclassification_rate(&probs, &batch.targets)) * n;
            examples += batch.len();
        }
        if examples == 0 {
            return Ok(());
        }

        let examples = examples as f64;
        debug!(prefix = %self.prefix, examples, "monitored data stream");
        ctx.log.record(format!("{}_cost", self.prefix), cost / examples);
        ctx.log.record(format!("{}_error_rate", self.prefix), errors / examples);
        Ok(())
    }
}

impl Extension for DataStreamMonitoring {
    fn name(&self) -> &str {
        "DataStreamMonitoring"
    }

    fn before_training(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.evaluate(ctx)
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.evaluate(ctx)
    }
}

/// Averages what the optimizer reports on the training batches of an epoch.
#[derive(Debug)]
pub struct TrainingDataMonitoring {
    prefix: String,
    cost: f64,
    error_rate: f64,
    total_gradient_norm: f64,
    examples: usize,
    batches: usize,
}

impl TrainingDataMonitoring {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cost: 0.0,
            error_rate: 0.0,
            total_gradient_norm: 0.0,
            examples: 0,
            batches: 0,
        }
    }

    fn reset(&mut self) {
        self.cost = 0.0;
        self.error_rate = 0.0;
        self.total_gradient_norm = 0.0;
        self.examples = 0;
        self.batches = 0;
    }
}

impl Extension for TrainingDataMonitoring {
    fn name(&self) -> &str {
        "TrainingDataMonitoring"
    }

    fn after_batch(&mut self, _ctx: &mut LoopContext<'_>, outcome: &BatchOutcome) -> Result<()> {
        let n = outcome.examples as f64;
        self.cost += f64::from(outcome.cost) * n;
        self.error_rate += f64::from(outcome.error_rate) * n;
        self.total_gradient_norm += f64::from(outcome.total_gradient_norm);
        self.examples += outcome.examples;
        self.batches += 1;
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        if self.examples > 0 {
            let examples = self.examples as f64;
            ctx.log.record(format!("{}_cost", self.prefix), self.cost / examples);
            ctx.log.record(format!("{}_error_rate", self.prefix), self.error_rate / examples);
            ctx.log.record(
                format!("{}_total_gradient_norm", self.prefix),
                self.total_gradient_norm / self.batches as f64,
            );
        }
        self.reset();
        Ok(())
    }
}
