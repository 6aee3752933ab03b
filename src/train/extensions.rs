use std::time::Instant;

use tracing::info;

use super::{Extension, LoopContext};
use crate::error::Result;
use crate::optimizer::BatchOutcome;

/// Records how long each epoch and the whole run took, in seconds.
#[derive(Debug, Default)]
pub struct Timing {
    started: Option<Instant>,
    epoch_started: Option<Instant>,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Extension for Timing {
    fn name(&self) -> &str {
        "Timing"
    }

    fn before_training(&mut self, _ctx: &mut LoopContext<'_>) -> Result<()> {
        let now = Instant::now();
        self.started = Some(now);
        self.epoch_started = Some(now);
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        let now = Instant::now();
        if let Some(epoch_started) = self.epoch_started.replace(now) {
            ctx.log.record("epoch_took", (now - epoch_started).as_secs_f64());
        }
        if let Some(started) = self.started {
            ctx.log.record("total_took", (now - started).as_secs_f64());
        }
        Ok(())
    }
}

/// Requests the end of training after a number of epochs or batches.
#[derive(Debug, Clone, Default)]
pub struct FinishAfter {
    pub after_n_epochs: Option<usize>,
    pub after_n_batches: Option<usize>,
}

impl FinishAfter {
    pub fn epochs(n: usize) -> Self {
        Self {
            after_n_epochs: Some(n),
            after_n_batches: None,
        }
    }

    pub fn batches(n: usize) -> Self {
        Self {
            after_n_epochs: None,
            after_n_batches: Some(n),
        }
    }
}

impl Extension for FinishAfter {
    fn name(&self) -> &str {
        "FinishAfter"
    }

    fn after_batch(&mut self, ctx: &mut LoopContext<'_>, _outcome: &BatchOutcome) -> Result<()> {
        if let Some(n) = self.after_n_batches {
            if ctx.log.status.iterations_done >= n {
                ctx.log.status.finish_requested = true;
            }
        }
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        if let Some(n) = self.after_n_epochs {
            if ctx.log.status.epochs_done >= n {
                ctx.log.status.finish_requested = true;
            }
        }
        Ok(())
    }
}

/// Logs the status and the latest record.
#[derive(Debug, Default)]
pub struct Printing;

impl Printing {
    pub fn new() -> Self {
        Printing
    }

    fn print(&self, ctx: &mut LoopContext<'_>, header: &str) {
        let status = &ctx.log.status;
        info!(
            epochs_done = status.epochs_done,
            iterations_done = status.iterations_done,
            "{header}"
        );
        if let Some(record) = ctx.log.last_record() {
            for (key, value) in &record.values {
                info!("\t{key}: {value:.6}");
            }
        }
    }
}

impl Extension for Printing {
    fn name(&self) -> &str {
        "Printing"
    }

    fn before_training(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.print(ctx, "BEFORE FIRST EPOCH");
        Ok(())
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.print(ctx, "AFTER ANOTHER EPOCH");
        Ok(())
    }

    fn after_training(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.print(ctx, "TRAINING HAS BEEN FINISHED");
        Ok(())
    }
}
