//! Training loop driven by pluggable extensions.
//!
//! The loop itself only iterates over batches and calls the optimizer;
//! stopping, monitoring, checkpointing and reporting are all extensions
//! that react to the loop's events and read or write the [`TrainingLog`].

pub mod checkpoint;
pub mod extensions;
pub mod monitoring;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::DataStream;
use crate::error::{NetworkError, Result};
use crate::model::LeNet;
use crate::optimizer::{BatchOutcome, GradientDescent};

pub use checkpoint::{load_checkpoint, Checkpoint, CheckpointRecord};
pub use extensions::{FinishAfter, Printing, Timing};
pub use monitoring::{DataStreamMonitoring, TrainingDataMonitoring};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub iterations_done: usize,
    pub epochs_done: usize,
    pub finish_requested: bool,
}

/// Values recorded at the end of an epoch. Record 0 holds what was
/// measured before training started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epochs_done: usize,
    pub iterations_done: usize,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub status: Status,
    pub records: Vec<EpochRecord>,
}

impl TrainingLog {
    /// Record for the epoch currently in progress, created on first use.
    pub fn current_record(&mut self) -> &mut EpochRecord {
        let epochs_done = self.status.epochs_done;
        let iterations_done = self.status.iterations_done;
        if self.records.last().map(|r| r.epochs_done) != Some(epochs_done) {
            self.records.push(EpochRecord {
                epochs_done,
                ..EpochRecord::default()
            });
        }
        let last = self.records.len() - 1;
        let record = &mut self.records[last];
        record.iterations_done = iterations_done;
        record
    }

    pub fn record(&mut self, key: impl Into<String>, value: f64) {
        self.current_record().values.insert(key.into(), value);
    }

    pub fn last_record(&self) -> Option<&EpochRecord> {
        self.records.last()
    }
}

/// What an extension may look at and change.
pub struct LoopContext<'a> {
    pub model: &'a mut LeNet,
    pub log: &'a mut TrainingLog,
}

/// Reaction to main-loop events. Every hook defaults to doing nothing.
pub trait Extension {
    fn name(&self) -> &str;

    fn before_training(&mut self, _ctx: &mut LoopContext<'_>) -> Result<()> {
        Ok(())
    }

    fn after_batch(&mut self, _ctx: &mut LoopContext<'_>, _outcome: &BatchOutcome) -> Result<()> {
        Ok(())
    }

    fn after_epoch(&mut self, _ctx: &mut LoopContext<'_>) -> Result<()> {
        Ok(())
    }

    fn after_training(&mut self, _ctx: &mut LoopContext<'_>) -> Result<()> {
        Ok(())
    }
}

pub struct MainLoop {
    model: LeNet,
    algorithm: GradientDescent,
    data_stream: DataStream,
    extensions: Vec<Box<dyn Extension>>,
    log: TrainingLog,
}

impl MainLoop {
    pub fn new(model: LeNet, algorithm: GradientDescent, data_stream: DataStream) -> Self {
        Self {
            model,
            algorithm,
            data_stream,
            extensions: Vec::new(),
            log: TrainingLog::default(),
        }
    }

    /// Continues from a previous log, e.g. one restored from a checkpoint.
    pub fn with_log(mut self, log: TrainingLog) -> Self {
        self.log = log;
        self.log.status.finish_requested = false;
        self
    }

    /// Extensions run in the order they are added.
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn model(&self) -> &LeNet {
        &self.model
    }

    pub fn into_model(self) -> LeNet {
        self.model
    }

    pub fn log(&self) -> &TrainingLog {
        &self.log
    }

    pub fn run(&mut self) -> Result<()> {
        info!(
            extensions = ?self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            "entered the main loop"
        );

        if self.data_stream.num_batches() == 0 {
            return Err(NetworkError::InvalidData("training stream yields no batches".into()));
        }

        let mut ctx = LoopContext {
            model: &mut self.model,
            log: &mut self.log,
        };
        for extension in &mut self.extensions {
            extension.before_training(&mut ctx)?;
        }

        'epochs: while !ctx.log.status.finish_requested {
            for batch in self.data_stream.iter_epoch() {
                let outcome = self.algorithm.process_batch(ctx.model, &batch)?;
                ctx.log.status.iterations_done += 1;

                for extension in &mut self.extensions {
                    extension.after_batch(&mut ctx, &outcome)?;
                }
                // an epoch stopped by a batch-level request stays unfinished
                if ctx.log.status.finish_requested {
                    break 'epochs;
                }
            }

            ctx.log.status.epochs_done += 1;
            for extension in &mut self.extensions {
                extension.after_epoch(&mut ctx)?;
            }
        }

        for extension in &mut self.extensions {
            extension.after_training(&mut ctx)?;
        }
        info!(
            epochs = ctx.log.status.epochs_done,
            iterations = ctx.log.status.iterations_done,
            "training finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_follow_epochs() {
        let mut log = TrainingLog::default();
        log.record("test_cost", 2.3);
        log.status.epochs_done = 1;
        log.status.iterations_done = 600;
        log.record("train_cost", 0.4);
        log.record("test_cost", 0.3);

        assert_eq!(log.records.len(), 2);
        assert_eq!(log.records[0].values["test_cost"], 2.3);
        let last = log.last_record().unwrap();
        assert_eq!(last.epochs_done, 1);
        assert_eq!(last.iterations_done, 600);
        assert_eq!(last.values.len(), 2);
    }
}
