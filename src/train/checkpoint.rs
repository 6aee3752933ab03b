use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Extension, LoopContext, TrainingLog};
use crate::error::{NetworkError, Result};
use crate::layers::ParameterRecord;
use crate::model::{LeNet, LeNetConfig};

/// Everything needed to rebuild a trained network and resume its log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub config: LeNetConfig,
    pub parameters: Vec<ParameterRecord>,
    pub log: TrainingLog,
}

impl CheckpointRecord {
    pub fn capture(model: &LeNet, log: &TrainingLog) -> Self {
        Self {
            config: model.config().clone(),
            parameters: model.record(),
            log: log.clone(),
        }
    }

    pub fn into_model(self) -> Result<(LeNet, TrainingLog)> {
        let model = LeNet::from_record(self.config, &self.parameters)?;
        Ok((model, self.log))
    }

    /// Writes to a sibling temporary file first so an interrupted save
    /// never leaves a truncated checkpoint behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        let written = self.write_json(&tmp).and_then(|()| fs::rename(&tmp, path).map_err(NetworkError::from));
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    fn write_json(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<CheckpointRecord> {
    let file = File::open(path.as_ref())?;
    let record = serde_json::from_reader(BufReader::new(file))?;
    Ok(record)
}

/// Saves the model and log after every epoch and once training ends.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, ctx: &mut LoopContext<'_>) -> Result<()> {
        CheckpointRecord::capture(&*ctx.model, &*ctx.log).save(&self.path)?;
        debug!(path = %self.path.display(), epochs_done = ctx.log.status.epochs_done, "saved checkpoint");
        Ok(())
    }
}

impl Extension for Checkpoint {
    fn name(&self) -> &str {
        "Checkpoint"
    }

    fn after_epoch(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.save(ctx)
    }

    fn after_training(&mut self, ctx: &mut LoopContext<'_>) -> Result<()> {
        self.save(ctx)?;
        info!(path = %self.path.display(), "wrote final checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CheckpointRecord {
        let mut model = LeNet::new(LeNetConfig::default()).unwrap();
        model.resolve_shapes().unwrap();
        CheckpointRecord {
            config: model.config().clone(),
            parameters: Vec::new(),
            log: TrainingLog::default(),
        }
    }

    #[test]
    fn test_failed_save_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // renaming a file over a non-empty directory fails
        let target = dir.path().join("taken.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        assert!(record().save(&target).is_err());
        assert!(!dir.path().join("taken.json.tmp").exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lenet.json");
        let saved = record();
        saved.save(&path).unwrap();

        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.config, saved.config);
        assert!(!dir.path().join("lenet.json.tmp").exists());
    }
}
