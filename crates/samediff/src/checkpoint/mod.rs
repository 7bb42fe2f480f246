//! Periodic training checkpoints with retention.
//!
//! A checkpoint is one npz archive holding every trainable variable plus any
//! extra arrays the caller passes (updater state, typically), alongside a
//! `checkpoints.txt` sidecar with one JSON record per save. Retention prunes
//! old archives but never the sidecar, so the full history stays auditable.

use std::fs;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Graph, VarKind};
use crate::io::{load_npz, save_npz, NpzError};
use crate::tensor::NdArray;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Npz(#[from] NpzError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint has no entry for variable '{0}'")]
    MissingEntry(String),
    #[error("checkpoint entry '{name}' has shape {actual:?}, variable expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Which saved checkpoints survive pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepPolicy {
    All,
    /// Keep only the most recent `n` checkpoints.
    Last(usize),
    /// Keep the most recent `last`, plus every checkpoint whose index is a
    /// multiple of `every`.
    LastAndEvery { last: usize, every: u64 },
}

/// Where and how often to checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    pub save_every_n_epochs: Option<u64>,
    pub save_every_n_iterations: Option<u64>,
    pub keep: KeepPolicy,
}

impl CheckpointConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CheckpointConfig {
            dir: dir.into(),
            save_every_n_epochs: Some(1),
            save_every_n_iterations: None,
            keep: KeepPolicy::All,
        }
    }

    pub fn every_n_epochs(mut self, n: u64) -> Self {
        self.save_every_n_epochs = Some(n);
        self
    }

    pub fn every_n_iterations(mut self, n: u64) -> Self {
        self.save_every_n_iterations = Some(n);
        self
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep = KeepPolicy::Last(n);
        self
    }

    pub fn keep_last_and_every(mut self, last: usize, every: u64) -> Self {
        self.keep = KeepPolicy::LastAndEvery { last, every };
        self
    }
}

/// Record of one saved checkpoint, as written to `checkpoints.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub index: u64,
    pub epoch: u64,
    pub iteration: u64,
    pub timestamp_secs: u64,
    pub filename: String,
}

impl Checkpoint {
    fn filename_for(index: u64, epoch: u64, iteration: u64) -> String {
        format!("checkpoint-{index}_epoch-{epoch}_iter-{iteration}.npz")
    }
}

/// Writes checkpoints on a schedule and prunes per the keep policy.
pub struct CheckpointSaver {
    config: CheckpointConfig,
    next_index: u64,
    saved: Vec<Checkpoint>,
}

impl CheckpointSaver {
    pub fn new(config: CheckpointConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.dir)?;
        Ok(CheckpointSaver {
            config,
            next_index: 0,
            saved: Vec::new(),
        })
    }

    /// Checkpoints saved so far, oldest first. Pruned entries stay listed.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.saved
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.saved.last()
    }

    /// Indices whose archive files currently exist on disk.
    pub fn retained_indices(&self) -> Vec<u64> {
        self.saved
            .iter()
            .filter(|c| self.config.dir.join(&c.filename).exists())
            .map(|c| c.index)
            .collect()
    }

    /// Saves when the schedule says so. `end_of_epoch` selects which of the
    /// two cadences applies; counters are completed-epoch/iteration counts.
    pub fn maybe_save(
        &mut self,
        graph: &Graph,
        extra: &[(String, NdArray)],
        epoch: u64,
        iteration: u64,
        end_of_epoch: bool,
    ) -> Result<(), CheckpointError> {
        let due = if end_of_epoch {
            matches!(self.config.save_every_n_epochs, Some(n) if n > 0 && epoch % n == 0)
        } else {
            matches!(self.config.save_every_n_iterations, Some(n) if n > 0 && iteration % n == 0)
        };
        if due {
            self.save(graph, extra, epoch, iteration)?;
        }
        Ok(())
    }

    /// Unconditionally saves a checkpoint and applies retention.
    pub fn save(
        &mut self,
        graph: &Graph,
        extra: &[(String, NdArray)],
        epoch: u64,
        iteration: u64,
    ) -> Result<(), CheckpointError> {
        let index = self.next_index;
        self.next_index += 1;
        let filename = Checkpoint::filename_for(index, epoch, iteration);

        let mut entries: Vec<(String, NdArray)> = graph
            .variables()
            .filter(|v| v.kind == VarKind::Variable)
            .filter_map(|v| v.array.as_ref().map(|a| (v.name.clone(), a.dup())))
            .collect();
        entries.extend(extra.iter().map(|(n, a)| (n.clone(), a.dup())));
        save_npz(self.config.dir.join(&filename), &entries)?;

        let record = Checkpoint {
            index,
            epoch,
            iteration,
            timestamp_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            filename,
        };
        let mut sidecar = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.dir.join("checkpoints.txt"))?;
        writeln!(sidecar, "{}", serde_json::to_string(&record)?)?;
        log::info!(
            "saved checkpoint {} (epoch {}, iteration {})",
            record.index,
            record.epoch,
            record.iteration
        );
        self.saved.push(record);
        self.prune()?;
        Ok(())
    }

    fn prune(&mut self) -> Result<(), CheckpointError> {
        let doomed: Vec<&Checkpoint> = match self.config.keep {
            KeepPolicy::All => Vec::new(),
            KeepPolicy::Last(n) => {
                let cutoff = self.saved.len().saturating_sub(n);
                self.saved[..cutoff].iter().collect()
            }
            KeepPolicy::LastAndEvery { last, every } => {
                let cutoff = self.saved.len().saturating_sub(last);
                self.saved[..cutoff]
                    .iter()
                    .filter(|c| every == 0 || c.index % every != 0)
                    .collect()
            }
        };
        for checkpoint in doomed {
            let path = self.config.dir.join(&checkpoint.filename);
            if path.exists() {
                log::debug!("pruning checkpoint {}", checkpoint.index);
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Loads a checkpoint archive back into the graph's trainable variables,
/// returning the remaining entries (updater state and other extras).
pub fn load_checkpoint(
    path: impl AsRef<Path>,
    graph: &mut Graph,
) -> Result<Vec<(String, NdArray)>, CheckpointError> {
    let entries = load_npz(path)?;
    let mut extras = Vec::new();
    let trainable = graph.trainable_variables();
    let mut seen = std::collections::HashSet::new();
    for (name, array) in entries {
        match graph.variable_mut(&name) {
            Some(var) if var.kind == VarKind::Variable => {
                let target = var
                    .array
                    .as_mut()
                    .ok_or_else(|| CheckpointError::MissingEntry(name.clone()))?;
                target
                    .assign(&array)
                    .map_err(|_| CheckpointError::ShapeMismatch {
                        name: name.clone(),
                        expected: target.shape().dims().to_vec(),
                        actual: array.shape().dims().to_vec(),
                    })?;
                seen.insert(name);
            }
            _ => extras.push((name, array)),
        }
    }
    for name in trainable {
        if !seen.contains(&name) {
            return Err(CheckpointError::MissingEntry(name));
        }
    }
    Ok(extras)
}
