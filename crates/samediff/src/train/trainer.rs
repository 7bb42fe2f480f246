//! Gradient-descent training driver.
//!
//! `TrainingSession::new` appends gradient ops to the graph once, then each
//! `fit` step runs loss and gradients in a single session pass, feeds every
//! gradient through its parameter's updater and applies the step in place
//! through the parameter's shared buffer.

use std::sync::Arc;

use thiserror::Error;

use crate::checkpoint::{CheckpointError, CheckpointSaver};
use crate::exec::OpExecutor;
use crate::graph::{Graph, GraphError};
use crate::session::{InferenceSession, SessionError};
use crate::tensor::{NdArray, Shape};

use super::config::TrainingConfig;
use super::updater::{GradientUpdater, UpdaterError};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("graph has no training configuration")]
    NoTrainingConfig,
    #[error("data set provides {actual} arrays for mapping {mapping:?}")]
    MappingMismatch {
        mapping: Vec<String>,
        actual: usize,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Updater(#[from] UpdaterError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// One minibatch: feature arrays and label arrays, matched positionally to
/// the training config's placeholder mappings.
#[derive(Debug, Clone)]
pub struct DataSet {
    pub features: Vec<NdArray>,
    pub labels: Vec<NdArray>,
}

impl DataSet {
    pub fn new(features: Vec<NdArray>, labels: Vec<NdArray>) -> Self {
        DataSet { features, labels }
    }
}

struct ParamState {
    name: String,
    /// Aliasing handle onto the graph variable's buffer.
    array: NdArray,
    grad_name: String,
    updater: Box<dyn GradientUpdater>,
    /// Flat optimizer state backing the updater's views.
    state_flat: NdArray,
}

/// Drives minibatch gradient descent over a graph with a bound
/// [`TrainingConfig`].
pub struct TrainingSession<'g> {
    graph: &'g Graph,
    executor: Arc<dyn OpExecutor>,
    config: TrainingConfig,
    params: Vec<ParamState>,
    iteration: u64,
    epoch: u64,
    checkpoints: Option<CheckpointSaver>,
}

impl<'g> TrainingSession<'g> {
    /// Prepares a graph for training: derives gradients for every trainable
    /// variable and allocates flat updater state per parameter.
    pub fn new(
        graph: &'g mut Graph,
        executor: Arc<dyn OpExecutor>,
    ) -> Result<Self, TrainError> {
        let config = graph
            .training_config()
            .cloned()
            .ok_or(TrainError::NoTrainingConfig)?;
        let trainable = graph.trainable_variables();
        let wrt: Vec<&str> = trainable.iter().map(|s| s.as_str()).collect();
        let grad_names = graph.calculate_gradients(&config.loss_variable, &wrt)?;

        let mut params = Vec::with_capacity(trainable.len());
        for name in &trainable {
            let array = graph
                .variable(name)
                .and_then(|v| v.array.clone())
                .ok_or_else(|| GraphError::MissingVariable(name.clone()))?;
            let mut updater = config.updater.instantiate();
            let state_len = updater.state_multiple() * array.len();
            let state_flat = NdArray::zeros(Shape::new(vec![state_len]), array.dtype());
            updater.set_state_view(state_flat.clone(), array.shape(), array.order(), true)?;
            params.push(ParamState {
                name: name.clone(),
                array,
                grad_name: grad_names[name].clone(),
                updater,
                state_flat,
            });
        }
        Ok(TrainingSession {
            graph: &*graph,
            executor,
            config,
            params,
            iteration: 0,
            epoch: 0,
            checkpoints: None,
        })
    }

    pub fn with_checkpoints(mut self, saver: CheckpointSaver) -> Self {
        self.checkpoints = Some(saver);
        self
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Flat optimizer state for a parameter, if it exists.
    pub fn updater_state(&self, param: &str) -> Option<&NdArray> {
        self.params
            .iter()
            .find(|p| p.name == param)
            .map(|p| &p.state_flat)
    }

    /// Runs `epochs` passes over the batches, returning the mean loss per
    /// epoch.
    pub fn fit(&mut self, batches: &[DataSet], epochs: usize) -> Result<Vec<f64>, TrainError> {
        let mut epoch_losses = Vec::with_capacity(epochs);
        for _ in 0..epochs {
            let mut loss_sum = 0.0;
            for batch in batches {
                loss_sum += self.fit_batch(batch)?;
            }
            let mean = loss_sum / batches.len().max(1) as f64;
            log::info!(
                "epoch {} complete: mean loss {:.6} over {} batch(es)",
                self.epoch,
                mean,
                batches.len()
            );
            epoch_losses.push(mean);
            self.epoch += 1;
            self.maybe_checkpoint(true)?;
        }
        Ok(epoch_losses)
    }

    /// One gradient step on one batch; returns the batch loss.
    pub fn fit_batch(&mut self, batch: &DataSet) -> Result<f64, TrainError> {
        if batch.features.len() != self.config.feature_mapping.len() {
            return Err(TrainError::MappingMismatch {
                mapping: self.config.feature_mapping.clone(),
                actual: batch.features.len(),
            });
        }
        if batch.labels.len() != self.config.label_mapping.len() {
            return Err(TrainError::MappingMismatch {
                mapping: self.config.label_mapping.clone(),
                actual: batch.labels.len(),
            });
        }
        let mut bindings: Vec<(&str, NdArray)> = Vec::new();
        for (name, array) in self.config.feature_mapping.iter().zip(&batch.features) {
            bindings.push((name.as_str(), array.clone()));
        }
        for (name, array) in self.config.label_mapping.iter().zip(&batch.labels) {
            bindings.push((name.as_str(), array.clone()));
        }

        let mut outputs: Vec<&str> = vec![self.config.loss_variable.as_str()];
        for p in &self.params {
            outputs.push(p.grad_name.as_str());
        }
        let mut session = InferenceSession::new(self.graph, Arc::clone(&self.executor));
        let mut results = session.run(&outputs, &bindings)?;
        let loss = results
            .remove(0)
            .scalar_value()
            .unwrap_or(f64::NAN);

        let lr = self.config.learning_rate(self.iteration);
        for (param, grad) in self.params.iter_mut().zip(results) {
            // The returned gradient may alias graph constants; work on a
            // private copy.
            let mut step = grad.dup();
            apply_regularization(&mut step, &param.array, self.config.l1, self.config.l2);
            param.updater.apply(&mut step, lr, self.iteration)?;
            let deltas = step.to_f64_vec();
            let mut i = 0;
            param.array.map_values_inplace(|w| {
                let v = w - deltas[i];
                i += 1;
                v
            });
        }
        self.iteration += 1;
        self.maybe_checkpoint(false)?;
        Ok(loss)
    }

    fn maybe_checkpoint(&mut self, end_of_epoch: bool) -> Result<(), TrainError> {
        if let Some(saver) = self.checkpoints.as_mut() {
            let extra: Vec<(String, NdArray)> = self
                .params
                .iter()
                .filter(|p| !p.state_flat.is_empty())
                .map(|p| (format!("updater/{}", p.name), p.state_flat.clone()))
                .collect();
            saver.maybe_save(
                self.graph,
                &extra,
                self.epoch,
                self.iteration,
                end_of_epoch,
            )?;
        }
        Ok(())
    }
}

/// Adds l1/l2 penalties to the raw gradient before the updater sees it.
fn apply_regularization(gradient: &mut NdArray, param: &NdArray, l1: f64, l2: f64) {
    if l1 == 0.0 && l2 == 0.0 {
        return;
    }
    let weights = param.to_f64_vec();
    let mut i = 0;
    gradient.map_values_inplace(|g| {
        let w = weights[i];
        i += 1;
        g + l2 * w + l1 * w.signum()
    });
}
