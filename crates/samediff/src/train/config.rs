//! Training configuration: optimizer choice, learning-rate schedule, loss
//! wiring and regularization.

use serde::{Deserialize, Serialize};

use super::updater::{
    AdaBelief, AdaGrad, Adam, GradientUpdater, Nesterovs, Sgd,
};

/// Optimizer selection with hyperparameters. `instantiate` produces the
/// per-parameter updater state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdaterConfig {
    Sgd { lr: f64 },
    Nesterovs { lr: f64, momentum: f64 },
    AdaGrad { lr: f64, eps: f64 },
    Adam { lr: f64, beta1: f64, beta2: f64, eps: f64 },
    AdaBelief { lr: f64, beta1: f64, beta2: f64, eps: f64 },
}

impl UpdaterConfig {
    pub fn adam(lr: f64) -> Self {
        UpdaterConfig::Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn ada_belief(lr: f64) -> Self {
        UpdaterConfig::AdaBelief {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn nesterovs(lr: f64) -> Self {
        UpdaterConfig::Nesterovs { lr, momentum: 0.9 }
    }

    /// Flat state elements required per gradient element.
    pub fn state_multiple(&self) -> usize {
        match self {
            UpdaterConfig::Sgd { .. } => 0,
            UpdaterConfig::Nesterovs { .. } | UpdaterConfig::AdaGrad { .. } => 1,
            UpdaterConfig::Adam { .. } | UpdaterConfig::AdaBelief { .. } => 2,
        }
    }

    /// Names of the state arrays, in flat-view order.
    pub fn state_keys(&self) -> &'static [&'static str] {
        match self {
            UpdaterConfig::Sgd { .. } => &[],
            UpdaterConfig::Nesterovs { .. } => &["V"],
            UpdaterConfig::AdaGrad { .. } => &["GRAD"],
            UpdaterConfig::Adam { .. } => &["M", "V"],
            UpdaterConfig::AdaBelief { .. } => &["M", "S"],
        }
    }

    pub fn base_learning_rate(&self) -> f64 {
        match self {
            UpdaterConfig::Sgd { lr }
            | UpdaterConfig::Nesterovs { lr, .. }
            | UpdaterConfig::AdaGrad { lr, .. }
            | UpdaterConfig::Adam { lr, .. }
            | UpdaterConfig::AdaBelief { lr, .. } => *lr,
        }
    }

    pub fn instantiate(&self) -> Box<dyn GradientUpdater> {
        match *self {
            UpdaterConfig::Sgd { .. } => Box::new(Sgd::new()),
            UpdaterConfig::Nesterovs { momentum, .. } => Box::new(Nesterovs::new(momentum)),
            UpdaterConfig::AdaGrad { eps, .. } => Box::new(AdaGrad::new(eps)),
            UpdaterConfig::Adam {
                beta1, beta2, eps, ..
            } => Box::new(Adam::new(beta1, beta2, eps)),
            UpdaterConfig::AdaBelief {
                beta1, beta2, eps, ..
            } => Box::new(AdaBelief::new(beta1, beta2, eps)),
        }
    }
}

/// Learning-rate schedule applied on top of the updater's base rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum LrSchedule {
    #[default]
    Fixed,
    /// `lr * gamma^iteration`
    Exponential { gamma: f64 },
    /// `lr * factor^(iteration / every)`
    Step { factor: f64, every: u64 },
}

impl LrSchedule {
    pub fn factor(&self, iteration: u64) -> f64 {
        match *self {
            LrSchedule::Fixed => 1.0,
            LrSchedule::Exponential { gamma } => gamma.powi(iteration as i32),
            LrSchedule::Step { factor, every } => {
                factor.powi((iteration / every.max(1)) as i32)
            }
        }
    }
}

/// Everything a training session needs besides the graph itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub lr_schedule: LrSchedule,
    /// Name of the scalar loss variable to minimize.
    pub loss_variable: String,
    /// Placeholders bound from `DataSet::features`, in order.
    #[serde(default)]
    pub feature_mapping: Vec<String>,
    /// Placeholders bound from `DataSet::labels`, in order.
    #[serde(default)]
    pub label_mapping: Vec<String>,
    #[serde(default)]
    pub l1: f64,
    #[serde(default)]
    pub l2: f64,
}

impl TrainingConfig {
    pub fn new(updater: UpdaterConfig, loss_variable: impl Into<String>) -> Self {
        TrainingConfig {
            updater,
            lr_schedule: LrSchedule::Fixed,
            loss_variable: loss_variable.into(),
            feature_mapping: Vec::new(),
            label_mapping: Vec::new(),
            l1: 0.0,
            l2: 0.0,
        }
    }

    pub fn with_feature_mapping(mut self, names: &[&str]) -> Self {
        self.feature_mapping = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_label_mapping(mut self, names: &[&str]) -> Self {
        self.label_mapping = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_lr_schedule(mut self, schedule: LrSchedule) -> Self {
        self.lr_schedule = schedule;
        self
    }

    pub fn with_l1(mut self, l1: f64) -> Self {
        self.l1 = l1;
        self
    }

    pub fn with_l2(mut self, l2: f64) -> Self {
        self.l2 = l2;
        self
    }

    /// Effective learning rate at an iteration.
    pub fn learning_rate(&self, iteration: u64) -> f64 {
        self.updater.base_learning_rate() * self.lr_schedule.factor(iteration)
    }
}
