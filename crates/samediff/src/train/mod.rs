//! Training: updaters, configuration and the gradient-descent driver.

mod config;
mod trainer;
mod updater;

pub use config::{LrSchedule, TrainingConfig, UpdaterConfig};
pub use trainer::{DataSet, TrainError, TrainingSession};
pub use updater::{
    AdaBelief, AdaGrad, Adam, GradientUpdater, Nesterovs, Sgd, UpdaterError,
};
