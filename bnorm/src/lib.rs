pub mod batch_norm;
pub mod error;
pub mod mlp;
pub mod mnist;
pub mod running_stats;
pub mod sgd;
pub mod trainer;

pub use batch_norm::{BatchNormConfig, batch_norm};
pub use error::{BatchNormError, Result};
pub use mlp::{Mlp, MlpParams};
pub use running_stats::{LayerStats, RunningStats};
pub use sgd::sgd;
pub use trainer::{EpochStats, TrainConfig, evaluate_accuracy, train_epoch};
