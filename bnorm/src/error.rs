use thiserror::Error;

pub type Result<T> = std::result::Result<T, BatchNormError>;

#[derive(Error, Debug)]
pub enum BatchNormError {
    /// 推理模式下该层还没有经过训练，没有移动均值和方差
    #[error("no running statistics for layer '{layer}', run it in training mode first")]
    MissingStatistics { layer: String },

    #[error("feature count mismatch in layer '{layer}': expected {expected}, got {got}")]
    FeatureMismatch {
        layer: String,
        expected: i64,
        got: i64,
    },

    #[error("layer '{layer}' expects a parameter of shape {expected:?}, got {got:?}")]
    ParamShape {
        layer: String,
        expected: Vec<i64>,
        got: Vec<i64>,
    },

    #[error("layer '{layer}' got an empty batch")]
    EmptyBatch { layer: String },

    #[error("layer '{layer}' expects a [batch, features] tensor, got dims {dims:?}")]
    NotAMatrix { layer: String, dims: Vec<i64> },

    #[error("invalid idx file: {0}")]
    InvalidIdx(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Tch(#[from] tch::TchError),
}
