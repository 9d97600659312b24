//! Domain types and pure logic shared by every preorder crate.
//!
//! Nothing in here performs I/O: the error classifier, the artifact
//! formatter and the progress bar are plain functions over domain values.

pub mod app_config;
pub mod classify;
pub mod config;
pub mod format;
pub mod orders;
pub mod progress;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use classify::{classify, is_cancellation_message, FaultCategory, JobFault, UserError};
pub use config::{load_app_config, load_app_config_from_env};
pub use format::{
    caption, file_name, format_artifacts, plain_text_chunks, Artifact, ArtifactKind,
    MAX_MESSAGE_LEN,
};
pub use orders::{
    ExecutionResult, ItemSpec, OrderId, OrderStatus, OwnerId, PinRecord, ScheduledOrder,
    SessionId, FAILED_CODE,
};
pub use progress::{render_progress, PROGRESS_BAR_CELLS};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid order status: {0}")]
    InvalidStatus(String),
    #[error("invalid quantity {0}: must be at least 1")]
    InvalidQuantity(i64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
