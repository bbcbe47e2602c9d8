use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Workspace directory does not exist: {}", .0.display())]
    MissingWorkspace(PathBuf),

    #[error("Scheduler command `{program}` failed: {message}")]
    Scheduler { program: String, message: String },

    #[error("Registry format error: {0}")]
    RegistryFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FarmError>;
