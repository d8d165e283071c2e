use thiserror::Error;

use crate::registry::Slot;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Slot not captured yet: {0}")]
    NotReady(Slot),

    #[error("Captured object does not have the expected shape: {0}")]
    ShapeMismatch(String),

    #[error("Invalid pixel key: {0}")]
    InvalidKey(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Host call failed: {0}")]
    Host(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
