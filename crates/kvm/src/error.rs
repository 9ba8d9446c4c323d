//! Error types for the KVM plugin

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvmError>;

#[derive(Debug, Error)]
pub enum KvmError {
    #[error("Configuration error: {0}")]
    Config(String),
}
