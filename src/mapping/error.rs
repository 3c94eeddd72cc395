//! Errors raised when applying mapping changes to a device

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Invalid set: {0}")]
    InvalidSet(String),

    #[error("Invalid control: {0}")]
    InvalidControl(String),
}
