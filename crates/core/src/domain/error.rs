// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Invalid cadence '{pattern}': {reason}")]
    InvalidCadence { pattern: String, reason: String },

    #[error("Attempt limit exceeded: {attempts_made}/{max_attempts}")]
    AttemptsExhausted { attempts_made: u32, max_attempts: u32 },
}

pub type Result<T> = std::result::Result<T, DomainError>;
