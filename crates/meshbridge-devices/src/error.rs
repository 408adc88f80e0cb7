//! Error taxonomy of the orchestrator.

use std::fmt;

use thiserror::Error;

use crate::radio::RadioError;

/// Result type for orchestrator operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Which side of a bind/unbind request failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "Source"),
            Self::Target => write!(f, "Target"),
        }
    }
}

/// Error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Alias does not name a device or group
    #[error("Entity '{0}' does not exist")]
    UnknownEntity(String),

    /// Bind/unbind side could not be resolved to an entity
    #[error("{side} '{alias}' does not exist")]
    UnknownBindEntity { side: Side, alias: String },

    /// The entity exists but has no such endpoint
    #[error("{side} device '{alias}' does not have endpoint '{endpoint}'")]
    UnknownEndpoint {
        side: Side,
        alias: String,
        endpoint: String,
    },

    /// No converter handles a message key (logged, never fatal for a message)
    #[error("No converter available for '{key}' on '{entity}'")]
    NoConverter { entity: String, key: String },

    /// Converter rejected a value
    #[error("Cannot convert '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// No eligible cluster between source and target
    #[error("Nothing to {0}")]
    NothingToBind(&'static str),

    /// Transport-level failure
    #[error("Radio operation failed: {0}")]
    Radio(#[from] RadioError),

    /// Configuration gave up after the maximum number of attempts
    #[error("Configuration of '{alias}' failed after {attempts} attempts")]
    ConfigurationExhausted { alias: String, attempts: u32 },

    /// Configuration is already running for the device
    #[error("Configuration of '{0}' is already in progress")]
    ConfigurationInProgress(String),

    /// Bus payload could not be parsed
    #[error("Malformed message on '{topic}': {reason}")]
    MalformedMessage { topic: String, reason: String },

    /// Bridge request is missing fields or has wrong types
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Friendly names must be unique across devices and groups
    #[error("Friendly name '{0}' is already in use")]
    DuplicateAlias(String),

    /// Publishing or subscribing failed
    #[error("Bus error: {0}")]
    Bus(String),

    /// Settings or persistence failure
    #[error(transparent)]
    Core(#[from] meshbridge_core::Error),
}
