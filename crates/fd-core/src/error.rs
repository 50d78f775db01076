//! Core error types for Fleetdeck
//!
//! Every error carries a stable machine-readable code (see [`ErrorCode`]) so
//! that clients never have to pattern-match message text.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{BridgeId, BridgePhase, DestinationId, OperationId, RuleId, TargetId};

/// Stable machine-checkable error codes
pub trait ErrorCode {
    /// Snake-case code sent to clients alongside the message
    fn code(&self) -> &'static str;
}

/// Top-level error type for the control plane
#[derive(Error, Debug)]
pub enum FdError {
    /// Input rejected before any work was started
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Bridge lifecycle error
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Target registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Alert routing or delivery error
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    /// Operation journal error
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for FdError {
    fn code(&self) -> &'static str {
        match self {
            FdError::Validation(e) => e.code(),
            FdError::Bridge(e) => e.code(),
            FdError::Registry(e) => e.code(),
            FdError::Alert(e) => e.code(),
            FdError::Journal(e) => e.code(),
            FdError::Store(_) => "store_error",
            FdError::Config(_) => "config_error",
            FdError::Io(_) => "io_error",
        }
    }
}

/// Malformed input, rejected synchronously
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Host is empty
    #[error("SSH host must not be empty")]
    EmptyHost,

    /// Host contains characters that cannot be a hostname or alias
    #[error("Invalid SSH host: {0}")]
    InvalidHost(String),

    /// Port out of range
    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    /// User name is not usable
    #[error("Invalid SSH user: {0}")]
    InvalidUser(String),

    /// Key path is empty or not a file path
    #[error("Invalid key path: {0}")]
    InvalidKeyPath(String),

    /// URL is not http(s)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Required text field is empty
    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),

    /// Numeric field out of its allowed range
    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: u64 },
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        "validation_error"
    }
}

/// Bridge lifecycle errors
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No bridge with this ID
    #[error("Bridge not found: {0}")]
    NotFound(BridgeId),

    /// Request is not valid in the bridge's current phase
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: BridgePhase, to: BridgePhase },

    /// Connect attempted without a fresh passing preflight or bypass
    #[error("Preflight required: {0}")]
    PreflightRequired(String),

    /// Bridge parameters rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Subprocess could not be started
    #[error("Failed to spawn ssh: {0}")]
    Spawn(String),
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        match self {
            BridgeError::NotFound(_) => "bridge_not_found",
            BridgeError::IllegalTransition { .. } => "illegal_state",
            BridgeError::PreflightRequired(_) => "preflight_required",
            BridgeError::Validation(_) => "validation_error",
            BridgeError::Spawn(_) => "spawn_failed",
        }
    }
}

/// Target registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No target with this ID
    #[error("Target not found: {0}")]
    NotFound(TargetId),

    /// A target with this ID already exists
    #[error("Target already exists: {0}")]
    AlreadyExists(TargetId),

    /// Target parameters rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RegistryError {
    fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => "target_not_found",
            RegistryError::AlreadyExists(_) => "target_exists",
            RegistryError::Validation(_) => "validation_error",
            RegistryError::Store(_) => "store_error",
        }
    }
}

/// Alert routing and delivery errors
#[derive(Error, Debug)]
pub enum AlertError {
    /// No destination with this ID
    #[error("Alert destination not found: {0}")]
    DestinationNotFound(DestinationId),

    /// No rule with this ID
    #[error("Alert routing rule not found: {0}")]
    RuleNotFound(RuleId),

    /// Destination answered with a non-2xx status
    #[error("Delivery rejected with HTTP {status}: {body}")]
    DeliveryRejected { status: u16, body: String },

    /// Destination could not be reached
    #[error("Delivery failed: {0}")]
    Transport(String),

    /// Destination or rule parameters rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for AlertError {
    fn code(&self) -> &'static str {
        match self {
            AlertError::DestinationNotFound(_) => "destination_not_found",
            AlertError::RuleNotFound(_) => "rule_not_found",
            AlertError::DeliveryRejected { .. } => "delivery_rejected",
            AlertError::Transport(_) => "delivery_failed",
            AlertError::Validation(_) => "validation_error",
            AlertError::Store(_) => "store_error",
        }
    }
}

/// Operation journal errors
#[derive(Error, Debug)]
pub enum JournalError {
    /// No operation with this ID
    #[error("Operation not found: {0}")]
    UnknownOperation(OperationId),

    /// The operation already reached a terminal status
    #[error("Operation already completed: {0}")]
    AlreadyCompleted(OperationId),

    /// Journal file could not be written
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for JournalError {
    fn code(&self) -> &'static str {
        match self {
            JournalError::UnknownOperation(_) => "operation_not_found",
            JournalError::AlreadyCompleted(_) => "operation_completed",
            JournalError::Io(_) => "io_error",
        }
    }
}

/// Key-value persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying file access failed
    #[error("Store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored record could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
