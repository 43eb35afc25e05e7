//! Error types for measurements and their definitions

use thiserror::Error;

/// Errors that stop a measurement run
///
/// Per-probe socket failures are not errors at this level; they are recorded
/// on the probe and the run continues.
#[derive(Debug, Error)]
pub enum MeasurementError {
    /// The definition is missing a required value or carries an invalid one
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// `start` was called before a successful `prepare`
    #[error("Measurement has not been prepared")]
    NotPrepared,

    /// The run was stopped before it finished; no result is produced
    #[error("Measurement was cancelled")]
    Cancelled,

    /// The requested variant exists but has no implementation
    ///
    /// Raised e.g. for traceroute over TCP or system ping.
    #[error("{feature} is not yet implemented")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: String,
    },

    /// The definition handed to `prepare` belongs to another method
    #[error("Definition for {found} passed to {expected}")]
    WrongDefinition {
        /// Method the measurement implements
        expected: &'static str,
        /// Method of the supplied definition
        found: &'static str,
    },
}

/// Errors turning a method name and options into a definition
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// No measurement is registered under this name
    #[error("Unknown measurement method: {0}")]
    UnknownMethod(String),

    /// The options do not deserialize into the method's definition
    #[error("Invalid options for {method}: {source}")]
    InvalidOptions {
        /// Method name as registered
        method: String,
        /// Deserialization failure
        #[source]
        source: serde_json::Error,
    },
}
