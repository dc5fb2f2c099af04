//! Error types for the SDN agent library.

use std::io;
use std::time::Duration;

/// Result type for SDN operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing, compiling or applying a network model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or inconsistent model field.
    #[error("{0}")]
    Validation(String),

    /// Missing, colliding or category-mismatching cross-reference.
    #[error("{0}")]
    Reference(String),

    /// The validated model could not be turned into configuration items.
    #[error("compile error: {0}")]
    Compile(String),

    /// Netlink request failed.
    #[error("netlink error: {0}")]
    Netlink(#[from] nlink::Error),

    /// External tool exited with a non-zero status.
    #[error("command `{cmd}` failed ({status}): {output}")]
    Command {
        cmd: String,
        status: String,
        output: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Process start or stop exceeded its bound.
    #[error("timeout waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    /// Interface with the given MAC or name is not present.
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// A daemon that should be started is running already.
    #[error("already running: {0}")]
    AlreadyRunning(String),

    /// A configurator was handed an item of a different type.
    #[error("unexpected item type: expected {expected}, got {got}")]
    UnexpectedItem {
        expected: &'static str,
        got: &'static str,
    },

    /// Operation is not supported for this item type.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    /// Returns true for errors caused by the submitted model itself.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Reference(_))
    }

    /// Returns true for referential (cross-reference) errors.
    pub fn is_reference(&self) -> bool {
        matches!(self, Error::Reference(_))
    }

    /// Returns true if the kernel reported that the object already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Netlink(e) => e.is_already_exists(),
            Error::Command { output, .. } => output.contains("File exists"),
            _ => false,
        }
    }

    /// Returns true if the kernel reported that the object is missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Netlink(e) => e.is_not_found(),
            Error::InterfaceNotFound(_) => true,
            Error::Command { output, .. } => {
                ["No such", "Cannot find", "No chain", "does not exist"]
                    .iter()
                    .any(|needle| output.contains(needle))
            }
            _ => false,
        }
    }

    /// Returns true for timeout errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn reference(msg: impl Into<String>) -> Self {
        Error::Reference(msg.into())
    }

    pub(crate) fn compile(msg: impl Into<String>) -> Self {
        Error::Compile(msg.into())
    }
}

/// Address errors past validation are compile errors.
impl From<crate::util::addr::AddrError> for Error {
    fn from(e: crate::util::addr::AddrError) -> Self {
        Error::Compile(e.to_string())
    }
}
