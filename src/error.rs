//! Unified error types for vpcctl

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::fabric::Operation;

/// Main error type for fabric operations
#[derive(Error, Debug)]
pub enum Error {
    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Policy file errors
    #[error("Failed to read policy file '{path}': {source}")]
    PolicyRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse policy file '{path}': {source}")]
    PolicyParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid policy: {0}")]
    PolicyValidation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Entity errors
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    // Kernel errors
    #[error("Command '{command}' failed ({status}): {stderr}")]
    KernelCommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run '{command}': {source}")]
    CommandSpawn { command: String, source: io::Error },

    // Operation errors
    #[error("{operation} '{target}' failed at step '{step}' after {} completed step(s): {source}", .completed.len())]
    StepFailed {
        operation: Operation,
        target: String,
        step: String,
        /// Steps applied before the failure, in order; not rolled back
        completed: Vec<String>,
        source: Box<Error>,
    },

    #[error("{operation} '{target}' finished with {} failed cleanup step(s): {}", .failures.len(), .failures.join("; "))]
    PartialTeardownFailure {
        operation: Operation,
        target: String,
        failures: Vec<String>,
    },

    #[error("{operation} '{target}': {source}")]
    Operation {
        operation: Operation,
        target: String,
        source: Box<Error>,
    },

    // Locking errors
    #[error("Another vpcctl operation holds the fabric lock '{0}'")]
    FabricLocked(PathBuf),

    #[error("Failed to open lock file '{path}': {source}")]
    LockOpen { path: PathBuf, source: io::Error },

    #[error("Failed to lock '{path}': {source}")]
    Lock { path: PathBuf, source: nix::Error },
}

impl Error {
    /// Build a `NotFound` for an entity kind
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Build an `AlreadyExists` for an entity kind
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind,
            name: name.into(),
        }
    }
}

impl Error {
    /// Name the operation and target an error occurred in
    ///
    /// Step and teardown failures already carry both and are returned as is.
    pub fn during(self, operation: Operation, target: impl Into<String>) -> Self {
        match self {
            Error::StepFailed { .. }
            | Error::PartialTeardownFailure { .. }
            | Error::Operation { .. } => self,
            other => Error::Operation {
                operation,
                target: target.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for vpcctl operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_during_names_operation_and_target() {
        let err = Error::KernelCommandFailed {
            command: "ip netns list".into(),
            status: "exit 1".into(),
            stderr: "Permission denied".into(),
        }
        .during(Operation::ListVpcs, "*");

        assert_eq!(
            err.to_string(),
            "list-vpcs '*': Command 'ip netns list' failed (exit 1): Permission denied"
        );
    }

    #[test]
    fn test_during_keeps_step_failures() {
        let err = Error::StepFailed {
            operation: Operation::AddSubnet,
            target: "web".into(),
            step: "create namespace web".into(),
            completed: Vec::new(),
            source: Box::new(Error::InvalidCidr("x".into())),
        }
        .during(Operation::CreateVpc, "other");

        assert!(
            err.to_string()
                .starts_with("add-subnet 'web' failed at step 'create namespace web'")
        );
    }
}
