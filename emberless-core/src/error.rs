//! Custom error types for Emberless.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FunctionName;

/// Top-level error type for the Emberless lifecycle core.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum EmberError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Invocation Errors - One Variant Per Caller-Visible Outcome
    // =========================================================================
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function already exists: {0}")]
    FunctionAlreadyExists(FunctionName),

    #[error("Failed to start backend for {function}: {source}")]
    ContainerStart {
        function: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Invocation of {function} failed: {source}")]
    Invocation {
        function: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Circuit is open after {failures} consecutive failures")]
    CircuitOpen { failures: u32 },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors cause immediate process termination.
/// Used when configuration is invalid and the system cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Duplicate function name: {name}")]
    DuplicateFunction { name: String },
}

/// Container runtime client errors.
/// Lifecycle operations wrap these with the function name for context.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container {name} has no {field} in inspect response")]
    MissingField { name: String, field: &'static str },

    #[error("Container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Timed out waiting for an in-flight lifecycle operation on {0}")]
    LockTimeout(String),
}

/// Result type alias using EmberError.
pub type EmberResult<T> = Result<T, EmberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "callback_url",
            context: "daemon section".to_string(),
        };
        assert!(err.to_string().contains("callback_url"));
        assert!(err.to_string().contains("daemon section"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::InvalidPort {
            port: 0,
            reason: "Port must be non-zero".to_string(),
        };
        let ember_err: EmberError = validation_err.into();
        assert!(matches!(ember_err, EmberError::HardValidation(_)));
    }

    #[test]
    fn test_container_start_carries_function_context() {
        let err = EmberError::ContainerStart {
            function: "thumbnailer".to_string(),
            source: RuntimeError::NotFound("thumbnailer".to_string()),
        };
        assert!(err.to_string().contains("thumbnailer"));
    }
}
