// SPDX-License-Identifier: Apache-2.0

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a function name. The name doubles as the backend
/// container's name and its network hostname, so it must fit in a DNS label.
const MAX_FUNCTION_NAME_LEN: usize = 63;

/// Validated function name.
/// Must be non-empty, start with an alphanumeric character, and contain only
/// alphanumeric characters, hyphens, and underscores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionName(String);

impl FunctionName {
    /// Create a new FunctionName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name,
                reason: "Function name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_FUNCTION_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name.clone(),
                reason: format!(
                    "Function name too long: {} chars (max {})",
                    name.len(),
                    MAX_FUNCTION_NAME_LEN
                ),
            });
        }

        // First character must be alphanumeric (container name restriction).
        if !name.chars().next().is_some_and(|c| c.is_alphanumeric()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name,
                reason: "Function name must start with an alphanumeric character".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_name",
                value: name,
                reason: "Function name must contain only alphanumeric characters, hyphens, and underscores".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FunctionName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FunctionName> for String {
    fn from(name: FunctionName) -> Self {
        name.0
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_function_names() {
        assert!(FunctionName::new("thumbnailer").is_ok());
        assert!(FunctionName::new("resize-image_v2").is_ok());
        assert!(FunctionName::new("f1").is_ok());
        assert!(FunctionName::new("localhost").is_ok());
    }

    #[test]
    fn test_invalid_function_names() {
        assert!(FunctionName::new("").is_err());
        assert!(FunctionName::new("-leading-hyphen").is_err());
        assert!(FunctionName::new("has space").is_err());
        assert!(FunctionName::new("has/slash").is_err());
        assert!(FunctionName::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_function_name_roundtrip() {
        let name = FunctionName::new("my-func").unwrap();
        assert_eq!(name.as_str(), "my-func");
        assert_eq!(name.to_string(), "my-func");
        assert_eq!(String::from(name), "my-func");
    }

    #[test]
    fn test_port_validation() {
        assert!(Port::new(0).is_err());
        assert_eq!(Port::new(8080).unwrap().value(), 8080);
        assert_eq!(Port::new(65535).unwrap().value(), 65535);
    }
}
