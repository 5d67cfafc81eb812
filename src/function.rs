use crate::error::{BridgeError, Result};
use serde::Deserialize;
use std::fmt::{Display, Formatter};

/// Secure functions that can be evaluated in the boolean domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureFunction {
    /// `max(0, x)` per value
    Relu,
}

#[derive(Debug, Deserialize)]
struct FunctionDescriptor {
    function: String,
}

impl SecureFunction {
    /// Decodes a descriptor document such as `{"function": "Relu"}`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        let descriptor: FunctionDescriptor = serde_json::from_str(descriptor)?;
        descriptor.function.parse()
    }

    pub fn name(&self) -> &'static str {
        match self {
            SecureFunction::Relu => "Relu",
        }
    }
}

impl std::str::FromStr for SecureFunction {
    type Err = BridgeError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "Relu" => Ok(SecureFunction::Relu),
            other => Err(BridgeError::UnknownFunction(other.to_string())),
        }
    }
}

impl Display for SecureFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relu_descriptor() {
        let function = SecureFunction::from_descriptor(r#"{"function": "Relu"}"#).unwrap();
        assert_eq!(function, SecureFunction::Relu);
        assert_eq!(function.to_string(), "Relu");
    }

    #[test]
    fn test_extra_fields_ignored() {
        let function =
            SecureFunction::from_descriptor(r#"{"function": "Relu", "bound": 6.0}"#).unwrap();
        assert_eq!(function, SecureFunction::Relu);
    }

    #[test]
    fn test_unknown_function() {
        let err = SecureFunction::from_descriptor(r#"{"function": "Sigmoid"}"#).unwrap_err();
        assert!(matches!(&err, BridgeError::UnknownFunction(name) if name == "Sigmoid"));
        assert!(err.to_string().contains("Sigmoid"));
    }

    #[test]
    fn test_missing_function_field() {
        let err = SecureFunction::from_descriptor(r#"{"name": "Relu"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Descriptor(_)));
    }

    #[test]
    fn test_malformed_descriptor() {
        let err = SecureFunction::from_descriptor("Relu").unwrap_err();
        assert!(matches!(err, BridgeError::Descriptor(_)));

        let err = SecureFunction::from_descriptor(r#"{"function": 3}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Descriptor(_)));
    }
}
