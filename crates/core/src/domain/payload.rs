// Work Payload - what a client asks the Work Engine to do

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Compute kernel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Hash,
    Prime,
    Matrix,
    Transform,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Hash => "hash",
            Operation::Prime => "prime",
            Operation::Matrix => "matrix",
            Operation::Transform => "transform",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hash" => Ok(Operation::Hash),
            "prime" => Ok(Operation::Prime),
            "matrix" => Ok(Operation::Matrix),
            "transform" => Ok(Operation::Transform),
            other => Err(DomainError::UnknownOperation(other.to_string())),
        }
    }
}

/// Work complexity level (1 = fast, 10 = slow)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Complexity(u8);

impl Complexity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(level: i64) -> Result<Self> {
        if level < Self::MIN as i64 || level > Self::MAX as i64 {
            return Err(DomainError::InvalidComplexity(level));
        }
        Ok(Self(level as u8))
    }

    pub fn level(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Complexity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Complexity> for u8 {
    fn from(c: Complexity) -> u8 {
        c.0
    }
}

/// Input to the Work Engine; immutable once a job is admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPayload {
    pub operation: Operation,
    pub complexity: Complexity,
    /// Operation-specific parameters (always a JSON object)
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl WorkPayload {
    pub fn new(operation: Operation, complexity: Complexity, data: serde_json::Value) -> Self {
        Self {
            operation,
            complexity,
            data,
        }
    }

    /// Payload with no operation-specific parameters
    pub fn simple(operation: Operation, complexity: Complexity) -> Self {
        Self::new(operation, complexity, empty_object())
    }

    /// Structural checks that do not depend on configuration
    pub fn validate(&self) -> Result<()> {
        if !self.data.is_object() {
            return Err(DomainError::ValidationError(
                "payload.data must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Size of the serialized payload in bytes
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complexity_bounds() {
        assert!(Complexity::new(0).is_err());
        assert!(Complexity::new(11).is_err());
        assert_eq!(Complexity::new(1).unwrap().level(), 1);
        assert_eq!(Complexity::new(10).unwrap().level(), 10);
    }

    #[test]
    fn test_payload_deserialize_defaults_data() {
        let payload: WorkPayload =
            serde_json::from_value(json!({"operation": "hash", "complexity": 3})).unwrap();
        assert_eq!(payload.operation, Operation::Hash);
        assert_eq!(payload.complexity.level(), 3);
        assert!(payload.data.is_object());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_payload_rejects_out_of_range_complexity() {
        let result: std::result::Result<WorkPayload, _> =
            serde_json::from_value(json!({"operation": "prime", "complexity": 42}));
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_rejects_unknown_operation() {
        let result: std::result::Result<WorkPayload, _> =
            serde_json::from_value(json!({"operation": "mine_bitcoin", "complexity": 1}));
        assert!(result.is_err());
        assert!("mine_bitcoin".parse::<Operation>().is_err());
    }

    #[test]
    fn test_payload_data_must_be_object() {
        let payload = WorkPayload::new(
            Operation::Transform,
            Complexity::new(1).unwrap(),
            json!([1, 2, 3]),
        );
        assert!(payload.validate().is_err());
    }
}
