use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

pub const TYPE_INTEGER: u8 = 0;
pub const TYPE_STRING: u8 = 1;
pub const TYPE_NULL: u8 = 0xFF;

/// Longest string payload a node can hold (1-byte length prefix).
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// The value an attribute holds over an interval of time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateValue {
    #[default]
    Null,
    Integer(i32),
    String(String),
}

impl StateValue {
    pub fn type_tag(&self) -> u8 {
        match self {
            StateValue::Null => TYPE_NULL,
            StateValue::Integer(_) => TYPE_INTEGER,
            StateValue::String(_) => TYPE_STRING,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StateValue::Null => "null",
            StateValue::Integer(_) => "integer",
            StateValue::String(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_integer(&self) -> Result<i32> {
        match self {
            StateValue::Integer(v) => Ok(*v),
            other => Err(Error::TypeMismatch {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            StateValue::String(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }

    /// Bytes this value occupies in a node's string section.
    ///
    /// Strings are stored as `[len: u8][bytes][0]`; other types store
    /// nothing outside the fixed record.
    pub fn variable_size(&self) -> usize {
        match self {
            StateValue::String(s) => s.len() + 2,
            _ => 0,
        }
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Integer(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::String(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::String(v)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Integer(v) => write!(f, "{}", v),
            StateValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let v = StateValue::from(12);
        assert_eq!(v.as_integer().unwrap(), 12);
        assert!(matches!(
            v.as_str(),
            Err(Error::TypeMismatch {
                expected: "string",
                actual: "integer"
            })
        ));

        let s = StateValue::from("running");
        assert_eq!(s.as_str().unwrap(), "running");
        assert!(s.as_integer().is_err());

        assert!(StateValue::Null.as_integer().is_err());
        assert!(StateValue::default().is_null());
    }

    #[test]
    fn test_variable_size() {
        assert_eq!(StateValue::Integer(5).variable_size(), 0);
        assert_eq!(StateValue::Null.variable_size(), 0);
        assert_eq!(StateValue::from("abc").variable_size(), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(StateValue::Integer(-3).to_string(), "-3");
        assert_eq!(StateValue::from("idle").to_string(), "\"idle\"");
        assert_eq!(StateValue::Null.to_string(), "null");
    }
}
