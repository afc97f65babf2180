#![forbid(unsafe_code)]

//! Error taxonomy for observation and registration.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | `InvalidArgument` | Observed value is not an object | Returned from construction |
//! | `NotFound` | Unknown observer handle | Returned from `Observer::add_listener` |
//! | `NameCollision` | Object defines `addListener` itself | Logged, never returned |
//! | `ConfigInvalid` | Unparseable env var | Reported as a diagnostic, default kept |

use std::fmt;

use serde_json::Value;

use crate::observer::Handle;

/// Errors from observing objects and registering listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveError {
    /// The value cannot support property interception (not a JSON object).
    InvalidArgument {
        /// JSON kind that was received (`"array"`, `"string"`, ...).
        kind: &'static str,
    },
    /// No observable is stored under the handle.
    NotFound { handle: Handle },
    /// The wrapped object already defines the reserved registration name.
    NameCollision { name: &'static str },
    /// A configuration value could not be parsed.
    ConfigInvalid { key: &'static str, value: String },
}

impl ObserveError {
    pub(crate) fn invalid_argument(value: &Value) -> Self {
        Self::InvalidArgument {
            kind: json_kind(value),
        }
    }
}

impl fmt::Display for ObserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { kind } => {
                write!(f, "cannot observe a JSON {kind}: expected an object")
            }
            Self::NotFound { handle } => write!(f, "no observed object at handle {handle}"),
            Self::NameCollision { name } => write!(
                f,
                "{name} exists as a property on the original object, preventing override"
            ),
            Self::ConfigInvalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ObserveError {}

/// Short name for the JSON kind of `value`.
#[must_use]
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invalid_argument_names_the_kind() {
        let err = ObserveError::invalid_argument(&json!([1, 2]));
        assert_eq!(err, ObserveError::InvalidArgument { kind: "array" });
        assert_eq!(
            err.to_string(),
            "cannot observe a JSON array: expected an object"
        );
    }

    #[test]
    fn not_found_display() {
        let err = ObserveError::NotFound {
            handle: Handle::new(7),
        };
        assert_eq!(err.to_string(), "no observed object at handle 7");
    }

    #[test]
    fn name_collision_display() {
        let err = ObserveError::NameCollision {
            name: "addListener",
        };
        assert!(err.to_string().starts_with("addListener exists"));
    }

    #[test]
    fn json_kinds() {
        assert_eq!(json_kind(&Value::Null), "null");
        assert_eq!(json_kind(&json!(true)), "boolean");
        assert_eq!(json_kind(&json!(1.5)), "number");
        assert_eq!(json_kind(&json!("x")), "string");
        assert_eq!(json_kind(&json!({})), "object");
    }
}
