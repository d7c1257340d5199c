//! Error types for the control runtime
//!
//! Only structural problems become errors. Not-found conditions are reported as
//! `false`/`None` by the CRUD operations, and side-channel failures (connections
//! not acknowledging an update) are logged and swallowed at the call site.

use thiserror::Error;

/// Errors raised while constructing or loading controls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Persisted model type does not match the runtime control being built
    #[error("Control '{control_id}' has type '{actual}', expected '{expected}'")]
    TypeMismatch {
        control_id: String,
        expected: &'static str,
        actual: String,
    },

    /// A control with this id is already registered
    #[error("Control '{0}' already exists")]
    DuplicateId(String),

    /// The control model has no steps
    #[error("Control '{0}' must have at least one step")]
    NoSteps(String),

    /// The target location is outside of the configured grid
    #[error("Location {0} is outside the configured grid")]
    InvalidLocation(String),

    /// Preset not published by the connection
    #[error("Preset '{preset_id}' not found on connection '{connection_id}'")]
    PresetNotFound {
        connection_id: String,
        preset_id: String,
    },
}

/// Errors raised by the expression evaluator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot apply '{op}' to {operand}")]
    InvalidOperand { op: String, operand: String },

    #[error("Division by zero")]
    DivisionByZero,
}

/// Errors reported by connection instances
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection '{0}' is not running")]
    NotRunning(String),

    #[error("Connection '{connection_id}' does not know action '{definition_id}'")]
    UnknownAction {
        connection_id: String,
        definition_id: String,
    },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let err = ControlError::TypeMismatch {
            control_id: "bank:abc".to_string(),
            expected: "button",
            actual: "trigger".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Control 'bank:abc' has type 'trigger', expected 'button'"
        );
    }
}
