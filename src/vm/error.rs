//! Error kinds (spec §6 "Error codes", §7).

use crate::value::LuaValue;
use thiserror::Error;

/// The four codes a protected call can return. `Ok` isn't a variant —
/// success is `Result::Ok(_)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LuaError {
    #[error("runtime error")]
    Runtime,
    #[error("syntax error")]
    Syntax,
    #[error("out of memory")]
    Memory,
}

/// The error actually propagated through the engine: a cheap kind tag
/// plus the human-readable message and, for `error()`-raised
/// non-string values, the raw value that was thrown.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: LuaError,
    pub message: String,
    pub value: Option<LuaValue>,
}

impl RuntimeError {
    pub fn syntax(source: &str, line: u32, message: String) -> Self {
        RuntimeError {
            kind: LuaError::Syntax,
            message: format!("{}:{}: {}", source, line, message),
            value: None,
        }
    }

    pub fn runtime(source: &str, line: u32, message: String) -> Self {
        RuntimeError {
            kind: LuaError::Runtime,
            message: format!("{}:{}: {}", source, line, message),
            value: None,
        }
    }

    pub fn memory() -> Self {
        RuntimeError {
            kind: LuaError::Memory,
            message: "not enough memory".to_string(),
            value: None,
        }
    }

    /// A `error(v)` call with an arbitrary (often non-string) value.
    pub fn raised(value: LuaValue, message: String) -> Self {
        RuntimeError {
            kind: LuaError::Runtime,
            message,
            value: Some(value),
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}
