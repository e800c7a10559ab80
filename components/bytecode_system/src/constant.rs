//! Constant pool entries
//!
//! Literals as produced by the front end. Strings become heap cells when a
//! code block is loaded; everything else maps directly onto a tagged value.

use serde::{Deserialize, Serialize};

/// A constant pool literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// Number literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// null
    Null,
    /// undefined
    Undefined,
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::String(s.to_string())
    }
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Boolean(b)
    }
}
