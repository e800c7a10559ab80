//! Tagged values, cell handles and error types for the execution core.
//!
//! # Overview
//!
//! - [`Value`] - NaN-boxed 64-bit language value
//! - [`CellId`] - generation-checked handle to a heap cell
//! - [`ErrorKind`] - classification of language-level errors
//! - [`VmError`] - abnormal completion reported to embedders
//! - [`JsError`] - rendered report of an uncaught exception
//! - [`SourcePosition`] / [`StackFrame`] - locations for reports and debugger events
//!
//! # Examples
//!
//! ```
//! use core_types::{CellId, Value, VmError};
//!
//! let num = Value::number(42.0);
//! assert!(num.is_truthy());
//! assert_eq!(num.to_string(), "42");
//!
//! let obj = Value::from_cell(CellId::new(1, 0));
//! assert!(obj.is_cell());
//!
//! let err = VmError::Interrupted;
//! assert!(!err.is_catchable());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod cell;
mod error;
mod number;
mod source;
mod value;

pub use cell::CellId;
pub use error::{ErrorKind, JsError, VmError};
pub use number::{format_number, parse_number, to_int32, to_uint32};
pub use source::{SourcePosition, StackFrame};
pub use value::{Decoded, Value};
