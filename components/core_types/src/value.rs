//! NaN-boxed value representation.
//!
//! Every value is a single 64-bit word. Numbers are stored as their IEEE-754
//! bits. The negative quiet-NaN space, which no canonical double occupies,
//! carries the remaining types:
//!
//! ```text
//! 0x0000_..._0000 - 0xFFF0_..._0000   doubles (NaN canonicalized to 0x7FF8_0000_0000_0000)
//! 0xFFF9_0000_0000_0000               undefined
//! 0xFFFA_0000_0000_0000               null
//! 0xFFFB_0000_0000_000b               boolean (b = 0 or 1)
//! 0xFFFC_gggg_iiii_iiii               cell reference (generation g, index i)
//! 0xFFFD_0000_0000_0000               empty (array holes, never observable)
//! ```

use crate::cell::CellId;
use std::fmt;

const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;
const TAG_MASK: u64 = 0xFFFF_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_UNDEFINED: u64 = 0xFFF9_0000_0000_0000;
const TAG_NULL: u64 = 0xFFFA_0000_0000_0000;
const TAG_BOOLEAN: u64 = 0xFFFB_0000_0000_0000;
const TAG_CELL: u64 = 0xFFFC_0000_0000_0000;
const TAG_EMPTY: u64 = 0xFFFD_0000_0000_0000;

/// A tagged language value.
///
/// Equality on `Value` is bit identity: `0.0` and `-0.0` differ, and two NaNs
/// compare equal because NaN is canonicalized. Language-level equality lives
/// in the interpreter's runtime.
///
/// # Examples
///
/// ```
/// use core_types::{Value, Decoded};
///
/// let n = Value::number(1.5);
/// assert_eq!(n.as_number(), Some(1.5));
/// assert!(Value::undefined().is_undefined());
/// assert!(matches!(Value::boolean(true).decode(), Decoded::Boolean(true)));
/// assert!(Value::number(f64::NAN).as_number().unwrap().is_nan());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

/// A value unpacked into a plain enum for pattern matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// A double-precision number
    Number(f64),
    /// `true` or `false`
    Boolean(bool),
    /// The null sentinel
    Null,
    /// The undefined sentinel
    Undefined,
    /// Reference to a heap cell (object, string, function, activation, array)
    Cell(CellId),
    /// Hole marker
    Empty,
}

impl Value {
    /// Encodes a number. NaN payloads are canonicalized.
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            Value(CANONICAL_NAN)
        } else {
            Value(n.to_bits())
        }
    }

    /// Encodes a boolean.
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Value(TAG_BOOLEAN | b as u64)
    }

    /// The undefined sentinel.
    #[inline]
    pub const fn undefined() -> Self {
        Value(TAG_UNDEFINED)
    }

    /// The null sentinel.
    #[inline]
    pub const fn null() -> Self {
        Value(TAG_NULL)
    }

    /// The hole marker used by dense arrays and uninitialized slots.
    #[inline]
    pub const fn empty() -> Self {
        Value(TAG_EMPTY)
    }

    /// Encodes a reference to a heap cell.
    #[inline]
    pub const fn from_cell(id: CellId) -> Self {
        Value(TAG_CELL | (id.to_payload() & PAYLOAD_MASK))
    }

    /// Reinterprets a raw word. Unknown tags decode as NaN.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    /// The raw encoded word.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Unpacks the value.
    pub fn decode(self) -> Decoded {
        if self.0 < TAG_UNDEFINED {
            return Decoded::Number(f64::from_bits(self.0));
        }
        match self.0 & TAG_MASK {
            TAG_UNDEFINED => Decoded::Undefined,
            TAG_NULL => Decoded::Null,
            TAG_BOOLEAN => Decoded::Boolean(self.0 & 1 == 1),
            TAG_CELL => Decoded::Cell(CellId::from_payload(self.0 & PAYLOAD_MASK)),
            TAG_EMPTY => Decoded::Empty,
            _ => Decoded::Number(f64::NAN),
        }
    }

    /// True for numbers.
    #[inline]
    pub fn is_number(self) -> bool {
        self.0 < TAG_UNDEFINED || self.0 >= TAG_EMPTY + (1 << 48)
    }

    /// True for `true` and `false`.
    #[inline]
    pub fn is_boolean(self) -> bool {
        self.0 & TAG_MASK == TAG_BOOLEAN
    }

    /// True for undefined.
    #[inline]
    pub fn is_undefined(self) -> bool {
        self.0 == TAG_UNDEFINED
    }

    /// True for null.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == TAG_NULL
    }

    /// True for undefined or null.
    #[inline]
    pub fn is_nullish(self) -> bool {
        self.is_undefined() || self.is_null()
    }

    /// True for the hole marker.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == TAG_EMPTY
    }

    /// True for cell references.
    #[inline]
    pub fn is_cell(self) -> bool {
        self.0 & TAG_MASK == TAG_CELL
    }

    /// The number, if this is one.
    #[inline]
    pub fn as_number(self) -> Option<f64> {
        match self.decode() {
            Decoded::Number(n) => Some(n),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        if self.is_boolean() {
            Some(self.0 & 1 == 1)
        } else {
            None
        }
    }

    /// The cell handle, if this is a reference.
    #[inline]
    pub fn as_cell(self) -> Option<CellId> {
        if self.is_cell() {
            Some(CellId::from_payload(self.0 & PAYLOAD_MASK))
        } else {
            None
        }
    }

    /// The number as an `i32` when it is integral and in range.
    pub fn as_i32(self) -> Option<i32> {
        let n = self.as_number()?;
        let i = n as i32;
        if i as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
            Some(i)
        } else {
            None
        }
    }

    /// The number as an array index when it is a non-negative integer below `u32::MAX`.
    pub fn as_array_index(self) -> Option<u32> {
        let n = self.as_number()?;
        if n >= 0.0 && n < u32::MAX as f64 && n.fract() == 0.0 {
            Some(n as u32)
        } else {
            None
        }
    }

    /// Truthiness of non-cell values.
    ///
    /// Cells are always truthy except empty strings, which only the heap can
    /// tell apart; callers holding a heap refine this answer.
    pub fn is_truthy(self) -> bool {
        match self.decode() {
            Decoded::Number(n) => n != 0.0 && !n.is_nan(),
            Decoded::Boolean(b) => b,
            Decoded::Null | Decoded::Undefined | Decoded::Empty => false,
            Decoded::Cell(_) => true,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::undefined()
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<CellId> for Value {
    fn from(id: CellId) -> Self {
        Value::from_cell(id)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Decoded::Number(n) => f.debug_tuple("Number").field(&n).finish(),
            Decoded::Boolean(b) => f.debug_tuple("Boolean").field(&b).finish(),
            Decoded::Null => write!(f, "Null"),
            Decoded::Undefined => write!(f, "Undefined"),
            Decoded::Cell(id) => f.debug_tuple("Cell").field(&id).finish(),
            Decoded::Empty => write!(f, "Empty"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Decoded::Number(n) => f.write_str(&crate::number::format_number(n)),
            Decoded::Boolean(b) => write!(f, "{}", b),
            Decoded::Null => write!(f, "null"),
            Decoded::Undefined | Decoded::Empty => write!(f, "undefined"),
            Decoded::Cell(id) => write!(f, "[cell {}]", id),
        }
    }
}
