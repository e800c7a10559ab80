//! Language semantics shared by the interpreter, the stubs and compiled code:
//! conversions, operators and error construction.

use crate::vm::{Unwind, Vm};
use core_types::{format_number, parse_number, to_int32, to_uint32, CellId, Decoded, ErrorKind, Value, VmError};
use memory_manager::{CellData, CellKind, PropertyAttributes};
use std::cmp::Ordering;

/// Nesting limit when rendering arrays of arrays
const MAX_DISPLAY_DEPTH: usize = 8;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
    /// `>>>`
    UnsignedShiftRight,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `===`
    StrictEqual,
    /// `!==`
    StrictNotEqual,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `x + 1` after numeric conversion
    Increment,
    /// `x - 1` after numeric conversion
    Decrement,
    /// `!x`
    Not,
    /// `typeof x`
    TypeOf,
    /// `+x`
    ToNumber,
}

/// Coarse type of a value for equality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Number,
    Boolean,
    Null,
    Undefined,
    String,
    Object,
}

impl Vm {
    // ------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------

    /// Truthiness; the empty string is falsy
    pub fn to_boolean(&self, value: Value) -> bool {
        match value.as_cell() {
            Some(_) => match self.string_value(value) {
                Some(text) => !text.is_empty(),
                None => true,
            },
            None => value.is_truthy(),
        }
    }

    /// Numeric conversion; objects go through their string form
    pub fn to_number(&self, value: Value) -> f64 {
        match value.decode() {
            Decoded::Number(n) => n,
            Decoded::Boolean(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Decoded::Null => 0.0,
            Decoded::Undefined | Decoded::Empty => f64::NAN,
            Decoded::Cell(_) => match self.string_value(value) {
                Some(text) => parse_number(text),
                None => parse_number(&self.to_display_string(value)),
            },
        }
    }

    /// String conversion used for concatenation, keys and printing
    pub fn to_display_string(&self, value: Value) -> String {
        self.display(value, 0)
    }

    fn display(&self, value: Value, depth: usize) -> String {
        let id = match value.decode() {
            Decoded::Number(n) => return format_number(n),
            Decoded::Boolean(b) => return b.to_string(),
            Decoded::Null => return "null".to_string(),
            Decoded::Undefined | Decoded::Empty => return "undefined".to_string(),
            Decoded::Cell(id) => id,
        };
        let Some(cell) = self.heap.cell(id) else {
            return "undefined".to_string();
        };
        match &cell.data {
            CellData::String(text) => text.clone(),
            CellData::Array(elements) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return String::new();
                }
                elements
                    .iter()
                    .map(|element| {
                        if element.is_nullish() || element.is_empty() {
                            String::new()
                        } else {
                            self.display(*element, depth + 1)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            CellData::Function(function) => {
                let name = function
                    .name
                    .map(|name| self.heap.atoms().name(name).to_string())
                    .unwrap_or_default();
                format!("function {name}() {{ [code] }}")
            }
            CellData::Activation(_) => "[scope]".to_string(),
            CellData::Plain => {
                if self.is_error_object(id) {
                    self.error_display(id)
                } else {
                    "[object Object]".to_string()
                }
            }
        }
    }

    fn error_display(&self, id: CellId) -> String {
        let name = self.heap.get_property(id, self.names.name);
        let message = self.heap.get_property(id, self.names.message);
        let name = self.string_value(name).unwrap_or("Error").to_string();
        let message = if message.is_undefined() {
            String::new()
        } else {
            self.display(message, MAX_DISPLAY_DEPTH)
        };
        if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        }
    }

    /// Result of `typeof`
    pub fn type_of(&self, value: Value) -> &'static str {
        match value.decode() {
            Decoded::Number(_) => "number",
            Decoded::Boolean(_) => "boolean",
            Decoded::Null => "object",
            Decoded::Undefined | Decoded::Empty => "undefined",
            Decoded::Cell(id) => match self.heap.cell(id).map(|cell| cell.kind()) {
                Some(CellKind::String) => "string",
                Some(CellKind::Function) => "function",
                Some(_) => "object",
                None => "undefined",
            },
        }
    }

    pub(crate) fn to_string_value(&mut self, value: Value) -> Result<Value, Unwind> {
        if self.string_value(value).is_some() {
            return Ok(value);
        }
        let text = self.to_display_string(value);
        self.allocate_string(&text)
    }

    fn category(&self, value: Value) -> Category {
        match value.decode() {
            Decoded::Number(_) => Category::Number,
            Decoded::Boolean(_) => Category::Boolean,
            Decoded::Null => Category::Null,
            Decoded::Undefined | Decoded::Empty => Category::Undefined,
            Decoded::Cell(_) => {
                if self.string_value(value).is_some() {
                    Category::String
                } else {
                    Category::Object
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Equality and comparison
    // ------------------------------------------------------------------

    /// `===`
    pub fn strict_equals(&self, lhs: Value, rhs: Value) -> bool {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return a == b;
        }
        match (self.string_value(lhs), self.string_value(rhs)) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                let (lhs, rhs) = (normalize_empty(lhs), normalize_empty(rhs));
                lhs.to_bits() == rhs.to_bits()
            }
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, lhs: Value, rhs: Value) -> bool {
        let (a, b) = (self.category(lhs), self.category(rhs));
        if a == b {
            return self.strict_equals(lhs, rhs);
        }
        match (a, b) {
            (Category::Null | Category::Undefined, Category::Null | Category::Undefined) => true,
            (Category::Null | Category::Undefined, _) | (_, Category::Null | Category::Undefined) => false,
            (Category::Number, Category::String) | (Category::String, Category::Number) => {
                self.to_number(lhs) == self.to_number(rhs)
            }
            (Category::Boolean, _) => self.loose_equals(Value::number(self.to_number(lhs)), rhs),
            (_, Category::Boolean) => self.loose_equals(lhs, Value::number(self.to_number(rhs))),
            (Category::Object, Category::Number) => self.to_number(lhs) == self.to_number(rhs),
            (Category::Number, Category::Object) => self.to_number(lhs) == self.to_number(rhs),
            (Category::Object, Category::String) | (Category::String, Category::Object) => {
                self.to_display_string(lhs) == self.to_display_string(rhs)
            }
            _ => false,
        }
    }

    /// Abstract relational comparison; `None` when either side is NaN
    pub fn compare(&self, lhs: Value, rhs: Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return a.partial_cmp(&b);
        }
        let string_like = |value: Value| self.category(value) == Category::String || self.is_object(value);
        if string_like(lhs) && string_like(rhs) {
            let (a, b) = (self.to_display_string(lhs), self.to_display_string(rhs));
            return Some(a.encode_utf16().cmp(b.encode_utf16()));
        }
        self.to_number(lhs).partial_cmp(&self.to_number(rhs))
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Apply a binary operator
    pub fn binary_op(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Unwind> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(numeric_binary(op, a, b));
        }
        let result = match op {
            BinaryOp::Add => return self.add(lhs, rhs),
            BinaryOp::Equal => Value::boolean(self.loose_equals(lhs, rhs)),
            BinaryOp::NotEqual => Value::boolean(!self.loose_equals(lhs, rhs)),
            BinaryOp::StrictEqual => Value::boolean(self.strict_equals(lhs, rhs)),
            BinaryOp::StrictNotEqual => Value::boolean(!self.strict_equals(lhs, rhs)),
            BinaryOp::Less => Value::boolean(self.compare(lhs, rhs) == Some(Ordering::Less)),
            BinaryOp::LessEq => Value::boolean(matches!(
                self.compare(lhs, rhs),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::Greater => Value::boolean(self.compare(lhs, rhs) == Some(Ordering::Greater)),
            BinaryOp::GreaterEq => Value::boolean(matches!(
                self.compare(lhs, rhs),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            _ => {
                let (a, b) = (self.to_number(lhs), self.to_number(rhs));
                numeric_binary(op, a, b)
            }
        };
        Ok(result)
    }

    fn add(&mut self, lhs: Value, rhs: Value) -> Result<Value, Unwind> {
        let textual = |vm: &Vm, value: Value| vm.category(value) == Category::String || vm.is_object(value);
        if textual(self, lhs) || textual(self, rhs) {
            let mut text = self.to_display_string(lhs);
            text.push_str(&self.to_display_string(rhs));
            return self.allocate_string(&text);
        }
        Ok(Value::number(self.to_number(lhs) + self.to_number(rhs)))
    }

    /// Apply a unary operator
    pub fn unary_op(&mut self, op: UnaryOp, operand: Value) -> Result<Value, Unwind> {
        let result = match op {
            UnaryOp::Negate => Value::number(-self.to_number(operand)),
            UnaryOp::Increment => Value::number(self.to_number(operand) + 1.0),
            UnaryOp::Decrement => Value::number(self.to_number(operand) - 1.0),
            UnaryOp::Not => Value::boolean(!self.to_boolean(operand)),
            UnaryOp::ToNumber => Value::number(self.to_number(operand)),
            UnaryOp::TypeOf => {
                let name = self.type_of(operand);
                return self.allocate_string(name);
            }
        };
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    pub(crate) fn make_error(&mut self, kind: ErrorKind, message: &str) -> Result<Value, Unwind> {
        let prototype = self.intrinsics.error_prototype(kind);
        let structure = self
            .heap
            .structures_mut()
            .root(CellKind::Object, Value::from_cell(prototype));
        let object = self.allocate(structure, CellData::Plain)?;
        let text = self.allocate_string(message)?;
        let name = self.names.message;
        self.heap
            .define_property(object, name, text, PropertyAttributes::DONT_ENUM)
            .map_err(|_| Unwind::Fatal(VmError::StaleHandle))?;
        Ok(Value::from_cell(object))
    }

    /// Create and raise an error object of `kind`
    pub(crate) fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Unwind {
        tracing::debug!(target: "interpreter", kind = kind.name(), message, "runtime error");
        match self.make_error(kind, message) {
            Ok(error) => self.raise(error),
            Err(unwind) => unwind,
        }
    }

    /// Start unwinding with `value`: record the trace and tell listeners
    pub(crate) fn raise(&mut self, value: Value) -> Unwind {
        self.heap.push_temporary(value);
        self.last_raised = Some(value);
        self.exception_trace = self.capture_trace();
        self.notify(crate::debugger::DebugEventKind::Exception, Some(value));
        Unwind::Throw(value)
    }

    /// Raise a value a host function returned, unless it is already unwinding
    pub(crate) fn raise_from_host(&mut self, value: Value) -> Unwind {
        if self.last_raised == Some(value) {
            Unwind::Throw(value)
        } else {
            self.raise(value)
        }
    }
}

fn normalize_empty(value: Value) -> Value {
    if value.is_empty() {
        Value::undefined()
    } else {
        value
    }
}

fn numeric_binary(op: BinaryOp, a: f64, b: f64) -> Value {
    match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Div => Value::number(a / b),
        BinaryOp::Mod => Value::number(a % b),
        BinaryOp::BitAnd => Value::number((to_int32(a) & to_int32(b)) as f64),
        BinaryOp::BitOr => Value::number((to_int32(a) | to_int32(b)) as f64),
        BinaryOp::BitXor => Value::number((to_int32(a) ^ to_int32(b)) as f64),
        BinaryOp::ShiftLeft => Value::number(to_int32(a).wrapping_shl(to_uint32(b) & 31) as f64),
        BinaryOp::ShiftRight => Value::number((to_int32(a) >> (to_uint32(b) & 31)) as f64),
        BinaryOp::UnsignedShiftRight => Value::number((to_uint32(a) >> (to_uint32(b) & 31)) as f64),
        BinaryOp::Less => Value::boolean(a < b),
        BinaryOp::LessEq => Value::boolean(a <= b),
        BinaryOp::Greater => Value::boolean(a > b),
        BinaryOp::GreaterEq => Value::boolean(a >= b),
        BinaryOp::Equal | BinaryOp::StrictEqual => Value::boolean(a == b),
        BinaryOp::NotEqual | BinaryOp::StrictNotEqual => Value::boolean(a != b),
    }
}
