//! Source positions and stack frames for error reports and debugger events.

use serde::{Deserialize, Serialize};

/// A position in the source text a code block was generated from.
///
/// # Examples
///
/// ```
/// use core_types::SourcePosition;
///
/// let pos = SourcePosition::new(10, 5);
/// assert_eq!(pos.line, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
}

impl SourcePosition {
    /// Creates a position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the function, or None for anonymous functions and programs
    pub function_name: Option<String>,
    /// Line being executed in that frame, 0 when unknown
    pub line: u32,
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.function_name.as_deref().unwrap_or("<anonymous>");
        if self.line > 0 {
            write!(f, "{} (line {})", name, self.line)
        } else {
            write!(f, "{}", name)
        }
    }
}
