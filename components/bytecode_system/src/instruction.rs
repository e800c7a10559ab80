//! Bytecode instruction representation
//!
//! An opcode paired with the source position it was generated from.

use crate::opcode::Opcode;
use core_types::SourcePosition;
use serde::{Deserialize, Serialize};

/// A single bytecode instruction with optional source mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The opcode for this instruction
    pub opcode: Opcode,
    /// Optional source position for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_position: Option<SourcePosition>,
}

impl Instruction {
    /// Create a new instruction without source position
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            source_position: None,
        }
    }

    /// Create a new instruction with source position
    pub fn with_position(opcode: Opcode, position: SourcePosition) -> Self {
        Self {
            opcode,
            source_position: Some(position),
        }
    }

    /// Source line, 0 when unknown
    pub fn line(&self) -> u32 {
        self.source_position.map(|pos| pos.line).unwrap_or(0)
    }
}
