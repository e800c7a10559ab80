//! Structural validation of code blocks before they are loaded.

use crate::code_block::CodeBlock;
use crate::opcode::Operand;
use thiserror::Error;

/// Reasons a code block is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// A register operand is outside the frame
    #[error("{function}: instruction {pc} uses register {register} but the frame has {limit}")]
    RegisterOutOfRange {
        /// Offending function
        function: String,
        /// Instruction index
        pc: u32,
        /// Register used
        register: u32,
        /// Register count of the frame
        limit: u32,
    },
    /// A table index is outside its table
    #[error("{function}: instruction {pc} references {table} entry {index} of {len}")]
    IndexOutOfRange {
        /// Offending function
        function: String,
        /// Instruction index
        pc: u32,
        /// Which table
        table: &'static str,
        /// Index used
        index: u32,
        /// Table length
        len: u32,
    },
    /// A branch or handler leaves the instruction stream
    #[error("{function}: jump target {target} out of range")]
    BadJumpTarget {
        /// Offending function
        function: String,
        /// Target index
        target: u32,
    },
    /// Execution could run past the last instruction
    #[error("{function}: control falls off the end of the code block")]
    MissingTerminator {
        /// Offending function
        function: String,
    },
    /// Variable and parameter counts disagree
    #[error("{function}: inconsistent frame layout ({detail})")]
    BadFrameLayout {
        /// Offending function
        function: String,
        /// What is wrong
        detail: String,
    },
}

impl CodeBlock {
    /// Check every operand, jump target and handler of this block and all
    /// nested functions.
    pub fn validate(&self) -> Result<(), BytecodeError> {
        let function = self.name.clone().unwrap_or_else(|| "<program>".to_string());

        if self.num_params > self.num_vars
            || self.num_vars > self.num_registers
            || self.variables.len() as u32 != self.num_vars
        {
            return Err(BytecodeError::BadFrameLayout {
                function,
                detail: format!(
                    "params {}, vars {}, registers {}, named variables {}",
                    self.num_params,
                    self.num_vars,
                    self.num_registers,
                    self.variables.len()
                ),
            });
        }
        for &identifier in &self.variables {
            self.check_index(&function, 0, "identifier", identifier, self.identifiers.len())?;
        }
        for layout in &self.scope_layouts {
            for &identifier in layout {
                self.check_index(&function, 0, "identifier", identifier, self.identifiers.len())?;
            }
        }

        let count = self.instructions.len() as u32;
        match self.instructions.last() {
            Some(last) if last.opcode.is_terminator() => {}
            _ => return Err(BytecodeError::MissingTerminator { function }),
        }

        for (pc, instruction) in self.instructions.iter().enumerate() {
            let pc = pc as u32;
            for operand in instruction.opcode.operands() {
                match operand {
                    Operand::Register(register) => self.check_register(&function, pc, register)?,
                    Operand::RegisterRange(first, len) => {
                        if len > 0 {
                            self.check_register(&function, pc, first)?;
                            self.check_register(&function, pc, first + len - 1)?;
                        }
                    }
                    Operand::Constant(index) => {
                        self.check_index(&function, pc, "constant", index, self.constants.len())?
                    }
                    Operand::Identifier(index) => {
                        self.check_index(&function, pc, "identifier", index, self.identifiers.len())?
                    }
                    Operand::Function(index) => {
                        self.check_index(&function, pc, "function", index, self.functions.len())?
                    }
                    Operand::ScopeLayout(index) => {
                        self.check_index(&function, pc, "scope layout", index, self.scope_layouts.len())?
                    }
                    Operand::PropertyCache(index) => self.check_index(
                        &function,
                        pc,
                        "property cache",
                        index,
                        self.property_cache_count as usize,
                    )?,
                    Operand::CallCache(index) => self.check_index(
                        &function,
                        pc,
                        "call cache",
                        index,
                        self.call_cache_count as usize,
                    )?,
                    Operand::Target(target) => {
                        if target >= count {
                            return Err(BytecodeError::BadJumpTarget { function, target });
                        }
                    }
                }
            }
        }

        for handler in &self.handlers {
            if handler.start > handler.end || handler.end > count {
                return Err(BytecodeError::BadJumpTarget {
                    function,
                    target: handler.end,
                });
            }
            if handler.target >= count {
                return Err(BytecodeError::BadJumpTarget {
                    function,
                    target: handler.target,
                });
            }
        }

        for nested in &self.functions {
            nested.validate()?;
        }
        Ok(())
    }

    fn check_register(&self, function: &str, pc: u32, register: u32) -> Result<(), BytecodeError> {
        if register >= self.num_registers {
            return Err(BytecodeError::RegisterOutOfRange {
                function: function.to_string(),
                pc,
                register,
                limit: self.num_registers,
            });
        }
        Ok(())
    }

    fn check_index(
        &self,
        function: &str,
        pc: u32,
        table: &'static str,
        index: u32,
        len: usize,
    ) -> Result<(), BytecodeError> {
        if index as usize >= len {
            return Err(BytecodeError::IndexOutOfRange {
                function: function.to_string(),
                pc,
                table,
                index,
                len: len as u32,
            });
        }
        Ok(())
    }
}
