//! Interface to an optional compiler tier
//!
//! Hot functions can be handed to a [`CompilerTier`]. The resulting
//! [`CompiledCode`] runs on the same frame the interpreter would have used and
//! talks to the runtime only through the stub table and the frame accessors
//! below, so interpreted and compiled frames interleave freely.

use crate::stubs::{StubArg, StubId, StubReturn};
use crate::vm::{Unwind, Vm};
use bytecode_system::CodeBlock;
use core_types::Value;
use memory_manager::{Atom, CodeId};
use std::fmt;
use std::sync::Arc;

/// Machine-level (or otherwise lowered) code for one code block
pub trait CompiledCode: Send + Sync + fmt::Debug {
    /// Run the current frame to completion
    ///
    /// The frame has already been pushed; the caller pops it afterwards.
    fn execute(&self, vm: &mut Vm) -> Result<Value, Unwind>;
}

/// A compiler the interpreter tiers up to
pub trait CompilerTier: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Compile `code`, or decline with `None`
    fn compile(&mut self, vm: &Vm, code: CodeId) -> Option<Arc<dyn CompiledCode>>;
}

impl Vm {
    /// Count a call of the current frame's code and tier it up when hot
    pub(crate) fn tier_up(&mut self) -> Option<Arc<dyn CompiledCode>> {
        let code = self.frames.last()?.code;
        let threshold = self.config.tier_up_threshold;
        let has_tier = self.tier.is_some();
        let entry = &mut self.codes[code.0 as usize];
        if let Some(compiled) = &entry.compiled {
            return Some(compiled.clone());
        }
        entry.call_count = entry.call_count.saturating_add(1);
        if !has_tier || entry.tier_attempted || entry.call_count < threshold {
            return None;
        }
        entry.tier_attempted = true;

        let mut tier = self.tier.take()?;
        let compiled = tier.compile(self, code);
        let name = self.codes[code.0 as usize].block.name.clone().unwrap_or_default();
        match &compiled {
            Some(_) => tracing::debug!(target: "tier", tier = tier.name(), function = %name, "compiled"),
            None => tracing::debug!(target: "tier", tier = tier.name(), function = %name, "declined"),
        }
        self.tier = Some(tier);
        self.codes[code.0 as usize].compiled = compiled.clone();
        compiled
    }

    // ------------------------------------------------------------------
    // Frame access for compiled code
    // ------------------------------------------------------------------

    /// Code block behind `code`
    pub fn code_block(&self, code: CodeId) -> Option<Arc<CodeBlock>> {
        self.codes.get(code.0 as usize).map(|entry| entry.block.clone())
    }

    /// Code of the current frame
    pub fn current_code(&self) -> Option<CodeId> {
        self.frames.last().map(|frame| frame.code)
    }

    /// `this` of the current frame
    pub fn this_value(&self) -> Value {
        self.frames.last().map(|frame| frame.this).unwrap_or_default()
    }

    /// Position in the temporary root list, see [`Vm::truncate_temporaries`]
    pub fn temporaries_mark(&self) -> usize {
        self.heap.temporaries_mark()
    }

    /// Drop temporary roots pushed since `mark`
    ///
    /// Compiled code calls this at instruction boundaries, once every live
    /// value has been written to a register.
    pub fn truncate_temporaries(&mut self, mark: usize) {
        self.heap.truncate_temporaries(mark);
    }

    /// Materialized constant `index` of `code`
    pub fn constant(&self, code: CodeId, index: u32) -> Value {
        self.codes
            .get(code.0 as usize)
            .and_then(|entry| entry.constants.get(index as usize).copied())
            .unwrap_or_default()
    }

    /// Interned identifier `index` of `code`
    pub fn identifier(&self, code: CodeId, index: u32) -> Option<Atom> {
        self.codes
            .get(code.0 as usize)
            .and_then(|entry| entry.atoms.get(index as usize).copied())
    }

    /// Record the current frame's return address
    ///
    /// Handler search uses `pc - 1`, so compiled code sets this to one past
    /// the instruction it is executing before any stub call.
    pub fn set_pc(&mut self, pc: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = pc;
        }
    }

    /// Search the current frame for a handler covering its return address
    ///
    /// On a hit the exception becomes pending, block scopes are unwound to the
    /// handler's depth and the handler's target is returned.
    pub fn enter_handler(&mut self, exception: Value) -> Option<u32> {
        let target = self.find_handler()?;
        self.pending_exception = Some(exception);
        Some(target)
    }

    /// Take the exception delivered to a handler
    pub fn take_exception(&mut self) -> Value {
        self.pending_exception.take().unwrap_or_default()
    }

    /// Call a stub with a fixed argument list
    pub fn call_stub(&mut self, id: StubId, args: &[StubArg]) -> StubReturn {
        self.call_stub_varargs(id, args.iter().copied())
    }
}
