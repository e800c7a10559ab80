//! Baseline compiler tier
//!
//! Lowers a hot code block to a flat op list once and runs it without
//! re-decoding bytecode. Semantics are exactly the interpreter's: every
//! operation with a slow path calls the same runtime stubs, so results,
//! exceptions and inline cache behavior do not depend on which tier runs.

use crate::codegen::{lower, LowerError, Op};
use crate::compiled_code::CompiledFunction;
use interpreter::{CompiledCode, CompilerTier, Vm};
use memory_manager::CodeId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Statistics for baseline compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineStats {
    /// Number of functions compiled
    pub functions_compiled: u64,
    /// Number of functions the tier declined
    pub functions_declined: u64,
    /// Total ops emitted
    pub ops_emitted: u64,
    /// Compare-and-branch pairs fused into one op
    pub fused_branches: u64,
    /// Stub calls made by compiled code
    pub stub_calls: u64,
    /// Total compilation time (microseconds)
    pub total_compilation_time_us: u64,
}

/// Shared view of a [`BaselineJit`]'s statistics
///
/// The tier itself moves into the VM on installation; keep a handle to read
/// the numbers afterwards.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    stats: Arc<Mutex<BaselineStats>>,
    stub_calls: Arc<AtomicU64>,
}

impl StatsHandle {
    /// Current statistics
    pub fn snapshot(&self) -> BaselineStats {
        BaselineStats {
            stub_calls: self.stub_calls.load(Ordering::Relaxed),
            ..self.stats.lock().clone()
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        *self.stats.lock() = BaselineStats::default();
        self.stub_calls.store(0, Ordering::Relaxed);
    }
}

/// Baseline compiler
///
/// Characteristics:
/// - One pass over the bytecode, no speculation and no deoptimization
/// - Constants and identifiers resolved at compile time
/// - Number fast paths for arithmetic and comparisons
/// - Comparisons fused with the branch that consumes them
#[derive(Debug, Default)]
pub struct BaselineJit {
    stats: StatsHandle,
}

impl BaselineJit {
    /// Create a new baseline compiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `code` for `vm`
    ///
    /// # Example
    /// ```
    /// use bytecode_system::{CodeBlock, Opcode};
    /// use interpreter::Vm;
    /// use jit_compiler::BaselineJit;
    /// use core_types::Value;
    ///
    /// let mut vm = Vm::default();
    /// let mut block = CodeBlock::function("answer", &[]);
    /// let t = block.temp();
    /// let c = block.add_constant(42.0);
    /// block.emit(Opcode::LoadConst { dst: t, index: c });
    /// block.emit(Opcode::Return { src: t });
    /// let f = vm.load(block).unwrap();
    /// let code = vm.function_code(f).unwrap();
    ///
    /// let mut jit = BaselineJit::new();
    /// let compiled = jit.compile_code(&vm, code).unwrap();
    /// assert_eq!(compiled.ops().len(), 2);
    /// ```
    pub fn compile_code(&mut self, vm: &Vm, code: CodeId) -> Result<CompiledFunction, LowerError> {
        let start = Instant::now();
        let block = vm.code_block(code).ok_or(LowerError::Empty)?;
        let name = block.name.clone().unwrap_or_default();

        let lowered = match lower(vm, code, &block) {
            Ok(lowered) => lowered,
            Err(error) => {
                self.stats.stats.lock().functions_declined += 1;
                tracing::debug!(target: "tier", function = %name, ?error, "baseline lowering failed");
                return Err(error);
            }
        };

        let fused = lowered
            .ops
            .iter()
            .filter(|op| matches!(op, Op::CompareAndBranch { .. }))
            .count() as u64;
        let elapsed = start.elapsed().as_micros() as u64;
        {
            let mut stats = self.stats.stats.lock();
            stats.functions_compiled += 1;
            stats.ops_emitted += lowered.ops.len() as u64;
            stats.fused_branches += fused;
            stats.total_compilation_time_us += elapsed;
        }
        tracing::debug!(
            target: "tier",
            function = %name,
            instructions = block.instructions.len(),
            ops = lowered.ops.len(),
            fused,
            elapsed_us = elapsed,
            "baseline compiled"
        );

        Ok(CompiledFunction::new(name, lowered, self.stats.stub_calls.clone()))
    }

    /// Current statistics
    pub fn stats(&self) -> BaselineStats {
        self.stats.snapshot()
    }

    /// Handle that keeps reporting after the tier is installed
    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

impl CompilerTier for BaselineJit {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn compile(&mut self, vm: &Vm, code: CodeId) -> Option<Arc<dyn CompiledCode>> {
        let compiled = self.compile_code(vm, code).ok()?;
        Some(Arc::new(compiled))
    }
}
