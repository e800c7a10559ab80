//! Virtual Machine for bytecode execution
//!
//! The [`Vm`] is the execution context: it owns the heap, the identifier and
//! structure tables, the register file and frame stack, the code registry with
//! its inline-cache side tables, and the host function registry. Everything
//! that allocates or looks up names goes through it; there is no ambient
//! global state.

use crate::call_frame::{CallFrame, RegisterFile};
use crate::config::VmConfig;
use crate::debugger::{DebugEventKind, DebugListener};
use crate::inline_cache::{CacheState, CodeCaches};
use crate::interrupt::{InterruptHandle, Watchdog};
use crate::native::{NativeCall, NativeEntry};
use crate::stubs::StubFrame;
use crate::tier::{CompiledCode, CompilerTier};
use bytecode_system::{CodeBlock, Constant};
use core_types::{CellId, ErrorKind, JsError, StackFrame, Value, VmError};
use memory_manager::{
    Atom, CallTarget, CellData, CellKind, CodeId, CollectionSummary, FunctionData, GcStats, Heap,
    HeapLimits, HostFunctionId, PropertyAttributes, PropertyError, RootId, StructureId,
};
use std::sync::Arc;
use std::time::Duration;

/// Why execution stopped early.
///
/// `Throw` is an ordinary language exception and can be caught by handler
/// ranges. `Fatal` (out of memory, interruption) unwinds every frame up to the
/// embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    /// A thrown value
    Throw(Value),
    /// An uncatchable failure
    Fatal(VmError),
}

impl Unwind {
    /// Convert to the embedder-facing error
    pub fn into_error(self) -> VmError {
        match self {
            Unwind::Throw(value) => VmError::Exception(value),
            Unwind::Fatal(error) => error,
        }
    }
}

impl From<VmError> for Unwind {
    fn from(error: VmError) -> Self {
        match error {
            VmError::Exception(value) => Unwind::Throw(value),
            other => Unwind::Fatal(other),
        }
    }
}

/// A loaded code block and its per-context side tables
pub(crate) struct CodeEntry {
    pub(crate) block: Arc<CodeBlock>,
    pub(crate) atoms: Arc<[Atom]>,
    pub(crate) constants: Vec<Value>,
    pub(crate) functions: Vec<CodeId>,
    pub(crate) variables: Arc<[Atom]>,
    pub(crate) scope_layouts: Vec<Arc<[Atom]>>,
    pub(crate) caches: CodeCaches,
    pub(crate) call_count: u32,
    pub(crate) compiled: Option<Arc<dyn CompiledCode>>,
    pub(crate) tier_attempted: bool,
}

/// Objects and structures the core itself relies on
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    /// The global object
    pub global: CellId,
    /// Root of every ordinary prototype chain
    pub object_prototype: CellId,
    /// Prototype of function cells
    pub function_prototype: CellId,
    /// Prototype of array cells
    pub array_prototype: CellId,
    /// One prototype per [`ErrorKind`], in [`ErrorKind::ALL`] order
    pub error_prototypes: [CellId; ErrorKind::ALL.len()],
    pub(crate) object_structure: StructureId,
    pub(crate) array_structure: StructureId,
    pub(crate) function_structure: StructureId,
    pub(crate) string_structure: StructureId,
    pub(crate) activation_structure: StructureId,
}

impl Intrinsics {
    /// Prototype of errors of `kind`
    pub fn error_prototype(&self, kind: ErrorKind) -> CellId {
        let index = ErrorKind::ALL
            .iter()
            .position(|candidate| *candidate == kind)
            .unwrap_or(0);
        self.error_prototypes[index]
    }
}

/// Frequently used property names
#[derive(Debug, Clone, Copy)]
pub(crate) struct Names {
    pub(crate) length: Atom,
    pub(crate) prototype: Atom,
    pub(crate) constructor: Atom,
    pub(crate) name: Atom,
    pub(crate) message: Atom,
}

/// Execution context and embedding API
pub struct Vm {
    pub(crate) config: VmConfig,
    pub(crate) heap: Heap,
    pub(crate) codes: Vec<CodeEntry>,
    pub(crate) registers: RegisterFile,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) stub_frames: Vec<StubFrame>,
    pub(crate) stub_unwind: Option<Unwind>,
    pub(crate) natives: Vec<NativeEntry>,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) names: Names,
    pub(crate) pending_exception: Option<Value>,
    pub(crate) last_raised: Option<Value>,
    pub(crate) exception_trace: Vec<StackFrame>,
    pub(crate) listeners: Vec<Box<dyn DebugListener>>,
    pub(crate) notifying: bool,
    pub(crate) interrupt: InterruptHandle,
    pub(crate) watchdog: Watchdog,
    pub(crate) tier: Option<Box<dyn CompilerTier>>,
    pub(crate) reentry_depth: usize,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("config", &self.config)
            .field("live_cells", &self.heap.live_cells())
            .field("codes", &self.codes.len())
            .field("frames", &self.frames.len())
            .field("stub_frames", &self.stub_frames.len())
            .field("natives", &self.natives.len())
            .field("listeners", &self.listeners.len())
            .field("has_tier", &self.tier.is_some())
            .finish()
    }
}

impl Vm {
    /// Create an execution context with its global object and intrinsics
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if `max_heap_bytes` cannot even hold the
    /// intrinsics.
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        let mut heap = Heap::new(HeapLimits {
            gc_threshold: config.gc_threshold_bytes,
            max_bytes: config.max_heap_bytes,
        });
        let names = Names {
            length: heap.intern("length"),
            prototype: heap.intern("prototype"),
            constructor: heap.intern("constructor"),
            name: heap.intern("name"),
            message: heap.intern("message"),
        };
        let intrinsics = bootstrap(&mut heap, &names)?;
        heap.clear_temporaries();

        let registers = RegisterFile::new(config.register_file_capacity);
        let watchdog = Watchdog::new(config.time_limit(), config.ticks_per_check);
        Ok(Self {
            config,
            heap,
            codes: Vec::new(),
            registers,
            frames: Vec::with_capacity(64),
            stub_frames: Vec::new(),
            stub_unwind: None,
            natives: Vec::new(),
            intrinsics,
            names,
            pending_exception: None,
            last_raised: None,
            exception_trace: Vec::new(),
            listeners: Vec::new(),
            notifying: false,
            interrupt: InterruptHandle::new(),
            watchdog,
            tier: None,
            reentry_depth: 0,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The managed heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Intrinsic objects
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// The global object as a value
    pub fn global_object(&self) -> Value {
        Value::from_cell(self.intrinsics.global)
    }

    /// Intern a property name
    pub fn intern(&mut self, name: &str) -> Atom {
        self.heap.intern(name)
    }

    /// Current call stack depth
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    // ------------------------------------------------------------------
    // Globals, objects and properties
    // ------------------------------------------------------------------

    /// Set a global variable
    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), VmError> {
        let global = self.global_object();
        self.set_property(global, name, value)
    }

    /// Get a global variable, `None` when it does not exist
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let atom = self.heap.intern(name);
        let global = self.intrinsics.global;
        if self.heap.has_property(global, atom) {
            Some(self.heap.get_property(global, atom))
        } else {
            None
        }
    }

    /// Allocate an empty ordinary object
    pub fn new_object(&mut self) -> Result<Value, VmError> {
        self.new_object_value().map_err(Unwind::into_error)
    }

    /// Allocate an array holding `elements`
    pub fn new_array(&mut self, elements: &[Value]) -> Result<Value, VmError> {
        self.new_array_value(elements.to_vec()).map_err(Unwind::into_error)
    }

    /// Allocate a string
    pub fn new_string(&mut self, text: &str) -> Result<Value, VmError> {
        self.allocate_string(text).map_err(Unwind::into_error)
    }

    /// Contents of a string value
    pub fn string_value(&self, value: Value) -> Option<&str> {
        self.heap.cell_of(value).and_then(|cell| cell.as_str())
    }

    /// Read a property, walking the prototype chain
    pub fn get_property(&mut self, object: Value, name: &str) -> Result<Value, VmError> {
        let atom = self.heap.intern(name);
        self.get_by_id(object, atom, None).map_err(Unwind::into_error)
    }

    /// Write a property, honoring the configured read-only policy
    pub fn set_property(&mut self, object: Value, name: &str, value: Value) -> Result<(), VmError> {
        let atom = self.heap.intern(name);
        self.put_by_id(object, atom, value, None).map_err(Unwind::into_error)
    }

    /// Define an own property with explicit attributes
    pub fn define_property(
        &mut self,
        object: Value,
        name: &str,
        value: Value,
        attributes: PropertyAttributes,
    ) -> Result<(), VmError> {
        let atom = self.heap.intern(name);
        let result = match self.object_cell(object) {
            Some(id) => self
                .heap
                .define_property(id, atom, value, attributes)
                .map_err(|error| self.property_error(error)),
            None => Err(self.throw_error(ErrorKind::TypeError, "cannot define a property on a primitive")),
        };
        result.map_err(Unwind::into_error)
    }

    /// Delete an own property; false when it is not deletable
    pub fn delete_property(&mut self, object: Value, name: &str) -> Result<bool, VmError> {
        let atom = self.heap.intern(name);
        self.delete_by_id(object, atom).map_err(Unwind::into_error)
    }

    /// Whether `object` or its prototype chain has `name`
    pub fn has_property(&mut self, object: Value, name: &str) -> bool {
        let atom = self.heap.intern(name);
        match self.object_cell(object) {
            Some(id) => self.heap.has_property(id, atom),
            None => false,
        }
    }

    /// Replace the prototype of `object`
    pub fn set_prototype(&mut self, object: Value, prototype: Value) -> Result<(), VmError> {
        let result = match self.object_cell(object) {
            Some(id) => self
                .heap
                .set_prototype(id, prototype)
                .map_err(|error| self.property_error(error)),
            None => Err(self.throw_error(ErrorKind::TypeError, "cannot set the prototype of a primitive")),
        };
        result.map_err(Unwind::into_error)
    }

    /// Create an error object of `kind`
    pub fn new_error(&mut self, kind: ErrorKind, message: &str) -> Result<Value, VmError> {
        self.make_error(kind, message).map_err(Unwind::into_error)
    }

    // ------------------------------------------------------------------
    // Host functions
    // ------------------------------------------------------------------

    /// Create a host function and install it as a global
    pub fn register_native<F>(&mut self, name: &str, arity: u32, function: F) -> Result<Value, VmError>
    where
        F: Fn(&mut NativeCall<'_>) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        let value = self.new_native_function(name, arity, function)?;
        self.set_global(name, value)?;
        Ok(value)
    }

    /// Create a host function value without installing it anywhere
    pub fn new_native_function<F>(&mut self, name: &str, arity: u32, function: F) -> Result<Value, VmError>
    where
        F: Fn(&mut NativeCall<'_>) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        let atom = self.heap.intern(name);
        let id = HostFunctionId(self.natives.len() as u32);
        self.natives.push(NativeEntry {
            name: atom,
            arity,
            function: Arc::new(function),
        });
        let cell = self
            .new_function_cell(CallTarget::Host(id), None, Some(atom), arity)
            .map_err(Unwind::into_error)?;
        Ok(Value::from_cell(cell))
    }

    // ------------------------------------------------------------------
    // Programs and calls
    // ------------------------------------------------------------------

    /// Validate and register a code block, returning a function value for it
    pub fn load(&mut self, block: CodeBlock) -> Result<Value, VmError> {
        block
            .validate()
            .map_err(|error| VmError::InvalidBytecode(error.to_string()))?;
        let name = block.name.clone();
        let arity = block.num_params;
        let code = self.register_code(block).map_err(Unwind::into_error)?;
        let name = name.map(|name| self.heap.intern(&name));
        let cell = self
            .new_function_cell(CallTarget::Script(code), None, name, arity)
            .map_err(Unwind::into_error)?;
        Ok(Value::from_cell(cell))
    }

    /// Run a top-level program with the global object as `this`
    pub fn run(&mut self, block: CodeBlock) -> Result<Value, VmError> {
        let program = self.load(block)?;
        self.notify(DebugEventKind::WillExecuteProgram, None);
        let global = self.global_object();
        let result = self.call(program, global, &[]);
        self.notify(DebugEventKind::DidExecuteProgram, None);
        result
    }

    /// Call a function value
    pub fn call(&mut self, function: Value, this: Value, args: &[Value]) -> Result<Value, VmError> {
        self.enter(|vm| vm.call_value(function, this, args, false, None))
    }

    /// Call a function value as a constructor
    pub fn construct(&mut self, function: Value, args: &[Value]) -> Result<Value, VmError> {
        self.enter(|vm| vm.call_value(function, Value::undefined(), args, true, None))
    }

    fn enter<F>(&mut self, body: F) -> Result<Value, VmError>
    where
        F: FnOnce(&mut Vm) -> Result<Value, Unwind>,
    {
        if self.reentry_depth >= self.config.max_reentry_depth {
            tracing::warn!(target: "interpreter", depth = self.reentry_depth, "re-entry limit reached");
            return Err(self
                .throw_error(ErrorKind::RangeError, "Maximum re-entry depth exceeded")
                .into_error());
        }
        if self.reentry_depth == 0 {
            self.watchdog.arm();
        }
        self.reentry_depth += 1;
        let result = body(self);
        self.reentry_depth -= 1;
        if self.reentry_depth == 0 {
            self.watchdog.disarm();
        }
        result.map_err(Unwind::into_error)
    }

    // ------------------------------------------------------------------
    // Garbage collection and roots
    // ------------------------------------------------------------------

    /// Run a full collection over every root the context knows about
    pub fn collect_garbage(&mut self) -> CollectionSummary {
        let mut roots: Vec<Value> = self.registers.values().to_vec();
        for frame in &self.frames {
            roots.push(frame.callee);
            roots.push(frame.this);
            roots.extend(frame.scope.map(Value::from_cell));
            roots.extend(frame.activation.map(Value::from_cell));
            roots.extend(frame.extra_args.iter().copied());
        }
        roots.extend(self.pending_exception);
        roots.extend(self.last_raised);
        if let Some(Unwind::Throw(value)) = &self.stub_unwind {
            roots.push(*value);
        }
        for code in &self.codes {
            roots.extend(code.constants.iter().copied());
        }
        let words: Vec<u64> = self.stub_frames.iter().flat_map(StubFrame::words).collect();
        let summary = self.heap.collect(roots, words);
        if summary.freed_structures > 0 {
            self.forget_reclaimed_structures();
        }
        summary
    }

    /// Drop property cache entries naming a structure the collector
    /// reclaimed; its id may be handed to an unrelated structure next
    fn forget_reclaimed_structures(&mut self) {
        let structures = self.heap.structures();
        for code in &mut self.codes {
            for cache in &mut code.caches.properties {
                cache.retain(|_, entry| entry.structures().iter().all(|id| structures.is_live(*id)));
            }
        }
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats().clone()
    }

    /// Keep `value` alive until [`Vm::unprotect`]
    pub fn protect(&mut self, value: Value) -> RootId {
        self.heap.add_root(value)
    }

    /// Drop a root created by [`Vm::protect`]
    pub fn unprotect(&mut self, root: RootId) {
        self.heap.remove_root(root);
    }

    /// Release values the embedder received since the last release
    ///
    /// Fresh allocations and call results stay alive until this is called.
    /// It has no effect while script code is running.
    pub fn release_temporaries(&mut self) {
        if self.frames.is_empty() && self.stub_frames.is_empty() {
            self.heap.clear_temporaries();
        }
    }

    // ------------------------------------------------------------------
    // Control, tiers and diagnostics
    // ------------------------------------------------------------------

    /// Handle that interrupts running scripts from any thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Change the watchdog limit for later top-level invocations
    pub fn set_time_limit(&mut self, limit: Option<Duration>) {
        self.config.time_limit_ms = limit.map(|limit| limit.as_millis() as u64);
        self.watchdog.set_limit(limit);
    }

    /// Register a debugger/profiler listener
    pub fn add_debug_listener(&mut self, listener: Box<dyn DebugListener>) {
        self.listeners.push(listener);
    }

    /// Install a compiler tier used for hot functions
    pub fn install_tier(&mut self, tier: Box<dyn CompilerTier>) {
        tracing::debug!(target: "tier", tier = tier.name(), "tier installed");
        self.tier = Some(tier);
    }

    /// Render an error for reporting
    pub fn describe_exception(&self, error: &VmError) -> JsError {
        match error {
            VmError::Exception(value) => {
                let (kind, message) = self.error_parts(*value);
                JsError {
                    kind,
                    message,
                    stack: self.exception_trace.clone(),
                    source_position: None,
                }
            }
            other => JsError {
                kind: ErrorKind::InternalError,
                message: other.to_string(),
                stack: Vec::new(),
                source_position: None,
            },
        }
    }

    /// State of a property inline-cache site
    pub fn property_cache_state(&self, code: CodeId, site: u32) -> Option<CacheState> {
        self.codes
            .get(code.0 as usize)
            .and_then(|entry| entry.caches.properties.get(site as usize))
            .map(|cache| cache.state())
    }

    /// State of a call inline-cache site
    pub fn call_cache_state(&self, code: CodeId, site: u32) -> Option<CacheState> {
        self.codes
            .get(code.0 as usize)
            .and_then(|entry| entry.caches.calls.get(site as usize))
            .map(|cache| cache.state())
    }

    /// Code run by a script function value
    pub fn function_code(&self, function: Value) -> Option<CodeId> {
        match self.heap.cell_of(function)?.as_function()?.target {
            CallTarget::Script(code) => Some(code),
            CallTarget::Host(_) => None,
        }
    }

    /// Nested function templates of `code`, in template order
    pub fn nested_codes(&self, code: CodeId) -> &[CodeId] {
        self.codes
            .get(code.0 as usize)
            .map(|entry| entry.functions.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `code` has been compiled by the installed tier
    pub fn is_compiled(&self, code: CodeId) -> bool {
        self.codes
            .get(code.0 as usize)
            .map(|entry| entry.compiled.is_some())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Internals shared by the interpreter, stubs and compiled code
    // ------------------------------------------------------------------

    pub(crate) fn register_code(&mut self, mut block: CodeBlock) -> Result<CodeId, Unwind> {
        let nested = std::mem::take(&mut block.functions);
        let mut functions = Vec::with_capacity(nested.len());
        for function in nested {
            functions.push(self.register_code(function)?);
        }

        let atoms: Arc<[Atom]> = block.identifiers.iter().map(|name| self.heap.intern(name)).collect();
        let mut constants = Vec::with_capacity(block.constants.len());
        for constant in &block.constants {
            let value = match constant {
                Constant::Number(n) => Value::number(*n),
                Constant::Boolean(b) => Value::boolean(*b),
                Constant::Null => Value::null(),
                Constant::Undefined => Value::undefined(),
                Constant::String(text) => self.allocate_string(text)?,
            };
            constants.push(value);
        }
        let variables: Arc<[Atom]> = block.variables.iter().map(|&index| atoms[index as usize]).collect();
        let scope_layouts = block
            .scope_layouts
            .iter()
            .map(|layout| layout.iter().map(|&index| atoms[index as usize]).collect())
            .collect();
        let caches = CodeCaches::new(block.property_cache_count, block.call_cache_count);

        self.codes.push(CodeEntry {
            block: Arc::new(block),
            atoms,
            constants,
            functions,
            variables,
            scope_layouts,
            caches,
            call_count: 0,
            compiled: None,
            tier_attempted: false,
        });
        Ok(CodeId((self.codes.len() - 1) as u32))
    }

    /// Allocate a cell, collecting first when the budget says so
    pub(crate) fn allocate(&mut self, structure: StructureId, data: CellData) -> Result<CellId, Unwind> {
        let hint = std::mem::size_of::<memory_manager::Cell>() + payload_hint(&data);
        if self.heap.should_collect() || self.heap.live_bytes() + hint > self.heap.limits().max_bytes {
            self.collect_garbage();
        }
        self.heap.allocate(structure, data).map_err(|error| {
            tracing::error!(target: "gc", %error, "allocation failed");
            Unwind::Fatal(error)
        })
    }

    pub(crate) fn new_object_value(&mut self) -> Result<Value, Unwind> {
        let structure = self.intrinsics.object_structure;
        self.allocate(structure, CellData::Plain).map(Value::from_cell)
    }

    pub(crate) fn new_array_value(&mut self, elements: Vec<Value>) -> Result<Value, Unwind> {
        let structure = self.intrinsics.array_structure;
        self.allocate(structure, CellData::Array(elements)).map(Value::from_cell)
    }

    pub(crate) fn allocate_string(&mut self, text: &str) -> Result<Value, Unwind> {
        let structure = self.intrinsics.string_structure;
        self.allocate(structure, CellData::String(text.to_string()))
            .map(Value::from_cell)
    }

    pub(crate) fn new_function_cell(
        &mut self,
        target: CallTarget,
        scope: Option<CellId>,
        name: Option<Atom>,
        arity: u32,
    ) -> Result<CellId, Unwind> {
        let structure = self.intrinsics.function_structure;
        let function = self.allocate(
            structure,
            CellData::Function(FunctionData {
                target,
                scope,
                name,
                arity,
            }),
        )?;
        if let CallTarget::Script(_) = target {
            let prototype = self.new_object_value()?;
            let (constructor, prototype_name) = (self.names.constructor, self.names.prototype);
            if let Some(prototype_cell) = prototype.as_cell() {
                self.heap
                    .define_property(
                        prototype_cell,
                        constructor,
                        Value::from_cell(function),
                        PropertyAttributes::DONT_ENUM,
                    )
                    .map_err(|error| self.property_error(error))?;
            }
            self.heap
                .define_property(function, prototype_name, prototype, PropertyAttributes::DONT_ENUM)
                .map_err(|error| self.property_error(error))?;
        }
        Ok(function)
    }

    /// Object cell behind `value`, if it is a live object
    pub(crate) fn object_cell(&self, value: Value) -> Option<CellId> {
        let id = value.as_cell()?;
        let cell = self.heap.cell(id)?;
        cell.kind().is_object().then_some(id)
    }

    pub(crate) fn is_object(&self, value: Value) -> bool {
        self.object_cell(value).is_some()
    }

    /// Run a heap write that may grow element storage; when it runs over
    /// budget, collect once and try again
    pub(crate) fn heap_write<T>(
        &mut self,
        mut write: impl FnMut(&mut Heap) -> Result<T, PropertyError>,
    ) -> Result<T, Unwind> {
        let result = match write(&mut self.heap) {
            Err(PropertyError::OutOfMemory) => {
                self.collect_garbage();
                write(&mut self.heap)
            }
            result => result,
        };
        result.map_err(|error| self.property_error(error))
    }

    /// Map a structural property failure onto a language exception
    pub(crate) fn property_error(&mut self, error: PropertyError) -> Unwind {
        match error {
            PropertyError::StaleHandle => Unwind::Fatal(VmError::StaleHandle),
            PropertyError::OutOfMemory => {
                let limit = self.heap.limits().max_bytes;
                tracing::error!(target: "gc", limit, "element storage allocation failed");
                Unwind::Fatal(VmError::OutOfMemory { limit })
            }
            PropertyError::InvalidArrayLength => self.throw_error(ErrorKind::RangeError, "Invalid array length"),
            other => self.throw_error(ErrorKind::TypeError, &other.to_string()),
        }
    }

    /// Name of a function value for traces and debugger events
    pub(crate) fn function_name(&self, function: Value) -> Option<String> {
        let name = self.heap.cell_of(function)?.as_function()?.name?;
        Some(self.heap.atoms().name(name).to_string())
    }

    pub(crate) fn capture_trace(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| StackFrame {
                function_name: self.function_name(frame.callee),
                line: self.codes[frame.code.0 as usize]
                    .block
                    .line_at(frame.pc.saturating_sub(1)),
            })
            .collect()
    }

    fn error_parts(&self, value: Value) -> (ErrorKind, String) {
        if let Some(id) = self.object_cell(value) {
            if self.is_error_object(id) {
                let name = self.heap.get_property(id, self.names.name);
                let kind = self
                    .string_value(name)
                    .and_then(ErrorKind::from_name)
                    .unwrap_or(ErrorKind::Error);
                let message = self.heap.get_property(id, self.names.message);
                return (kind, self.to_display_string(message));
            }
        }
        (ErrorKind::Error, self.to_display_string(value))
    }

    pub(crate) fn is_error_object(&self, id: CellId) -> bool {
        let base = self.intrinsics.error_prototype(ErrorKind::Error);
        let mut current = self.heap.prototype_of(id);
        while let Some(link) = current.as_cell() {
            if link == base {
                return true;
            }
            current = self.heap.prototype_of(link);
        }
        false
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default()).expect("default heap limits fit the intrinsics")
    }
}

fn payload_hint(data: &CellData) -> usize {
    match data {
        CellData::Array(elements) => elements.capacity() * std::mem::size_of::<Value>(),
        CellData::String(text) => text.len(),
        CellData::Activation(activation) => activation.slots.len() * std::mem::size_of::<Value>(),
        CellData::Plain | CellData::Function(_) => 0,
    }
}

fn bootstrap(heap: &mut Heap, names: &Names) -> Result<Intrinsics, VmError> {
    let hidden = PropertyAttributes::DONT_ENUM;
    let constant = PropertyAttributes::READ_ONLY | PropertyAttributes::DONT_ENUM | PropertyAttributes::DONT_DELETE;

    let bare = heap.structures_mut().root(CellKind::Object, Value::null());
    let object_prototype = heap.allocate(bare, CellData::Plain)?;
    let object_structure = heap
        .structures_mut()
        .root(CellKind::Object, Value::from_cell(object_prototype));
    let function_prototype = heap.allocate(object_structure, CellData::Plain)?;
    let array_prototype = heap.allocate(object_structure, CellData::Plain)?;
    let global = heap.allocate(object_structure, CellData::Plain)?;

    let string_structure = heap.structures_mut().root(CellKind::String, Value::null());
    let activation_structure = heap.structures_mut().root(CellKind::Activation, Value::null());
    let function_structure = heap
        .structures_mut()
        .root(CellKind::Function, Value::from_cell(function_prototype));
    let array_structure = heap
        .structures_mut()
        .root(CellKind::Array, Value::from_cell(array_prototype));

    let base_error = heap.allocate(object_structure, CellData::Plain)?;
    let derived_structure = heap
        .structures_mut()
        .root(CellKind::Object, Value::from_cell(base_error));
    let mut error_prototypes = [base_error; ErrorKind::ALL.len()];
    for (slot, kind) in error_prototypes.iter_mut().zip(ErrorKind::ALL) {
        let prototype = if kind == ErrorKind::Error {
            base_error
        } else {
            heap.allocate(derived_structure, CellData::Plain)?
        };
        let name = heap.allocate(string_structure, CellData::String(kind.name().to_string()))?;
        let empty = heap.allocate(string_structure, CellData::String(String::new()))?;
        define(heap, prototype, names.name, Value::from_cell(name), hidden)?;
        define(heap, prototype, names.message, Value::from_cell(empty), hidden)?;
        *slot = prototype;
    }

    for (name, value) in [
        ("undefined", Value::undefined()),
        ("NaN", Value::number(f64::NAN)),
        ("Infinity", Value::number(f64::INFINITY)),
    ] {
        let atom = heap.intern(name);
        define(heap, global, atom, value, constant)?;
    }

    for id in [object_prototype, function_prototype, array_prototype, global]
        .into_iter()
        .chain(error_prototypes)
    {
        heap.add_root(Value::from_cell(id));
    }

    Ok(Intrinsics {
        global,
        object_prototype,
        function_prototype,
        array_prototype,
        error_prototypes,
        object_structure,
        array_structure,
        function_structure,
        string_structure,
        activation_structure,
    })
}

fn define(
    heap: &mut Heap,
    id: CellId,
    name: Atom,
    value: Value,
    attributes: PropertyAttributes,
) -> Result<(), VmError> {
    heap.define_property(id, name, value, attributes)
        .map_err(|_| VmError::StaleHandle)
}
