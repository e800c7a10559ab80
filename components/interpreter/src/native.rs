//! Host (native) functions
//!
//! A host function receives its callee, receiver and arguments through the
//! same stub frame the compiled tier uses: slot 0 holds the callee, slot 1 the
//! receiver and the arguments follow. [`NativeCall`] is the typed view of
//! that frame.

use crate::stubs::{StubArg, StubFrame};
use crate::vm::{Unwind, Vm};
use core_types::{ErrorKind, Value, VmError};
use memory_manager::{Atom, HostFunctionId};
use std::sync::Arc;

/// Signature of a host function
pub type NativeFunction = Arc<dyn Fn(&mut NativeCall<'_>) -> Result<Value, VmError> + Send + Sync>;

pub(crate) struct NativeEntry {
    pub(crate) name: Atom,
    pub(crate) arity: u32,
    pub(crate) function: NativeFunction,
}

/// Arguments of a host function call plus access to the [`Vm`]
pub struct NativeCall<'a> {
    vm: &'a mut Vm,
    frame: usize,
    is_construct: bool,
}

impl NativeCall<'_> {
    fn stub_frame(&self) -> Option<&StubFrame> {
        self.vm.stub_frames.get(self.frame)
    }

    fn slot(&self, index: usize) -> Value {
        self.stub_frame()
            .filter(|frame| index < frame.argc as usize)
            .map(|frame| frame.arg(index).value())
            .unwrap_or_default()
    }

    /// The execution context
    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    /// Number of arguments passed
    pub fn argument_count(&self) -> usize {
        self.stub_frame()
            .map(|frame| (frame.argc as usize).saturating_sub(2))
            .unwrap_or(0)
    }

    /// Argument `index`, undefined when not passed
    pub fn argument(&self, index: usize) -> Value {
        self.slot(index + 2)
    }

    /// Every argument passed
    pub fn arguments(&self) -> Vec<Value> {
        (0..self.argument_count()).map(|index| self.argument(index)).collect()
    }

    /// The receiver; the fresh object when called as a constructor
    pub fn this(&self) -> Value {
        self.slot(1)
    }

    /// The function value being called
    pub fn callee(&self) -> Value {
        self.slot(0)
    }

    /// Whether invoked through `new`
    pub fn is_construct(&self) -> bool {
        self.is_construct
    }

    /// Build an error object to return as `Err`
    pub fn error(&mut self, kind: ErrorKind, message: &str) -> VmError {
        match self.vm.new_error(kind, message) {
            Ok(error) => VmError::Exception(error),
            Err(fatal) => fatal,
        }
    }
}

impl Vm {
    /// Run a host function through a stub frame
    pub(crate) fn invoke_host(
        &mut self,
        id: HostFunctionId,
        callee: Value,
        this: Value,
        args: &[Value],
        is_construct: bool,
    ) -> Result<Value, Unwind> {
        let Some(entry) = self.natives.get(id.0 as usize) else {
            return Err(Unwind::Fatal(VmError::InvalidBytecode(format!(
                "unknown host function {}",
                id.0
            ))));
        };
        let function = entry.function.clone();
        tracing::trace!(
            target: "interpreter",
            name = self.heap.atoms().name(entry.name),
            arity = entry.arity,
            argc = args.len(),
            "host call"
        );

        let words = [StubArg::from_value(callee), StubArg::from_value(this)]
            .into_iter()
            .chain(args.iter().copied().map(StubArg::from_value));
        let frame = self.make_stub_frame(words);
        self.stub_frames.push(frame);
        let index = self.stub_frames.len() - 1;
        let result = {
            let mut call = NativeCall {
                vm: self,
                frame: index,
                is_construct,
            };
            function(&mut call)
        };
        self.stub_frames.truncate(index);

        match result {
            Ok(value) => {
                self.heap.push_temporary(value);
                Ok(value)
            }
            Err(VmError::Exception(value)) => Err(self.raise_from_host(value)),
            Err(other) => Err(Unwind::Fatal(other)),
        }
    }
}
