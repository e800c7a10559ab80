//! Shared, lockable engine handle
//!
//! A [`Vm`] is single-threaded. [`Engine`] puts it behind a lock so several
//! threads can take turns; one script runs at a time. Interruption goes
//! through a separate flag and never needs the lock.

use crate::config::VmConfig;
use crate::interrupt::InterruptHandle;
use crate::vm::Vm;
use core_types::VmError;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Clonable handle to a locked execution context
#[derive(Clone)]
pub struct Engine {
    vm: Arc<Mutex<Vm>>,
    interrupt: InterruptHandle,
}

impl Engine {
    /// Create an engine around a fresh context
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        Ok(Self::from_vm(Vm::new(config)?))
    }

    /// Wrap an existing context
    pub fn from_vm(vm: Vm) -> Self {
        let interrupt = vm.interrupt_handle();
        Self {
            vm: Arc::new(Mutex::new(vm)),
            interrupt,
        }
    }

    /// Acquire the context, blocking while another thread holds it
    pub fn lock(&self) -> EngineGuard<'_> {
        EngineGuard { guard: self.vm.lock() }
    }

    /// Acquire the context if it is free
    pub fn try_lock(&self) -> Option<EngineGuard<'_>> {
        self.vm.try_lock().map(|guard| EngineGuard { guard })
    }

    /// Ask the running script to stop at its next check
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Interrupt handle usable without the engine
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("locked", &self.vm.is_locked())
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish()
    }
}

/// Exclusive access to the context while held
pub struct EngineGuard<'a> {
    guard: MutexGuard<'a, Vm>,
}

impl EngineGuard<'_> {
    /// Release the lock while `f` runs (e.g. during a blocking host call)
    /// and take it back afterwards
    pub fn unlocked<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        MutexGuard::unlocked(&mut self.guard, f)
    }
}

impl Deref for EngineGuard<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        &self.guard
    }
}

impl DerefMut for EngineGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        &mut self.guard
    }
}
