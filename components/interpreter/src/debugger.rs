//! Debugger and profiler hooks
//!
//! Listeners are notified synchronously from the interpreter. While a
//! notification runs, nested notifications are suppressed so a listener may
//! call back into the [`Vm`] without seeing its own events.

use crate::vm::Vm;
use core_types::Value;

/// Kind of a debugger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugEventKind {
    /// A script frame was entered
    Call,
    /// A script frame is about to be left
    Return,
    /// A `Debug` statement marker was reached
    Statement,
    /// A value was thrown, before handler search
    Exception,
    /// A top-level program is about to run
    WillExecuteProgram,
    /// A top-level program finished
    DidExecuteProgram,
}

/// What a listener is told about an event
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    /// Event kind
    pub kind: DebugEventKind,
    /// Name of the function in the current frame
    pub function_name: Option<String>,
    /// Source line of the current instruction, 0 when unknown
    pub line: u32,
    /// Script frames on the stack
    pub depth: usize,
    /// The thrown value for exception events
    pub exception: Option<Value>,
}

/// Receives execution events
///
/// Every method has an empty default, so listeners implement only what they
/// need.
pub trait DebugListener: Send {
    /// A frame was entered
    fn call_event(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
    /// A frame is being left
    fn return_event(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
    /// A statement marker was reached
    fn at_statement(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
    /// A value was thrown
    fn exception(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
    /// A program is about to run
    fn will_execute_program(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
    /// A program finished
    fn did_execute_program(&mut self, _vm: &mut Vm, _event: &DebugEvent) {}
}

impl Vm {
    fn debug_event(&self, kind: DebugEventKind, exception: Option<Value>, line: Option<u32>) -> DebugEvent {
        let frame = self.frames.last();
        let function_name = frame.and_then(|frame| self.function_name(frame.callee));
        let line = line.unwrap_or_else(|| {
            frame
                .map(|frame| {
                    self.codes[frame.code.0 as usize]
                        .block
                        .line_at(frame.pc.saturating_sub(1))
                })
                .unwrap_or(0)
        });
        DebugEvent {
            kind,
            function_name,
            line,
            depth: self.frames.len(),
            exception,
        }
    }

    /// Notify listeners of `kind`
    pub(crate) fn notify(&mut self, kind: DebugEventKind, exception: Option<Value>) {
        self.notify_at(kind, exception, None);
    }

    /// Notify listeners of a statement marker at `line`
    pub(crate) fn notify_statement(&mut self, line: u32) {
        self.notify_at(DebugEventKind::Statement, None, Some(line));
    }

    fn notify_at(&mut self, kind: DebugEventKind, exception: Option<Value>, line: Option<u32>) {
        if self.listeners.is_empty() || self.notifying {
            return;
        }
        let event = self.debug_event(kind, exception, line);
        self.notifying = true;
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in listeners.iter_mut() {
            match kind {
                DebugEventKind::Call => listener.call_event(self, &event),
                DebugEventKind::Return => listener.return_event(self, &event),
                DebugEventKind::Statement => listener.at_statement(self, &event),
                DebugEventKind::Exception => listener.exception(self, &event),
                DebugEventKind::WillExecuteProgram => listener.will_execute_program(self, &event),
                DebugEventKind::DidExecuteProgram => listener.did_execute_program(self, &event),
            }
        }
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        self.notifying = false;
    }
}
