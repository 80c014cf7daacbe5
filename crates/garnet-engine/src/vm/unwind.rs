//! Non-local exits
//!
//! Raising an exception stores it in the VM's `exc` slot and unwinds the
//! Rust stack with a [`Jump`] payload addressed to the innermost unwind
//! target. [`Vm::protect`] is the only place that installs targets and the
//! only place that stops a `Jump`. `resume_unwind` does not run the panic
//! hook, so raising is silent.
//!
//! `return` and `break` out of a block travel the same way with a
//! [`NonLocalExit`] payload, caught by the method frame or call site they
//! belong to.

use crate::vm::state::Vm;
use crate::vm::value::{ObjRef, Value};
use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use tracing::trace;

/// The active protected context: where a raise returns control to.
///
/// Targets nest; each protected call saves the previous target and
/// restores it on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindTarget {
    id: u64,
    depth: usize,
}

impl UnwindTarget {
    /// Unique id of the protected call
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Nesting depth (1 for the outermost protected call)
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Unwind payload of a raised exception
#[derive(Debug)]
pub(crate) struct Jump {
    pub(crate) target: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitKind {
    Return,
    Break,
}

/// Unwind payload of `return`/`break` leaving a block
#[derive(Debug)]
pub(crate) struct NonLocalExit {
    pub(crate) kind: ExitKind,
    /// Frame id for `return`, proc handle bits for `break`
    pub(crate) tag: u64,
    pub(crate) value: Value,
}

/// Result of running code under a protected context
pub(crate) enum Outcome<T> {
    Done(T),
    Raised(Value),
    /// Foreign panic or a non-local exit bound for an outer frame
    Other(Box<dyn Any + Send>),
}

/// Whether a panic payload is one of the VM's own control transfers.
///
/// Code that catches panics around script callbacks must resume these
/// instead of treating them as failures.
pub fn is_control_payload(payload: &(dyn Any + Send)) -> bool {
    payload.is::<Jump>() || payload.is::<NonLocalExit>()
}

impl Vm {
    /// Run `f` under a new unwind target.
    ///
    /// Returns `Ok(result)` on normal completion and `Err(exception)` when
    /// `f` raised; the `exc` slot is drained in that case. Call frames
    /// pushed by `f` are discarded on the error path. Panics that are not
    /// exceptions are propagated after the previous target is restored.
    ///
    /// A protected call is also a barrier for `break` and `return`: a block
    /// whose owner lies outside `f` raises `LocalJumpError` instead of
    /// unwinding through the caller.
    pub fn protect<F>(&self, f: F) -> Result<Value, Value>
    where
        F: FnOnce(&Vm) -> Value,
    {
        let floor = self.exit_floor.replace(self.exit_tags.borrow().len());
        let outcome = self.protect_outcome(|| f(self));
        self.exit_floor.set(floor);

        match outcome {
            Outcome::Done(value) => Ok(value),
            Outcome::Raised(exc) => Err(exc),
            Outcome::Other(payload) => resume_unwind(payload),
        }
    }

    pub(crate) fn protect_outcome<T>(&self, f: impl FnOnce() -> T) -> Outcome<T> {
        let prev = self.unwind.get();
        let depth = self.unwind_depth.get();
        let target = UnwindTarget {
            id: self.next_id(),
            depth: depth + 1,
        };
        let frames = self.frames.borrow().len();

        self.unwind.set(Some(target));
        self.unwind_depth.set(target.depth);

        let result = catch_unwind(AssertUnwindSafe(f));

        self.unwind.set(prev);
        self.unwind_depth.set(depth);

        match result {
            Ok(value) => Outcome::Done(value),
            Err(payload) => {
                self.frames.borrow_mut().truncate(frames);
                match payload.downcast::<Jump>() {
                    Ok(jump) if jump.target == target.id => {
                        trace!(target = target.id, depth = target.depth, "caught raise");
                        Outcome::Raised(self.exc.replace(Value::NIL))
                    }
                    Ok(jump) => Outcome::Other(jump),
                    Err(other) => Outcome::Other(other),
                }
            }
        }
    }

    /// Raise `exc`: store it as the pending exception and jump to the
    /// innermost unwind target.
    ///
    /// # Panics
    ///
    /// Raising with no protected call active is a caller bug and panics.
    pub fn raise(&self, exc: Value) -> ! {
        self.exc.set(exc);
        match self.unwind.get() {
            Some(target) => {
                trace!(target = target.id, "raise");
                resume_unwind(Box::new(Jump { target: target.id }))
            }
            None => panic!(
                "exception raised outside of a protected call: {}",
                self.exc_message(exc)
            ),
        }
    }

    /// Raise a new exception of `class` with `message`
    pub fn raise_error(&self, class: ObjRef, message: &str) -> ! {
        let exc = self.exc_new(class, message);
        self.raise(exc)
    }

    /// Number of nested protected calls currently active
    pub fn unwind_depth(&self) -> usize {
        self.unwind_depth.get()
    }

    /// The innermost unwind target
    pub fn unwind_target(&self) -> Option<UnwindTarget> {
        self.unwind.get()
    }

    /// The pending exception (nil if none)
    pub fn exc(&self) -> Value {
        self.exc.get()
    }

    /// Take the pending exception, leaving the slot empty
    pub fn take_exc(&self) -> Value {
        self.exc.replace(Value::NIL)
    }

    /// Store a pending exception without raising it
    pub fn set_exc(&self, exc: Value) {
        self.exc.set(exc);
    }

    /// Unwind to the owner of a non-local exit
    pub(crate) fn non_local_exit(&self, kind: ExitKind, tag: u64, value: Value) -> ! {
        resume_unwind(Box::new(NonLocalExit { kind, tag, value }))
    }
}

/// Run `f` as the owner of exits matching `kind` and `tag`.
///
/// While `f` runs the tag is registered as live, so a `return` or `break`
/// can tell whether its destination still exists before unwinding. A
/// matching exit is caught and handed to `on_exit`; everything else
/// unwinds further.
pub(crate) fn catch_exit<T>(
    vm: &Vm,
    kind: ExitKind,
    tag: u64,
    f: impl FnOnce() -> T,
    on_exit: impl FnOnce(Value) -> T,
) -> T {
    let frames = vm.frames.borrow().len();
    let live = {
        let mut tags = vm.exit_tags.borrow_mut();
        tags.push((kind, tag));
        tags.len() - 1
    };

    let result = catch_unwind(AssertUnwindSafe(f));
    vm.exit_tags.borrow_mut().truncate(live);

    match result {
        Ok(value) => value,
        Err(payload) => match payload.downcast::<NonLocalExit>() {
            Ok(exit) if exit.kind == kind && exit.tag == tag => {
                vm.frames.borrow_mut().truncate(frames);
                on_exit(exit.value)
            }
            Ok(exit) => resume_unwind(exit),
            Err(other) => resume_unwind(other),
        },
    }
}

impl Vm {
    /// Whether an exit of `kind` addressed to `tag` has an owner on the stack
    /// that it can reach without crossing a host protected call
    pub(crate) fn exit_live(&self, kind: ExitKind, tag: u64) -> bool {
        let tags = self.exit_tags.borrow();
        let floor = self.exit_floor.get().min(tags.len());
        tags[floor..].iter().any(|(k, t)| *k == kind && *t == tag)
    }
}
