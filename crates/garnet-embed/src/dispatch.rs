//! Native method dispatch
//!
//! Every host-defined method is installed in the runtime with the same
//! body, [`trampoline`]. When the runtime calls it, the trampoline looks
//! the host callable up by the class the method was found in and the
//! method name, runs it, and turns a returned [`HostError`] (or a panic)
//! into a runtime exception that script code can rescue.

use crate::args::collect_args;
use crate::error::{Error, HostError};
use crate::garnet::Garnet;
use garnet_engine::vm::is_control_payload;
use garnet_engine::{ObjRef, Symbol, Value, ValueType, Vm};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Host callable backing a runtime method
pub(crate) type HostFn = Rc<dyn Fn(&Garnet, Value, &[Value]) -> Result<Value, HostError>>;

/// Registered host methods, keyed by owner class and method name.
///
/// Attached to the VM as user data so the trampoline can find it. Holds
/// the VM weakly; the VM owns the table.
pub(crate) struct MethodTable {
    methods: RefCell<FxHashMap<(ObjRef, Symbol), HostFn>>,
    vm: Weak<Vm>,
}

impl MethodTable {
    pub(crate) fn new(vm: Weak<Vm>) -> Self {
        Self {
            methods: RefCell::new(FxHashMap::default()),
            vm,
        }
    }

    pub(crate) fn insert(&self, class: ObjRef, name: Symbol, f: HostFn) {
        self.methods.borrow_mut().insert((class, name), f);
    }

    pub(crate) fn get(&self, class: ObjRef, name: Symbol) -> Option<HostFn> {
        self.methods.borrow().get(&(class, name)).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.methods.borrow().len()
    }
}

/// Runtime body of every host-defined method
pub(crate) fn trampoline(vm: &Vm, recv: Value) -> Value {
    let args = collect_args(vm);
    let Some((garnet, f, name)) = resolve(vm) else {
        let class = vm
            .current_call_info()
            .map(|ci| vm.class_name(ci.target_class))
            .unwrap_or_default();
        warn!(class = %class, "no host binding for native call");
        vm.raise_error(vm.core().no_method_error, "host method is not registered")
    };

    trace!(method = %name, argc = args.len(), "host method start");
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&garnet, recv, args.as_slice())));
    match outcome {
        Ok(Ok(value)) => {
            trace!(method = %name, "host method done");
            vm.gc_protect(value);
            value
        }
        Ok(Err(err)) => {
            trace!(method = %name, error = %err, "host method failed");
            let exc = host_error_to_exception(vm, err);
            vm.raise(exc)
        }
        Err(payload) if is_control_payload(payload.as_ref()) => resume_unwind(payload),
        Err(payload) => {
            let message = format!("host method panicked: {}", panic_message(payload.as_ref()));
            warn!(method = %name, "{}", message);
            vm.raise_error(vm.core().runtime_error, &message)
        }
    }
}

fn resolve(vm: &Vm) -> Option<(Garnet, HostFn, String)> {
    let ci = vm.current_call_info()?;
    let mid = ci.mid?;
    let table = vm.user_data()?.downcast::<MethodTable>().ok()?;
    let f = table.get(ci.target_class, mid)?;
    let vm = table.vm.upgrade()?;
    let name = vm.sym_name(mid);
    Some((Garnet::from_parts(vm, table), f, name))
}

/// Exception value for a host failure
pub(crate) fn host_error_to_exception(vm: &Vm, err: HostError) -> Value {
    let core = vm.core();
    match err {
        HostError::Message(message) => vm.exc_new(core.runtime_error, &message),
        HostError::Class { class, message } => {
            let class = lookup_exception_class(vm, &class).unwrap_or(core.runtime_error);
            vm.exc_new(class, &message)
        }
        HostError::Exception(exc) => exc,
        HostError::Nested(Error::Runtime(exc)) => exc.value(),
        HostError::Nested(Error::Argument(message)) => vm.exc_new(core.argument_error, &message),
        HostError::Nested(Error::Decode(err)) => vm.exc_new(core.type_error, &err.to_string()),
    }
}

/// Resolve `A::B::Error` to an exception class
fn lookup_exception_class(vm: &Vm, path: &str) -> Option<ObjRef> {
    let mut class = vm.object_class();
    for segment in path.split("::") {
        class = vm.class_get_under(class, segment)?;
    }
    let is_exception = vm.class_value(class).type_tag() == ValueType::Class
        && vm.ancestors(class).contains(&vm.core().exception);
    is_exception.then_some(class)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exception_class() {
        let vm = Vm::new();
        let core = vm.core();
        assert_eq!(lookup_exception_class(&vm, "ArgumentError"), Some(core.argument_error));
        assert_eq!(lookup_exception_class(&vm, "String"), None);
        assert_eq!(lookup_exception_class(&vm, "Nope::Error"), None);

        let outer = vm.define_module("Lib");
        let error = vm.define_class_under(outer, "Error", core.standard_error);
        assert_eq!(lookup_exception_class(&vm, "Lib::Error"), Some(error));
    }

    #[test]
    fn test_host_error_classes() {
        let vm = Vm::new();
        let exc = host_error_to_exception(&vm, HostError::new("bad arg"));
        assert_eq!(vm.obj_classname(exc), "RuntimeError");
        assert_eq!(vm.exc_message(exc), "bad arg");

        let exc = host_error_to_exception(&vm, HostError::with_class("KeyError", "missing"));
        assert_eq!(vm.obj_classname(exc), "KeyError");

        let exc = host_error_to_exception(&vm, HostError::with_class("Unknown", "x"));
        assert_eq!(vm.obj_classname(exc), "RuntimeError");

        let exc = host_error_to_exception(&vm, Error::Argument("no block".into()).into());
        assert_eq!(vm.obj_classname(exc), "ArgumentError");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_missing_binding_raises() {
        let vm = Vm::new();
        let object = vm.object_class();
        vm.define_method(object, "orphan", trampoline, garnet_engine::ArgSpec::none());
        assert!(vm.load_string("orphan").is_nil());
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "NoMethodError");
    }
}
