//! Classes and modules, and host method registration

use crate::dispatch::trampoline;
use crate::error::{HostError, Result};
use crate::garnet::Garnet;
use garnet_engine::{ArgSpec, ObjRef, Value};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A class or module of a runtime instance
#[derive(Clone)]
pub struct Class {
    class: ObjRef,
    garnet: Garnet,
}

impl Class {
    pub(crate) fn new(garnet: Garnet, class: ObjRef) -> Self {
        Self { class, garnet }
    }

    /// Raw handle
    pub fn raw(&self) -> ObjRef {
        self.class
    }

    /// The class as a runtime value
    pub fn value(&self) -> Value {
        self.garnet.vm().class_value(self.class)
    }

    /// Qualified name, e.g. `Outer::Inner`
    pub fn name(&self) -> String {
        self.garnet.vm().class_name(self.class)
    }

    /// Define an instance method implemented by the host.
    ///
    /// `f` receives the runtime handle, the receiver and the arguments,
    /// with the block (if given) as the last argument. Arity is checked
    /// against `spec` before `f` runs; a mismatch raises `ArgumentError`.
    /// Returning `Err` raises an exception in the calling script.
    ///
    /// `f` is owned by the runtime. Capturing a [`Garnet`] in it keeps the
    /// runtime alive forever; use the handle passed in instead.
    pub fn define_method<F>(&self, name: &str, spec: ArgSpec, f: F)
    where
        F: Fn(&Garnet, Value, &[Value]) -> std::result::Result<Value, HostError> + 'static,
    {
        self.register(self.class, name, spec, Rc::new(f));
    }

    /// Define a class method implemented by the host. See
    /// [`define_method`](Self::define_method).
    pub fn define_class_method<F>(&self, name: &str, spec: ArgSpec, f: F)
    where
        F: Fn(&Garnet, Value, &[Value]) -> std::result::Result<Value, HostError> + 'static,
    {
        let Some(meta) = self.garnet.vm().singleton_class_of(self.value()) else {
            return;
        };
        self.register(meta, name, spec, Rc::new(f));
    }

    fn register(&self, owner: ObjRef, name: &str, spec: ArgSpec, f: crate::dispatch::HostFn) {
        let vm = self.garnet.vm();
        let mid = vm.intern(name);
        self.garnet.methods().insert(owner, mid, f);
        vm.define_method_id(owner, mid, trampoline, spec);
        debug!(class = %vm.class_name(owner), method = name, "host method defined");
    }

    /// Include a module
    pub fn include_module(&self, module: &Class) {
        self.garnet.vm().include_module(self.class, module.raw());
    }

    /// Create an instance, running `initialize` with `args`
    pub fn new_instance(&self, args: &[Value]) -> Result<Value> {
        self.garnet.call(self.value(), "new", args)
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Class").field(&self.name()).finish()
    }
}
