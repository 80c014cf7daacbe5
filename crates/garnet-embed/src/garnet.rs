//! The host handle to a runtime instance

use crate::array::Array;
use crate::class::Class;
use crate::context::CompileContext;
use crate::decode::decode;
use crate::dispatch::MethodTable;
use crate::error::{Error, Exception, Result};
use crate::gc::{ArenaScope, GcPause};
use crate::hash::Hash;
use crate::handle::IntoValue;
use crate::protect::{run_protected, Operation};
use garnet_engine::{ArenaIndex, GcStats, ObjRef, Value, ValueType, Vm, VmOptions};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A runtime instance with host-defined methods.
///
/// Cloning is cheap and yields another handle to the same VM. Handles are
/// `!Send`: a VM and everything reached through it stay on one thread.
///
/// Every method that runs script code goes through the protected call
/// executor, so runtime exceptions come back as [`Error::Runtime`].
///
/// Results of protected calls (values and exceptions alike) are rooted in
/// the GC arena and stay alive until the arena is restored below them. The
/// arena has no cap: a long-running host loop should wrap each iteration
/// in [`Garnet::arena_scope`] or pair [`Garnet::arena_save`] with
/// [`Garnet::arena_restore`], keeping values it needs afterwards in a
/// global or instance variable.
#[derive(Clone)]
pub struct Garnet {
    vm: Rc<Vm>,
    methods: Rc<MethodTable>,
}

impl Garnet {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a runtime with the given options
    pub fn with_options(options: VmOptions) -> Self {
        let vm = Rc::new(Vm::with_options(options));
        let methods = Rc::new(MethodTable::new(Rc::downgrade(&vm)));
        vm.set_user_data(Some(methods.clone() as Rc<dyn Any>));
        debug!(live = vm.live_count(), "garnet runtime created");
        Self { vm, methods }
    }

    pub(crate) fn from_parts(vm: Rc<Vm>, methods: Rc<MethodTable>) -> Self {
        Self { vm, methods }
    }

    pub(crate) fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// The underlying VM
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Run `op` under protection and map the outcome to a `Result`
    pub fn protected(&self, op: Operation<'_>) -> Result<Value> {
        match run_protected(&self.vm, op) {
            (_, Some(exc)) => Err(Error::Runtime(Exception::from_value(&self.vm, exc))),
            (value, None) => Ok(value),
        }
    }

    /// Apply a runtime routine under protection
    pub(crate) fn apply<'a>(&self, f: impl FnOnce(&Vm) -> Value + 'a) -> Result<Value> {
        self.protected(Operation::Apply(Box::new(f)))
    }

    // ========================================================================
    // Loading and running code
    // ========================================================================

    /// Compile and run source text with the top-level `self`
    pub fn load_string(&self, source: &str) -> Result<Value> {
        self.protected(Operation::Load {
            source,
            context: None,
        })
    }

    /// Compile and run source text with compile settings
    pub fn load_string_with(&self, source: &str, context: &CompileContext) -> Result<Value> {
        self.protected(Operation::Load {
            source,
            context: Some(context),
        })
    }

    /// Compile source text into a proc without running it
    pub fn parse(&self, source: &str, context: Option<&CompileContext>) -> Result<Value> {
        let default = CompileContext::default();
        let context = context.unwrap_or(&default);
        self.apply(|vm| vm.compile(source, context.options()))
    }

    /// Run a proc from [`parse`](Self::parse) with `recv` as `self`
    pub fn run(&self, proc: Value, recv: Value) -> Result<Value> {
        self.protected(Operation::Run { proc, recv })
    }

    /// Call a method
    pub fn call(&self, recv: Value, method: &str, args: &[Value]) -> Result<Value> {
        self.protected(Operation::Call {
            recv,
            method,
            args,
            block: None,
        })
    }

    /// Call a method passing the last element of `args` as the block
    pub fn call_block(&self, recv: Value, method: &str, args: &[Value]) -> Result<Value> {
        let Some((block, args)) = args.split_last() else {
            return Err(Error::Argument(
                "call_block needs a block as the last argument".to_string(),
            ));
        };
        self.protected(Operation::Call {
            recv,
            method,
            args,
            block: Some(*block),
        })
    }

    /// Call a block or proc with arguments
    pub fn yield_block(&self, block: Value, args: &[Value]) -> Result<Value> {
        self.protected(Operation::Yield { block, args })
    }

    /// `to_s` of a value
    pub fn to_string(&self, value: Value) -> Result<String> {
        let mut out = String::new();
        self.apply(|vm| {
            out = vm.obj_as_string(value);
            Value::NIL
        })?;
        Ok(out)
    }

    /// `inspect` of a value
    pub fn inspect(&self, value: Value) -> Result<String> {
        let mut out = String::new();
        self.apply(|vm| {
            out = vm.inspect(value);
            Value::NIL
        })?;
        Ok(out)
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Make `def` inside `proc` define methods on `class`
    pub fn set_proc_target_class(&self, proc: Value, class: &Class) {
        self.vm.proc_set_target_class(proc, class.raw());
    }

    /// Read an instance variable (`name` includes the `@`)
    pub fn instance_variable(&self, obj: Value, name: &str) -> Value {
        self.vm.iv_get(obj, self.vm.intern(name))
    }

    /// Write an instance variable (`name` includes the `@`). Fails on
    /// immediates and frozen objects.
    pub fn set_instance_variable(&self, obj: Value, name: &str, value: Value) -> Result<()> {
        let sym = self.vm.intern(name);
        self.apply(|vm| {
            vm.iv_set(obj, sym, value);
            Value::NIL
        })?;
        Ok(())
    }

    /// Read a global variable (`name` includes the `$`)
    pub fn global(&self, name: &str) -> Value {
        self.vm.gv_get(self.vm.intern(name))
    }

    /// Write a global variable (`name` includes the `$`)
    pub fn set_global(&self, name: &str, value: Value) {
        self.vm.gv_set(self.vm.intern(name), value);
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// `nil`
    pub fn nil_value(&self) -> Value {
        Value::NIL
    }

    /// `true`
    pub fn true_value(&self) -> Value {
        Value::TRUE
    }

    /// `false`
    pub fn false_value(&self) -> Value {
        Value::FALSE
    }

    /// An integer
    pub fn fixnum_value(&self, i: i64) -> Value {
        Value::fixnum(i)
    }

    /// A float
    pub fn float_value(&self, f: f64) -> Value {
        Value::float(f)
    }

    /// A new string
    pub fn string_value(&self, s: &str) -> Value {
        self.vm.str_new(s)
    }

    /// A symbol
    pub fn symbol_value(&self, name: &str) -> Value {
        Value::symbol(self.vm.intern(name))
    }

    /// Convert a host value
    pub fn value(&self, value: impl IntoValue) -> Value {
        value.into_value(&self.vm)
    }

    /// View a hash value; `None` if `value` is not a hash
    pub fn hash(&self, value: Value) -> Option<Hash> {
        (value.type_tag() == ValueType::Hash).then(|| Hash::new(self.clone(), value))
    }

    /// View an array value; `None` if `value` is not an array
    pub fn array(&self, value: Value) -> Option<Array> {
        (value.type_tag() == ValueType::Array).then(|| Array::new(self.clone(), value))
    }

    /// Decode a value into a Rust type
    pub fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        Ok(decode(&self.vm, value)?)
    }

    // ========================================================================
    // Classes and modules
    // ========================================================================

    /// `Object`
    pub fn object_class(&self) -> Class {
        Class::new(self.clone(), self.vm.object_class())
    }

    /// Define (or reopen) a top-level class. The superclass defaults to
    /// `Object`; reopening with a different superclass fails.
    pub fn define_class(&self, name: &str, superclass: Option<&Class>) -> Result<Class> {
        self.define_class_in(self.vm.object_class(), name, superclass)
    }

    /// Define (or reopen) a class nested in `outer`
    pub fn define_class_under(
        &self,
        name: &str,
        superclass: Option<&Class>,
        outer: &Class,
    ) -> Result<Class> {
        self.define_class_in(outer.raw(), name, superclass)
    }

    fn define_class_in(&self, outer: ObjRef, name: &str, superclass: Option<&Class>) -> Result<Class> {
        let superclass = superclass.map_or(self.vm.object_class(), Class::raw);
        let class = self.apply(|vm| vm.class_value(vm.define_class_under(outer, name, superclass)))?;
        Ok(Class::new(self.clone(), class.as_pointer()))
    }

    /// Define (or reopen) a top-level module
    pub fn define_module(&self, name: &str) -> Result<Class> {
        self.define_module_in(self.vm.object_class(), name)
    }

    /// Define (or reopen) a module nested in `outer`
    pub fn define_module_under(&self, name: &str, outer: &Class) -> Result<Class> {
        self.define_module_in(outer.raw(), name)
    }

    fn define_module_in(&self, outer: ObjRef, name: &str) -> Result<Class> {
        let module = self.apply(|vm| vm.class_value(vm.define_module_under(outer, name)))?;
        Ok(Class::new(self.clone(), module.as_pointer()))
    }

    /// Look up a class, in `outer` or at the top level
    pub fn class(&self, name: &str, outer: Option<&Class>) -> Option<Class> {
        self.constant_of_type(name, outer, ValueType::Class)
    }

    /// Look up a module, in `outer` or at the top level
    pub fn module(&self, name: &str, outer: Option<&Class>) -> Option<Class> {
        self.constant_of_type(name, outer, ValueType::Module)
    }

    fn constant_of_type(&self, name: &str, outer: Option<&Class>, tt: ValueType) -> Option<Class> {
        let outer = outer.map_or(self.vm.object_class(), Class::raw);
        let found = self.vm.class_get_under(outer, name)?;
        (self.vm.class_value(found).type_tag() == tt).then(|| Class::new(self.clone(), found))
    }

    /// Whether the constant `name` is visible from `outer` (or the top level)
    pub fn const_defined(&self, name: &str, outer: Option<&Class>) -> bool {
        let outer = outer.map_or(self.vm.object_class(), Class::raw);
        self.vm.const_defined(outer, self.vm.intern(name))
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Collect now. Returns the number of objects freed, or `None` while
    /// collection is disabled.
    pub fn full_gc(&self) -> Option<usize> {
        self.vm.full_gc()
    }

    /// Enable or disable collection; returns the previous setting.
    /// Allocation continues while collection is disabled.
    pub fn set_collection_enabled(&self, enabled: bool) -> bool {
        let previous = self.vm.set_gc_enabled(enabled);
        debug!(enabled, previous, "gc toggled");
        previous
    }

    /// Whether collection is enabled
    pub fn collection_enabled(&self) -> bool {
        self.vm.gc_enabled()
    }

    /// Disable collection until the returned guard is dropped
    pub fn pause_gc(&self) -> GcPause {
        GcPause::new(self.vm.clone())
    }

    /// Number of live heap objects
    pub fn live_count(&self) -> usize {
        self.vm.live_count()
    }

    /// Whether `value`'s object has been collected. Always false for
    /// immediates.
    pub fn is_dead(&self, value: Value) -> bool {
        self.vm.object_dead_p(value)
    }

    /// Current position of the temporary-root arena
    pub fn arena_save(&self) -> ArenaIndex {
        self.vm.arena_save()
    }

    /// Release temporary roots made since `index`
    pub fn arena_restore(&self, index: ArenaIndex) {
        self.vm.arena_restore(index);
    }

    /// Restore the arena to its current position when the guard is dropped
    pub fn arena_scope(&self) -> ArenaScope {
        ArenaScope::new(self.vm.clone())
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.vm.gc_stats()
    }
}

impl Default for Garnet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Garnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Garnet")
            .field("live", &self.vm.live_count())
            .field("host_methods", &self.methods.len())
            .finish()
    }
}
