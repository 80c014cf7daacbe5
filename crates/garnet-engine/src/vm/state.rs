//! VM state: heap access, classes, methods and variables
//!
//! A [`Vm`] is single-threaded. All state sits behind `Cell`/`RefCell` so
//! the interpreter, builtins and host callbacks can share `&Vm` while the
//! VM re-enters itself. No borrow is held across a call that may allocate
//! or raise.

use crate::parser::{Interner, Symbol};
use crate::vm::gc::{Arena, ArenaIndex, GarbageCollector, GcStats, RootSet};
use crate::vm::object::{
    ArgSpec, ClassData, EnvData, HashKey, HashTable, HeapObject, Method, NativeFn, ObjectData,
    RBasic,
};
use crate::vm::options::VmOptions;
use crate::vm::unwind::{ExitKind, UnwindTarget};
use crate::vm::value::{ObjRef, Value, ValueType};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use tracing::debug;

/// Activation record of a method call
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Method name (`None` for top-level code)
    pub mid: Option<Symbol>,
    /// Receiver
    pub recv: Value,
    /// Class the method was found in
    pub target_class: ObjRef,
    /// Block passed to the call (nil if none)
    pub block: Value,
    pub(crate) args: Vec<Value>,
    pub(crate) env: Option<ObjRef>,
    pub(crate) id: u64,
}

impl CallInfo {
    /// Positional arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Handles of the builtin classes
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct CoreClasses {
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub kernel: ObjRef,
    pub comparable: ObjRef,
    pub nil: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub numeric: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub symbol: ObjRef,
    pub string: ObjRef,
    pub array: ObjRef,
    pub hash: ObjRef,
    pub proc_class: ObjRef,
    pub exception: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub zero_division_error: ObjRef,
    pub index_error: ObjRef,
    pub key_error: ObjRef,
    pub frozen_error: ObjRef,
    pub local_jump_error: ObjRef,
    pub script_error: ObjRef,
    pub syntax_error: ObjRef,
    pub system_stack_error: ObjRef,
}

impl CoreClasses {
    fn all(&self) -> [ObjRef; 31] {
        [
            self.object,
            self.module,
            self.class,
            self.kernel,
            self.comparable,
            self.nil,
            self.true_class,
            self.false_class,
            self.numeric,
            self.integer,
            self.float,
            self.symbol,
            self.string,
            self.array,
            self.hash,
            self.proc_class,
            self.exception,
            self.standard_error,
            self.runtime_error,
            self.argument_error,
            self.type_error,
            self.name_error,
            self.no_method_error,
            self.zero_division_error,
            self.index_error,
            self.key_error,
            self.frozen_error,
            self.local_jump_error,
            self.script_error,
            self.syntax_error,
            self.system_stack_error,
        ]
    }
}

/// Frequently used symbols, interned at startup
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommonSymbols {
    pub initialize: Symbol,
    pub mesg: Symbol,
    pub to_s: Symbol,
    pub inspect: Symbol,
    pub eq: Symbol,
    pub eqq: Symbol,
    pub call: Symbol,
    pub new: Symbol,
    pub block_given: Symbol,
    pub cmp: Symbol,
}

impl CommonSymbols {
    fn new(interner: &mut Interner) -> Self {
        Self {
            initialize: interner.intern("initialize"),
            mesg: interner.intern("mesg"),
            to_s: interner.intern("to_s"),
            inspect: interner.intern("inspect"),
            eq: interner.intern("=="),
            eqq: interner.intern("==="),
            call: interner.intern("call"),
            new: interner.intern("new"),
            block_given: interner.intern("block_given?"),
            cmp: interner.intern("<=>"),
        }
    }
}

/// The embedded runtime.
///
/// `Vm` is neither `Send` nor `Sync`: one instance belongs to one thread.
pub struct Vm {
    pub(crate) interner: RefCell<Interner>,
    pub(crate) gc: RefCell<GarbageCollector>,
    pub(crate) arena: RefCell<Arena>,
    pub(crate) core: Cell<CoreClasses>,
    pub(crate) syms: CommonSymbols,
    pub(crate) globals: RefCell<FxHashMap<Symbol, Value>>,
    pub(crate) frames: RefCell<Vec<CallInfo>>,
    pub(crate) exc: Cell<Value>,
    pub(crate) unwind: Cell<Option<UnwindTarget>>,
    pub(crate) unwind_depth: Cell<usize>,
    pub(crate) exit_tags: RefCell<Vec<(ExitKind, u64)>>,
    /// Exit tags below this index belong to frames outside the innermost
    /// host protected call
    pub(crate) exit_floor: Cell<usize>,
    pub(crate) top_self: Cell<Value>,
    next_id: Cell<u64>,
    user_data: RefCell<Option<Rc<dyn Any>>>,
    options: VmOptions,
}

impl Vm {
    /// Create a VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with the given options
    pub fn with_options(options: VmOptions) -> Self {
        let mut interner = Interner::with_capacity(256);
        let syms = CommonSymbols::new(&mut interner);

        let vm = Vm {
            interner: RefCell::new(interner),
            gc: RefCell::new(GarbageCollector::new(options.gc_threshold)),
            arena: RefCell::new(Arena::with_capacity(options.arena_capacity)),
            core: Cell::new(CoreClasses::default()),
            syms,
            globals: RefCell::new(FxHashMap::default()),
            frames: RefCell::new(Vec::new()),
            exc: Cell::new(Value::NIL),
            unwind: Cell::new(None),
            unwind_depth: Cell::new(0),
            exit_tags: RefCell::new(Vec::new()),
            exit_floor: Cell::new(0),
            top_self: Cell::new(Value::NIL),
            next_id: Cell::new(1),
            user_data: RefCell::new(None),
            options,
        };

        let was_enabled = vm.gc.borrow_mut().set_enabled(false);
        crate::vm::builtins::boot(&vm);
        vm.gc.borrow_mut().set_enabled(was_enabled);
        vm.arena_restore(ArenaIndex(0));

        debug!(
            live = vm.live_count(),
            gc_threshold = options.gc_threshold,
            max_call_depth = options.max_call_depth,
            "vm booted"
        );
        vm
    }

    /// Options the VM was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Builtin class handles
    pub fn core(&self) -> CoreClasses {
        self.core.get()
    }

    /// `Object`
    pub fn object_class(&self) -> ObjRef {
        self.core.get().object
    }

    /// The top-level `self` (`main`)
    pub fn top_self(&self) -> Value {
        self.top_self.get()
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    /// Intern a name
    pub fn intern(&self, name: &str) -> Symbol {
        self.interner.borrow_mut().intern(name)
    }

    /// Name of a symbol
    pub fn sym_name(&self, sym: Symbol) -> String {
        self.interner.borrow().resolve(sym).to_string()
    }

    // ========================================================================
    // Allocation and GC
    // ========================================================================

    /// Allocate a heap object. The new value is protected in the arena.
    pub(crate) fn alloc(&self, tt: ValueType, class: ObjRef, data: ObjectData) -> Value {
        let collect = self.gc.borrow().should_collect();
        if collect {
            self.collect_garbage();
        }
        let r = self
            .gc
            .borrow_mut()
            .allocate(HeapObject::new(tt, class, data));
        let value = Value::object(tt, r);
        self.arena.borrow_mut().protect(value);
        value
    }

    fn gather_roots(&self) -> RootSet {
        let mut roots = RootSet::new();
        for class in self.core.get().all() {
            roots.add(Value::object(ValueType::Class, class));
        }
        roots.add(self.top_self.get());
        roots.add(self.exc.get());
        roots.extend(self.globals.borrow().values().copied());
        roots.extend(self.arena.borrow().iter());
        for ci in self.frames.borrow().iter() {
            roots.add(ci.recv);
            roots.add(ci.block);
            roots.add(Value::object(ValueType::Class, ci.target_class));
            roots.extend(ci.args.iter().copied());
            if let Some(env) = ci.env {
                roots.add(Value::object(ValueType::Env, env));
            }
        }
        roots
    }

    fn collect_garbage(&self) -> Option<usize> {
        let roots = self.gather_roots();
        let freed = self.gc.borrow_mut().collect(&roots);
        if let Some(freed) = freed {
            debug!(freed, live = self.live_count(), roots = roots.len(), "gc cycle");
        }
        freed
    }

    /// Run a full collection now. Returns the number of objects freed, or
    /// `None` when collection is disabled.
    pub fn full_gc(&self) -> Option<usize> {
        self.collect_garbage()
    }

    /// Enable or disable collection; returns the previous setting
    pub fn set_gc_enabled(&self, enabled: bool) -> bool {
        self.gc.borrow_mut().set_enabled(enabled)
    }

    /// Whether collection is enabled
    pub fn gc_enabled(&self) -> bool {
        self.gc.borrow().is_enabled()
    }

    /// Number of live heap objects
    pub fn live_count(&self) -> usize {
        self.gc.borrow().live_count()
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> GcStats {
        self.gc.borrow().stats().clone()
    }

    /// Whether `value` refers to a collected (or never valid) object.
    /// Immediates are never dead and never touch the heap.
    pub fn object_dead_p(&self, value: Value) -> bool {
        if value.is_immediate() {
            return false;
        }
        !self.gc.borrow().heap().is_live(value.as_pointer())
    }

    /// Current arena position
    pub fn arena_save(&self) -> ArenaIndex {
        self.arena.borrow().save()
    }

    /// Release arena entries made since `index`
    pub fn arena_restore(&self, index: ArenaIndex) {
        self.arena.borrow_mut().restore(index);
    }

    /// Keep `value` alive until the arena is restored below this point
    pub fn gc_protect(&self, value: Value) {
        self.arena.borrow_mut().protect(value);
    }

    // ========================================================================
    // Object access
    // ========================================================================

    /// Run `f` on the object behind `r`. `f` must not allocate.
    pub(crate) fn with_object<R>(&self, r: ObjRef, f: impl FnOnce(&HeapObject) -> R) -> Option<R> {
        let gc = self.gc.borrow();
        gc.heap().get(r).map(f)
    }

    /// Run `f` on the object behind `r`, mutably. `f` must not allocate.
    pub(crate) fn with_object_mut<R>(
        &self,
        r: ObjRef,
        f: impl FnOnce(&mut HeapObject) -> R,
    ) -> Option<R> {
        let mut gc = self.gc.borrow_mut();
        gc.heap_mut().get_mut(r).map(f)
    }

    /// Borrowed view of an object's header; `None` for immediates and dead handles
    pub fn basic(&self, value: Value) -> Option<Ref<'_, RBasic>> {
        if value.is_immediate() {
            return None;
        }
        Ref::filter_map(self.gc.borrow(), |gc| {
            gc.heap().get(value.as_pointer()).map(|obj| &obj.basic)
        })
        .ok()
    }

    pub(crate) fn class_data<R>(&self, class: ObjRef, f: impl FnOnce(&ClassData) -> R) -> Option<R> {
        let gc = self.gc.borrow();
        match &gc.heap().get(class)?.data {
            ObjectData::Class(data) => Some(f(data)),
            _ => None,
        }
    }

    pub(crate) fn class_data_mut<R>(
        &self,
        class: ObjRef,
        f: impl FnOnce(&mut ClassData) -> R,
    ) -> Option<R> {
        let mut gc = self.gc.borrow_mut();
        match &mut gc.heap_mut().get_mut(class)?.data {
            ObjectData::Class(data) => Some(f(data)),
            _ => None,
        }
    }

    /// Whether the object is frozen
    pub fn is_frozen(&self, value: Value) -> bool {
        if value.is_immediate() {
            return true;
        }
        self.with_object(value.as_pointer(), |obj| obj.basic.frozen)
            .unwrap_or(false)
    }

    pub(crate) fn check_frozen(&self, value: Value) {
        if value.is_heap() && self.is_frozen(value) {
            let message = format!("can't modify frozen {}", self.obj_classname(value));
            self.raise_error(self.core.get().frozen_error, &message);
        }
    }

    // ========================================================================
    // Classes
    // ========================================================================

    /// Class of a value, including its singleton class if it has one
    pub fn class_of(&self, value: Value) -> ObjRef {
        let core = self.core.get();
        match value.type_tag() {
            ValueType::Nil | ValueType::Undef => core.nil,
            ValueType::True => core.true_class,
            ValueType::False => core.false_class,
            ValueType::Fixnum => core.integer,
            ValueType::Float => core.float,
            ValueType::Symbol => core.symbol,
            _ => self
                .with_object(value.as_pointer(), |obj| obj.basic.class)
                .unwrap_or(core.object),
        }
    }

    /// Class of a value, skipping singleton classes
    pub fn real_class_of(&self, value: Value) -> ObjRef {
        let mut class = self.class_of(value);
        loop {
            let next = self.with_object(class, |obj| match (&obj.basic.tt, &obj.data) {
                (ValueType::SClass, ObjectData::Class(data)) => data.superclass,
                _ => None,
            });
            match next.flatten() {
                Some(superclass) => class = superclass,
                None => return class,
            }
        }
    }

    /// Superclass of a class
    pub fn superclass(&self, class: ObjRef) -> Option<ObjRef> {
        self.class_data(class, |data| data.superclass).flatten()
    }

    /// Method resolution order of a class: each class followed by the
    /// modules it includes, most recent first
    pub fn ancestors(&self, class: ObjRef) -> Vec<ObjRef> {
        let mut result = Vec::new();
        let mut current = Some(class);
        while let Some(c) = current {
            result.push(c);
            let (mixins, superclass) = self
                .class_data(c, |data| (data.mixins.clone(), data.superclass))
                .unwrap_or_default();
            for module in mixins.iter().rev() {
                if !result.contains(module) {
                    result.push(*module);
                }
            }
            current = superclass;
        }
        result
    }

    /// Whether `value` is an instance of `class` or one of its descendants
    pub fn obj_is_kind_of(&self, value: Value, class: ObjRef) -> bool {
        self.ancestors(self.class_of(value)).contains(&class)
    }

    /// Qualified name of a class (`Outer::Inner`)
    pub fn class_name(&self, class: ObjRef) -> String {
        let info = self.with_object(class, |obj| match &obj.data {
            ObjectData::Class(data) => Some((obj.basic.tt, data.name, data.outer, data.attached)),
            _ => None,
        });
        match info.flatten() {
            Some((ValueType::SClass, _, _, attached)) => {
                let inner = attached
                    .filter(|a| self.is_class_like(*a))
                    .map(|a| self.class_name(a))
                    .unwrap_or_else(|| "Object".to_string());
                format!("#<Class:{}>", inner)
            }
            Some((_, Some(name), outer, _)) => {
                let name = self.sym_name(name);
                match outer {
                    Some(outer) if outer != self.core.get().object => {
                        format!("{}::{}", self.class_name(outer), name)
                    }
                    _ => name,
                }
            }
            Some((_, None, _, _)) => "#<Class>".to_string(),
            None => "?".to_string(),
        }
    }

    /// Class name of a value's (non-singleton) class
    pub fn obj_classname(&self, value: Value) -> String {
        self.class_name(self.real_class_of(value))
    }

    pub(crate) fn is_class_like(&self, r: ObjRef) -> bool {
        self.with_object(r, |obj| {
            matches!(
                obj.basic.tt,
                ValueType::Class | ValueType::Module | ValueType::SClass
            )
        })
        .unwrap_or(false)
    }

    /// Value for a class handle
    pub fn class_value(&self, class: ObjRef) -> Value {
        let tt = self
            .with_object(class, |obj| obj.basic.tt)
            .unwrap_or(ValueType::Class);
        Value::object(tt, class)
    }

    /// Create a class object without registering a constant
    pub(crate) fn new_class(
        &self,
        superclass: Option<ObjRef>,
        name: Option<Symbol>,
        outer: Option<ObjRef>,
    ) -> ObjRef {
        let instance_tt = superclass.and_then(|s| self.class_data(s, |d| d.instance_tt).flatten());
        let class = self.alloc(
            ValueType::Class,
            self.core.get().class,
            ObjectData::Class(ClassData {
                name,
                superclass,
                outer,
                instance_tt,
                ..ClassData::default()
            }),
        );
        self.singleton_class_of(class);
        class.as_pointer()
    }

    /// Create a module object without registering a constant
    pub(crate) fn new_module(&self, name: Option<Symbol>, outer: Option<ObjRef>) -> ObjRef {
        let module = self.alloc(
            ValueType::Module,
            self.core.get().module,
            ObjectData::Class(ClassData {
                name,
                outer,
                ..ClassData::default()
            }),
        );
        self.singleton_class_of(module);
        module.as_pointer()
    }

    /// Singleton class of a heap object, created on first use.
    ///
    /// The singleton of a class inherits from the singleton of its
    /// superclass, so class methods are inherited.
    pub fn singleton_class_of(&self, value: Value) -> Option<ObjRef> {
        if value.is_immediate() {
            return None;
        }
        let obj = value.as_pointer();
        let current = self.with_object(obj, |o| o.basic.class)?;
        let existing = self
            .with_object(current, |o| match (&o.basic.tt, &o.data) {
                (ValueType::SClass, ObjectData::Class(data)) => data.attached == Some(obj),
                _ => false,
            })
            .unwrap_or(false);
        if existing {
            return Some(current);
        }

        let superclass = match value.type_tag() {
            ValueType::Class => match self.superclass(obj) {
                Some(superclass) => self.singleton_class_of(self.class_value(superclass)),
                None => Some(self.core.get().class),
            },
            _ => Some(current),
        };

        let meta = self.alloc(
            ValueType::SClass,
            self.core.get().class,
            ObjectData::Class(ClassData {
                superclass,
                attached: Some(obj),
                ..ClassData::default()
            }),
        );
        let meta = meta.as_pointer();
        self.with_object_mut(obj, |o| o.basic.class = meta);
        Some(meta)
    }

    /// Define (or reopen) a top-level class
    pub fn define_class(&self, name: &str, superclass: ObjRef) -> ObjRef {
        self.define_class_under(self.core.get().object, name, superclass)
    }

    /// Define (or reopen) a class nested in `outer`.
    ///
    /// Raises `TypeError` if the name is taken by something that is not a
    /// class, or by a class with a different superclass.
    pub fn define_class_under(&self, outer: ObjRef, name: &str, superclass: ObjRef) -> ObjRef {
        let sym = self.intern(name);
        self.define_class_id(outer, sym, Some(superclass))
    }

    pub(crate) fn define_class_id(
        &self,
        outer: ObjRef,
        name: Symbol,
        superclass: Option<ObjRef>,
    ) -> ObjRef {
        let core = self.core.get();
        if let Some(existing) = self.const_get_own(outer, name) {
            if existing.type_tag() != ValueType::Class {
                let message = format!("{} is not a class", self.sym_name(name));
                self.raise_error(core.type_error, &message);
            }
            let existing = existing.as_pointer();
            if let Some(superclass) = superclass {
                if self.superclass(existing) != Some(superclass) {
                    let message = format!("superclass mismatch for class {}", self.sym_name(name));
                    self.raise_error(core.type_error, &message);
                }
            }
            return existing;
        }

        let class = self.new_class(Some(superclass.unwrap_or(core.object)), Some(name), Some(outer));
        self.const_set(outer, name, Value::object(ValueType::Class, class));
        debug!(class = %self.class_name(class), "class defined");
        class
    }

    /// Define (or reopen) a top-level module
    pub fn define_module(&self, name: &str) -> ObjRef {
        self.define_module_under(self.core.get().object, name)
    }

    /// Define (or reopen) a module nested in `outer`
    pub fn define_module_under(&self, outer: ObjRef, name: &str) -> ObjRef {
        let sym = self.intern(name);
        self.define_module_id(outer, sym)
    }

    pub(crate) fn define_module_id(&self, outer: ObjRef, name: Symbol) -> ObjRef {
        if let Some(existing) = self.const_get_own(outer, name) {
            if existing.type_tag() != ValueType::Module {
                let message = format!("{} is not a module", self.sym_name(name));
                self.raise_error(self.core.get().type_error, &message);
            }
            return existing.as_pointer();
        }
        let module = self.new_module(Some(name), Some(outer));
        self.const_set(outer, name, Value::object(ValueType::Module, module));
        debug!(module = %self.class_name(module), "module defined");
        module
    }

    /// Look up a class or module constant in `outer` (or `Object`)
    pub fn class_get_under(&self, outer: ObjRef, name: &str) -> Option<ObjRef> {
        let sym = self.interner.borrow().get(name)?;
        let value = self.const_lookup_in(outer, sym)?;
        match value.type_tag() {
            ValueType::Class | ValueType::Module => Some(value.as_pointer()),
            _ => None,
        }
    }

    /// Look up a top-level class or module
    pub fn class_get(&self, name: &str) -> Option<ObjRef> {
        self.class_get_under(self.core.get().object, name)
    }

    /// Include `module` into `class`
    pub fn include_module(&self, class: ObjRef, module: ObjRef) {
        self.class_data_mut(class, |data| {
            if !data.mixins.contains(&module) {
                data.mixins.push(module);
            }
        });
    }

    // ========================================================================
    // Constants
    // ========================================================================

    pub(crate) fn const_get_own(&self, class: ObjRef, name: Symbol) -> Option<Value> {
        self.class_data(class, |data| data.consts.get(&name).copied())
            .flatten()
    }

    /// Look a constant up in `class` and its ancestors, then in `Object`
    pub fn const_lookup_in(&self, class: ObjRef, name: Symbol) -> Option<Value> {
        for c in self.ancestors(class) {
            if let Some(value) = self.const_get_own(c, name) {
                return Some(value);
            }
        }
        self.const_get_own(self.core.get().object, name)
    }

    /// Whether `name` is defined in `class`, its ancestors or `Object`
    pub fn const_defined(&self, class: ObjRef, name: Symbol) -> bool {
        self.const_lookup_in(class, name).is_some()
    }

    fn outer_chain_contains(&self, start: ObjRef, target: ObjRef) -> bool {
        let mut current = Some(start);
        while let Some(class) = current {
            if class == target {
                return true;
            }
            current = self.class_data(class, |data| data.outer).flatten();
        }
        false
    }

    /// Set a constant. Anonymous classes take the constant's name.
    pub fn const_set(&self, class: ObjRef, name: Symbol, value: Value) {
        if matches!(value.type_tag(), ValueType::Class | ValueType::Module) {
            let target = value.as_pointer();
            // Outer chains stay acyclic (`Object::Object` included)
            let outer = (!self.outer_chain_contains(class, target)).then_some(class);
            self.class_data_mut(target, |data| {
                if data.name.is_none() {
                    data.name = Some(name);
                    data.outer = outer;
                }
            });
        }
        self.class_data_mut(class, |data| {
            data.consts.insert(name, value);
        });
    }

    // ========================================================================
    // Methods
    // ========================================================================

    pub(crate) fn add_method(&self, class: ObjRef, name: Symbol, method: Method) {
        self.class_data_mut(class, |data| {
            data.methods.insert(name, method);
        });
    }

    /// Define a native instance method
    pub fn define_method(&self, class: ObjRef, name: &str, func: NativeFn, aspec: ArgSpec) {
        let sym = self.intern(name);
        self.define_method_id(class, sym, func, aspec);
    }

    /// Define a native instance method by symbol
    pub fn define_method_id(&self, class: ObjRef, name: Symbol, func: NativeFn, aspec: ArgSpec) {
        self.add_method(class, name, Method::Native { func, aspec });
    }

    /// Define a native class method (on the singleton class)
    pub fn define_class_method(&self, class: ObjRef, name: &str, func: NativeFn, aspec: ArgSpec) {
        if let Some(meta) = self.singleton_class_of(self.class_value(class)) {
            self.define_method(meta, name, func, aspec);
        }
    }

    /// Find a method along the ancestors of `class`. Returns the method
    /// and the class it was found in.
    pub fn find_method(&self, class: ObjRef, name: Symbol) -> Option<(Method, ObjRef)> {
        for c in self.ancestors(class) {
            if let Some(method) = self.class_data(c, |data| data.methods.get(&name).cloned()).flatten() {
                return Some((method, c));
            }
        }
        None
    }

    /// Whether `value` responds to `name`
    pub fn respond_to(&self, value: Value, name: Symbol) -> bool {
        self.find_method(self.class_of(value), name).is_some()
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Read an instance variable; nil if unset or `obj` is an immediate
    pub fn iv_get(&self, obj: Value, name: Symbol) -> Value {
        if obj.is_immediate() {
            return Value::NIL;
        }
        self.with_object(obj.as_pointer(), |o| o.ivars.get(&name).copied())
            .flatten()
            .unwrap_or(Value::NIL)
    }

    /// Write an instance variable. Raises on immediates and frozen objects.
    pub fn iv_set(&self, obj: Value, name: Symbol, value: Value) {
        if obj.is_immediate() {
            let message = format!("can't set instance variable on {}", self.obj_classname(obj));
            self.raise_error(self.core.get().argument_error, &message);
        }
        self.check_frozen(obj);
        self.with_object_mut(obj.as_pointer(), |o| {
            o.ivars.insert(name, value);
        });
    }

    /// Whether an instance variable is set
    pub fn iv_defined(&self, obj: Value, name: Symbol) -> bool {
        obj.is_heap()
            && self
                .with_object(obj.as_pointer(), |o| o.ivars.contains_key(&name))
                .unwrap_or(false)
    }

    /// Read a global variable
    pub fn gv_get(&self, name: Symbol) -> Value {
        self.globals
            .borrow()
            .get(&name)
            .copied()
            .unwrap_or(Value::NIL)
    }

    /// Write a global variable
    pub fn gv_set(&self, name: Symbol, value: Value) {
        self.globals.borrow_mut().insert(name, value);
    }

    // ========================================================================
    // Environments
    // ========================================================================

    pub(crate) fn env_new(&self, parent: Option<ObjRef>) -> ObjRef {
        self.alloc(
            ValueType::Env,
            ObjRef::NULL,
            ObjectData::Env(EnvData {
                vars: FxHashMap::default(),
                parent,
            }),
        )
        .as_pointer()
    }

    /// Read a local variable, searching enclosing environments
    pub(crate) fn env_get(&self, env: ObjRef, name: Symbol) -> Option<Value> {
        let gc = self.gc.borrow();
        let mut current = Some(env);
        while let Some(r) = current {
            match &gc.heap().get(r)?.data {
                ObjectData::Env(data) => {
                    if let Some(value) = data.vars.get(&name) {
                        return Some(*value);
                    }
                    current = data.parent;
                }
                _ => return None,
            }
        }
        None
    }

    /// Assign a local variable: updates the innermost environment that
    /// already has it, otherwise defines it in `env`
    pub(crate) fn env_set(&self, env: ObjRef, name: Symbol, value: Value) {
        let mut gc = self.gc.borrow_mut();
        let heap = gc.heap_mut();

        let mut current = Some(env);
        let mut owner = env;
        while let Some(r) = current {
            match heap.get(r).map(|o| &o.data) {
                Some(ObjectData::Env(data)) => {
                    if data.vars.contains_key(&name) {
                        owner = r;
                        break;
                    }
                    current = data.parent;
                }
                _ => break,
            }
        }

        if let Some(ObjectData::Env(data)) = heap.get_mut(owner).map(|o| &mut o.data) {
            data.vars.insert(name, value);
        }
    }

    /// Define a variable in `env` itself (parameters, block-locals)
    pub(crate) fn env_define(&self, env: ObjRef, name: Symbol, value: Value) {
        self.with_object_mut(env, |o| {
            if let ObjectData::Env(data) = &mut o.data {
                data.vars.insert(name, value);
            }
        });
    }

    // ========================================================================
    // Call frames
    // ========================================================================

    pub(crate) fn push_frame(&self, ci: CallInfo) -> usize {
        let mut frames = self.frames.borrow_mut();
        frames.push(ci);
        frames.len() - 1
    }

    pub(crate) fn pop_frame(&self, depth: usize) {
        self.frames.borrow_mut().truncate(depth);
    }

    /// Number of active call frames
    pub fn call_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// The innermost call frame
    pub fn current_call_info(&self) -> Option<CallInfo> {
        self.frames.borrow().last().cloned()
    }

    /// Positional arguments and block of the current native call: the
    /// `"*&"` form of classic argument extraction
    pub fn get_args_rest_block(&self) -> (Vec<Value>, Value) {
        let frames = self.frames.borrow();
        match frames.last() {
            Some(ci) => (ci.args.clone(), ci.block),
            None => (Vec::new(), Value::NIL),
        }
    }

    /// Positional arguments of the current native call
    pub fn get_args(&self) -> Vec<Value> {
        self.get_args_rest_block().0
    }

    /// First argument of the current native call (nil if none)
    pub(crate) fn arg(&self, index: usize) -> Value {
        self.frames
            .borrow()
            .last()
            .and_then(|ci| ci.args.get(index).copied())
            .unwrap_or(Value::NIL)
    }

    // ========================================================================
    // User data
    // ========================================================================

    /// Attach host data to the VM
    pub fn set_user_data(&self, data: Option<Rc<dyn Any>>) {
        *self.user_data.borrow_mut() = data;
    }

    /// Host data attached with [`set_user_data`](Self::set_user_data)
    pub fn user_data(&self) -> Option<Rc<dyn Any>> {
        self.user_data.borrow().clone()
    }

    // ========================================================================
    // Strings, arrays and hashes
    // ========================================================================

    /// Create a string
    pub fn str_new(&self, s: impl Into<String>) -> Value {
        self.alloc(
            ValueType::String,
            self.core.get().string,
            ObjectData::Str(s.into()),
        )
    }

    /// Run `f` on the contents of a string value
    pub fn with_str<R>(&self, value: Value, f: impl FnOnce(&str) -> R) -> Option<R> {
        if value.type_tag() != ValueType::String {
            return None;
        }
        self.with_object(value.as_pointer(), |o| match &o.data {
            ObjectData::Str(s) => Some(f(s)),
            _ => None,
        })
        .flatten()
    }

    /// Contents of a string value
    pub fn string_of(&self, value: Value) -> Option<String> {
        self.with_str(value, str::to_string)
    }

    pub(crate) fn str_modify(&self, value: Value, f: impl FnOnce(&mut String)) {
        self.check_frozen(value);
        self.with_object_mut(value.as_pointer(), |o| {
            if let ObjectData::Str(s) = &mut o.data {
                f(s);
            }
        });
    }

    /// Create an array
    pub fn ary_new(&self, items: Vec<Value>) -> Value {
        self.alloc(
            ValueType::Array,
            self.core.get().array,
            ObjectData::Array(items),
        )
    }

    /// Elements of an array value
    pub fn ary_items(&self, value: Value) -> Option<Vec<Value>> {
        if value.type_tag() != ValueType::Array {
            return None;
        }
        self.with_object(value.as_pointer(), |o| match &o.data {
            ObjectData::Array(items) => Some(items.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Length of an array value
    pub fn ary_len(&self, value: Value) -> Option<usize> {
        if value.type_tag() != ValueType::Array {
            return None;
        }
        self.with_object(value.as_pointer(), |o| match &o.data {
            ObjectData::Array(items) => Some(items.len()),
            _ => None,
        })
        .flatten()
    }

    /// Element of an array; negative indices count from the end
    pub fn ary_ref(&self, value: Value, index: i64) -> Value {
        if value.type_tag() != ValueType::Array {
            return Value::NIL;
        }
        self.with_object(value.as_pointer(), |o| match &o.data {
            ObjectData::Array(items) => {
                let index = if index < 0 { items.len() as i64 + index } else { index };
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).copied())
            }
            _ => None,
        })
        .flatten()
        .unwrap_or(Value::NIL)
    }

    pub(crate) fn ary_modify<R>(&self, value: Value, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
        self.check_frozen(value);
        self.with_object_mut(value.as_pointer(), |o| match &mut o.data {
            ObjectData::Array(items) => Some(f(items)),
            _ => None,
        })
        .flatten()
    }

    /// Append to an array
    pub fn ary_push(&self, array: Value, value: Value) {
        self.ary_modify(array, |items| items.push(value));
    }

    /// Create an empty hash
    pub fn hash_new(&self) -> Value {
        self.alloc(
            ValueType::Hash,
            self.core.get().hash,
            ObjectData::Hash(HashTable::default()),
        )
    }

    pub(crate) fn hash_key(&self, key: Value) -> HashKey {
        match self.string_of(key) {
            Some(s) => HashKey::Str(s),
            None => HashKey::Value(key),
        }
    }

    /// Look up `key`
    pub fn hash_get(&self, hash: Value, key: Value) -> Option<Value> {
        let key = self.hash_key(key);
        self.with_object(hash.as_pointer(), |o| match &o.data {
            ObjectData::Hash(table) => table.get(&key),
            _ => None,
        })
        .flatten()
    }

    /// Insert or replace `key`
    pub fn hash_set(&self, hash: Value, key: Value, value: Value) {
        let lookup = self.hash_key(key);
        self.check_frozen(hash);
        self.with_object_mut(hash.as_pointer(), |o| {
            if let ObjectData::Hash(table) = &mut o.data {
                table.insert(lookup, key, value);
            }
        });
    }

    /// Remove `key`, returning its value
    pub fn hash_delete(&self, hash: Value, key: Value) -> Option<Value> {
        let key = self.hash_key(key);
        self.check_frozen(hash);
        self.with_object_mut(hash.as_pointer(), |o| match &mut o.data {
            ObjectData::Hash(table) => table.remove(&key),
            _ => None,
        })
        .flatten()
    }

    /// Entries of a hash in insertion order
    pub fn hash_entries(&self, hash: Value) -> Vec<(Value, Value)> {
        self.with_object(hash.as_pointer(), |o| match &o.data {
            ObjectData::Hash(table) => table.entries.iter().map(|(_, k, v)| (*k, *v)).collect(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    /// Keys of a hash in insertion order
    pub fn hash_keys(&self, hash: Value) -> Vec<Value> {
        self.hash_entries(hash).into_iter().map(|(k, _)| k).collect()
    }

    /// Number of entries
    pub fn hash_len(&self, hash: Value) -> usize {
        self.with_object(hash.as_pointer(), |o| match &o.data {
            ObjectData::Hash(table) => table.len(),
            _ => 0,
        })
        .unwrap_or(0)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Create an exception instance with a message
    pub fn exc_new(&self, class: ObjRef, message: &str) -> Value {
        let exc = self.alloc(ValueType::Exception, class, ObjectData::Plain);
        let mesg = self.str_new(message);
        let sym = self.syms.mesg;
        self.with_object_mut(exc.as_pointer(), |o| {
            o.ivars.insert(sym, mesg);
        });
        exc
    }

    /// Message of an exception, falling back to its class name
    pub fn exc_message(&self, exc: Value) -> String {
        let mesg = self.iv_get(exc, self.syms.mesg);
        match self.string_of(mesg) {
            Some(message) => message,
            None => self.obj_classname(exc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_defines_core_classes() {
        let vm = Vm::new();
        let core = vm.core();
        assert_eq!(vm.class_name(core.object), "Object");
        assert_eq!(vm.class_name(core.no_method_error), "NoMethodError");
        assert_eq!(vm.class_get("String"), Some(core.string));
        assert_eq!(vm.superclass(core.class), Some(core.module));
        assert!(vm.ancestors(core.no_method_error).contains(&core.standard_error));
    }

    #[test]
    fn test_class_methods_inherit_through_metaclasses() {
        let vm = Vm::new();
        let base = vm.define_class("Base", vm.object_class());
        let derived = vm.define_class("Derived", base);

        let base_meta = vm.class_of(vm.class_value(base));
        let derived_meta = vm.class_of(vm.class_value(derived));
        assert_eq!(vm.superclass(derived_meta), Some(base_meta));
        assert_eq!(vm.class_name(derived_meta), "#<Class:Derived>");
        assert_eq!(vm.real_class_of(vm.class_value(derived)), vm.core().class);
    }

    #[test]
    fn test_nested_class_names() {
        let vm = Vm::new();
        let outer = vm.define_module("Outer");
        let inner = vm.define_class_under(outer, "Inner", vm.object_class());
        assert_eq!(vm.class_name(inner), "Outer::Inner");
        assert_eq!(vm.class_get_under(outer, "Inner"), Some(inner));
        assert_eq!(vm.define_class_under(outer, "Inner", vm.object_class()), inner);
    }

    #[test]
    fn test_constant_names_never_form_outer_cycles() {
        let vm = Vm::new();
        let object = vm.object_class();
        assert_eq!(vm.class_data(object, |d| d.outer), Some(None));

        let a = vm.new_class(Some(object), None, None);
        let b = vm.new_class(Some(object), None, None);
        vm.const_set(a, vm.intern("B"), Value::object(ValueType::Class, b));
        vm.const_set(b, vm.intern("A"), Value::object(ValueType::Class, a));
        assert_eq!(vm.class_data(b, |d| d.outer), Some(Some(a)));
        assert_eq!(vm.class_data(a, |d| d.outer), Some(None));
        assert_eq!(vm.class_name(b), "A::B");

        assert!(vm.load_string("Missing").is_nil());
        assert_eq!(vm.obj_classname(vm.take_exc()), "NameError");
    }

    #[test]
    fn test_ivars_and_globals() {
        let vm = Vm::new();
        let obj = vm.str_new("x");
        let name = vm.intern("@name");
        assert!(vm.iv_get(obj, name).is_nil());
        vm.iv_set(obj, name, Value::fixnum(3));
        assert_eq!(vm.iv_get(obj, name), Value::fixnum(3));
        assert!(vm.iv_get(Value::fixnum(1), name).is_nil());

        let g = vm.intern("$g");
        vm.gv_set(g, Value::TRUE);
        assert_eq!(vm.gv_get(g), Value::TRUE);
    }

    #[test]
    fn test_hash_string_keys_compare_by_content() {
        let vm = Vm::new();
        let hash = vm.hash_new();
        vm.hash_set(hash, vm.str_new("a"), Value::fixnum(1));
        assert_eq!(vm.hash_get(hash, vm.str_new("a")), Some(Value::fixnum(1)));
        assert_eq!(vm.hash_len(hash), 1);
        assert_eq!(vm.hash_delete(hash, vm.str_new("a")), Some(Value::fixnum(1)));
        assert_eq!(vm.hash_len(hash), 0);
    }

    #[test]
    fn test_unreferenced_objects_die() {
        let vm = Vm::new();
        let ai = vm.arena_save();
        let s = vm.str_new("temporary");
        assert!(!vm.object_dead_p(s));

        vm.arena_restore(ai);
        vm.full_gc();
        assert!(vm.object_dead_p(s));
        assert!(!vm.object_dead_p(Value::fixnum(1)));
    }

    #[test]
    fn test_disabled_gc_keeps_everything() {
        let vm = Vm::new();
        vm.set_gc_enabled(false);
        let ai = vm.arena_save();
        let s = vm.str_new("kept");
        vm.arena_restore(ai);
        assert_eq!(vm.full_gc(), None);
        assert!(!vm.object_dead_p(s));
        vm.set_gc_enabled(true);
        assert!(vm.full_gc().is_some());
        assert!(vm.object_dead_p(s));
    }
}
