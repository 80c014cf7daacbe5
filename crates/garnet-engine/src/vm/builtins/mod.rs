//! Builtin classes and methods
//!
//! `boot` builds the class hierarchy and registers every native method.
//! Natives read their arguments from the current call frame and report
//! failures by raising.

mod array;
mod exception;
mod hash;
mod kernel;
mod numeric;
mod object;
mod proc;
mod string;

use crate::parser::Symbol;
use crate::vm::object::{ArgSpec, ClassData, ObjectData};
use crate::vm::state::{CoreClasses, Vm};
use crate::vm::value::{ObjRef, Value, ValueType};
use std::cmp::Ordering;

/// Build the class hierarchy, the builtin methods and `main`.
pub(crate) fn boot(vm: &Vm) {
    boot_hierarchy(vm);

    object::init(vm);
    kernel::init(vm);
    numeric::init(vm);
    string::init(vm);
    array::init(vm);
    hash::init(vm);
    proc::init(vm);
    exception::init(vm);

    let core = vm.core();
    let main = vm.alloc(ValueType::Object, core.object, ObjectData::Plain);
    vm.top_self.set(main);
    if let Some(meta) = vm.singleton_class_of(main) {
        vm.define_method(meta, "to_s", main_to_s, ArgSpec::none());
        vm.define_method(meta, "inspect", main_to_s, ArgSpec::none());
    }
}

fn main_to_s(vm: &Vm, _recv: Value) -> Value {
    vm.str_new("main")
}

fn class_with_data(vm: &Vm, superclass: Option<ObjRef>, instance_tt: ValueType) -> ObjRef {
    vm.alloc(
        ValueType::Class,
        ObjRef::NULL,
        ObjectData::Class(ClassData {
            superclass,
            instance_tt: Some(instance_tt),
            ..ClassData::default()
        }),
    )
    .as_pointer()
}

fn boot_hierarchy(vm: &Vm) {
    // Object, Module and Class are instances of Class, which does not
    // exist until all three are allocated
    let object = class_with_data(vm, None, ValueType::Object);
    let module = class_with_data(vm, Some(object), ValueType::Module);
    let class = class_with_data(vm, Some(module), ValueType::Class);
    for r in [object, module, class] {
        vm.with_object_mut(r, |o| o.basic.class = class);
    }

    let mut core = CoreClasses {
        object,
        module,
        class,
        ..CoreClasses::default()
    };
    vm.core.set(core);

    for (r, name) in [(object, "Object"), (module, "Module"), (class, "Class")] {
        let sym = vm.intern(name);
        vm.const_set(object, sym, Value::object(ValueType::Class, r));
        vm.singleton_class_of(Value::object(ValueType::Class, r));
    }

    core.kernel = vm.define_module("Kernel");
    vm.include_module(object, core.kernel);
    core.comparable = vm.define_module("Comparable");

    core.nil = vm.define_class("NilClass", object);
    core.true_class = vm.define_class("TrueClass", object);
    core.false_class = vm.define_class("FalseClass", object);
    core.numeric = vm.define_class("Numeric", object);
    vm.include_module(core.numeric, core.comparable);
    core.integer = vm.define_class("Integer", core.numeric);
    core.float = vm.define_class("Float", core.numeric);
    core.symbol = vm.define_class("Symbol", object);

    core.string = vm.define_class("String", object);
    set_instance_tt(vm, core.string, ValueType::String);
    vm.include_module(core.string, core.comparable);
    core.array = vm.define_class("Array", object);
    set_instance_tt(vm, core.array, ValueType::Array);
    core.hash = vm.define_class("Hash", object);
    set_instance_tt(vm, core.hash, ValueType::Hash);
    core.proc_class = vm.define_class("Proc", object);
    set_instance_tt(vm, core.proc_class, ValueType::Proc);

    core.exception = vm.define_class("Exception", object);
    set_instance_tt(vm, core.exception, ValueType::Exception);
    core.script_error = vm.define_class("ScriptError", core.exception);
    core.syntax_error = vm.define_class("SyntaxError", core.script_error);
    core.system_stack_error = vm.define_class("SystemStackError", core.exception);
    core.standard_error = vm.define_class("StandardError", core.exception);
    core.runtime_error = vm.define_class("RuntimeError", core.standard_error);
    core.frozen_error = vm.define_class("FrozenError", core.runtime_error);
    core.argument_error = vm.define_class("ArgumentError", core.standard_error);
    core.type_error = vm.define_class("TypeError", core.standard_error);
    core.name_error = vm.define_class("NameError", core.standard_error);
    core.no_method_error = vm.define_class("NoMethodError", core.name_error);
    core.zero_division_error = vm.define_class("ZeroDivisionError", core.standard_error);
    core.index_error = vm.define_class("IndexError", core.standard_error);
    core.key_error = vm.define_class("KeyError", core.index_error);
    core.local_jump_error = vm.define_class("LocalJumpError", core.standard_error);

    vm.core.set(core);
}

fn set_instance_tt(vm: &Vm, class: ObjRef, tt: ValueType) {
    vm.class_data_mut(class, |data| data.instance_tt = Some(tt));
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Class name used in conversion errors (`nil` for nil)
fn describe_type(vm: &Vm, value: Value) -> String {
    match value.type_tag() {
        ValueType::Nil => "nil".to_string(),
        ValueType::True => "true".to_string(),
        ValueType::False => "false".to_string(),
        _ => vm.obj_classname(value),
    }
}

pub(crate) fn expect_int(vm: &Vm, value: Value) -> i64 {
    match value.type_tag() {
        ValueType::Fixnum => value.as_integer(),
        ValueType::Float => value.as_float() as i64,
        _ => {
            let message = format!(
                "no implicit conversion of {} into Integer",
                describe_type(vm, value)
            );
            vm.raise_error(vm.core().type_error, &message)
        }
    }
}

pub(crate) fn expect_str(vm: &Vm, value: Value) -> String {
    match vm.string_of(value) {
        Some(s) => s,
        None => {
            let message = format!(
                "no implicit conversion of {} into String",
                describe_type(vm, value)
            );
            vm.raise_error(vm.core().type_error, &message)
        }
    }
}

/// A method or variable name given as a symbol or a string
pub(crate) fn expect_name(vm: &Vm, value: Value) -> Symbol {
    if let Some(sym) = value.as_symbol() {
        return sym;
    }
    match vm.string_of(value) {
        Some(s) => vm.intern(&s),
        None => {
            let message = format!("{} is not a symbol nor a string", vm.inspect(value));
            vm.raise_error(vm.core().type_error, &message)
        }
    }
}

pub(crate) fn expect_class(vm: &Vm, value: Value) -> ObjRef {
    match value.type_tag() {
        ValueType::Class | ValueType::Module | ValueType::SClass => value.as_pointer(),
        _ => vm.raise_error(vm.core().type_error, "class or module required"),
    }
}

/// The block of the current native call; raises if there is none
pub(crate) fn require_block(vm: &Vm) -> Value {
    let (_, block) = vm.get_args_rest_block();
    if block.is_nil() {
        vm.raise_error(vm.core().local_jump_error, "no block given (yield)");
    }
    block
}

/// `<=>` as an ordering; raises `ArgumentError` for incomparable values
pub(crate) fn compare(vm: &Vm, a: Value, b: Value) -> Ordering {
    match (a.type_tag(), b.type_tag()) {
        (ValueType::Fixnum, ValueType::Fixnum) => return a.as_integer().cmp(&b.as_integer()),
        (ValueType::String, ValueType::String) => {
            if let (Some(x), Some(y)) = (vm.string_of(a), vm.string_of(b)) {
                return x.cmp(&y);
            }
        }
        _ => {}
    }

    let result = vm.funcall_id(a, vm.syms.cmp, &[b], Value::NIL);
    if result.type_tag() == ValueType::Fixnum {
        return result.as_integer().cmp(&0);
    }
    let message = format!(
        "comparison of {} with {} failed",
        vm.obj_classname(a),
        describe_type(vm, b)
    );
    vm.raise_error(vm.core().argument_error, &message)
}
