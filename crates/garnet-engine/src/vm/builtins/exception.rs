//! Exception

use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::Value;

pub(super) fn init(vm: &Vm) {
    let exception = vm.core().exception;
    vm.define_method(exception, "initialize", exc_initialize, ArgSpec::opt(1));
    vm.define_method(exception, "message", exc_to_s, ArgSpec::none());
    vm.define_method(exception, "to_s", exc_to_s, ArgSpec::none());
    vm.define_method(exception, "inspect", exc_inspect, ArgSpec::none());
    vm.define_method(exception, "full_message", exc_full_message, ArgSpec::any());
    vm.define_method(exception, "backtrace", exc_backtrace, ArgSpec::none());
    vm.define_class_method(exception, "exception", exc_s_exception, ArgSpec::any());
}

fn exc_initialize(vm: &Vm, recv: Value) -> Value {
    if let Some(message) = vm.get_args().first() {
        vm.iv_set(recv, vm.syms.mesg, *message);
    }
    Value::NIL
}

/// The message, or the class name when there is none
fn exc_to_s(vm: &Vm, recv: Value) -> Value {
    let mesg = vm.iv_get(recv, vm.syms.mesg);
    if mesg.is_nil() {
        return vm.str_new(vm.obj_classname(recv));
    }
    if vm.string_of(mesg).is_some() {
        return mesg;
    }
    vm.str_new(vm.obj_as_string(mesg))
}

fn exc_inspect(vm: &Vm, recv: Value) -> Value {
    let class = vm.obj_classname(recv);
    let message = vm.exc_message(recv);
    if message.is_empty() || message == class {
        vm.str_new(class)
    } else {
        vm.str_new(format!("{} ({})", message, class))
    }
}

fn exc_full_message(vm: &Vm, recv: Value) -> Value {
    let message = vm.exc_message(recv);
    vm.str_new(format!("{} ({})", message, vm.obj_classname(recv)))
}

fn exc_backtrace(_vm: &Vm, _recv: Value) -> Value {
    Value::NIL
}

/// `Class.exception(*args)` is `Class.new(*args)`
fn exc_s_exception(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    vm.funcall_id(recv, vm.syms.new, &args, Value::NIL)
}
