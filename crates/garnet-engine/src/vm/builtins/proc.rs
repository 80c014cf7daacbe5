//! Proc

use crate::vm::object::{ArgSpec, ProcBody};
use crate::vm::state::Vm;
use crate::vm::value::Value;

pub(super) fn init(vm: &Vm) {
    let proc_class = vm.core().proc_class;
    vm.define_class_method(proc_class, "new", proc_s_new, ArgSpec::block());
    for name in ["call", "[]", "yield", "==="] {
        vm.define_method(proc_class, name, proc_call, ArgSpec::any() | ArgSpec::block());
    }
    vm.define_method(proc_class, "to_proc", proc_to_proc, ArgSpec::none());
    vm.define_method(proc_class, "lambda?", proc_lambda_p, ArgSpec::none());
    vm.define_method(proc_class, "arity", proc_arity, ArgSpec::none());
}

/// `Proc.new { }` returns the block itself
fn proc_s_new(vm: &Vm, _recv: Value) -> Value {
    let (_, block) = vm.get_args_rest_block();
    if block.is_nil() {
        vm.raise_error(
            vm.core().argument_error,
            "tried to create Proc object without a block",
        );
    }
    block
}

fn proc_call(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    vm.call_proc(recv, &args, None)
}

fn proc_to_proc(_vm: &Vm, recv: Value) -> Value {
    recv
}

fn proc_lambda_p(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.proc_data(recv).is_some_and(|data| data.lambda))
}

/// Required count, or `-(required + 1)` when optional or rest parameters
/// make the count open
fn proc_arity(vm: &Vm, recv: Value) -> Value {
    let Some(data) = vm.proc_data(recv) else {
        return Value::fixnum(0);
    };
    let arity = match &data.body {
        ProcBody::Program(_) => 0,
        ProcBody::Block(node) => {
            let required = node.params.required.len() as i64;
            if node.params.rest.is_some() || !node.params.optional.is_empty() {
                -(required + 1)
            } else {
                required
            }
        }
    };
    Value::fixnum(arity)
}

#[cfg(test)]
mod tests {
    use crate::vm::state::Vm;

    #[test]
    fn test_arity() {
        let vm = Vm::new();
        let cases = [
            ("proc { }.arity", 0),
            ("proc { |a| }.arity", 1),
            ("lambda { |a, b| }.arity", 2),
            ("lambda { |a, b = 1| }.arity", -2),
            ("proc { |*rest| }.arity", -1),
        ];
        for (source, expected) in cases {
            assert_eq!(vm.load_string(source).as_integer(), expected, "{}", source);
        }
    }

    #[test]
    fn test_call_forms() {
        let vm = Vm::new();
        let value = vm.load_string("add = lambda { |a, b| a + b }\nadd[1, 2] + add.call(3, 4)");
        assert_eq!(value.as_integer(), 10);
        let value = vm.load_string("Proc.new { |x| x * 2 }.yield(21)");
        assert_eq!(value.as_integer(), 42);
        assert_eq!(vm.load_string("proc { 1 }.lambda?"), crate::vm::value::Value::FALSE);
    }
}
