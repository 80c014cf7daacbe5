//! Kernel: output, `raise`, procs and `loop`

use super::require_block;
use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::{Value, ValueType};
use std::io::Write;

pub(super) fn init(vm: &Vm) {
    let kernel = vm.core().kernel;
    vm.define_method(kernel, "puts", kernel_puts, ArgSpec::any());
    vm.define_method(kernel, "print", kernel_print, ArgSpec::any());
    vm.define_method(kernel, "p", kernel_p, ArgSpec::any());
    vm.define_method(kernel, "raise", kernel_raise, ArgSpec::opt(2));
    vm.define_method(kernel, "proc", kernel_proc, ArgSpec::block());
    vm.define_method(kernel, "lambda", kernel_lambda, ArgSpec::block());
    vm.define_method(kernel, "loop", kernel_loop, ArgSpec::block());
    vm.define_method(kernel, "block_given?", kernel_block_given, ArgSpec::none());
}

fn write_out(text: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    // Output errors (closed pipe) are not script errors
    let _ = out.write_all(text.as_bytes());
}

fn puts_lines(vm: &Vm, value: Value, out: &mut String) {
    if let Some(items) = vm.ary_items(value) {
        for item in items {
            puts_lines(vm, item, out);
        }
        return;
    }
    let line = vm.obj_as_string(value);
    out.push_str(&line);
    if !line.ends_with('\n') {
        out.push('\n');
    }
}

fn kernel_puts(vm: &Vm, _recv: Value) -> Value {
    let args = vm.get_args();
    let mut out = String::new();
    if args.is_empty() {
        out.push('\n');
    }
    for arg in args {
        puts_lines(vm, arg, &mut out);
    }
    write_out(&out);
    Value::NIL
}

fn kernel_print(vm: &Vm, _recv: Value) -> Value {
    let out: String = vm
        .get_args()
        .into_iter()
        .map(|arg| vm.obj_as_string(arg))
        .collect();
    write_out(&out);
    Value::NIL
}

fn kernel_p(vm: &Vm, _recv: Value) -> Value {
    let args = vm.get_args();
    let mut out = String::new();
    for arg in &args {
        out.push_str(&vm.inspect(*arg));
        out.push('\n');
    }
    write_out(&out);
    match args.as_slice() {
        [] => Value::NIL,
        [single] => *single,
        _ => vm.ary_new(args),
    }
}

/// `raise`, `raise "message"`, `raise Class`, `raise Class, "message"`,
/// `raise exception`
fn kernel_raise(vm: &Vm, _recv: Value) -> Value {
    let core = vm.core();
    let args = vm.get_args();
    let exc = match args.as_slice() {
        [] => {
            let last = vm.gv_get(vm.intern("$!"));
            if last.type_tag() == ValueType::Exception {
                last
            } else {
                vm.exc_new(core.runtime_error, "unhandled exception")
            }
        }
        [message] if message.type_tag() == ValueType::String => {
            let message = vm.string_of(*message).unwrap_or_default();
            vm.exc_new(core.runtime_error, &message)
        }
        [target] => make_exception(vm, *target, None),
        [target, message, ..] => make_exception(vm, *target, Some(*message)),
    };
    vm.raise(exc)
}

fn make_exception(vm: &Vm, target: Value, message: Option<Value>) -> Value {
    let core = vm.core();
    let exc = match target.type_tag() {
        ValueType::Class => {
            let args: Vec<Value> = message.into_iter().collect();
            vm.funcall_id(target, vm.syms.new, &args, Value::NIL)
        }
        ValueType::Exception => {
            if let Some(message) = message {
                vm.iv_set(target, vm.syms.mesg, message);
            }
            target
        }
        _ => Value::NIL,
    };
    if !vm.obj_is_kind_of(exc, core.exception) {
        vm.raise_error(core.type_error, "exception class/object expected");
    }
    exc
}

fn block_or_error(vm: &Vm) -> Value {
    let (_, block) = vm.get_args_rest_block();
    if block.is_nil() {
        vm.raise_error(
            vm.core().argument_error,
            "tried to create Proc object without a block",
        );
    }
    block
}

fn kernel_proc(vm: &Vm, _recv: Value) -> Value {
    block_or_error(vm)
}

fn kernel_lambda(vm: &Vm, _recv: Value) -> Value {
    let block = block_or_error(vm);
    vm.proc_modify(block, |data| data.lambda = true);
    block
}

fn kernel_loop(vm: &Vm, _recv: Value) -> Value {
    let block = require_block(vm);
    let ai = vm.arena_save();
    loop {
        vm.yield_argv(block, &[]);
        vm.arena_restore(ai);
    }
}

/// Reached only through `send`; direct calls are answered by the evaluator
fn kernel_block_given(vm: &Vm, _recv: Value) -> Value {
    let frames = vm.frames.borrow();
    let caller = frames.len().checked_sub(2).and_then(|i| frames.get(i));
    Value::bool(caller.is_some_and(|ci| !ci.block.is_nil()))
}

#[cfg(test)]
mod tests {
    use crate::vm::state::Vm;

    #[test]
    fn test_raise_forms() {
        let vm = Vm::new();
        let cases = [
            ("raise 'plain'", "RuntimeError", "plain"),
            ("raise ArgumentError", "ArgumentError", "ArgumentError"),
            ("raise TypeError, 'typed'", "TypeError", "typed"),
            ("raise KeyError.new('made')", "KeyError", "made"),
            ("raise 42", "TypeError", "exception class/object expected"),
        ];
        for (source, class, message) in cases {
            assert!(vm.load_string(source).is_nil());
            let exc = vm.take_exc();
            assert_eq!(vm.obj_classname(exc), class, "{}", source);
            assert_eq!(vm.exc_message(exc), message, "{}", source);
        }
    }

    #[test]
    fn test_lambda_and_proc_arity() {
        let vm = Vm::new();
        let value = vm.load_string("pr = proc { |a, b| [a, b] }\npr.call(1).inspect");
        assert_eq!(vm.string_of(value).as_deref(), Some("[1, nil]"));

        vm.load_string("l = lambda { |a, b| a }\nl.call(1)");
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "ArgumentError");
    }

    #[test]
    fn test_loop_with_break() {
        let vm = Vm::new();
        let value = vm.load_string("n = 0\nloop do\n  n += 1\n  break n * 2 if n == 5\nend");
        assert_eq!(value.as_integer(), 10);
    }

    #[test]
    fn test_lambda_return_stays_local() {
        let vm = Vm::new();
        let source = r#"
            def run_it
              l = lambda { return 10 }
              l.call + 1
            end
            run_it
        "#;
        assert_eq!(vm.load_string(source).as_integer(), 11);
    }
}
