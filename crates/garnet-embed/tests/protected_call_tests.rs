//! Protected Call Tests
//!
//! Validates the executor contract from the host's side:
//! - Normal completion leaves no pending exception
//! - Raised exceptions come back as errors, never as unwinds
//! - The unwind target depth is the same before and after every call
//! - Repeated failures do not leak state between calls

use garnet_embed::{run_protected, ArgSpec, CompileContext, Error, Garnet, Operation, Value};
use std::cell::Cell;
use std::rc::Rc;

fn depth(mrb: &Garnet) -> (usize, usize) {
    (mrb.vm().unwind_depth(), mrb.vm().call_depth())
}

// ===== Completion =====

#[test]
fn test_normal_completion_leaves_state_unchanged() {
    let mrb = Garnet::new();
    let before = depth(&mrb);

    let value = mrb.load_string("[1, 2, 3].map { |x| x * 2 }.sum").unwrap();
    assert_eq!(value.as_integer(), 12);
    assert!(mrb.vm().exc().is_nil());
    assert_eq!(depth(&mrb), before);
}

#[test]
fn test_run_protected_pair() {
    let mrb = Garnet::new();
    let (value, error) = run_protected(
        mrb.vm(),
        Operation::Call {
            recv: Value::fixnum(6),
            method: "*",
            args: &[Value::fixnum(7)],
            block: None,
        },
    );
    assert_eq!(value.as_integer(), 42);
    assert!(error.is_none());

    let (value, error) = run_protected(
        mrb.vm(),
        Operation::Call {
            recv: Value::fixnum(1),
            method: "/",
            args: &[Value::fixnum(0)],
            block: None,
        },
    );
    assert!(value.is_nil());
    let exc = error.unwrap();
    assert_eq!(mrb.vm().obj_classname(exc), "ZeroDivisionError");
}

// ===== Raising =====

#[test]
fn test_raise_returns_error_with_depth_unchanged() {
    let mrb = Garnet::new();
    let before = depth(&mrb);

    for _ in 0..50 {
        let err = mrb
            .load_string("def boom; raise TypeError, 'typed'; end; boom")
            .unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.class_name(), "TypeError");
        assert_eq!(exc.message(), "typed");
        assert_eq!(depth(&mrb), before);
        assert!(mrb.vm().exc().is_nil());
    }
}

#[test]
fn test_invalid_source_fails_identically() {
    let mrb = Garnet::new();
    let first = mrb.load_string("def broken(").unwrap_err().to_string();

    for _ in 0..1000 {
        let err = mrb.load_string("def broken(").unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.class_name(), "SyntaxError");
        assert_eq!(exc.message(), first);
    }
    assert_eq!(depth(&mrb), (0, 0));
}

#[test]
fn test_exception_cleared_between_loads() {
    let mrb = Garnet::new();
    assert!(mrb.load_string("raise 'first'").is_err());
    let value = mrb.load_string("1 + 1").unwrap();
    assert_eq!(value.as_integer(), 2);
    assert!(mrb.vm().exc().is_nil());
}

#[test]
fn test_rescued_exception_is_not_an_error() {
    let mrb = Garnet::new();
    let value = mrb
        .load_string("begin; raise 'x'; rescue => e; e.message; end")
        .unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "x");
}

#[test]
fn test_compile_context_names_file() {
    let mrb = Garnet::new();
    let mut context = CompileContext::new();
    context.set_filename("config.rb");
    let err = mrb.load_string_with("1 +", &context).unwrap_err();
    assert!(err.to_string().starts_with("config.rb:"), "{}", err);
}

#[test]
fn test_undefined_constant_is_name_error() {
    let mrb = Garnet::new();
    let before = depth(&mrb);
    for source in ["Missing", "Object::Missing", "begin; raise 'x'; rescue UndefinedError; 2; end"] {
        let err = mrb.load_string(source).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.class_name(), "NameError", "{}", source);
        assert!(exc.message().contains("Missing") || exc.message().contains("UndefinedError"));
        assert_eq!(depth(&mrb), before);
    }

    let module = mrb.define_module("Deep").unwrap();
    mrb.load_string("module Deep; class Inner; def find; Nowhere; end; end; end").unwrap();
    let err = mrb.load_string("Deep::Inner.new.find").unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "NameError");
    assert!(!mrb.const_defined("Nowhere", Some(&module)));
}

#[test]
fn test_deep_recursion_is_an_error() {
    let mrb = Garnet::with_options(garnet_embed::VmOptions {
        max_call_depth: 64,
        ..Default::default()
    });
    let err = mrb.load_string("def down(n); down(n + 1); end; down(0)").unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "SystemStackError");
    assert_eq!(depth(&mrb), (0, 0));
}

// ===== Procs and blocks =====

#[test]
fn test_proc_run_twice_with_toggled_raise() {
    let mrb = Garnet::new();
    let proc = mrb.parse("raise 'toggled' if $fail; :ok", None).unwrap();
    let top = mrb.vm().top_self();

    mrb.set_global("$fail", Value::TRUE);
    let err = mrb.run(proc, top).unwrap_err();
    assert_eq!(err.to_string(), "toggled");

    mrb.set_global("$fail", Value::FALSE);
    let value = mrb.run(proc, top).unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "ok");

    mrb.set_global("$fail", Value::TRUE);
    assert!(mrb.run(proc, top).is_err());
}

#[test]
fn test_yield_block_from_host() {
    let mrb = Garnet::new();
    let block = mrb.load_string("proc { |a, b| a + b }").unwrap();
    let value = mrb
        .yield_block(block, &[Value::fixnum(12), Value::fixnum(30)])
        .unwrap();
    assert_eq!(value.as_integer(), 42);

    let failing = mrb.load_string("proc { raise ArgumentError, 'in block' }").unwrap();
    let err = mrb.yield_block(failing, &[]).unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "ArgumentError");
}

#[test]
fn test_call_block() {
    let mrb = Garnet::new();
    let array = mrb.load_string("[3, 1, 2]").unwrap();
    let block = mrb.load_string("proc { |a, b| b <=> a }").unwrap();
    let sorted = mrb.call_block(array, "sort", &[block]).unwrap();
    assert_eq!(mrb.inspect(sorted).unwrap(), "[3, 2, 1]");

    assert!(matches!(mrb.call_block(array, "sort", &[]), Err(Error::Argument(_))));
}

#[test]
fn test_missing_method_is_no_method_error() {
    let mrb = Garnet::new();
    let err = mrb.call(Value::fixnum(1), "frobnicate", &[]).unwrap_err();
    let exc = err.exception().unwrap();
    assert_eq!(exc.class_name(), "NoMethodError");
    assert!(exc.message().contains("frobnicate"));
}

#[test]
fn test_default_depth_allows_ordinary_recursion() {
    // Reaching the default limit takes more than a spawned thread's stack
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mrb = Garnet::new();
            let value = mrb
                .load_string("def sum_to(n); n == 0 ? 0 : n + sum_to(n - 1); end; sum_to(300)")
                .unwrap();
            assert_eq!(value.as_integer(), 45150);

            let err = mrb.load_string("def down(n); down(n + 1); end; down(0)").unwrap_err();
            assert_eq!(err.exception().unwrap().class_name(), "SystemStackError");
            assert_eq!(depth(&mrb), (0, 0));
        })
        .unwrap();
    handle.join().unwrap();
}

// ===== Non-local exits =====

/// `each_pair_sum { |a, b| ... }` yields from host code and records what the
/// host saw: 1 for a value, 2 for an error
fn define_observer(mrb: &Garnet) -> Rc<Cell<u8>> {
    let seen = Rc::new(Cell::new(0));
    let record = seen.clone();
    mrb.object_class()
        .define_method("each_pair_sum", ArgSpec::block(), move |mrb, _, args| {
            let block = *args.last().ok_or("no block given")?;
            let result = mrb.yield_block(block, &[Value::fixnum(12), Value::fixnum(30)]);
            record.set(if result.is_ok() { 1 } else { 2 });
            Ok(result?)
        });
    seen
}

#[test]
fn test_break_across_host_yield_returns_a_pair() {
    let mrb = Garnet::new();
    let seen = define_observer(&mrb);
    let before = depth(&mrb);

    let err = mrb.load_string("each_pair_sum { |a, b| break a * b }").unwrap_err();
    assert_eq!(seen.get(), 2);
    let exc = err.exception().unwrap();
    assert_eq!(exc.class_name(), "LocalJumpError");
    assert_eq!(depth(&mrb), before);

    let value = mrb.load_string("each_pair_sum { |a, b| a + b }").unwrap();
    assert_eq!(value.as_integer(), 42);
    assert_eq!(seen.get(), 1);
}

#[test]
fn test_return_across_host_yield_returns_a_pair() {
    let mrb = Garnet::new();
    let seen = define_observer(&mrb);
    let before = depth(&mrb);

    let source = r#"
        def first_sum
          each_pair_sum { |a, b| return a + b }
          :unreachable
        end
        begin
          first_sum
        rescue LocalJumpError => e
          e.class
        end
    "#;
    let value = mrb.load_string(source).unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "LocalJumpError");
    assert_eq!(seen.get(), 2);
    assert_eq!(depth(&mrb), before);
}

#[test]
fn test_break_inside_protected_call_stays_local() {
    let mrb = Garnet::new();
    let before = depth(&mrb);
    let (value, error) = run_protected(
        mrb.vm(),
        Operation::Load {
            source: "[1, 2, 3].each { |x| break x * 10 if x == 2 }",
            context: None,
        },
    );
    assert!(error.is_none());
    assert_eq!(value.as_integer(), 20);
    assert_eq!(depth(&mrb), before);
}
