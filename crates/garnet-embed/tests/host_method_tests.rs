//! Host Method Tests
//!
//! Rust closures registered as runtime methods:
//! - Argument marshaling (positional arguments, trailing block)
//! - Host errors and panics surfacing as script exceptions
//! - Reentrant calls back into the runtime
//! - Yielding to script blocks from host code

use garnet_embed::{collect_args, ArgSpec, Class, Garnet, HostError, Value};

/// `Num.new(n)` storing `n` in `@value`, with a host `double`
fn define_num(mrb: &Garnet) -> Class {
    let num = mrb.define_class("Num", None).unwrap();
    num.define_method("initialize", ArgSpec::req(1), |mrb, recv, args| {
        mrb.set_instance_variable(recv, "@value", args[0])?;
        Ok(Value::NIL)
    });
    num.define_method("double", ArgSpec::none(), |mrb, recv, _args| {
        let value = mrb.instance_variable(recv, "@value");
        Ok(Value::fixnum(value.as_integer() * 2))
    });
    num
}

// ===== Dispatch =====

#[test]
fn test_num_double() {
    let mrb = Garnet::new();
    define_num(&mrb);
    let value = mrb.load_string("Num.new(5).double").unwrap();
    assert_eq!(value.as_integer(), 10);
}

#[test]
fn test_host_method_called_from_host() {
    let mrb = Garnet::new();
    let num = define_num(&mrb);
    let instance = num.new_instance(&[Value::fixnum(21)]).unwrap();
    let value = mrb.call(instance, "double", &[]).unwrap();
    assert_eq!(value.as_integer(), 42);
}

#[test]
fn test_argument_counts_with_and_without_block() {
    let mrb = Garnet::new();
    let object = mrb.object_class();
    object.define_method("argc", ArgSpec::any() | ArgSpec::block(), |mrb, _recv, args| {
        let collected = collect_args(mrb.vm());
        assert_eq!(collected.as_slice(), args);
        Ok(Value::fixnum(args.len() as i64))
    });
    object.define_method("last_is_proc", ArgSpec::any() | ArgSpec::block(), |_, _, args| {
        let last = args.last().copied().unwrap_or(Value::NIL);
        Ok(Value::bool(last.type_tag() == garnet_embed::ValueType::Proc))
    });

    assert_eq!(mrb.load_string("argc").unwrap().as_integer(), 0);
    assert_eq!(mrb.load_string("argc(1, 2, 3)").unwrap().as_integer(), 3);
    assert_eq!(mrb.load_string("argc(1, 2) { }").unwrap().as_integer(), 3);
    assert_eq!(mrb.load_string("argc { }").unwrap().as_integer(), 1);
    assert_eq!(mrb.load_string("last_is_proc(1) { }").unwrap(), Value::TRUE);
    assert_eq!(mrb.load_string("last_is_proc(1)").unwrap(), Value::FALSE);
}

// ===== Errors =====

#[test]
fn test_host_error_rescued_by_script() {
    let mrb = Garnet::new();
    mrb.object_class()
        .define_method("fails", ArgSpec::none(), |_, _, _| Err(HostError::new("bad arg")));

    let value = mrb
        .load_string("begin; fails; rescue RuntimeError => e; nil; end")
        .unwrap();
    assert!(value.is_nil());
    assert!(mrb.vm().exc().is_nil());

    let err = mrb.load_string("fails").unwrap_err();
    assert_eq!(err.to_string(), "bad arg");
}

#[test]
fn test_host_error_with_class() {
    let mrb = Garnet::new();
    mrb.load_string("module Lib; class Invalid < StandardError; end; end").unwrap();
    mrb.object_class().define_method("check", ArgSpec::req(1), |_, _, args| {
        if args[0].as_integer() < 0 {
            return Err(HostError::with_class("Lib::Invalid", "negative"));
        }
        Ok(args[0])
    });

    let value = mrb
        .load_string("begin; check(-1); rescue Lib::Invalid => e; e.message; end")
        .unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "negative");
    assert_eq!(mrb.load_string("check(3)").unwrap().as_integer(), 3);
}

#[test]
fn test_host_panic_becomes_runtime_error() {
    let mrb = Garnet::new();
    mrb.object_class()
        .define_method("explode", ArgSpec::none(), |_, _, _| panic!("kaboom"));

    let err = mrb.load_string("explode").unwrap_err();
    let exc = err.exception().unwrap();
    assert_eq!(exc.class_name(), "RuntimeError");
    assert_eq!(exc.message(), "host method panicked: kaboom");
    assert_eq!(mrb.vm().unwind_depth(), 0);
    assert_eq!(mrb.vm().call_depth(), 0);

    let value = mrb.load_string("begin; explode; rescue => e; :recovered; end").unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "recovered");
}

#[test]
fn test_nested_error_propagates_with_question_mark() {
    let mrb = Garnet::new();
    mrb.object_class().define_method("relay", ArgSpec::req(1), |mrb, _, args| {
        let source = mrb.to_string(args[0])?;
        let value = mrb.load_string(&source)?;
        Ok(value)
    });

    assert_eq!(mrb.load_string("relay('40 + 2')").unwrap().as_integer(), 42);

    let err = mrb.load_string("relay(\"raise KeyError, 'inner'\")").unwrap_err();
    let exc = err.exception().unwrap();
    assert_eq!(exc.class_name(), "KeyError");
    assert_eq!(exc.message(), "inner");
}

#[test]
fn test_reentrant_depth_is_restored() {
    let mrb = Garnet::new();
    mrb.object_class().define_method("depth", ArgSpec::none(), |mrb, _, _| {
        Ok(Value::fixnum(mrb.vm().unwind_depth() as i64))
    });
    mrb.object_class().define_method("nested_depth", ArgSpec::none(), |mrb, _, _| {
        mrb.load_string("depth")
            .map_err(HostError::from)
    });

    let outer = mrb.load_string("depth").unwrap().as_integer();
    let inner = mrb.load_string("nested_depth").unwrap().as_integer();
    assert!(inner > outer);
    assert_eq!(mrb.vm().unwind_depth(), 0);
}

// ===== Blocks =====

fn define_yielder(mrb: &Garnet) {
    mrb.object_class().define_method("yielder", ArgSpec::block(), |mrb, _, args| {
        let block = *args.last().ok_or("no block given")?;
        let value = mrb.yield_block(block, &[Value::fixnum(12), Value::fixnum(30)])?;
        Ok(value)
    });
}

#[test]
fn test_yield_from_host_method() {
    let mrb = Garnet::new();
    define_yielder(&mrb);
    let value = mrb.load_string("yielder { |a, b| a + b }").unwrap();
    assert_eq!(value.as_integer(), 42);
}

#[test]
fn test_yield_exception_returns_to_host() {
    let mrb = Garnet::new();
    define_yielder(&mrb);
    let err = mrb.load_string("yielder { |a, b| raise 'from block' }").unwrap_err();
    assert_eq!(err.to_string(), "from block");

    let err = mrb.load_string("yielder").unwrap_err();
    assert_eq!(err.to_string(), "no block given");
}

#[test]
fn test_break_out_of_block_stops_at_host_frame() {
    let mrb = Garnet::new();
    define_yielder(&mrb);
    let value = mrb
        .load_string("begin; yielder { |a, b| break a * b }; rescue LocalJumpError => e; e.message; end")
        .unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "break from proc-closure");
    assert_eq!(mrb.vm().unwind_depth(), 0);
    assert_eq!(mrb.vm().call_depth(), 0);
}

#[test]
fn test_class_method_and_module() {
    let mrb = Garnet::new();
    let outer = mrb.define_module("Geo").unwrap();
    let point = mrb.define_class_under("Point", None, &outer).unwrap();
    point.define_class_method("origin", ArgSpec::none(), |mrb, _, _| {
        mrb.load_string("Geo::Point.new").map_err(HostError::from)
    });
    point.define_method("x", ArgSpec::none(), |_, _, _| Ok(Value::fixnum(0)));

    let value = mrb.load_string("Geo::Point.origin.x").unwrap();
    assert_eq!(value.as_integer(), 0);
}
