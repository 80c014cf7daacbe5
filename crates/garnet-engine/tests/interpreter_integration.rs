//! Interpreter Integration Tests
//!
//! End-to-end programs through `Vm::load_string`, checking results, the
//! pending-exception slot and collector behavior together.

use garnet_engine::{ArgSpec, Value, ValueType, Vm, VmOptions};

fn eval(vm: &Vm, source: &str) -> Value {
    let value = vm.load_string(source);
    let exc = vm.exc();
    assert!(exc.is_nil(), "{}: {}", vm.obj_classname(exc), vm.exc_message(exc));
    value
}

fn eval_str(vm: &Vm, source: &str) -> String {
    let value = eval(vm, source);
    vm.string_of(value).unwrap_or_else(|| vm.inspect(value))
}

// ===== Programs =====

#[test]
fn test_class_program() {
    let vm = Vm::new();
    let source = r#"
        class Stack
          def initialize
            @items = []
          end

          def push(item)
            @items.push(item)
            self
          end

          def pop
            @items.pop
          end

          def size
            @items.size
          end
        end

        s = Stack.new
        s.push(1).push(2).push(3)
        s.pop
        s.size
    "#;
    assert_eq!(eval(&vm, source).as_integer(), 2);
}

#[test]
fn test_blocks_and_closures() {
    let vm = Vm::new();
    let source = r#"
        def make_counter
          count = 0
          increment = lambda { count += 1 }
          [increment, lambda { count }]
        end

        pair = make_counter
        inc = pair[0]
        get = pair[1]
        3.times { inc.call }
        get.call
    "#;
    assert_eq!(eval(&vm, source).as_integer(), 3);
}

#[test]
fn test_exception_hierarchy() {
    let vm = Vm::new();
    let source = r#"
        class ValidationError < StandardError; end

        def validate(n)
          raise ValidationError, "negative: #{n}" if n < 0
          n
        end

        results = []
        [1, -2, 3].each do |n|
          begin
            results << validate(n)
          rescue ValidationError => e
            results << e.message
          ensure
            results << :checked
          end
        end
        results.inspect
    "#;
    assert_eq!(
        eval_str(&vm, source),
        r#"[1, :checked, "negative: -2", :checked, 3, :checked]"#
    );
}

#[test]
fn test_uncaught_exception_lands_in_slot() {
    let vm = Vm::new();
    let value = vm.load_string("[1, 2].fetch_missing");
    assert!(value.is_nil());
    let exc = vm.take_exc();
    assert_eq!(vm.obj_classname(exc), "NoMethodError");
    assert_eq!(vm.call_depth(), 0);
    assert_eq!(vm.unwind_depth(), 0);
}

#[test]
fn test_undefined_constant_raises_name_error() {
    let vm = Vm::new();
    for (source, message) in [
        ("Missing", "uninitialized constant Missing"),
        ("class Shape; def area; Unknown; end; end; Shape.new.area", "uninitialized constant Unknown"),
    ] {
        assert!(vm.load_string(source).is_nil());
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "NameError");
        assert_eq!(vm.exc_message(exc), message);
    }
    assert_eq!(eval(&vm, "Object.name").type_tag(), ValueType::String);
}

// ===== Native methods =====

fn native_sum(vm: &Vm, _recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    let total: i64 = args.iter().map(Value::as_integer).sum();
    if block.is_nil() {
        Value::fixnum(total)
    } else {
        vm.yield_argv(block, &[Value::fixnum(total)])
    }
}

#[test]
fn test_native_method_with_block() {
    let vm = Vm::new();
    vm.define_method(vm.object_class(), "native_sum", native_sum, ArgSpec::any() | ArgSpec::block());
    assert_eq!(eval(&vm, "native_sum(1, 2, 3)").as_integer(), 6);
    assert_eq!(eval(&vm, "native_sum(1, 2) { |t| t * 10 }").as_integer(), 30);

    let value = vm.load_string("native_sum(1) { |t| raise 'in block' }");
    assert!(value.is_nil());
    assert_eq!(vm.exc_message(vm.take_exc()), "in block");
}

#[test]
fn test_protect_around_native_raise() {
    let vm = Vm::new();
    let result = vm.protect(|vm| vm.funcall(Value::fixnum(1), "fdiv_missing", &[]));
    let exc = result.unwrap_err();
    assert_eq!(vm.obj_classname(exc), "NoMethodError");
    assert!(vm.exc().is_nil());
}

/// Yields its arguments to the block under a protected call and reports
/// what came back: the value, or the exception's class name
fn native_guarded_yield(vm: &Vm, _recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    match vm.protect(|vm| vm.yield_argv(block, &args)) {
        Ok(value) => value,
        Err(exc) => vm.str_new(vm.obj_classname(exc)),
    }
}

#[test]
fn test_break_does_not_cross_protected_call() {
    let vm = Vm::new();
    vm.define_method(vm.object_class(), "guarded", native_guarded_yield, ArgSpec::any() | ArgSpec::block());
    assert_eq!(eval(&vm, "guarded(2, 3) { |a, b| a * b }").as_integer(), 6);
    assert_eq!(eval_str(&vm, "guarded(2, 3) { |a, b| break a * b }"), "LocalJumpError");
    assert_eq!(eval_str(&vm, "def early; guarded(1) { |x| return x }; 'late'; end; early"), "late");
    assert_eq!(eval(&vm, "[1, 2, 3].each { |x| break x * 7 if x == 2 }").as_integer(), 14);
    assert_eq!(vm.unwind_depth(), 0);
}

// ===== Collector =====

#[test]
fn test_allocation_heavy_program_collects() {
    let vm = Vm::with_options(VmOptions {
        gc_threshold: 64,
        ..Default::default()
    });
    let source = r#"
        keep = []
        1000.times do |i|
          s = "item #{i}"
          keep << s if i % 100 == 0
        end
        keep.size
    "#;
    assert_eq!(eval(&vm, source).as_integer(), 10);
    assert!(vm.gc_stats().collections > 0);
}

#[test]
fn test_header_view() {
    let vm = Vm::new();
    let value = eval(&vm, "Object.new.freeze");
    let basic = vm.basic(value).unwrap();
    assert_eq!(basic.tt, ValueType::Object);
    assert_eq!(basic.class, vm.object_class());
    assert!(basic.frozen);
}
