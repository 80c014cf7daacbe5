//! Compiling and running source text
//!
//! Like a classic embedded VM's top level, `load_string` and `run` never
//! jump: failures (syntax errors included) are left in the `exc` slot and
//! the call returns nil.

use crate::parser::{ParseError, Parser, Program};
use crate::vm::object::{ObjectData, ProcBody, ProcData};
use crate::vm::options::CompileOptions;
use crate::vm::state::Vm;
use crate::vm::unwind::Outcome;
use crate::vm::value::{Value, ValueType};
use std::panic::resume_unwind;
use std::rc::Rc;
use tracing::trace;

impl Vm {
    /// Parse source text
    pub fn parse(&self, source: &str) -> Result<Program, ParseError> {
        let mut interner = self.interner.borrow_mut();
        Parser::new(source, &mut interner).parse()
    }

    /// Build a `SyntaxError` exception from a parse error
    pub fn syntax_error(&self, err: &ParseError, options: &CompileOptions) -> Value {
        let message = match &options.filename {
            Some(filename) => format!("{}:{}", filename, err),
            None => err.to_string(),
        };
        self.exc_new(self.core.get().syntax_error, &message)
    }

    /// Compile source text into a top-level proc.
    ///
    /// On a syntax error the `SyntaxError` is stored in the `exc` slot and
    /// nil is returned.
    pub fn compile(&self, source: &str, options: &CompileOptions) -> Value {
        let program = match self.parse(source) {
            Ok(program) => program,
            Err(err) => {
                trace!(line = err.line, column = err.column, "syntax error");
                let exc = self.syntax_error(&err, options);
                self.exc.set(exc);
                return Value::NIL;
            }
        };

        let core = self.core.get();
        self.alloc(
            ValueType::Proc,
            core.proc_class,
            ObjectData::Proc(ProcData {
                body: ProcBody::Program(Rc::new(program)),
                env: None,
                self_value: self.top_self.get(),
                block: Value::NIL,
                target_class: core.object,
                cref: core.object,
                mid: None,
                home: 0,
                lambda: false,
            }),
        )
    }

    /// Compile and run source text with the top-level `self`
    pub fn load_string(&self, source: &str) -> Value {
        self.load_string_cxt(source, &CompileOptions::default())
    }

    /// Compile and run source text with compile options
    pub fn load_string_cxt(&self, source: &str, options: &CompileOptions) -> Value {
        self.exc.set(Value::NIL);
        let proc = self.compile(source, options);
        if proc.is_nil() {
            return Value::NIL;
        }
        self.run(proc, self.top_self.get())
    }

    /// Run a proc with `self_value` as `self`.
    ///
    /// An exception leaves the proc's frames, stores the exception in the
    /// `exc` slot and returns nil.
    pub fn run(&self, proc: Value, self_value: Value) -> Value {
        self.exc.set(Value::NIL);
        match self.protect_outcome(|| self.call_proc(proc, &[], Some(self_value))) {
            Outcome::Done(value) => value,
            Outcome::Raised(exc) => {
                self.exc.set(exc);
                Value::NIL
            }
            Outcome::Other(payload) => resume_unwind(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(vm: &Vm, source: &str) -> Value {
        let value = vm.load_string(source);
        assert!(vm.exc().is_nil(), "unexpected exception: {}", vm.exc_message(vm.exc()));
        value
    }

    fn eval_str(vm: &Vm, source: &str) -> String {
        let value = eval(vm, source);
        vm.string_of(value).unwrap_or_default()
    }

    fn eval_error(vm: &Vm, source: &str) -> (String, String) {
        let value = vm.load_string(source);
        assert!(value.is_nil());
        let exc = vm.take_exc();
        assert!(!exc.is_nil(), "expected an exception");
        (vm.obj_classname(exc), vm.exc_message(exc))
    }

    #[test]
    fn test_arithmetic_and_locals() {
        let vm = Vm::new();
        assert_eq!(eval(&vm, "a = 2\nb = 3\na * b + 1").as_integer(), 7);
        assert_eq!(eval(&vm, "7 / 2").as_integer(), 3);
        assert_eq!(eval(&vm, "-7 % 3").as_integer(), 2);
        assert_eq!(eval(&vm, "2 ** 10").as_integer(), 1024);
        assert_eq!(eval(&vm, "1.5 * 2").as_float(), 3.0);
    }

    #[test]
    fn test_methods_and_classes() {
        let vm = Vm::new();
        let source = r#"
            class Counter
              attr_reader :count
              def initialize(start = 0)
                @count = start
              end
              def incr(by = 1)
                @count += by
                self
              end
            end
            Counter.new(5).incr.incr(3).count
        "#;
        assert_eq!(eval(&vm, source).as_integer(), 9);
    }

    #[test]
    fn test_blocks_and_closures() {
        let vm = Vm::new();
        let source = r#"
            total = 0
            [1, 2, 3].each { |x| total += x }
            total
        "#;
        assert_eq!(eval(&vm, source).as_integer(), 6);
        assert_eq!(eval_str(&vm, "[1, 2, 3].map { |x| x * 2 }.inspect"), "[2, 4, 6]");
        assert_eq!(eval(&vm, "[[1, 2], [3, 4]].map { |a, b| a + b }.last").as_integer(), 7);
    }

    #[test]
    fn test_block_return_and_break() {
        let vm = Vm::new();
        let source = r#"
            def find_first(items)
              items.each { |x| return x if x > 1 }
              nil
            end
            find_first([1, 5, 9])
        "#;
        assert_eq!(eval(&vm, source).as_integer(), 5);
        assert_eq!(eval(&vm, "[1, 2, 3].each { |x| break x * 10 if x == 2 }").as_integer(), 20);
        assert_eq!(eval(&vm, "i = 0\nwhile true\n  i += 1\n  break if i == 4\nend\ni").as_integer(), 4);
    }

    #[test]
    fn test_orphan_return_raises_local_jump_error() {
        let vm = Vm::new();
        let source = r#"
            def make
              proc { return 1 }
            end
            make.call
        "#;
        let (class, message) = eval_error(&vm, source);
        assert_eq!(class, "LocalJumpError");
        assert_eq!(message, "unexpected return");
    }

    #[test]
    fn test_rescue_else_ensure() {
        let vm = Vm::new();
        let source = r#"
            log = []
            begin
              raise ArgumentError, "boom"
            rescue TypeError
              log << "type"
            rescue ArgumentError => e
              log << e.message
            else
              log << "else"
            ensure
              log << "ensure"
            end
            log.join(",")
        "#;
        assert_eq!(eval_str(&vm, source), "boom,ensure");

        let source = r#"
            log = []
            def risky(log)
              begin
                return 1
              ensure
                log << "cleanup"
              end
            end
            [risky(log), log.first].inspect
        "#;
        assert_eq!(eval_str(&vm, source), "[1, \"cleanup\"]");
    }

    #[test]
    fn test_ensure_runs_before_exception_escapes() {
        let vm = Vm::new();
        let (class, _) = eval_error(&vm, "begin\n  raise 'x'\nensure\n  $ran = true\nend");
        assert_eq!(class, "RuntimeError");
        assert_eq!(vm.gv_get(vm.intern("$ran")), Value::TRUE);
    }

    #[test]
    fn test_error_messages() {
        let vm = Vm::new();
        assert_eq!(
            eval_error(&vm, "nil.foo"),
            ("NoMethodError".into(), "undefined method 'foo' for nil".into())
        );
        assert_eq!(
            eval_error(&vm, "bogus"),
            ("NameError".into(), "undefined local variable or method 'bogus' for main".into())
        );
        assert_eq!(
            eval_error(&vm, "def two(a, b); end; two(1)"),
            ("ArgumentError".into(), "wrong number of arguments (given 1, expected 2)".into())
        );
        assert_eq!(
            eval_error(&vm, "Missing"),
            ("NameError".into(), "uninitialized constant Missing".into())
        );
        assert_eq!(
            eval_error(&vm, "1 / 0"),
            ("ZeroDivisionError".into(), "divided by 0".into())
        );
    }

    #[test]
    fn test_syntax_error_is_left_in_exc_slot() {
        let vm = Vm::new();
        let options = CompileOptions::with_filename("script.rb");
        let value = vm.load_string_cxt("def broken(", &options);
        assert!(value.is_nil());
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "SyntaxError");
        assert!(vm.exc_message(exc).starts_with("script.rb:line 1:"));
    }

    #[test]
    fn test_deep_recursion_raises_system_stack_error() {
        let vm = Vm::with_options(crate::vm::VmOptions {
            max_call_depth: 32,
            ..Default::default()
        });
        let (class, message) = eval_error(&vm, "def down(n); down(n + 1); end; down(0)");
        assert_eq!(class, "SystemStackError");
        assert_eq!(message, "stack level too deep");
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_modules_and_constants() {
        let vm = Vm::new();
        let source = r##"
            module Greeting
              PREFIX = "Hello"
              def greet
                "#{PREFIX}, #{name}!"
              end
            end
            class Person
              include Greeting
              attr_accessor :name
              def initialize(name)
                @name = name
              end
            end
            Person.new("Ada").greet
        "##;
        assert_eq!(eval_str(&vm, source), "Hello, Ada!");
        assert_eq!(eval_str(&vm, "Greeting::PREFIX"), "Hello");
    }

    #[test]
    fn test_class_methods_and_superclass_mismatch() {
        let vm = Vm::new();
        let source = r#"
            class Shape
              def self.create(*args)
                new(*args)
              end
              def area; 0; end
            end
            class Square < Shape
              def initialize(side); @side = side; end
              def area; @side * @side; end
            end
            Square.create(4).area
        "#;
        assert_eq!(eval(&vm, source).as_integer(), 16);
        let (class, message) = eval_error(&vm, "class Square < String; end");
        assert_eq!(class, "TypeError");
        assert_eq!(message, "superclass mismatch for class Square");
    }
}
