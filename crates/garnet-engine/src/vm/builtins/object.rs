//! Object, Module, Class, Comparable, and the nil/true/false classes

use super::{compare, expect_class, expect_name, require_block};
use crate::parser::Symbol;
use crate::vm::object::{ArgSpec, HashTable, Method, ObjectData};
use crate::vm::state::Vm;
use crate::vm::value::{ObjRef, Value, ValueType};
use std::cmp::Ordering;

pub(super) fn init(vm: &Vm) {
    let core = vm.core();

    let object = core.object;
    vm.define_method(object, "initialize", obj_initialize, ArgSpec::any());
    vm.define_method(object, "==", obj_equal, ArgSpec::req(1));
    vm.define_method(object, "equal?", obj_equal, ArgSpec::req(1));
    vm.define_method(object, "eql?", obj_equal, ArgSpec::req(1));
    vm.define_method(object, "===", obj_case_equal, ArgSpec::req(1));
    vm.define_method(object, "!", obj_not, ArgSpec::none());
    vm.define_method(object, "!=", obj_not_equal, ArgSpec::req(1));
    vm.define_method(object, "class", obj_class, ArgSpec::none());
    vm.define_method(object, "singleton_class", obj_singleton_class, ArgSpec::none());
    vm.define_method(object, "inspect", obj_inspect, ArgSpec::none());
    vm.define_method(object, "to_s", obj_to_s, ArgSpec::none());
    vm.define_method(object, "nil?", obj_false, ArgSpec::none());
    vm.define_method(object, "is_a?", obj_is_kind_of, ArgSpec::req(1));
    vm.define_method(object, "kind_of?", obj_is_kind_of, ArgSpec::req(1));
    vm.define_method(object, "instance_of?", obj_instance_of, ArgSpec::req(1));
    vm.define_method(object, "respond_to?", obj_respond_to, ArgSpec::arg(1, 1));
    vm.define_method(object, "send", obj_send, ArgSpec::req(1) | ArgSpec::any() | ArgSpec::block());
    vm.define_method(object, "__send__", obj_send, ArgSpec::req(1) | ArgSpec::any() | ArgSpec::block());
    vm.define_method(object, "public_send", obj_send, ArgSpec::req(1) | ArgSpec::any() | ArgSpec::block());
    vm.define_method(object, "freeze", obj_freeze, ArgSpec::none());
    vm.define_method(object, "frozen?", obj_frozen, ArgSpec::none());
    vm.define_method(object, "dup", obj_dup, ArgSpec::none());
    vm.define_method(object, "object_id", obj_object_id, ArgSpec::none());
    vm.define_method(object, "instance_variable_get", obj_ivar_get, ArgSpec::req(1));
    vm.define_method(object, "instance_variable_set", obj_ivar_set, ArgSpec::req(2));
    vm.define_method(object, "instance_variable_defined?", obj_ivar_defined, ArgSpec::req(1));
    vm.define_method(object, "instance_variables", obj_ivars, ArgSpec::none());
    vm.define_method(object, "instance_eval", obj_instance_eval, ArgSpec::block());
    vm.define_method(object, "extend", obj_extend, ArgSpec::req(1) | ArgSpec::any());
    vm.define_method(object, "tap", obj_tap, ArgSpec::block());
    vm.define_method(object, "then", obj_then, ArgSpec::block());

    let module = core.module;
    vm.define_method(module, "name", mod_name, ArgSpec::none());
    vm.define_method(module, "to_s", mod_to_s, ArgSpec::none());
    vm.define_method(module, "inspect", mod_to_s, ArgSpec::none());
    vm.define_method(module, "===", mod_case_equal, ArgSpec::req(1));
    vm.define_method(module, "attr_reader", mod_attr_reader, ArgSpec::any());
    vm.define_method(module, "attr_writer", mod_attr_writer, ArgSpec::any());
    vm.define_method(module, "attr_accessor", mod_attr_accessor, ArgSpec::any());
    vm.define_method(module, "include", mod_include, ArgSpec::req(1) | ArgSpec::any());
    vm.define_method(module, "include?", mod_include_p, ArgSpec::req(1));
    vm.define_method(module, "ancestors", mod_ancestors, ArgSpec::none());
    vm.define_method(module, "method_defined?", mod_method_defined, ArgSpec::req(1));
    vm.define_method(module, "alias_method", mod_alias_method, ArgSpec::req(2));
    vm.define_method(module, "const_get", mod_const_get, ArgSpec::req(1));
    vm.define_method(module, "const_set", mod_const_set, ArgSpec::req(2));
    vm.define_method(module, "const_defined?", mod_const_defined, ArgSpec::req(1));
    vm.define_method(module, "class_eval", mod_class_eval, ArgSpec::block());
    vm.define_method(module, "module_eval", mod_class_eval, ArgSpec::block());
    for visibility in ["public", "private", "protected", "module_function"] {
        vm.define_method(module, visibility, mod_visibility, ArgSpec::any());
    }

    let class = core.class;
    vm.define_method(class, "new", class_new, ArgSpec::any() | ArgSpec::block());
    vm.define_method(class, "superclass", class_superclass, ArgSpec::none());

    let comparable = core.comparable;
    vm.define_method(comparable, "<", cmp_lt, ArgSpec::req(1));
    vm.define_method(comparable, "<=", cmp_le, ArgSpec::req(1));
    vm.define_method(comparable, ">", cmp_gt, ArgSpec::req(1));
    vm.define_method(comparable, ">=", cmp_ge, ArgSpec::req(1));
    vm.define_method(comparable, "==", cmp_eq, ArgSpec::req(1));
    vm.define_method(comparable, "between?", cmp_between, ArgSpec::req(2));
    vm.define_method(comparable, "clamp", cmp_clamp, ArgSpec::req(2));

    vm.define_method(core.nil, "to_s", nil_to_s, ArgSpec::none());
    vm.define_method(core.nil, "to_a", nil_to_a, ArgSpec::none());
    vm.define_method(core.nil, "inspect", nil_inspect, ArgSpec::none());
    vm.define_method(core.nil, "nil?", obj_true, ArgSpec::none());
    vm.define_method(core.true_class, "to_s", true_to_s, ArgSpec::none());
    vm.define_method(core.true_class, "inspect", true_to_s, ArgSpec::none());
    vm.define_method(core.false_class, "to_s", false_to_s, ArgSpec::none());
    vm.define_method(core.false_class, "inspect", false_to_s, ArgSpec::none());
}

// ============================================================================
// Object
// ============================================================================

fn obj_initialize(_vm: &Vm, _recv: Value) -> Value {
    Value::NIL
}

fn obj_equal(vm: &Vm, recv: Value) -> Value {
    Value::bool(recv == vm.arg(0))
}

fn obj_case_equal(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.equal(recv, vm.arg(0)))
}

fn obj_not(_vm: &Vm, recv: Value) -> Value {
    Value::bool(!recv.is_truthy())
}

fn obj_not_equal(vm: &Vm, recv: Value) -> Value {
    Value::bool(!vm.equal(recv, vm.arg(0)))
}

fn obj_class(vm: &Vm, recv: Value) -> Value {
    vm.class_value(vm.real_class_of(recv))
}

fn obj_singleton_class(vm: &Vm, recv: Value) -> Value {
    match vm.singleton_class_of(recv) {
        Some(meta) => vm.class_value(meta),
        None => vm.raise_error(vm.core().type_error, "can't define singleton"),
    }
}

fn obj_inspect(vm: &Vm, recv: Value) -> Value {
    let mut ivars: Vec<_> = vm
        .with_object(recv.as_pointer(), |o| {
            o.ivars
                .iter()
                .map(|(name, value)| (*name, *value))
                .collect()
        })
        .unwrap_or_default();
    let mesg = vm.syms.mesg;
    ivars.retain(|(name, _)| *name != mesg);
    if ivars.is_empty() {
        return obj_to_s(vm, recv);
    }

    let mut parts: Vec<String> = ivars
        .into_iter()
        .map(|(name, value)| format!("{}={}", vm.sym_name(name), vm.inspect(value)))
        .collect();
    parts.sort();
    vm.str_new(format!("#<{} {}>", vm.obj_classname(recv), parts.join(", ")))
}

fn obj_to_s(vm: &Vm, recv: Value) -> Value {
    vm.str_new(vm.any_to_s(recv))
}

fn obj_true(_vm: &Vm, _recv: Value) -> Value {
    Value::TRUE
}

fn obj_false(_vm: &Vm, _recv: Value) -> Value {
    Value::FALSE
}

fn obj_is_kind_of(vm: &Vm, recv: Value) -> Value {
    let class = expect_class(vm, vm.arg(0));
    Value::bool(vm.obj_is_kind_of(recv, class))
}

fn obj_instance_of(vm: &Vm, recv: Value) -> Value {
    let class = expect_class(vm, vm.arg(0));
    Value::bool(vm.real_class_of(recv) == class)
}

fn obj_respond_to(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    Value::bool(vm.respond_to(recv, name))
}

fn obj_send(vm: &Vm, recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    let name = expect_name(vm, args[0]);
    vm.funcall_id(recv, name, &args[1..], block)
}

fn obj_freeze(vm: &Vm, recv: Value) -> Value {
    if recv.is_heap() {
        vm.with_object_mut(recv.as_pointer(), |o| o.basic.frozen = true);
    }
    recv
}

fn obj_frozen(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.is_frozen(recv))
}

fn obj_dup(vm: &Vm, recv: Value) -> Value {
    if recv.is_immediate() {
        return recv;
    }
    let copy = vm
        .with_object(recv.as_pointer(), |o| {
            let data = match &o.data {
                ObjectData::Plain => Some(ObjectData::Plain),
                ObjectData::Str(s) => Some(ObjectData::Str(s.clone())),
                ObjectData::Array(items) => Some(ObjectData::Array(items.clone())),
                ObjectData::Hash(table) => Some(ObjectData::Hash(HashTable {
                    entries: table.entries.clone(),
                })),
                _ => None,
            };
            data.map(|data| (o.basic.tt, data, o.ivars.clone()))
        })
        .flatten();

    let Some((tt, data, ivars)) = copy else {
        let message = format!("can't dup {}", vm.obj_classname(recv));
        vm.raise_error(vm.core().type_error, &message)
    };
    let dup = vm.alloc(tt, vm.real_class_of(recv), data);
    vm.with_object_mut(dup.as_pointer(), |o| o.ivars = ivars);
    dup
}

fn obj_object_id(_vm: &Vm, recv: Value) -> Value {
    let id = match recv.as_pointer().index() {
        Some(index) => index as i64 * 8 + 8,
        None => recv.payload() as i64,
    };
    Value::fixnum(id)
}

fn obj_ivar_get(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    vm.iv_get(recv, name)
}

fn obj_ivar_set(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    let value = vm.arg(1);
    vm.iv_set(recv, name, value);
    value
}

fn obj_ivar_defined(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    Value::bool(vm.iv_defined(recv, name))
}

fn obj_ivars(vm: &Vm, recv: Value) -> Value {
    let mesg = vm.syms.mesg;
    let names: Vec<Symbol> = vm
        .with_object(recv.as_pointer(), |o| {
            o.ivars.keys().copied().filter(|name| *name != mesg).collect()
        })
        .unwrap_or_default();
    let mut names: Vec<(String, Symbol)> =
        names.into_iter().map(|name| (vm.sym_name(name), name)).collect();
    names.sort();
    let items = names
        .into_iter()
        .map(|(_, name)| Value::symbol(name))
        .collect();
    vm.ary_new(items)
}

fn obj_instance_eval(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    vm.yield_with_self(block, recv, &[recv])
}

fn obj_extend(vm: &Vm, recv: Value) -> Value {
    let Some(meta) = vm.singleton_class_of(recv) else {
        vm.raise_error(vm.core().type_error, "can't define singleton")
    };
    for module in vm.get_args() {
        vm.include_module(meta, expect_module(vm, module));
    }
    recv
}

fn obj_tap(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    vm.yield_argv(block, &[recv]);
    recv
}

fn obj_then(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    vm.yield_argv(block, &[recv])
}

// ============================================================================
// Module and Class
// ============================================================================

fn expect_module(vm: &Vm, value: Value) -> ObjRef {
    if value.type_tag() != ValueType::Module {
        let message = format!(
            "wrong argument type {} (expected Module)",
            vm.obj_classname(value)
        );
        vm.raise_error(vm.core().type_error, &message);
    }
    value.as_pointer()
}

fn mod_name(vm: &Vm, recv: Value) -> Value {
    let named = vm
        .class_data(recv.as_pointer(), |data| data.name.is_some())
        .unwrap_or(false);
    if named {
        vm.str_new(vm.class_name(recv.as_pointer()))
    } else {
        Value::NIL
    }
}

fn mod_to_s(vm: &Vm, recv: Value) -> Value {
    vm.str_new(vm.class_name(recv.as_pointer()))
}

fn mod_case_equal(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.obj_is_kind_of(vm.arg(0), recv.as_pointer()))
}

fn define_attrs(vm: &Vm, recv: Value, reader: bool, writer: bool) -> Value {
    let class = recv.as_pointer();
    let mut defined = Vec::new();
    for arg in vm.get_args() {
        let name = expect_name(vm, arg);
        let text = vm.sym_name(name);
        let ivar = vm.intern(&format!("@{}", text));
        if reader {
            vm.add_method(class, name, Method::AttrReader(ivar));
            defined.push(Value::symbol(name));
        }
        if writer {
            let setter = vm.intern(&format!("{}=", text));
            vm.add_method(class, setter, Method::AttrWriter(ivar));
            defined.push(Value::symbol(setter));
        }
    }
    vm.ary_new(defined)
}

fn mod_attr_reader(vm: &Vm, recv: Value) -> Value {
    define_attrs(vm, recv, true, false)
}

fn mod_attr_writer(vm: &Vm, recv: Value) -> Value {
    define_attrs(vm, recv, false, true)
}

fn mod_attr_accessor(vm: &Vm, recv: Value) -> Value {
    define_attrs(vm, recv, true, true)
}

fn mod_include(vm: &Vm, recv: Value) -> Value {
    for module in vm.get_args() {
        vm.include_module(recv.as_pointer(), expect_module(vm, module));
    }
    recv
}

fn mod_include_p(vm: &Vm, recv: Value) -> Value {
    let module = expect_module(vm, vm.arg(0));
    let class = recv.as_pointer();
    Value::bool(module != class && vm.ancestors(class).contains(&module))
}

fn mod_ancestors(vm: &Vm, recv: Value) -> Value {
    let items = vm
        .ancestors(recv.as_pointer())
        .into_iter()
        .filter(|c| {
            vm.with_object(*c, |o| o.basic.tt != ValueType::SClass)
                .unwrap_or(false)
        })
        .map(|c| vm.class_value(c))
        .collect();
    vm.ary_new(items)
}

fn mod_method_defined(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    Value::bool(vm.find_method(recv.as_pointer(), name).is_some())
}

fn mod_alias_method(vm: &Vm, recv: Value) -> Value {
    let new_name = expect_name(vm, vm.arg(0));
    let old_name = expect_name(vm, vm.arg(1));
    let class = recv.as_pointer();
    match vm.find_method(class, old_name) {
        Some((method, _)) => vm.add_method(class, new_name, method),
        None => {
            let message = format!(
                "undefined method '{}' for class '{}'",
                vm.sym_name(old_name),
                vm.class_name(class)
            );
            vm.raise_error(vm.core().name_error, &message)
        }
    }
    Value::symbol(new_name)
}

fn mod_const_get(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    match vm.const_lookup_in(recv.as_pointer(), name) {
        Some(value) => value,
        None => {
            let message = format!("uninitialized constant {}", vm.sym_name(name));
            vm.raise_error(vm.core().name_error, &message)
        }
    }
}

fn mod_const_set(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    let value = vm.arg(1);
    vm.const_set(recv.as_pointer(), name, value);
    value
}

fn mod_const_defined(vm: &Vm, recv: Value) -> Value {
    let name = expect_name(vm, vm.arg(0));
    Value::bool(vm.const_defined(recv.as_pointer(), name))
}

fn mod_class_eval(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    vm.proc_set_target_class(block, recv.as_pointer());
    vm.yield_with_self(block, recv, &[recv])
}

fn mod_visibility(_vm: &Vm, _recv: Value) -> Value {
    Value::NIL
}

fn class_new(vm: &Vm, recv: Value) -> Value {
    let core = vm.core();
    let class = recv.as_pointer();
    let (args, block) = vm.get_args_rest_block();

    if class == core.class || class == core.module {
        let created = if class == core.class {
            let superclass = match args.first() {
                Some(value) if value.type_tag() == ValueType::Class => value.as_pointer(),
                Some(_) => vm.raise_error(core.type_error, "superclass must be a Class"),
                None => core.object,
            };
            vm.new_class(Some(superclass), None, None)
        } else {
            vm.new_module(None, None)
        };
        let value = vm.class_value(created);
        if !block.is_nil() {
            vm.proc_set_target_class(block, created);
            vm.yield_with_self(block, value, &[value]);
        }
        return value;
    }

    let tt = vm
        .class_data(class, |data| data.instance_tt)
        .flatten()
        .unwrap_or(ValueType::Object);
    let data = match tt {
        ValueType::String => ObjectData::Str(String::new()),
        ValueType::Array => ObjectData::Array(Vec::new()),
        ValueType::Hash => ObjectData::Hash(HashTable::default()),
        ValueType::Object | ValueType::Exception => ObjectData::Plain,
        _ => {
            let message = format!("allocator undefined for {}", vm.class_name(class));
            vm.raise_error(core.type_error, &message)
        }
    };
    let obj = vm.alloc(tt, class, data);
    vm.funcall_id(obj, vm.syms.initialize, &args, block);
    obj
}

fn class_superclass(vm: &Vm, recv: Value) -> Value {
    let mut current = vm.superclass(recv.as_pointer());
    while let Some(class) = current {
        let singleton = vm
            .with_object(class, |o| o.basic.tt == ValueType::SClass)
            .unwrap_or(false);
        if !singleton {
            return vm.class_value(class);
        }
        current = vm.superclass(class);
    }
    Value::NIL
}

// ============================================================================
// Comparable
// ============================================================================

fn cmp_with_arg(vm: &Vm, recv: Value) -> Ordering {
    compare(vm, recv, vm.arg(0))
}

fn cmp_lt(vm: &Vm, recv: Value) -> Value {
    Value::bool(cmp_with_arg(vm, recv) == Ordering::Less)
}

fn cmp_le(vm: &Vm, recv: Value) -> Value {
    Value::bool(cmp_with_arg(vm, recv) != Ordering::Greater)
}

fn cmp_gt(vm: &Vm, recv: Value) -> Value {
    Value::bool(cmp_with_arg(vm, recv) == Ordering::Greater)
}

fn cmp_ge(vm: &Vm, recv: Value) -> Value {
    Value::bool(cmp_with_arg(vm, recv) != Ordering::Less)
}

fn cmp_eq(vm: &Vm, recv: Value) -> Value {
    let other = vm.arg(0);
    if recv == other {
        return Value::TRUE;
    }
    let result = vm.funcall_id(recv, vm.syms.cmp, &[other], Value::NIL);
    Value::bool(result.type_tag() == ValueType::Fixnum && result.as_integer() == 0)
}

fn cmp_between(vm: &Vm, recv: Value) -> Value {
    let (min, max) = (vm.arg(0), vm.arg(1));
    Value::bool(compare(vm, recv, min) != Ordering::Less && compare(vm, recv, max) != Ordering::Greater)
}

fn cmp_clamp(vm: &Vm, recv: Value) -> Value {
    let (min, max) = (vm.arg(0), vm.arg(1));
    if compare(vm, recv, min) == Ordering::Less {
        min
    } else if compare(vm, recv, max) == Ordering::Greater {
        max
    } else {
        recv
    }
}

// ============================================================================
// nil, true, false
// ============================================================================

fn nil_to_s(vm: &Vm, _recv: Value) -> Value {
    vm.str_new("")
}

fn nil_to_a(vm: &Vm, _recv: Value) -> Value {
    vm.ary_new(Vec::new())
}

fn nil_inspect(vm: &Vm, _recv: Value) -> Value {
    vm.str_new("nil")
}

fn true_to_s(vm: &Vm, _recv: Value) -> Value {
    vm.str_new("true")
}

fn false_to_s(vm: &Vm, _recv: Value) -> Value {
    vm.str_new("false")
}

#[cfg(test)]
mod tests {
    use crate::vm::state::Vm;

    fn eval_str(vm: &Vm, source: &str) -> String {
        let value = vm.load_string(source);
        assert!(vm.exc().is_nil(), "unexpected exception: {}", vm.exc_message(vm.exc()));
        vm.string_of(value).unwrap_or_default()
    }

    #[test]
    fn test_reflection() {
        let vm = Vm::new();
        assert_eq!(eval_str(&vm, "1.class.to_s"), "Integer");
        assert_eq!(eval_str(&vm, "String.superclass.inspect"), "Object");
        assert_eq!(eval_str(&vm, "[1.is_a?(Comparable), nil.nil?].inspect"), "[true, true]");
        assert_eq!(eval_str(&vm, "Class.new.name.inspect"), "nil");
        assert_eq!(eval_str(&vm, "1.send(:+, 2).to_s"), "3");
        assert_eq!(eval_str(&vm, "'x'.respond_to?(:upcase).to_s"), "true");
    }

    #[test]
    fn test_frozen_objects_reject_mutation() {
        let vm = Vm::new();
        vm.load_string("s = 'abc'.freeze\ns << 'd'");
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "FrozenError");
        assert_eq!(vm.exc_message(exc), "can't modify frozen String");
    }

    #[test]
    fn test_comparable_mixin() {
        let vm = Vm::new();
        let source = r#"
            class Version
              include Comparable
              attr_reader :n
              def initialize(n); @n = n; end
              def <=>(other); n <=> other.n; end
            end
            a = Version.new(1)
            b = Version.new(2)
            [a < b, a == Version.new(1), b.between?(a, b)].inspect
        "#;
        assert_eq!(eval_str(&vm, source), "[true, true, true]");
    }

    #[test]
    fn test_inspect_lists_instance_variables() {
        let vm = Vm::new();
        let source = "class Pt; def initialize; @x = 1; @y = 'a'; end; end; Pt.new.inspect";
        assert_eq!(eval_str(&vm, source), "#<Pt @x=1, @y=\"a\">");
    }
}
