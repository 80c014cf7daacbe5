//! Hash
//!
//! Entries keep insertion order. String keys compare by content, every
//! other key by identity.

use super::require_block;
use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::Value;

pub(super) fn init(vm: &Vm) {
    let hash = vm.core().hash;
    vm.define_method(hash, "[]", hash_aref, ArgSpec::req(1));
    vm.define_method(hash, "[]=", hash_aset, ArgSpec::req(2));
    vm.define_method(hash, "store", hash_aset, ArgSpec::req(2));
    vm.define_method(hash, "fetch", hash_fetch, ArgSpec::arg(1, 1) | ArgSpec::block());
    for name in ["key?", "has_key?", "include?", "member?"] {
        vm.define_method(hash, name, hash_has_key, ArgSpec::req(1));
    }
    vm.define_method(hash, "delete", hash_delete, ArgSpec::req(1));
    vm.define_method(hash, "keys", hash_keys, ArgSpec::none());
    vm.define_method(hash, "values", hash_values, ArgSpec::none());
    vm.define_method(hash, "length", hash_length, ArgSpec::none());
    vm.define_method(hash, "size", hash_length, ArgSpec::none());
    vm.define_method(hash, "empty?", hash_empty, ArgSpec::none());
    vm.define_method(hash, "each", hash_each, ArgSpec::block());
    vm.define_method(hash, "each_pair", hash_each, ArgSpec::block());
    vm.define_method(hash, "map", hash_map, ArgSpec::block());
    vm.define_method(hash, "select", hash_select, ArgSpec::block());
    vm.define_method(hash, "to_a", hash_to_a, ArgSpec::none());
    vm.define_method(hash, "to_h", hash_to_h, ArgSpec::none());
    vm.define_method(hash, "merge", hash_merge, ArgSpec::req(1));
    vm.define_method(hash, "==", hash_eq, ArgSpec::req(1));
    vm.define_method(hash, "inspect", hash_inspect, ArgSpec::none());
    vm.define_method(hash, "to_s", hash_inspect, ArgSpec::none());
    vm.define_method(hash, "clear", hash_clear, ArgSpec::none());
}

fn expect_hash(vm: &Vm, value: Value) -> Vec<(Value, Value)> {
    if value.type_tag() != crate::vm::value::ValueType::Hash {
        let message = format!(
            "no implicit conversion of {} into Hash",
            vm.obj_classname(value)
        );
        vm.raise_error(vm.core().type_error, &message);
    }
    vm.hash_entries(value)
}

fn hash_aref(vm: &Vm, recv: Value) -> Value {
    vm.hash_get(recv, vm.arg(0)).unwrap_or(Value::NIL)
}

fn hash_aset(vm: &Vm, recv: Value) -> Value {
    let value = vm.arg(1);
    vm.hash_set(recv, vm.arg(0), value);
    value
}

fn hash_fetch(vm: &Vm, recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    let key = args[0];
    if let Some(value) = vm.hash_get(recv, key) {
        return value;
    }
    if !block.is_nil() {
        return vm.yield_argv(block, &[key]);
    }
    if let Some(default) = args.get(1) {
        return *default;
    }
    let message = format!("key not found: {}", vm.inspect(key));
    vm.raise_error(vm.core().key_error, &message)
}

fn hash_has_key(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.hash_get(recv, vm.arg(0)).is_some())
}

fn hash_delete(vm: &Vm, recv: Value) -> Value {
    vm.hash_delete(recv, vm.arg(0)).unwrap_or(Value::NIL)
}

fn hash_keys(vm: &Vm, recv: Value) -> Value {
    vm.ary_new(vm.hash_keys(recv))
}

fn hash_values(vm: &Vm, recv: Value) -> Value {
    let values = vm.hash_entries(recv).into_iter().map(|(_, v)| v).collect();
    vm.ary_new(values)
}

fn hash_length(vm: &Vm, recv: Value) -> Value {
    Value::fixnum(vm.hash_len(recv) as i64)
}

fn hash_empty(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.hash_len(recv) == 0)
}

/// Yield `[key, value]` pairs; blocks with two parameters receive them
/// spread
fn each_pair(vm: &Vm, recv: Value, mut f: impl FnMut(Value, Value, Value)) {
    let block = require_block(vm);
    let ai = vm.arena_save();
    for (key, value) in vm.hash_entries(recv) {
        let pair = vm.ary_new(vec![key, value]);
        let result = vm.yield_argv(block, &[pair]);
        f(key, value, result);
        vm.arena_restore(ai);
    }
}

fn hash_each(vm: &Vm, recv: Value) -> Value {
    each_pair(vm, recv, |_, _, _| {});
    recv
}

fn hash_map(vm: &Vm, recv: Value) -> Value {
    let result = vm.ary_new(Vec::new());
    each_pair(vm, recv, |_, _, mapped| vm.ary_push(result, mapped));
    result
}

fn hash_select(vm: &Vm, recv: Value) -> Value {
    let result = vm.hash_new();
    each_pair(vm, recv, |key, value, test| {
        if test.is_truthy() {
            vm.hash_set(result, key, value);
        }
    });
    result
}

fn hash_to_a(vm: &Vm, recv: Value) -> Value {
    let result = vm.ary_new(Vec::new());
    let ai = vm.arena_save();
    for (key, value) in vm.hash_entries(recv) {
        let pair = vm.ary_new(vec![key, value]);
        vm.ary_push(result, pair);
        vm.arena_restore(ai);
    }
    result
}

fn hash_to_h(_vm: &Vm, recv: Value) -> Value {
    recv
}

fn hash_merge(vm: &Vm, recv: Value) -> Value {
    let other = expect_hash(vm, vm.arg(0));
    let result = vm.hash_new();
    for (key, value) in vm.hash_entries(recv).into_iter().chain(other) {
        vm.hash_set(result, key, value);
    }
    result
}

fn hash_eq(vm: &Vm, recv: Value) -> Value {
    let other = vm.arg(0);
    if other.type_tag() != recv.type_tag() || vm.hash_len(other) != vm.hash_len(recv) {
        return Value::FALSE;
    }
    let equal = vm.hash_entries(recv).into_iter().all(|(key, value)| {
        vm.hash_get(other, key)
            .is_some_and(|theirs| vm.equal(value, theirs))
    });
    Value::bool(equal)
}

fn hash_inspect(vm: &Vm, recv: Value) -> Value {
    let entries = vm.hash_entries(recv);
    if entries.is_empty() {
        return vm.str_new("{}");
    }
    let parts: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| format!("{} => {}", vm.inspect(key), vm.inspect(value)))
        .collect();
    vm.str_new(format!("{{{}}}", parts.join(", ")))
}

fn hash_clear(vm: &Vm, recv: Value) -> Value {
    for key in vm.hash_keys(recv) {
        vm.hash_delete(recv, key);
    }
    recv
}

#[cfg(test)]
mod tests {
    use crate::vm::state::Vm;

    fn eval_str(vm: &Vm, source: &str) -> String {
        let value = vm.load_string(source);
        assert!(vm.exc().is_nil(), "{}: {}", source, vm.exc_message(vm.exc()));
        vm.string_of(value).unwrap_or_default()
    }

    #[test]
    fn test_string_keys_compare_by_content() {
        let vm = Vm::new();
        let source = r#"
            h = {}
            k = "name"
            h[k] = 1
            k << "!"
            [h["name"], h["name!"]].inspect
        "#;
        assert_eq!(eval_str(&vm, source), "[1, nil]");
    }

    #[test]
    fn test_iteration_and_inspect() {
        let vm = Vm::new();
        assert_eq!(eval_str(&vm, "{'a' => 1, :b => 2}.inspect"), "{\"a\" => 1, :b => 2}");
        assert_eq!(eval_str(&vm, "{'a' => 1, 'b' => 2}.map { |k, v| k * v }.join"), "abb");
        assert_eq!(eval_str(&vm, "{1 => 2}.merge({3 => 4}).keys.inspect"), "[1, 3]");
        assert_eq!(eval_str(&vm, "{}.inspect"), "{}");
    }

    #[test]
    fn test_fetch_missing_key() {
        let vm = Vm::new();
        assert_eq!(eval_str(&vm, "{}.fetch(:x, 'dflt')"), "dflt");
        vm.load_string("{}.fetch(:x)");
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "KeyError");
        assert_eq!(vm.exc_message(exc), "key not found: :x");
    }
}
