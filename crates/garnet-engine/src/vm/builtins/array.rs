//! Array
//!
//! Iterators re-read the receiver on every step, so a block that mutates
//! the array sees its own changes. Values built up across iterations are
//! kept in a result array so that restoring the arena never unroots them.

use super::{compare, expect_int, require_block};
use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::{Value, ValueType};

pub(super) fn init(vm: &Vm) {
    let array = vm.core().array;
    vm.define_method(array, "[]", ary_aref, ArgSpec::arg(1, 1));
    vm.define_method(array, "[]=", ary_aset, ArgSpec::req(2));
    vm.define_method(array, "first", ary_first, ArgSpec::opt(1));
    vm.define_method(array, "last", ary_last, ArgSpec::opt(1));
    vm.define_method(array, "push", ary_push, ArgSpec::any());
    vm.define_method(array, "append", ary_push, ArgSpec::any());
    vm.define_method(array, "<<", ary_push, ArgSpec::req(1));
    vm.define_method(array, "pop", ary_pop, ArgSpec::none());
    vm.define_method(array, "shift", ary_shift, ArgSpec::none());
    vm.define_method(array, "unshift", ary_unshift, ArgSpec::any());
    vm.define_method(array, "length", ary_length, ArgSpec::none());
    vm.define_method(array, "size", ary_length, ArgSpec::none());
    vm.define_method(array, "empty?", ary_empty, ArgSpec::none());
    vm.define_method(array, "concat", ary_concat, ArgSpec::any());
    vm.define_method(array, "delete", ary_delete, ArgSpec::req(1));
    vm.define_method(array, "clear", ary_clear, ArgSpec::none());
    vm.define_method(array, "+", ary_plus, ArgSpec::req(1));
    vm.define_method(array, "-", ary_minus, ArgSpec::req(1));
    vm.define_method(array, "take", ary_take, ArgSpec::req(1));
    vm.define_method(array, "drop", ary_drop, ArgSpec::req(1));
    vm.define_method(array, "each", ary_each, ArgSpec::block());
    vm.define_method(array, "each_with_index", ary_each_with_index, ArgSpec::block());
    vm.define_method(array, "map", ary_map, ArgSpec::block());
    vm.define_method(array, "collect", ary_map, ArgSpec::block());
    vm.define_method(array, "select", ary_select, ArgSpec::block());
    vm.define_method(array, "filter", ary_select, ArgSpec::block());
    vm.define_method(array, "reject", ary_reject, ArgSpec::block());
    vm.define_method(array, "inject", ary_inject, ArgSpec::opt(2) | ArgSpec::block());
    vm.define_method(array, "reduce", ary_inject, ArgSpec::opt(2) | ArgSpec::block());
    vm.define_method(array, "find", ary_find, ArgSpec::block());
    vm.define_method(array, "detect", ary_find, ArgSpec::block());
    vm.define_method(array, "any?", ary_any, ArgSpec::block());
    vm.define_method(array, "all?", ary_all, ArgSpec::block());
    vm.define_method(array, "count", ary_count, ArgSpec::opt(1) | ArgSpec::block());
    vm.define_method(array, "include?", ary_include, ArgSpec::req(1));
    vm.define_method(array, "index", ary_index, ArgSpec::opt(1) | ArgSpec::block());
    vm.define_method(array, "join", ary_join, ArgSpec::opt(1));
    vm.define_method(array, "reverse", ary_reverse, ArgSpec::none());
    vm.define_method(array, "sort", ary_sort, ArgSpec::block());
    vm.define_method(array, "sort_by", ary_sort_by, ArgSpec::block());
    vm.define_method(array, "min", ary_min, ArgSpec::none());
    vm.define_method(array, "max", ary_max, ArgSpec::none());
    vm.define_method(array, "sum", ary_sum, ArgSpec::opt(1));
    vm.define_method(array, "compact", ary_compact, ArgSpec::none());
    vm.define_method(array, "flatten", ary_flatten, ArgSpec::opt(1));
    vm.define_method(array, "uniq", ary_uniq, ArgSpec::none());
    vm.define_method(array, "zip", ary_zip, ArgSpec::any());
    vm.define_method(array, "==", ary_eq, ArgSpec::req(1));
    vm.define_method(array, "inspect", ary_inspect, ArgSpec::none());
    vm.define_method(array, "to_s", ary_inspect, ArgSpec::none());
    vm.define_method(array, "to_a", ary_to_a, ArgSpec::none());
}

fn items(vm: &Vm, recv: Value) -> Vec<Value> {
    vm.ary_items(recv).unwrap_or_default()
}

fn len(vm: &Vm, recv: Value) -> usize {
    vm.ary_len(recv).unwrap_or(0)
}

fn expect_array(vm: &Vm, value: Value) -> Vec<Value> {
    match vm.ary_items(value) {
        Some(items) => items,
        None => {
            let message = format!(
                "no implicit conversion of {} into Array",
                vm.obj_classname(value)
            );
            vm.raise_error(vm.core().type_error, &message)
        }
    }
}

/// Resolve a possibly negative index against `len`
fn normalize(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 { index + len as i64 } else { index };
    usize::try_from(index).ok()
}

fn ary_aref(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    let index = expect_int(vm, args[0]);
    match args.get(1) {
        None => vm.ary_ref(recv, index),
        Some(count) => {
            let count = expect_int(vm, *count);
            let all = items(vm, recv);
            match normalize(index, all.len()) {
                Some(start) if start <= all.len() && count >= 0 => {
                    let end = start.saturating_add(count as usize).min(all.len());
                    vm.ary_new(all[start..end].to_vec())
                }
                _ => Value::NIL,
            }
        }
    }
}

fn ary_aset(vm: &Vm, recv: Value) -> Value {
    let index = expect_int(vm, vm.arg(0));
    let value = vm.arg(1);
    let Some(index) = normalize(index, len(vm, recv)) else {
        let message = format!("index {} too small for array", index);
        vm.raise_error(vm.core().index_error, &message)
    };
    vm.ary_modify(recv, |items| {
        if index >= items.len() {
            items.resize(index + 1, Value::NIL);
        }
        items[index] = value;
    });
    value
}

fn ary_first(vm: &Vm, recv: Value) -> Value {
    match vm.get_args().first() {
        None => vm.ary_ref(recv, 0),
        Some(n) => {
            let n = expect_int(vm, *n).max(0) as usize;
            let all = items(vm, recv);
            vm.ary_new(all.into_iter().take(n).collect())
        }
    }
}

fn ary_last(vm: &Vm, recv: Value) -> Value {
    match vm.get_args().first() {
        None => vm.ary_ref(recv, -1),
        Some(n) => {
            let n = expect_int(vm, *n).max(0) as usize;
            let all = items(vm, recv);
            let skip = all.len().saturating_sub(n);
            vm.ary_new(all[skip..].to_vec())
        }
    }
}

fn ary_push(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    vm.ary_modify(recv, |items| items.extend(args));
    recv
}

fn ary_pop(vm: &Vm, recv: Value) -> Value {
    vm.ary_modify(recv, |items| items.pop())
        .flatten()
        .unwrap_or(Value::NIL)
}

fn ary_shift(vm: &Vm, recv: Value) -> Value {
    vm.ary_modify(recv, |items| {
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    })
    .flatten()
    .unwrap_or(Value::NIL)
}

fn ary_unshift(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    vm.ary_modify(recv, |items| {
        items.splice(0..0, args);
    });
    recv
}

fn ary_length(vm: &Vm, recv: Value) -> Value {
    Value::fixnum(len(vm, recv) as i64)
}

fn ary_empty(vm: &Vm, recv: Value) -> Value {
    Value::bool(len(vm, recv) == 0)
}

fn ary_concat(vm: &Vm, recv: Value) -> Value {
    let mut added = Vec::new();
    for other in vm.get_args() {
        added.extend(expect_array(vm, other));
    }
    vm.ary_modify(recv, |items| items.extend(added));
    recv
}

fn ary_delete(vm: &Vm, recv: Value) -> Value {
    let target = vm.arg(0);
    let keep: Vec<Value> = items(vm, recv)
        .into_iter()
        .filter(|item| !vm.equal(*item, target))
        .collect();
    let removed = keep.len() != len(vm, recv);
    vm.ary_modify(recv, |items| *items = keep);
    if removed {
        target
    } else {
        Value::NIL
    }
}

fn ary_clear(vm: &Vm, recv: Value) -> Value {
    vm.ary_modify(recv, Vec::clear);
    recv
}

fn ary_plus(vm: &Vm, recv: Value) -> Value {
    let mut all = items(vm, recv);
    all.extend(expect_array(vm, vm.arg(0)));
    vm.ary_new(all)
}

fn ary_minus(vm: &Vm, recv: Value) -> Value {
    let remove = expect_array(vm, vm.arg(0));
    let kept = items(vm, recv)
        .into_iter()
        .filter(|item| !remove.iter().any(|r| vm.equal(*item, *r)))
        .collect();
    vm.ary_new(kept)
}

fn count_arg(vm: &Vm) -> usize {
    let n = expect_int(vm, vm.arg(0));
    match usize::try_from(n) {
        Ok(n) => n,
        Err(_) => vm.raise_error(vm.core().argument_error, "attempt to take negative size"),
    }
}

fn ary_take(vm: &Vm, recv: Value) -> Value {
    let n = count_arg(vm);
    vm.ary_new(items(vm, recv).into_iter().take(n).collect())
}

fn ary_drop(vm: &Vm, recv: Value) -> Value {
    let n = count_arg(vm);
    vm.ary_new(items(vm, recv).into_iter().skip(n).collect())
}

/// Yield each element in turn; `f` sees the element and the block result
fn each_yield(vm: &Vm, recv: Value, mut f: impl FnMut(usize, Value, Value) -> bool) {
    let block = require_block(vm);
    let ai = vm.arena_save();
    let mut i = 0;
    while i < len(vm, recv) {
        let item = vm.ary_ref(recv, i as i64);
        let result = vm.yield_argv(block, &[item]);
        let go_on = f(i, item, result);
        vm.arena_restore(ai);
        if !go_on {
            break;
        }
        i += 1;
    }
}

fn ary_each(vm: &Vm, recv: Value) -> Value {
    each_yield(vm, recv, |_, _, _| true);
    recv
}

fn ary_each_with_index(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    let ai = vm.arena_save();
    let mut i = 0;
    while i < len(vm, recv) {
        let item = vm.ary_ref(recv, i as i64);
        vm.yield_argv(block, &[item, Value::fixnum(i as i64)]);
        vm.arena_restore(ai);
        i += 1;
    }
    recv
}

fn ary_map(vm: &Vm, recv: Value) -> Value {
    let result = vm.ary_new(Vec::new());
    each_yield(vm, recv, |_, _, mapped| {
        vm.ary_push(result, mapped);
        true
    });
    result
}

fn filter(vm: &Vm, recv: Value, keep_truthy: bool) -> Value {
    let result = vm.ary_new(Vec::new());
    each_yield(vm, recv, |_, item, test| {
        if test.is_truthy() == keep_truthy {
            vm.ary_push(result, item);
        }
        true
    });
    result
}

fn ary_select(vm: &Vm, recv: Value) -> Value {
    filter(vm, recv, true)
}

fn ary_reject(vm: &Vm, recv: Value) -> Value {
    filter(vm, recv, false)
}

/// `inject { |acc, x| }`, `inject(init) { }`, `inject(:+)`,
/// `inject(init, :+)`
fn ary_inject(vm: &Vm, recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    let (init, op) = match args.as_slice() {
        [] => (None, None),
        [single] if block.is_nil() && single.as_symbol().is_some() => (None, single.as_symbol()),
        [init] => (Some(*init), None),
        [init, op, ..] => (Some(*init), Some(super::expect_name(vm, *op))),
    };
    if op.is_none() && block.is_nil() {
        vm.raise_error(vm.core().local_jump_error, "no block given");
    }

    let mut all = items(vm, recv).into_iter();
    let Some(mut acc) = init.or_else(|| all.next()) else {
        return Value::NIL;
    };
    // The accumulator lives in a holder array across arena restores
    let holder = vm.ary_new(vec![acc]);
    let ai = vm.arena_save();
    for item in all {
        acc = match op {
            Some(op) => vm.funcall_id(acc, op, &[item], Value::NIL),
            None => vm.yield_argv(block, &[acc, item]),
        };
        vm.arena_restore(ai);
        vm.ary_modify(holder, |slot| slot[0] = acc);
    }
    acc
}

fn ary_find(vm: &Vm, recv: Value) -> Value {
    let mut found = Value::NIL;
    each_yield(vm, recv, |_, item, test| {
        if test.is_truthy() {
            found = item;
            return false;
        }
        true
    });
    found
}

fn ary_any(vm: &Vm, recv: Value) -> Value {
    let (_, block) = vm.get_args_rest_block();
    if block.is_nil() {
        return Value::bool(items(vm, recv).iter().any(Value::is_truthy));
    }
    let mut any = false;
    each_yield(vm, recv, |_, _, test| {
        any = test.is_truthy();
        !any
    });
    Value::bool(any)
}

fn ary_all(vm: &Vm, recv: Value) -> Value {
    let (_, block) = vm.get_args_rest_block();
    if block.is_nil() {
        return Value::bool(items(vm, recv).iter().all(Value::is_truthy));
    }
    let mut all = true;
    each_yield(vm, recv, |_, _, test| {
        all = test.is_truthy();
        all
    });
    Value::bool(all)
}

fn ary_count(vm: &Vm, recv: Value) -> Value {
    let (args, block) = vm.get_args_rest_block();
    let count = match (args.first(), block.is_nil()) {
        (Some(target), _) => items(vm, recv)
            .into_iter()
            .filter(|item| vm.equal(*item, *target))
            .count(),
        (None, true) => len(vm, recv),
        (None, false) => {
            let mut count = 0;
            each_yield(vm, recv, |_, _, test| {
                count += usize::from(test.is_truthy());
                true
            });
            count
        }
    };
    Value::fixnum(count as i64)
}

fn ary_include(vm: &Vm, recv: Value) -> Value {
    let target = vm.arg(0);
    Value::bool(items(vm, recv).into_iter().any(|item| vm.equal(item, target)))
}

fn ary_index(vm: &Vm, recv: Value) -> Value {
    let (args, _) = vm.get_args_rest_block();
    let position = match args.first() {
        Some(target) => items(vm, recv)
            .into_iter()
            .position(|item| vm.equal(item, *target)),
        None => {
            let mut position = None;
            each_yield(vm, recv, |i, _, test| {
                if test.is_truthy() {
                    position = Some(i);
                }
                position.is_none()
            });
            position
        }
    };
    position.map_or(Value::NIL, |i| Value::fixnum(i as i64))
}

fn join_into(vm: &Vm, value: Value, separator: &str, out: &mut String, first: &mut bool) {
    match vm.ary_items(value) {
        Some(nested) => {
            for item in nested {
                join_into(vm, item, separator, out, first);
            }
        }
        None => {
            if !*first {
                out.push_str(separator);
            }
            *first = false;
            out.push_str(&vm.obj_as_string(value));
        }
    }
}

fn ary_join(vm: &Vm, recv: Value) -> Value {
    let separator = match vm.get_args().first() {
        Some(sep) if !sep.is_nil() => super::expect_str(vm, *sep),
        _ => String::new(),
    };
    let mut out = String::new();
    let mut first = true;
    join_into(vm, recv, &separator, &mut out, &mut first);
    vm.str_new(out)
}

fn ary_reverse(vm: &Vm, recv: Value) -> Value {
    let mut all = items(vm, recv);
    all.reverse();
    vm.ary_new(all)
}

fn ary_sort(vm: &Vm, recv: Value) -> Value {
    let (_, block) = vm.get_args_rest_block();
    let mut all = items(vm, recv);
    let ai = vm.arena_save();
    // The sort probes (later, earlier); compare the other way round so the
    // block and error messages see elements in array order
    all.sort_by(|later, earlier| {
        let ordering = if block.is_nil() {
            compare(vm, *earlier, *later)
        } else {
            let result = vm.yield_argv(block, &[*earlier, *later]);
            expect_int(vm, result).cmp(&0)
        };
        vm.arena_restore(ai);
        ordering.reverse()
    });
    vm.ary_new(all)
}

fn ary_sort_by(vm: &Vm, recv: Value) -> Value {
    let keys = vm.ary_new(Vec::new());
    each_yield(vm, recv, |_, _, key| {
        vm.ary_push(keys, key);
        true
    });
    let mut pairs: Vec<(Value, Value)> = items(vm, keys).into_iter().zip(items(vm, recv)).collect();
    let ai = vm.arena_save();
    pairs.sort_by(|(later, _), (earlier, _)| {
        let ordering = compare(vm, *earlier, *later);
        vm.arena_restore(ai);
        ordering.reverse()
    });
    vm.ary_new(pairs.into_iter().map(|(_, item)| item).collect())
}

fn extreme(vm: &Vm, recv: Value, wanted: std::cmp::Ordering) -> Value {
    let mut all = items(vm, recv).into_iter();
    let Some(mut best) = all.next() else {
        return Value::NIL;
    };
    for item in all {
        if compare(vm, item, best) == wanted {
            best = item;
        }
    }
    best
}

fn ary_min(vm: &Vm, recv: Value) -> Value {
    extreme(vm, recv, std::cmp::Ordering::Less)
}

fn ary_max(vm: &Vm, recv: Value) -> Value {
    extreme(vm, recv, std::cmp::Ordering::Greater)
}

fn ary_sum(vm: &Vm, recv: Value) -> Value {
    let mut acc = vm.get_args().first().copied().unwrap_or(Value::fixnum(0));
    for item in items(vm, recv) {
        acc = match (acc.type_tag(), item.type_tag()) {
            (ValueType::Fixnum, ValueType::Fixnum) => match acc.as_integer().checked_add(item.as_integer()) {
                Some(sum) => Value::fixnum(sum),
                None => vm.funcall(acc, "+", &[item]),
            },
            _ => vm.funcall(acc, "+", &[item]),
        };
    }
    acc
}

fn ary_compact(vm: &Vm, recv: Value) -> Value {
    let kept = items(vm, recv).into_iter().filter(|v| !v.is_nil()).collect();
    vm.ary_new(kept)
}

fn flatten_into(vm: &Vm, value: Value, depth: Option<i64>, out: &mut Vec<Value>) {
    for item in items(vm, value) {
        match vm.ary_len(item) {
            Some(_) if depth.map_or(true, |d| d > 0) => {
                flatten_into(vm, item, depth.map(|d| d - 1), out)
            }
            _ => out.push(item),
        }
    }
}

fn ary_flatten(vm: &Vm, recv: Value) -> Value {
    let depth = vm.get_args().first().map(|d| expect_int(vm, *d));
    let mut out = Vec::new();
    flatten_into(vm, recv, depth, &mut out);
    vm.ary_new(out)
}

fn ary_uniq(vm: &Vm, recv: Value) -> Value {
    let mut seen: Vec<Value> = Vec::new();
    for item in items(vm, recv) {
        if !seen.iter().any(|s| vm.equal(*s, item)) {
            seen.push(item);
        }
    }
    vm.ary_new(seen)
}

fn ary_zip(vm: &Vm, recv: Value) -> Value {
    let others: Vec<Vec<Value>> = vm
        .get_args()
        .into_iter()
        .map(|other| expect_array(vm, other))
        .collect();
    let result = vm.ary_new(Vec::new());
    let ai = vm.arena_save();
    for (i, item) in items(vm, recv).into_iter().enumerate() {
        let mut row = vec![item];
        row.extend(others.iter().map(|o| o.get(i).copied().unwrap_or(Value::NIL)));
        let row = vm.ary_new(row);
        vm.ary_push(result, row);
        vm.arena_restore(ai);
    }
    result
}

fn ary_eq(vm: &Vm, recv: Value) -> Value {
    let Some(other) = vm.ary_items(vm.arg(0)) else {
        return Value::FALSE;
    };
    let mine = items(vm, recv);
    let equal = mine.len() == other.len()
        && mine.iter().zip(&other).all(|(a, b)| vm.equal(*a, *b));
    Value::bool(equal)
}

fn ary_inspect(vm: &Vm, recv: Value) -> Value {
    let parts: Vec<String> = items(vm, recv)
        .into_iter()
        .map(|item| vm.inspect(item))
        .collect();
    vm.str_new(format!("[{}]", parts.join(", ")))
}

fn ary_to_a(_vm: &Vm, recv: Value) -> Value {
    recv
}
