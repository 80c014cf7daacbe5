//! Integer and Float
//!
//! Integer arithmetic that overflows continues in floating point.
//! Division and modulo round toward negative infinity.

use super::{expect_int, require_block};
use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::{Value, ValueType};
use std::cmp::Ordering;

pub(super) fn init(vm: &Vm) {
    let core = vm.core();

    for class in [core.integer, core.float] {
        vm.define_method(class, "+", num_add, ArgSpec::req(1));
        vm.define_method(class, "-", num_sub, ArgSpec::req(1));
        vm.define_method(class, "*", num_mul, ArgSpec::req(1));
        vm.define_method(class, "/", num_div, ArgSpec::req(1));
        vm.define_method(class, "%", num_mod, ArgSpec::req(1));
        vm.define_method(class, "**", num_pow, ArgSpec::req(1));
        vm.define_method(class, "-@", num_neg, ArgSpec::none());
        vm.define_method(class, "==", num_eq, ArgSpec::req(1));
        vm.define_method(class, "<=>", num_cmp, ArgSpec::req(1));
        vm.define_method(class, "<", num_lt, ArgSpec::req(1));
        vm.define_method(class, "<=", num_le, ArgSpec::req(1));
        vm.define_method(class, ">", num_gt, ArgSpec::req(1));
        vm.define_method(class, ">=", num_ge, ArgSpec::req(1));
        vm.define_method(class, "to_s", num_to_s, ArgSpec::none());
        vm.define_method(class, "inspect", num_to_s, ArgSpec::none());
        vm.define_method(class, "to_i", num_to_i, ArgSpec::none());
        vm.define_method(class, "to_f", num_to_f, ArgSpec::none());
        vm.define_method(class, "abs", num_abs, ArgSpec::none());
        vm.define_method(class, "zero?", num_zero, ArgSpec::none());
    }

    let integer = core.integer;
    vm.define_method(integer, "<<", int_shl, ArgSpec::req(1));
    vm.define_method(integer, "times", int_times, ArgSpec::block());
    vm.define_method(integer, "upto", int_upto, ArgSpec::req(1) | ArgSpec::block());
    vm.define_method(integer, "downto", int_downto, ArgSpec::req(1) | ArgSpec::block());
    vm.define_method(integer, "even?", int_even, ArgSpec::none());
    vm.define_method(integer, "odd?", int_odd, ArgSpec::none());
    vm.define_method(integer, "succ", int_succ, ArgSpec::none());
    vm.define_method(integer, "pred", int_pred, ArgSpec::none());
    vm.define_method(integer, "chr", int_chr, ArgSpec::none());

    let float = core.float;
    vm.define_method(float, "round", float_round, ArgSpec::opt(1));
    vm.define_method(float, "floor", float_floor, ArgSpec::none());
    vm.define_method(float, "ceil", float_ceil, ArgSpec::none());
    vm.define_method(float, "nan?", float_nan, ArgSpec::none());
    vm.define_method(float, "infinite?", float_infinite, ArgSpec::none());
}

/// Operands of a binary operation after coercion
enum Operands {
    Int(i64, i64),
    Float(f64, f64),
}

fn operands(vm: &Vm, recv: Value, other: Value) -> Operands {
    match (recv.type_tag(), other.type_tag()) {
        (ValueType::Fixnum, ValueType::Fixnum) => Operands::Int(recv.as_integer(), other.as_integer()),
        _ => match (recv.as_number(), other.as_number()) {
            (Some(a), Some(b)) => Operands::Float(a, b),
            _ => {
                let other_name = match other.type_tag() {
                    ValueType::Nil => "nil".to_string(),
                    _ => vm.obj_classname(other),
                };
                let message = format!(
                    "{} can't be coerced into {}",
                    other_name,
                    vm.obj_classname(recv)
                );
                vm.raise_error(vm.core().type_error, &message)
            }
        },
    }
}

fn int_or_float(result: Option<i64>, fallback: impl FnOnce() -> f64) -> Value {
    match result {
        Some(i) => Value::fixnum(i),
        None => Value::float(fallback()),
    }
}

fn num_add(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(a, b) => int_or_float(a.checked_add(b), || a as f64 + b as f64),
        Operands::Float(a, b) => Value::float(a + b),
    }
}

fn num_sub(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(a, b) => int_or_float(a.checked_sub(b), || a as f64 - b as f64),
        Operands::Float(a, b) => Value::float(a - b),
    }
}

fn num_mul(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(a, b) => int_or_float(a.checked_mul(b), || a as f64 * b as f64),
        Operands::Float(a, b) => Value::float(a * b),
    }
}

fn zero_division(vm: &Vm) -> ! {
    vm.raise_error(vm.core().zero_division_error, "divided by 0")
}

fn num_div(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(_, 0) => zero_division(vm),
        Operands::Int(a, b) => {
            let floored = a.checked_div(b).map(|q| {
                if a % b != 0 && (a < 0) != (b < 0) {
                    q - 1
                } else {
                    q
                }
            });
            int_or_float(floored, || (a as f64 / b as f64).floor())
        }
        Operands::Float(a, b) => Value::float(a / b),
    }
}

fn num_mod(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(_, 0) => zero_division(vm),
        Operands::Int(a, b) => {
            let r = a.checked_rem(b).unwrap_or(0);
            Value::fixnum(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        Operands::Float(a, b) => {
            let r = a % b;
            Value::float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r })
        }
    }
}

fn num_pow(vm: &Vm, recv: Value) -> Value {
    match operands(vm, recv, vm.arg(0)) {
        Operands::Int(a, b) if b >= 0 => {
            let exact = u32::try_from(b).ok().and_then(|e| a.checked_pow(e));
            int_or_float(exact, || (a as f64).powf(b as f64))
        }
        Operands::Int(a, b) => Value::float((a as f64).powf(b as f64)),
        Operands::Float(a, b) => Value::float(a.powf(b)),
    }
}

fn num_neg(_vm: &Vm, recv: Value) -> Value {
    match recv.type_tag() {
        ValueType::Fixnum => int_or_float(recv.as_integer().checked_neg(), || {
            -(recv.as_integer() as f64)
        }),
        _ => Value::float(-recv.as_float()),
    }
}

fn num_eq(vm: &Vm, recv: Value) -> Value {
    let other = vm.arg(0);
    let equal = match (recv.type_tag(), other.type_tag()) {
        (ValueType::Fixnum, ValueType::Fixnum) => recv.as_integer() == other.as_integer(),
        _ => match (recv.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    };
    Value::bool(equal)
}

fn partial_cmp(recv: Value, other: Value) -> Option<Ordering> {
    match (recv.type_tag(), other.type_tag()) {
        (ValueType::Fixnum, ValueType::Fixnum) => Some(recv.as_integer().cmp(&other.as_integer())),
        _ => recv.as_number()?.partial_cmp(&other.as_number()?),
    }
}

fn num_cmp(vm: &Vm, recv: Value) -> Value {
    match partial_cmp(recv, vm.arg(0)) {
        Some(ordering) => Value::fixnum(ordering as i64),
        None => Value::NIL,
    }
}

fn ordering_with_arg(vm: &Vm, recv: Value) -> Ordering {
    let other = vm.arg(0);
    match partial_cmp(recv, other) {
        Some(ordering) => ordering,
        None => {
            let other_name = match other.type_tag() {
                ValueType::Nil => "nil".to_string(),
                _ => vm.obj_classname(other),
            };
            let message = format!(
                "comparison of {} with {} failed",
                vm.obj_classname(recv),
                other_name
            );
            vm.raise_error(vm.core().argument_error, &message)
        }
    }
}

fn num_lt(vm: &Vm, recv: Value) -> Value {
    Value::bool(ordering_with_arg(vm, recv) == Ordering::Less)
}

fn num_le(vm: &Vm, recv: Value) -> Value {
    Value::bool(ordering_with_arg(vm, recv) != Ordering::Greater)
}

fn num_gt(vm: &Vm, recv: Value) -> Value {
    Value::bool(ordering_with_arg(vm, recv) == Ordering::Greater)
}

fn num_ge(vm: &Vm, recv: Value) -> Value {
    Value::bool(ordering_with_arg(vm, recv) != Ordering::Less)
}

/// Float formatting: always shows a fractional part, like `1.0`
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn num_to_s(vm: &Vm, recv: Value) -> Value {
    let text = match recv.type_tag() {
        ValueType::Fixnum => recv.as_integer().to_string(),
        _ => format_float(recv.as_float()),
    };
    vm.str_new(text)
}

fn num_to_i(vm: &Vm, recv: Value) -> Value {
    match recv.type_tag() {
        ValueType::Fixnum => recv,
        _ => {
            let f = recv.as_float();
            if f.is_finite() {
                Value::fixnum(f.trunc() as i64)
            } else {
                vm.raise_error(vm.core().argument_error, &format_float(f))
            }
        }
    }
}

fn num_to_f(_vm: &Vm, recv: Value) -> Value {
    Value::float(recv.as_number().unwrap_or(0.0))
}

fn num_abs(_vm: &Vm, recv: Value) -> Value {
    match recv.type_tag() {
        ValueType::Fixnum => int_or_float(recv.as_integer().checked_abs(), || {
            (recv.as_integer() as f64).abs()
        }),
        _ => Value::float(recv.as_float().abs()),
    }
}

fn num_zero(_vm: &Vm, recv: Value) -> Value {
    Value::bool(recv.as_number() == Some(0.0))
}

fn int_shl(vm: &Vm, recv: Value) -> Value {
    let shift = expect_int(vm, vm.arg(0));
    let a = recv.as_integer();
    let shifted = if shift >= 0 {
        u32::try_from(shift)
            .ok()
            .and_then(|s| a.checked_shl(s))
            .filter(|r| r >> shift == a)
    } else {
        Some(a >> shift.unsigned_abs().min(63))
    };
    int_or_float(shifted, || a as f64 * 2f64.powf(shift as f64))
}

fn int_times(vm: &Vm, recv: Value) -> Value {
    let block = require_block(vm);
    let ai = vm.arena_save();
    for i in 0..recv.as_integer() {
        vm.yield_argv(block, &[Value::fixnum(i)]);
        vm.arena_restore(ai);
    }
    recv
}

fn int_upto(vm: &Vm, recv: Value) -> Value {
    let limit = expect_int(vm, vm.arg(0));
    let block = require_block(vm);
    let ai = vm.arena_save();
    for i in recv.as_integer()..=limit {
        vm.yield_argv(block, &[Value::fixnum(i)]);
        vm.arena_restore(ai);
    }
    recv
}

fn int_downto(vm: &Vm, recv: Value) -> Value {
    let limit = expect_int(vm, vm.arg(0));
    let block = require_block(vm);
    let ai = vm.arena_save();
    for i in (limit..=recv.as_integer()).rev() {
        vm.yield_argv(block, &[Value::fixnum(i)]);
        vm.arena_restore(ai);
    }
    recv
}

fn int_even(_vm: &Vm, recv: Value) -> Value {
    Value::bool(recv.as_integer() % 2 == 0)
}

fn int_odd(_vm: &Vm, recv: Value) -> Value {
    Value::bool(recv.as_integer() % 2 != 0)
}

fn int_succ(_vm: &Vm, recv: Value) -> Value {
    let i = recv.as_integer();
    int_or_float(i.checked_add(1), || i as f64 + 1.0)
}

fn int_pred(_vm: &Vm, recv: Value) -> Value {
    let i = recv.as_integer();
    int_or_float(i.checked_sub(1), || i as f64 - 1.0)
}

fn int_chr(vm: &Vm, recv: Value) -> Value {
    let code = u32::try_from(recv.as_integer()).ok().and_then(char::from_u32);
    match code {
        Some(c) => vm.str_new(c.to_string()),
        None => {
            let message = format!("{} out of char range", recv.as_integer());
            vm.raise_error(vm.core().argument_error, &message)
        }
    }
}

fn float_round(vm: &Vm, recv: Value) -> Value {
    let f = recv.as_float();
    let digits = match vm.get_args().first() {
        Some(d) => expect_int(vm, *d),
        None => 0,
    };
    if digits > 0 {
        let scale = 10f64.powi(digits.min(15) as i32);
        return Value::float((f * scale).round() / scale);
    }
    float_to_int(vm, f.round())
}

fn float_to_int(vm: &Vm, f: f64) -> Value {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Value::fixnum(f as i64)
    } else if f.is_finite() {
        Value::float(f)
    } else {
        vm.raise_error(vm.core().argument_error, &format_float(f))
    }
}

fn float_floor(vm: &Vm, recv: Value) -> Value {
    float_to_int(vm, recv.as_float().floor())
}

fn float_ceil(vm: &Vm, recv: Value) -> Value {
    float_to_int(vm, recv.as_float().ceil())
}

fn float_nan(_vm: &Vm, recv: Value) -> Value {
    Value::bool(recv.as_float().is_nan())
}

fn float_infinite(_vm: &Vm, recv: Value) -> Value {
    let f = recv.as_float();
    if f.is_infinite() {
        Value::fixnum(if f > 0.0 { 1 } else { -1 })
    } else {
        Value::NIL
    }
}

#[cfg(test)]
mod tests {
    use super::format_float;
    use crate::vm::state::Vm;
    use crate::vm::value::ValueType;

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
    }

    #[test]
    fn test_overflow_continues_in_float() {
        let vm = Vm::new();
        let value = vm.load_string("9223372036854775807 + 1");
        assert_eq!(value.type_tag(), ValueType::Float);
        let value = vm.load_string("2 ** 62");
        assert_eq!(value.as_integer(), 1 << 62);
    }

    #[test]
    fn test_floored_division() {
        let vm = Vm::new();
        assert_eq!(vm.load_string("-7 / 2").as_integer(), -4);
        assert_eq!(vm.load_string("7 % -3").as_integer(), -2);
        assert_eq!(vm.load_string("7.5 % 2").as_float(), 1.5);
    }

    #[test]
    fn test_mixed_comparison_and_coercion_errors() {
        let vm = Vm::new();
        assert_eq!(vm.load_string("1 < 1.5").is_truthy(), true);
        assert_eq!(vm.load_string("(2 <=> 2.0)").as_integer(), 0);
        vm.load_string("1 + nil");
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "TypeError");
        assert_eq!(vm.exc_message(exc), "nil can't be coerced into Integer");
    }

    #[test]
    fn test_iteration() {
        let vm = Vm::new();
        let value = vm.load_string("sum = 0\n1.upto(4) { |i| sum += i }\n3.times { |i| sum += i }\nsum");
        assert_eq!(value.as_integer(), 13);
    }
}
