//! String and Symbol

use super::{expect_int, expect_str};
use crate::vm::object::ArgSpec;
use crate::vm::state::Vm;
use crate::vm::value::{Value, ValueType};
use std::cmp::Ordering;

pub(super) fn init(vm: &Vm) {
    let string = vm.core().string;
    vm.define_method(string, "+", str_plus, ArgSpec::req(1));
    vm.define_method(string, "*", str_times, ArgSpec::req(1));
    vm.define_method(string, "==", str_eq, ArgSpec::req(1));
    vm.define_method(string, "eql?", str_eq, ArgSpec::req(1));
    vm.define_method(string, "<=>", str_cmp, ArgSpec::req(1));
    vm.define_method(string, "<<", str_concat, ArgSpec::req(1));
    vm.define_method(string, "concat", str_concat, ArgSpec::req(1));
    vm.define_method(string, "length", str_length, ArgSpec::none());
    vm.define_method(string, "size", str_length, ArgSpec::none());
    vm.define_method(string, "to_s", str_to_s, ArgSpec::none());
    vm.define_method(string, "to_str", str_to_s, ArgSpec::none());
    vm.define_method(string, "inspect", str_inspect, ArgSpec::none());
    vm.define_method(string, "to_sym", str_to_sym, ArgSpec::none());
    vm.define_method(string, "to_i", str_to_i, ArgSpec::none());
    vm.define_method(string, "to_f", str_to_f, ArgSpec::none());
    vm.define_method(string, "upcase", str_upcase, ArgSpec::none());
    vm.define_method(string, "downcase", str_downcase, ArgSpec::none());
    vm.define_method(string, "capitalize", str_capitalize, ArgSpec::none());
    vm.define_method(string, "reverse", str_reverse, ArgSpec::none());
    vm.define_method(string, "include?", str_include, ArgSpec::req(1));
    vm.define_method(string, "start_with?", str_start_with, ArgSpec::any());
    vm.define_method(string, "end_with?", str_end_with, ArgSpec::any());
    vm.define_method(string, "strip", str_strip, ArgSpec::none());
    vm.define_method(string, "lstrip", str_lstrip, ArgSpec::none());
    vm.define_method(string, "rstrip", str_rstrip, ArgSpec::none());
    vm.define_method(string, "split", str_split, ArgSpec::opt(1));
    vm.define_method(string, "sub", str_sub, ArgSpec::arg(1, 1) | ArgSpec::block());
    vm.define_method(string, "gsub", str_gsub, ArgSpec::arg(1, 1) | ArgSpec::block());
    vm.define_method(string, "[]", str_aref, ArgSpec::arg(1, 1));
    vm.define_method(string, "empty?", str_empty, ArgSpec::none());
    vm.define_method(string, "chars", str_chars, ArgSpec::none());
    vm.define_method(string, "each_char", str_each_char, ArgSpec::block());
    vm.define_method(string, "index", str_index, ArgSpec::req(1));
    vm.define_method(string, "ljust", str_ljust, ArgSpec::arg(1, 1));
    vm.define_method(string, "rjust", str_rjust, ArgSpec::arg(1, 1));

    let symbol = vm.core().symbol;
    vm.define_method(symbol, "to_s", sym_to_s, ArgSpec::none());
    vm.define_method(symbol, "id2name", sym_to_s, ArgSpec::none());
    vm.define_method(symbol, "to_sym", sym_to_sym, ArgSpec::none());
    vm.define_method(symbol, "inspect", sym_inspect, ArgSpec::none());
    vm.define_method(symbol, "length", sym_length, ArgSpec::none());
    vm.define_method(symbol, "size", sym_length, ArgSpec::none());
    vm.define_method(symbol, "<=>", sym_cmp, ArgSpec::req(1));
}

fn self_str(vm: &Vm, recv: Value) -> String {
    vm.string_of(recv).unwrap_or_default()
}

fn map_str(vm: &Vm, recv: Value, f: impl FnOnce(&str) -> String) -> Value {
    let mapped = vm.with_str(recv, f).unwrap_or_default();
    vm.str_new(mapped)
}

fn str_plus(vm: &Vm, recv: Value) -> Value {
    let other = expect_str(vm, vm.arg(0));
    let mut s = self_str(vm, recv);
    s.push_str(&other);
    vm.str_new(s)
}

fn str_times(vm: &Vm, recv: Value) -> Value {
    let count = expect_int(vm, vm.arg(0));
    let Ok(count) = usize::try_from(count) else {
        vm.raise_error(vm.core().argument_error, "negative argument")
    };
    map_str(vm, recv, |s| s.repeat(count))
}

fn str_eq(vm: &Vm, recv: Value) -> Value {
    let other = vm.arg(0);
    let equal = match vm.string_of(other) {
        Some(other) => vm.with_str(recv, |s| s == other).unwrap_or(false),
        None => false,
    };
    Value::bool(equal)
}

fn str_cmp(vm: &Vm, recv: Value) -> Value {
    match vm.string_of(vm.arg(0)) {
        Some(other) => Value::fixnum(self_str(vm, recv).cmp(&other) as i64),
        None => Value::NIL,
    }
}

fn str_concat(vm: &Vm, recv: Value) -> Value {
    let arg = vm.arg(0);
    let addition = match arg.type_tag() {
        ValueType::Fixnum => match u32::try_from(arg.as_integer()).ok().and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => vm.raise_error(vm.core().argument_error, "invalid codepoint"),
        },
        _ => expect_str(vm, arg),
    };
    vm.str_modify(recv, |s| s.push_str(&addition));
    recv
}

fn str_length(vm: &Vm, recv: Value) -> Value {
    let len = vm.with_str(recv, |s| s.chars().count()).unwrap_or(0);
    Value::fixnum(len as i64)
}

fn str_to_s(_vm: &Vm, recv: Value) -> Value {
    recv
}

/// Double-quoted literal form of a string
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x1b' => out.push_str("\\e"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn str_inspect(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, quote)
}

fn str_to_sym(vm: &Vm, recv: Value) -> Value {
    Value::symbol(vm.intern(&self_str(vm, recv)))
}

/// Leading integer of a string, 0 if there is none
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits: String = digits
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '_')
        .filter(|c| *c != '_')
        .collect();
    let value = digits.parse::<i64>().unwrap_or(0);
    if negative {
        -value
    } else {
        value
    }
}

fn str_to_i(vm: &Vm, recv: Value) -> Value {
    Value::fixnum(vm.with_str(recv, leading_int).unwrap_or(0))
}

fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = s.as_bytes();
    while end < bytes.len() {
        let b = bytes[end];
        let ok = match b {
            b'0'..=b'9' => true,
            b'+' | b'-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            b'e' | b'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end += 1;
    }
    // Back off trailing characters that do not complete a number ("1e", "2.")
    (1..=end)
        .rev()
        .find_map(|i| s[..i].parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn str_to_f(vm: &Vm, recv: Value) -> Value {
    Value::float(vm.with_str(recv, leading_float).unwrap_or(0.0))
}

fn str_upcase(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, str::to_uppercase)
}

fn str_downcase(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, str::to_lowercase)
}

fn str_capitalize(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
            None => String::new(),
        }
    })
}

fn str_reverse(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, |s| s.chars().rev().collect())
}

fn str_include(vm: &Vm, recv: Value) -> Value {
    let needle = expect_str(vm, vm.arg(0));
    Value::bool(vm.with_str(recv, |s| s.contains(&needle)).unwrap_or(false))
}

fn str_start_with(vm: &Vm, recv: Value) -> Value {
    let s = self_str(vm, recv);
    let found = vm
        .get_args()
        .into_iter()
        .any(|prefix| s.starts_with(&expect_str(vm, prefix)));
    Value::bool(found)
}

fn str_end_with(vm: &Vm, recv: Value) -> Value {
    let s = self_str(vm, recv);
    let found = vm
        .get_args()
        .into_iter()
        .any(|suffix| s.ends_with(&expect_str(vm, suffix)));
    Value::bool(found)
}

fn str_strip(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, |s| s.trim().to_string())
}

fn str_lstrip(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, |s| s.trim_start().to_string())
}

fn str_rstrip(vm: &Vm, recv: Value) -> Value {
    map_str(vm, recv, |s| s.trim_end().to_string())
}

fn str_split(vm: &Vm, recv: Value) -> Value {
    let s = self_str(vm, recv);
    let separator = match vm.get_args().first() {
        Some(sep) if !sep.is_nil() => Some(expect_str(vm, *sep)),
        _ => None,
    };
    let mut parts: Vec<String> = match separator.as_deref() {
        None | Some(" ") => s.split_whitespace().map(str::to_string).collect(),
        Some("") => s.chars().map(String::from).collect(),
        Some(sep) => s.split(sep).map(str::to_string).collect(),
    };
    while parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    let items = parts.into_iter().map(|part| vm.str_new(part)).collect();
    vm.ary_new(items)
}

/// Replacement text for one match: the second argument, or the block's
/// result for the matched text
fn replacement(vm: &Vm, matched: &str) -> String {
    let (args, block) = vm.get_args_rest_block();
    match args.get(1) {
        Some(with) => expect_str(vm, *with),
        None if !block.is_nil() => {
            let matched = vm.str_new(matched);
            let result = vm.yield_argv(block, &[matched]);
            vm.obj_as_string(result)
        }
        None => vm.arity_error(args.len(), "2"),
    }
}

fn substitute(vm: &Vm, recv: Value, global: bool) -> Value {
    let s = self_str(vm, recv);
    let pattern = expect_str(vm, vm.arg(0));
    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();
    let mut replaced = false;
    while let Some(pos) = rest.find(&pattern) {
        if replaced && !global {
            break;
        }
        out.push_str(&rest[..pos]);
        out.push_str(&replacement(vm, &pattern));
        replaced = true;
        if pattern.is_empty() {
            match rest[pos..].chars().next() {
                Some(c) => {
                    out.push(c);
                    rest = &rest[pos + c.len_utf8()..];
                }
                None => {
                    rest = "";
                    break;
                }
            }
        } else {
            rest = &rest[pos + pattern.len()..];
        }
    }
    out.push_str(rest);
    vm.str_new(out)
}

fn str_sub(vm: &Vm, recv: Value) -> Value {
    substitute(vm, recv, false)
}

fn str_gsub(vm: &Vm, recv: Value) -> Value {
    substitute(vm, recv, true)
}

/// `s[i]`, `s[start, len]` and `s["sub"]`, indexing by character
fn str_aref(vm: &Vm, recv: Value) -> Value {
    let args = vm.get_args();
    let chars: Vec<char> = self_str(vm, recv).chars().collect();
    let len = chars.len() as i64;

    if let Some(needle) = vm.string_of(args[0]) {
        let s: String = chars.iter().collect();
        return if s.contains(&needle) {
            vm.str_new(needle)
        } else {
            Value::NIL
        };
    }

    let start = expect_int(vm, args[0]);
    let start = if start < 0 { start + len } else { start };
    match args.get(1) {
        None => {
            if (0..len).contains(&start) {
                vm.str_new(chars[start as usize].to_string())
            } else {
                Value::NIL
            }
        }
        Some(count) => {
            let count = expect_int(vm, *count);
            if start < 0 || start > len || count < 0 {
                return Value::NIL;
            }
            let end = start.saturating_add(count).min(len);
            vm.str_new(chars[start as usize..end as usize].iter().collect::<String>())
        }
    }
}

fn str_empty(vm: &Vm, recv: Value) -> Value {
    Value::bool(vm.with_str(recv, str::is_empty).unwrap_or(true))
}

fn char_values(vm: &Vm, recv: Value) -> Vec<Value> {
    self_str(vm, recv)
        .chars()
        .map(|c| vm.str_new(c.to_string()))
        .collect()
}

fn str_chars(vm: &Vm, recv: Value) -> Value {
    let items = char_values(vm, recv);
    vm.ary_new(items)
}

fn str_each_char(vm: &Vm, recv: Value) -> Value {
    let block = super::require_block(vm);
    let ai = vm.arena_save();
    for c in self_str(vm, recv).chars() {
        let c = vm.str_new(c.to_string());
        vm.yield_argv(block, &[c]);
        vm.arena_restore(ai);
    }
    recv
}

fn str_index(vm: &Vm, recv: Value) -> Value {
    let needle = expect_str(vm, vm.arg(0));
    let s = self_str(vm, recv);
    match s.find(&needle) {
        Some(byte_pos) => Value::fixnum(s[..byte_pos].chars().count() as i64),
        None => Value::NIL,
    }
}

fn justify(vm: &Vm, recv: Value, left: bool) -> Value {
    let args = vm.get_args();
    let width = expect_int(vm, args[0]).max(0) as usize;
    let pad = match args.get(1) {
        Some(pad) => expect_str(vm, *pad),
        None => " ".to_string(),
    };
    if pad.is_empty() {
        vm.raise_error(vm.core().argument_error, "zero width padding");
    }
    let s = self_str(vm, recv);
    let missing = width.saturating_sub(s.chars().count());
    let fill: String = pad.chars().cycle().take(missing).collect();
    vm.str_new(if left { s + &fill } else { fill + &s })
}

fn str_ljust(vm: &Vm, recv: Value) -> Value {
    justify(vm, recv, true)
}

fn str_rjust(vm: &Vm, recv: Value) -> Value {
    justify(vm, recv, false)
}

fn sym_to_s(vm: &Vm, recv: Value) -> Value {
    match recv.as_symbol() {
        Some(sym) => vm.str_new(vm.sym_name(sym)),
        None => vm.str_new(""),
    }
}

fn sym_to_sym(_vm: &Vm, recv: Value) -> Value {
    recv
}

/// Whether a symbol name prints without quotes after `:`
fn plain_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_' || first == '@' || first == '$') {
        return matches!(
            name,
            "+" | "-" | "*" | "/" | "%" | "**" | "==" | "!=" | "<" | "<=" | ">" | ">="
                | "<=>" | "===" | "<<" | "[]" | "[]=" | "!" | "-@" | "+@"
        );
    }
    let body: Vec<char> = name.trim_start_matches(['@', '$']).chars().collect();
    let (last, init) = match body.split_last() {
        Some(split) => split,
        None => return false,
    };
    init.iter().all(|c| c.is_alphanumeric() || *c == '_')
        && (last.is_alphanumeric() || matches!(last, '_' | '?' | '!' | '='))
}

fn sym_inspect(vm: &Vm, recv: Value) -> Value {
    let name = recv.as_symbol().map(|s| vm.sym_name(s)).unwrap_or_default();
    if plain_symbol(&name) {
        vm.str_new(format!(":{}", name))
    } else {
        vm.str_new(format!(":{}", quote(&name)))
    }
}

fn sym_length(vm: &Vm, recv: Value) -> Value {
    let len = recv
        .as_symbol()
        .map(|s| vm.sym_name(s).chars().count())
        .unwrap_or(0);
    Value::fixnum(len as i64)
}

fn sym_cmp(vm: &Vm, recv: Value) -> Value {
    let other = vm.arg(0);
    match (recv.as_symbol(), other.as_symbol()) {
        (Some(a), Some(b)) => {
            let ordering: Ordering = vm.sym_name(a).cmp(&vm.sym_name(b));
            Value::fixnum(ordering as i64)
        }
        _ => Value::NIL,
    }
}

#[cfg(test)]
mod tests {
    use super::{leading_float, leading_int, plain_symbol, quote};
    use crate::vm::state::Vm;

    fn eval_str(vm: &Vm, source: &str) -> String {
        let value = vm.load_string(source);
        assert!(vm.exc().is_nil(), "{}: {}", source, vm.exc_message(vm.exc()));
        vm.string_of(value).unwrap_or_default()
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }

    #[test]
    fn test_numeric_prefixes() {
        assert_eq!(leading_int("  42abc"), 42);
        assert_eq!(leading_int("-1_000"), -1000);
        assert_eq!(leading_int("abc"), 0);
        assert_eq!(leading_float("3.25kg"), 3.25);
        assert_eq!(leading_float("1e"), 1.0);
    }

    #[test]
    fn test_symbol_inspect_forms() {
        assert!(plain_symbol("name"));
        assert!(plain_symbol("empty?"));
        assert!(plain_symbol("<=>"));
        assert!(!plain_symbol("two words"));
    }

    #[test]
    fn test_string_methods() {
        let vm = Vm::new();
        assert_eq!(eval_str(&vm, "'hello world'.split.map { |w| w.capitalize }.join(' ')"), "Hello World");
        assert_eq!(eval_str(&vm, "'a-b-c'.gsub('-', '+')"), "a+b+c");
        assert_eq!(eval_str(&vm, "'a-b-c'.sub('-') { |m| m * 2 }"), "a--b-c");
        assert_eq!(eval_str(&vm, "'hello'[1, 3]"), "ell");
        assert_eq!(eval_str(&vm, "'7'.rjust(3, '0')"), "007");
        assert_eq!(eval_str(&vm, ":name.inspect"), ":name");
        assert_eq!(eval_str(&vm, "\"tab\\there\".inspect"), "\"tab\\there\"");
    }

    #[test]
    fn test_frozen_string_rejects_append() {
        let vm = Vm::new();
        vm.load_string("s = 'abc'.freeze\ns << 'd'");
        let exc = vm.take_exc();
        assert_eq!(vm.obj_classname(exc), "FrozenError");
        assert_eq!(vm.exc_message(exc), "can't modify frozen String");
    }
}
