//! Class, Hash, Array and Decode Tests
//!
//! The host-facing object API on top of protected calls.

use garnet_embed::{Error, Garnet, Value};
use serde::Deserialize;
use std::collections::HashMap;

// ===== Classes and modules =====

#[test]
fn test_define_class_and_module_under() {
    let mrb = Garnet::new();
    let outer = mrb.define_module("Outer").unwrap();
    let base = mrb.define_class("Base", None).unwrap();
    let inner = mrb.define_class_under("Inner", Some(&base), &outer).unwrap();
    let nested = mrb.define_module_under("Nested", &outer).unwrap();

    assert_eq!(inner.name(), "Outer::Inner");
    assert_eq!(nested.name(), "Outer::Nested");
    assert_eq!(mrb.class("Inner", Some(&outer)), Some(inner.clone()));
    assert_eq!(mrb.module("Nested", Some(&outer)), Some(nested));
    assert_eq!(mrb.class("Base", None), Some(base.clone()));
    assert!(mrb.module("Base", None).is_none());
    assert!(mrb.class("Missing", None).is_none());

    let value = mrb.load_string("Outer::Inner.superclass.name").unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "Base");

    let again = mrb.define_class_under("Inner", Some(&base), &outer).unwrap();
    assert_eq!(again, inner);
}

#[test]
fn test_superclass_mismatch_is_an_error() {
    let mrb = Garnet::new();
    mrb.define_class("Thing", None).unwrap();
    let other = mrb.define_class("Other", None).unwrap();
    let err = mrb.define_class("Thing", Some(&other)).unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "TypeError");
}

#[test]
fn test_const_defined() {
    let mrb = Garnet::new();
    let outer = mrb.define_module("Config").unwrap();
    mrb.load_string("module Config; LIMIT = 3; end").unwrap();

    assert!(mrb.const_defined("Config", None));
    assert!(mrb.const_defined("LIMIT", Some(&outer)));
    assert!(mrb.const_defined("String", Some(&outer)));
    assert!(!mrb.const_defined("LIMIT", None));
    assert!(!mrb.const_defined("Nope", Some(&outer)));
}

#[test]
fn test_class_value_round_trips_through_script() {
    let mrb = Garnet::new();
    let class = mrb.define_class("Box", None).unwrap();
    let value = mrb.call(class.value(), "name", &[]).unwrap();
    assert_eq!(mrb.to_string(value).unwrap(), "Box");
    assert_eq!(mrb.object_class().name(), "Object");
}

// ===== Hash and Array =====

#[test]
fn test_hash_wrapper() {
    let mrb = Garnet::new();
    let value = mrb.load_string(r#"{"foo" => "bar", "baz" => false}"#).unwrap();
    let hash = mrb.hash(value).unwrap();

    let bar = hash.get(mrb.string_value("foo")).unwrap();
    assert_eq!(mrb.to_string(bar).unwrap(), "bar");

    hash.set(mrb.string_value("foo"), mrb.string_value("qux")).unwrap();
    let qux = hash.get(mrb.string_value("foo")).unwrap();
    assert_eq!(mrb.to_string(qux).unwrap(), "qux");

    assert_eq!(hash.delete(mrb.string_value("baz")).unwrap(), Some(Value::FALSE));
    let keys = mrb.array(hash.keys().unwrap()).unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(mrb.to_string(keys.get(0)).unwrap(), "foo");
    assert_eq!(hash.size(), 1);
}

#[test]
fn test_array_wrapper() {
    let mrb = Garnet::new();
    let value = mrb.load_string("[1, 2, 3]").unwrap();
    let array = mrb.array(value).unwrap();
    assert_eq!(array.len(), 3);
    assert_eq!(array.get(1).as_integer(), 2);
    array.push(mrb.value(4i64)).unwrap();
    assert_eq!(mrb.inspect(array.value()).unwrap(), "[1, 2, 3, 4]");
    assert!(mrb.array(mrb.value("not an array")).is_none());
}

// ===== Decode =====

#[derive(Debug, Deserialize, PartialEq)]
struct Settings {
    name: String,
    retries: u32,
    ratio: f64,
    enabled: bool,
    hosts: Vec<String>,
    labels: HashMap<String, i64>,
    fallback: Option<String>,
}

#[test]
fn test_decode_struct() {
    let mrb = Garnet::new();
    let value = mrb
        .load_string(
            r#"{
                "name" => "primary",
                :retries => 3,
                "ratio" => 0.5,
                "enabled" => true,
                "hosts" => ["a", "b"],
                "labels" => { "x" => 1, 2 => 2 },
                "fallback" => nil
            }"#,
        )
        .unwrap();
    let settings: Settings = mrb.decode(value).unwrap();
    assert_eq!(settings.name, "primary");
    assert_eq!(settings.retries, 3);
    assert_eq!(settings.ratio, 0.5);
    assert!(settings.enabled);
    assert_eq!(settings.hosts, vec!["a", "b"]);
    assert_eq!(settings.labels.get("x"), Some(&1));
    assert_eq!(settings.labels.get("2"), Some(&2));
    assert_eq!(settings.fallback, None);
}

#[test]
fn test_decode_errors() {
    let mrb = Garnet::new();
    let value = mrb.load_string("{ 'name' => [] }").unwrap();
    let err = mrb.decode::<Settings>(value).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    let value = mrb.load_string("'many'").unwrap();
    assert!(mrb.decode::<Vec<i64>>(value).is_err());
}

#[test]
fn test_decode_in_host_method() {
    let mrb = Garnet::new();
    mrb.object_class().define_method(
        "total",
        garnet_embed::ArgSpec::req(1),
        |mrb, _, args| {
            let numbers: Vec<i64> = mrb.decode(args[0])?;
            Ok(Value::fixnum(numbers.iter().sum()))
        },
    );
    assert_eq!(mrb.load_string("total([1, 2, 3])").unwrap().as_integer(), 6);

    let err = mrb.load_string("total('x')").unwrap_err();
    assert_eq!(err.exception().unwrap().class_name(), "TypeError");
}
