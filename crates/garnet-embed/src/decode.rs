//! Decoding runtime values into Rust types with serde
//!
//! Mapping:
//!
//! | runtime            | Rust                                         |
//! |--------------------|----------------------------------------------|
//! | `nil`              | `()`, `None`                                 |
//! | `true` / `false`   | `bool` (any other value decodes by truthiness) |
//! | Integer            | integers, floats, `String`                   |
//! | Float              | floats                                       |
//! | String             | `String`, integers and floats when numeric   |
//! | Symbol             | `String`, unit enum variants                 |
//! | Array              | sequences and tuples                         |
//! | Hash               | maps and structs                             |
//!
//! Map keys decode like any other value, so an integer key read into a
//! `HashMap<String, _>` becomes its decimal text. Decoding never runs
//! script code.

use crate::error::DecodeError;
use garnet_engine::{Value, ValueType, Vm};
use serde::de::value::StringDeserializer;
use serde::de::{self, DeserializeOwned, DeserializeSeed, Deserializer, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

/// Decode `value` into `T`
pub fn decode<T: DeserializeOwned>(vm: &Vm, value: Value) -> Result<T, DecodeError> {
    T::deserialize(ValueDeserializer::new(vm, value))
}

/// A serde deserializer reading one runtime value
pub struct ValueDeserializer<'a> {
    vm: &'a Vm,
    value: Value,
}

impl<'a> ValueDeserializer<'a> {
    /// Deserializer for `value`
    pub fn new(vm: &'a Vm, value: Value) -> Self {
        Self { vm, value }
    }

    fn mismatch(&self, expected: &str) -> DecodeError {
        DecodeError::new(format!(
            "cannot decode {} into {}",
            self.vm.obj_classname(self.value),
            expected
        ))
    }

    fn text(&self) -> Option<String> {
        match self.value.type_tag() {
            ValueType::String => self.vm.string_of(self.value),
            ValueType::Symbol => self.value.as_symbol().map(|sym| self.vm.sym_name(sym)),
            _ => None,
        }
    }

    fn integer(&self) -> Result<i64, DecodeError> {
        match self.value.type_tag() {
            ValueType::Fixnum => Ok(self.value.as_integer()),
            ValueType::String => self
                .text()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| self.mismatch("an integer")),
            _ => Err(self.mismatch("an integer")),
        }
    }

    fn float(&self) -> Result<f64, DecodeError> {
        match self.value.type_tag() {
            ValueType::Float | ValueType::Fixnum => {
                self.value.as_number().ok_or_else(|| self.mismatch("a float"))
            }
            ValueType::String => self
                .text()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| self.mismatch("a float")),
            _ => Err(self.mismatch("a float")),
        }
    }
}

macro_rules! deserialize_integer {
    ($($method:ident)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
                visitor.visit_i64(self.integer()?)
            }
        )*
    };
}

impl<'de, 'a> Deserializer<'de> for ValueDeserializer<'a> {
    type Error = DecodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.value.type_tag() {
            ValueType::Nil => visitor.visit_unit(),
            ValueType::True => visitor.visit_bool(true),
            ValueType::False => visitor.visit_bool(false),
            ValueType::Fixnum => visitor.visit_i64(self.value.as_integer()),
            ValueType::Float => visitor.visit_f64(self.value.as_float()),
            ValueType::String | ValueType::Symbol => match self.text() {
                Some(text) => visitor.visit_string(text),
                None => Err(self.mismatch("a string")),
            },
            ValueType::Array => self.deserialize_seq(visitor),
            ValueType::Hash => self.deserialize_map(visitor),
            _ => Err(self.mismatch("a Rust value")),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_bool(self.value.is_truthy())
    }

    deserialize_integer! {
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_f64(self.float()?)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        let text = match self.value.type_tag() {
            ValueType::Fixnum => Some(self.value.as_integer().to_string()),
            ValueType::Float => Some(format!("{:?}", self.value.as_float())),
            _ => self.text(),
        };
        match text {
            Some(text) => visitor.visit_string(text),
            None => Err(self.mismatch("a string")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        if self.value.is_nil() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        if self.value.is_nil() {
            visitor.visit_unit()
        } else {
            Err(self.mismatch("()"))
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        match self.vm.ary_items(self.value) {
            Some(items) => {
                let mut seq = SeqAccess {
                    vm: self.vm,
                    items: items.into_iter(),
                };
                visitor.visit_seq(&mut seq)
            }
            None => Err(self.mismatch("a sequence")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        if self.value.type_tag() != ValueType::Hash {
            return Err(self.mismatch("a map"));
        }
        let mut map = MapAccess {
            vm: self.vm,
            entries: self.vm.hash_entries(self.value).into_iter(),
            pending: None,
        };
        visitor.visit_map(&mut map)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, DecodeError> {
        match self.text() {
            Some(text) => {
                let variant: StringDeserializer<DecodeError> = text.into_deserializer();
                visitor.visit_enum(variant)
            }
            None => Err(self.mismatch("an enum variant")),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, DecodeError> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        i128 u128 char bytes byte_buf unit_struct
    }
}

struct SeqAccess<'a> {
    vm: &'a Vm,
    items: std::vec::IntoIter<Value>,
}

impl<'de, 'a> de::SeqAccess<'de> for SeqAccess<'a> {
    type Error = DecodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, DecodeError> {
        match self.items.next() {
            Some(item) => seed.deserialize(ValueDeserializer::new(self.vm, item)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct MapAccess<'a> {
    vm: &'a Vm,
    entries: std::vec::IntoIter<(Value, Value)>,
    pending: Option<Value>,
}

impl<'de, 'a> de::MapAccess<'de> for MapAccess<'a> {
    type Error = DecodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, DecodeError> {
        match self.entries.next() {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(ValueDeserializer::new(self.vm, key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, DecodeError> {
        match self.pending.take() {
            Some(value) => seed.deserialize(ValueDeserializer::new(self.vm, value)),
            None => Err(DecodeError::new("map value requested before its key")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}
