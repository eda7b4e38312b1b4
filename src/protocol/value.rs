//! Dynamic values crossing the wire as arguments and return values.
//!
//! The enum is externally tagged so it survives non-self-describing formats
//! such as bincode. Decoding refuses lists and maps nested deeper than
//! [`MAX_DEPTH`], so a hostile frame cannot exhaust the decoding task's stack.

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deepest nesting of lists and maps accepted from the wire
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name used in argument errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats; nothing else converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Levels of list/map nesting. Scalars are 0, `[]` is 1.
    ///
    /// Walks with an explicit stack, so it is safe on any value.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 0usize)];
        while let Some((value, level)) = pending.pop() {
            match value {
                Value::List(items) => {
                    deepest = deepest.max(level + 1);
                    pending.extend(items.iter().map(|v| (v, level + 1)));
                }
                Value::Map(map) => {
                    deepest = deepest.max(level + 1);
                    pending.extend(map.values().map(|v| (v, level + 1)));
                }
                _ => {}
            }
        }
        deepest
    }
}

const VARIANTS: &[&str] = &["Unit", "Bool", "Int", "Float", "Text", "Bytes", "List", "Map"];

enum Tag {
    Unit,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    List,
    Map,
}

impl Tag {
    fn from_index(index: u64) -> Option<Self> {
        Some(match index {
            0 => Tag::Unit,
            1 => Tag::Bool,
            2 => Tag::Int,
            3 => Tag::Float,
            4 => Tag::Text,
            5 => Tag::Bytes,
            6 => Tag::List,
            7 => Tag::Map,
            _ => return None,
        })
    }

    fn from_name(name: &str) -> Option<Self> {
        VARIANTS
            .iter()
            .position(|v| *v == name)
            .and_then(|i| Self::from_index(i as u64))
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = Tag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a Value variant")
            }

            fn visit_u64<E: de::Error>(self, index: u64) -> Result<Tag, E> {
                Tag::from_index(index).ok_or_else(|| {
                    E::invalid_value(de::Unexpected::Unsigned(index), &"variant index 0 <= i < 8")
                })
            }

            fn visit_str<E: de::Error>(self, name: &str) -> Result<Tag, E> {
                Tag::from_name(name).ok_or_else(|| E::unknown_variant(name, VARIANTS))
            }

            fn visit_bytes<E: de::Error>(self, name: &[u8]) -> Result<Tag, E> {
                match std::str::from_utf8(name) {
                    Ok(name) => self.visit_str(name),
                    Err(_) => Err(E::invalid_value(de::Unexpected::Bytes(name), &self)),
                }
            }
        }

        deserializer.deserialize_identifier(TagVisitor)
    }
}

/// Deserializes one `Value` sitting inside `depth` enclosing containers.
#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl ValueSeed {
    fn enter<E: de::Error>(self) -> Result<Self, E> {
        let depth = self.depth + 1;
        if depth > MAX_DEPTH {
            return Err(E::custom(format!(
                "value nested deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(Self { depth })
    }
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_enum("Value", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("enum Value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (tag, variant) = data.variant::<Tag>()?;
        match tag {
            Tag::Unit => variant.unit_variant().map(|()| Value::Unit),
            Tag::Bool => variant.newtype_variant().map(Value::Bool),
            Tag::Int => variant.newtype_variant().map(Value::Int),
            Tag::Float => variant.newtype_variant().map(Value::Float),
            Tag::Text => variant.newtype_variant().map(Value::Text),
            Tag::Bytes => variant.newtype_variant().map(Value::Bytes),
            Tag::List => variant
                .newtype_variant_seed(ListSeed(self.enter()?))
                .map(Value::List),
            Tag::Map => variant
                .newtype_variant_seed(MapSeed(self.enter()?))
                .map(Value::Map),
        }
    }
}

struct ListSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for ListSeed {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Value>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Value>, A::Error> {
        // size hints come from the peer, do not trust them for allocation
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

struct MapSeed(ValueSeed);

impl<'de> DeserializeSeed<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<BTreeMap<String, Value>, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<BTreeMap<String, Value>, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.0)?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueSeed { depth: 0 }.deserialize(deserializer)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Unit, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_variant() {
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(4i64).as_i64(), Some(4));
        assert_eq!(Value::from(4i64).as_f64(), Some(4.0));
        assert_eq!(Value::from(true).as_str(), None);
        assert!(Value::from(None::<i64>).is_unit());
    }

    fn nested(levels: usize) -> Value {
        let mut value = Value::Unit;
        for _ in 0..levels {
            value = Value::List(vec![value]);
        }
        value
    }

    #[test]
    fn test_depth_counts_containers() {
        assert_eq!(Value::from(1i64).depth(), 0);
        assert_eq!(Value::List(vec![]).depth(), 1);
        assert_eq!(nested(5).depth(), 5);

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), nested(3));
        assert_eq!(Value::List(vec![Value::Unit, Value::Map(map)]).depth(), 5);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_nesting_limit_enforced_by_every_decoder() {
        let deepest = nested(MAX_DEPTH);
        let too_deep = nested(MAX_DEPTH + 1);

        let bytes = bincode::serialize(&deepest).unwrap();
        assert_eq!(bincode::deserialize::<Value>(&bytes).unwrap(), deepest);
        let bytes = bincode::serialize(&too_deep).unwrap();
        assert!(bincode::deserialize::<Value>(&bytes).is_err());

        let bytes = rmp_serde::to_vec(&too_deep).unwrap();
        assert!(rmp_serde::from_slice::<Value>(&bytes).is_err());

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), too_deep);
        let json = serde_json::to_vec(&Value::Map(map)).unwrap();
        assert!(serde_json::from_slice::<Value>(&json).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_every_variant_decodes_by_name_and_index() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Value::Float(0.5));
        let value = Value::List(vec![
            Value::Unit,
            Value::Bool(true),
            Value::Int(-3),
            Value::Text("t".into()),
            Value::Bytes(vec![1, 2]),
            Value::Map(map),
        ]);

        let by_index = bincode::serialize(&value).unwrap();
        assert_eq!(bincode::deserialize::<Value>(&by_index).unwrap(), value);
        let by_name = serde_json::to_vec(&value).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&by_name).unwrap(), value);
        let packed = rmp_serde::to_vec(&value).unwrap();
        assert_eq!(rmp_serde::from_slice::<Value>(&packed).unwrap(), value);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Unit.kind(), "unit");
        assert_eq!(Value::from(vec![Value::Unit]).kind(), "list");
        assert_eq!(Value::from(vec![1u8, 2]).kind(), "bytes");
    }
}
