//! Typed attribute values and the ordered attribute map used by nodes and edges.

use indexmap::IndexMap;
use serde_json::Value as Json;
use std::fmt;

/// A JSON-serializable attribute value.
///
/// This mirrors `serde_json::Value` one-for-one, so the conversion to/from JSON is total:
/// every `AttrValue` can be encoded and every decoded `serde_json::Value` can be represented.
/// Rust's type system is the set-time rejection mechanism the distilled spec asks for -- there
/// is no way to construct an `AttrValue` holding something that can't round-trip through JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<AttrValue>),
    Object(AttrMap),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(n) => Some(*n as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => write!(f, "null"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(n) => write!(f, "{n}"),
            AttrValue::Float(x) => write!(f, "{x}"),
            AttrValue::Text(s) => write!(f, "{s}"),
            AttrValue::Array(_) | AttrValue::Object(_) => {
                write!(f, "{}", Json::from(self.clone()))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for AttrValue {
            fn from(n: $t) -> Self {
                AttrValue::Int(n as i64)
            }
        })*
    };
}
impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        AttrValue::Float(x)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<AttrValue> for Json {
    fn from(v: AttrValue) -> Self {
        match v {
            AttrValue::Null => Json::Null,
            AttrValue::Bool(b) => Json::Bool(b),
            AttrValue::Int(n) => Json::from(n),
            AttrValue::Float(x) => serde_json::Number::from_f64(x).map(Json::Number).unwrap_or(Json::Null),
            AttrValue::Text(s) => Json::String(s),
            AttrValue::Array(a) => Json::Array(a.into_iter().map(Json::from).collect()),
            AttrValue::Object(m) => Json::Object(m.into_iter().map(|(k, v)| (k, Json::from(v))).collect()),
        }
    }
}

impl From<Json> for AttrValue {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => AttrValue::Null,
            Json::Bool(b) => AttrValue::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttrValue::Int(i)
                } else {
                    AttrValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => AttrValue::Text(s),
            Json::Array(a) => AttrValue::Array(a.into_iter().map(AttrValue::from).collect()),
            Json::Object(o) => AttrValue::Object(o.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect()),
        }
    }
}

/// An ordered string-keyed map of attribute values.
///
/// Insertion order is preserved (via `indexmap`) so that round-tripping attributes through
/// `save`/`renew` doesn't needlessly reorder a node or edge's JSON encoding.
pub type AttrMap = IndexMap<String, AttrValue>;

pub(crate) fn attrmap_to_json(attrs: &AttrMap) -> Json {
    Json::Object(attrs.iter().map(|(k, v)| (k.clone(), Json::from(v.clone()))).collect())
}

pub(crate) fn json_to_attrmap(value: Json) -> AttrMap {
    match value {
        Json::Object(map) => map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect(),
        _ => AttrMap::new(),
    }
}

impl rusqlite::ToSql for AttrValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            AttrValue::Null => ToSqlOutput::Owned(Value::Null),
            AttrValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(*b as i64)),
            AttrValue::Int(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            AttrValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            AttrValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            AttrValue::Array(_) | AttrValue::Object(_) => {
                ToSqlOutput::Owned(Value::Text(Json::from(self.clone()).to_string()))
            }
        })
    }
}

impl From<rusqlite::types::ValueRef<'_>> for AttrValue {
    fn from(v: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match v {
            ValueRef::Null => AttrValue::Null,
            ValueRef::Integer(i) => AttrValue::Int(i),
            ValueRef::Real(f) => AttrValue::Float(f),
            ValueRef::Text(t) => AttrValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => AttrValue::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// True if `key` is an ephemeral (leading-underscore) key: never persisted, never journaled.
pub fn is_ephemeral(key: &str) -> bool {
    key.starts_with('_')
}

/// Reserved structural attribute names: not treated as user data by the query surface.
pub const RESERVED_KEYS: &[&str] = &["uid", "kind", "ctime", "mtime", "startuid", "enduid"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Attributes with ephemeral keys filtered out, suitable for persisting to the `data` column
/// or writing into a change record.
pub(crate) fn persistable(attrs: &AttrMap) -> AttrMap {
    attrs
        .iter()
        .filter(|(k, _)| !is_ephemeral(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let mut obj = AttrMap::new();
        obj.insert("a".into(), AttrValue::Int(1));
        obj.insert("b".into(), AttrValue::Array(vec![AttrValue::Text("x".into()), AttrValue::Bool(true)]));
        let json = attrmap_to_json(&obj);
        let back = json_to_attrmap(json);
        assert_eq!(obj, back);
    }

    #[test]
    fn ephemeral_keys_are_filtered() {
        let mut attrs = AttrMap::new();
        attrs.insert("name".into(), AttrValue::Text("Anne".into()));
        attrs.insert("_temp".into(), AttrValue::Bool(true));
        let clean = persistable(&attrs);
        assert_eq!(clean.len(), 1);
        assert!(clean.contains_key("name"));
        assert!(!clean.contains_key("_temp"));
    }
}
