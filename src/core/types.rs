use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Dynamic value type spanning every field kind the five logical models need.
///
/// Replaces the deep per-model typed-column hierarchy with a single tagged
/// sum type (`spec.md` §9: "Dynamic typing in `Value`/JSON").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Vector(Vec<f32>),
    Json(Json),
}

impl Value {
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }

    /// Encoding used inside index keys: lexicographic byte order of the
    /// result must match semantic order for strings and zero-padded
    /// numerics (`spec.md` §3).
    pub fn encode_sortable(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
            Value::I64(i) => encode_i64_sortable(*i),
            Value::F64(f) => encode_f64_sortable(*f),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => encode_hex(b),
            Value::Vector(_) => String::new(),
            Value::Json(j) => j.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            Value::Str(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Shift into an unsigned range by flipping the sign bit, then print
/// fixed-width so byte-lexicographic order matches numeric order.
fn encode_i64_sortable(v: i64) -> String {
    let shifted = (v as u64) ^ 0x8000_0000_0000_0000u64;
    format!("{:020}", shifted)
}

/// IEEE-754 bit pattern remapped so fixed-width hex compares in numeric
/// float order, including sign.
fn encode_f64_sortable(v: f64) -> String {
    let bits = v.to_bits();
    let flipped = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    };
    format!("{:016x}", flipped)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// An entity row/vertex/document: a table, a primary key, and an ordered
/// field map. Field order is preserved for deterministic re-serialization;
/// lookups are by name regardless of position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub table: String,
    pub pk: String,
    pub fields: Vec<(String, Value)>,
}

impl Entity {
    pub fn new(table: impl Into<String>, pk: impl Into<String>) -> Self {
        Entity { table: table.into(), pk: pk.into(), fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.fields.iter_mut().find(|(n, _)| n == &name) {
            entry.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Dotted field access (`doc.a.b.c`): the first segment is a top-level
    /// field name, remaining segments index into a nested `Value::Json` tree.
    pub fn field_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut current = self.field(head)?.clone();
        for seg in segments {
            match current {
                Value::Json(j) => current = Value::Json(j.get(seg)?.clone()),
                _ => return None,
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sortable_i64_preserves_order() {
        let mut values = vec![-100i64, -1, 0, 1, 100, i64::MIN, i64::MAX];
        let encoded: Vec<String> = values.iter().map(|v| Value::I64(*v).encode_sortable()).collect();
        let mut sorted_by_encoding: Vec<(String, i64)> =
            encoded.into_iter().zip(values.iter().cloned()).collect();
        sorted_by_encoding.sort();
        values.sort();
        let from_encoding: Vec<i64> = sorted_by_encoding.into_iter().map(|(_, v)| v).collect();
        assert_eq!(from_encoding, values);
    }

    #[test]
    fn field_path_traverses_nested_json() {
        let mut e = Entity::new("t", "pk1");
        e.set_field("doc", Value::Json(serde_json::json!({"a": {"b": 7}})));
        assert_eq!(e.field_path("doc.a.b"), Some(Value::Json(serde_json::json!(7))));
    }
}
