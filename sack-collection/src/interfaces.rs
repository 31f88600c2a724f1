use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Elements supporting lookup of a named field, used by `Bag::pluck`.
pub trait Pluck {
    /// Type of the projected field
    type Field: Any + Send + Sync + Clone;

    /// Returns the field, or `None` when the element has no such field.
    fn pluck(&self, field: &str) -> Option<Self::Field>;
}

/// Objects are looked up by key and arrays by a decimal index.
impl Pluck for Value {
    type Field = Value;

    fn pluck(&self, field: &str) -> Option<Value> {
        match self {
            Value::Object(m) => m.get(field).cloned(),
            Value::Array(vs) => field.parse::<usize>().ok().and_then(|i| vs.get(i).cloned()),
            _ => None
        }
    }
}

impl <V: Any + Send + Sync + Clone> Pluck for HashMap<String, V> {
    type Field = V;

    fn pluck(&self, field: &str) -> Option<V> {
        self.get(field).cloned()
    }
}

impl <V: Any + Send + Sync + Clone> Pluck for BTreeMap<String, V> {
    type Field = V;

    fn pluck(&self, field: &str) -> Option<V> {
        self.get(field).cloned()
    }
}
