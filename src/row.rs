use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Uniform "get by mapping" access to one flat input record.
///
/// `None` means the row has no field with that name, which aborts a build.
/// A present-but-null field is `Some(Value::Null)`.
pub trait Row {
    fn field(&self, name: &str) -> Option<Value>;
}

impl<S: BuildHasher> Row for HashMap<String, Value, S> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Row for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Row for serde_json::Map<String, serde_json::Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).map(Value::from_json)
    }
}

impl<R: Row + ?Sized> Row for &R {
    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }
}

impl<R: Row + ?Sized> Row for Box<R> {
    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }
}
