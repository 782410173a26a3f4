//! Execution context - the key/value bag threaded through a queue.

use crate::directive::{DirectiveError, KeyDirective};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared result/state bag owned by one queue.
///
/// Steps only ever see read-only snapshots of it; the queue's binder is the
/// single writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    slots: Map<String, Value>,
}

impl ExecutionContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Whether a slot exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Store a value under `key`, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.slots.insert(key.into(), value)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the context holds no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.slots.iter()
    }

    /// Copy the values stored under `keys`, in order. Missing keys yield `null`.
    pub fn extract<'a, I>(&self, keys: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .map(|key| self.slots.get(key).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Render the whole context as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.slots.clone())
    }

    /// Write `value` according to `directive`.
    ///
    /// `ErrorSlot` and `Discard` never touch the context here; error
    /// forwarding is the caller's job since plain JSON values are never
    /// errors.
    pub fn apply(&mut self, directive: &KeyDirective, value: Value) -> Result<(), DirectiveError> {
        match directive {
            KeyDirective::Plain(key) | KeyDirective::Set(key) => {
                self.slots.insert(key.clone(), value);
            }
            KeyDirective::ErrorSlot | KeyDirective::Discard => {}
            KeyDirective::MergeArray | KeyDirective::MergeObject => self.merge(value),
            KeyDirective::Push(key) => match self.slots.get_mut(key) {
                Some(Value::Array(items)) => items.push(value),
                other => {
                    return Err(DirectiveError::NotASequence {
                        key: key.clone(),
                        found: other.map(|value| kind_of(value)).unwrap_or("nothing"),
                    })
                }
            },
            KeyDirective::Pick(fields) => {
                let Value::Object(source) = value else {
                    return Err(DirectiveError::NotAnObject {
                        fields: fields.clone(),
                        found: kind_of(&value),
                    });
                };
                for field in fields {
                    let picked = source.get(field).cloned().unwrap_or(Value::Null);
                    self.slots.insert(field.clone(), picked);
                }
            }
        }
        Ok(())
    }

    // Own fields only; scalars and null contribute nothing.
    fn merge(&mut self, value: Value) {
        match value {
            Value::Object(fields) => self.slots.extend(fields),
            Value::Array(items) => {
                for (index, item) in items.into_iter().enumerate() {
                    self.slots.insert(index.to_string(), item);
                }
            }
            _ => {}
        }
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(slots: Map<String, Value>) -> Self {
        Self { slots }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ExecutionContext {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self {
            slots: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Human-readable kind of a JSON value, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "an object",
    }
}
