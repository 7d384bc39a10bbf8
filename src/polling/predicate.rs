//! Completion predicates deciding whether a fetched payload counts as ready.

use serde_json::Value;

/// Decides whether a payload is complete enough to stop polling.
pub trait Completion<T>: Send + Sync + 'static {
    fn is_complete(&self, payload: &T) -> bool;
}

impl<T, F> Completion<T> for F
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn is_complete(&self, payload: &T) -> bool {
        self(payload)
    }
}

/// Ready when the value at a JSON pointer exists and is non-empty.
///
/// `null`, `{}`, `[]` and `""` all count as empty; numbers and booleans are
/// always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyAt {
    pointer: String,
}

impl NonEmptyAt {
    /// `pointer` uses RFC 6901 syntax, e.g. `/shipment/detail`.
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// Value at the pointer if it is non-empty.
    pub fn value_of<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        payload.pointer(&self.pointer).filter(|value| !is_empty(value))
    }
}

impl Completion<Value> for NonEmptyAt {
    fn is_complete(&self, payload: &Value) -> bool {
        self.value_of(payload).is_some()
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
