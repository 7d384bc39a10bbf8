//! Stable request identities used to recognise duplicate concurrent fetches.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifier shared by every caller that requests the same resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchKey(String);

impl FetchKey {
    /// Wraps a caller-supplied key verbatim.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from an operation name and its arguments.
    ///
    /// Arguments are serialized to JSON with object keys sorted at every level,
    /// so two argument values that only differ in map ordering share a key.
    pub fn derive<V: Serialize + ?Sized>(operation: &str, variables: &V) -> Result<Self> {
        let value = serde_json::to_value(variables)
            .with_context(|| format!("failed to serialize variables for {operation}"))?;
        Ok(Self::from_value(operation, &value))
    }

    fn from_value(operation: &str, variables: &Value) -> Self {
        let mut key = String::with_capacity(operation.len() + 16);
        key.push_str(operation);
        key.push('_');
        write_canonical(variables, &mut key);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FetchKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FetchKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Describes one call against the application's data executor: the named
/// operation plus its JSON arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    operation: String,
    variables: Value,
    key: Option<FetchKey>,
}

impl FetchRequest {
    pub fn new<V: Serialize + ?Sized>(operation: impl Into<String>, variables: &V) -> Result<Self> {
        let operation = operation.into();
        let variables = serde_json::to_value(variables)
            .with_context(|| format!("failed to serialize variables for {operation}"))?;
        Ok(Self {
            operation,
            variables,
            key: None,
        })
    }

    /// Request without arguments. `variables` is an empty object, so the key
    /// is `"{operation}_{}"`.
    pub fn bare(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            variables: Value::Object(Default::default()),
            key: None,
        }
    }

    /// Overrides the derived key, e.g. `order_123` for a request that several
    /// views issue with slightly different argument shapes.
    pub fn with_key(mut self, key: impl Into<FetchKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    /// Explicit key if one was set, otherwise the key derived from the
    /// operation name and arguments.
    pub fn key(&self) -> FetchKey {
        match &self.key {
            Some(key) => key.clone(),
            None => FetchKey::from_value(&self.operation, &self.variables),
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (name, nested)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
