//! Namespace-scoped data exchange between actions
//!
//! Actions that never hold references to each other hand data along
//! through the store. An entry is addressed by
//! `(namespace, producing action, label, key)`; the last three parts are
//! fixed at compile time by a [`StoreKey`], which also fixes the value type.
//!
//! Absence is never a default: a missing entry at run time means an
//! earlier action was skipped or mis-ordered, and [`NamespaceStore::require`]
//! reports it as an internal error.

use crate::error::{ActionError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Typed address of a namespace entry, minus the namespace
pub struct StoreKey<T> {
    pub action: &'static str,
    pub label: &'static str,
    pub key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StoreKey<T> {
    pub const fn new(action: &'static str, label: &'static str, key: &'static str) -> Self {
        Self {
            action,
            label,
            key,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for StoreKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StoreKey<T> {}

impl<T> fmt::Debug for StoreKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.action, self.label, self.key)
    }
}

type Address = (String, String, String, String);

/// Per-job key/value exchange
#[derive(Debug, Default, Clone)]
pub struct NamespaceStore {
    entries: BTreeMap<Address, Value>,
}

impl NamespaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite a raw value
    pub fn set_value(&mut self, namespace: &str, action: &str, label: &str, key: &str, value: Value) {
        self.entries.insert(
            (
                namespace.to_string(),
                action.to_string(),
                label.to_string(),
                key.to_string(),
            ),
            value,
        );
    }

    /// Raw value lookup
    pub fn get_value(&self, namespace: &str, action: &str, label: &str, key: &str) -> Option<&Value> {
        self.entries.get(&(
            namespace.to_string(),
            action.to_string(),
            label.to_string(),
            key.to_string(),
        ))
    }

    /// Store or overwrite a typed value
    pub fn set<T: Serialize>(&mut self, namespace: &str, key: StoreKey<T>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(namespace, key.action, key.label, key.key, value);
        Ok(())
    }

    /// Typed lookup. An entry of the wrong shape reads as absent.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: StoreKey<T>) -> Option<T> {
        self.get_value(namespace, key.action, key.label, key.key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Typed lookup of an entry an earlier action must have published
    pub fn require<T: DeserializeOwned>(&self, namespace: &str, key: StoreKey<T>) -> Result<T> {
        let value = self
            .get_value(namespace, key.action, key.label, key.key)
            .ok_or_else(|| {
                ActionError::bug(format!("missing namespace data {}/{:?}", namespace, key))
            })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ActionError::bug(format!(
                "namespace data {}/{:?} has the wrong shape: {}",
                namespace, key, e
            ))
        })
    }

    pub fn contains<T>(&self, namespace: &str, key: StoreKey<T>) -> bool {
        self.get_value(namespace, key.action, key.label, key.key)
            .is_some()
    }

    /// Number of entries across all namespaces
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries of one namespace as `(action, label, key)` and value
    pub fn namespace_entries<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = ((&'a str, &'a str, &'a str), &'a Value)> + 'a {
        self.entries
            .iter()
            .filter(move |((ns, _, _, _), _)| ns == namespace)
            .map(|((_, action, label, key), value)| {
                ((action.as_str(), label.as_str(), key.as_str()), value)
            })
    }
}
