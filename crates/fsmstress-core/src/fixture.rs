//! Shared fixture handed from global setup to every agent and to teardown.
//!
//! Setup receives the fixture mutably while nothing else can see it. The runner
//! then freezes it behind an `Arc`; agents and teardown only get `&SharedFixture`.
//! Anything agents need to mutate together must be a primitive stored here by
//! setup (an atomic, a handle into the target system), so the engine itself
//! never hands out a lock.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Named values plus typed capabilities produced by global setup.
#[derive(Default)]
pub struct SharedFixture {
    values: BTreeMap<String, Value>,
    capabilities: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl SharedFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a named value, replacing any earlier one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Record a named value from any serializable type.
    pub fn set_serialized<S: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &S,
    ) -> serde_json::Result<()> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Decode a named value into `D`. `None` when the key is absent.
    pub fn get_as<D: DeserializeOwned>(&self, key: &str) -> Option<serde_json::Result<D>> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
    }

    /// Store a typed capability. One slot per type; a second insert replaces the first.
    pub fn insert<C: Any + Send + Sync>(&mut self, capability: C) {
        self.capabilities
            .insert(TypeId::of::<C>(), Box::new(capability));
    }

    pub fn capability<C: Any + Send + Sync>(&self) -> Option<&C> {
        self.capabilities
            .get(&TypeId::of::<C>())
            .and_then(|c| c.downcast_ref::<C>())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.capabilities.is_empty()
    }
}

impl fmt::Debug for SharedFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFixture")
            .field("values", &self.values)
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_named_values_round_trip() {
        let mut fixture = SharedFixture::new();
        fixture.set("collection", "fsm_counter");
        fixture.set("docs", 12);

        assert_eq!(fixture.get("collection"), Some(&Value::from("fsm_counter")));
        let docs: u64 = fixture.get_as("docs").unwrap().unwrap();
        assert_eq!(docs, 12);
        assert!(fixture.get_as::<u64>("absent").is_none());
    }

    #[test]
    fn test_capability_lookup_by_type() {
        let mut fixture = SharedFixture::new();
        fixture.insert(AtomicU64::new(5));

        let counter = fixture.capability::<AtomicU64>().unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
        assert_eq!(counter.load(Ordering::SeqCst), 6);
        assert!(fixture.capability::<String>().is_none());
    }

    #[test]
    fn test_new_fixture_is_empty() {
        let fixture = SharedFixture::new();
        assert!(fixture.is_empty());
        assert_eq!(fixture.keys().count(), 0);
    }
}
