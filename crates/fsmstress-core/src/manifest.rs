//! Declarative workload overrides loaded from TOML.
//!
//! Handlers are code, so a manifest cannot define new behaviour; it can only
//! retune a code-defined workload: counts, start state, transition weights
//! and seed data. It is applied as one more composition layer. Keys the
//! manifest does not recognise are ignored, so workload-specific bookkeeping
//! can live alongside.
//!
//! ```toml
//! name = "counter_hot_keys"
//! concurrency = 16
//!
//! [transitions.init]
//! increment = 0.9
//! read = 0.1
//!
//! [data]
//! keys = 2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compose::compose;
use crate::config::{Config, ConfigDraft};
use crate::error::ConfigResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadManifest {
    pub name: Option<String>,
    pub concurrency: Option<usize>,
    pub iterations: Option<u64>,
    pub start_state: Option<String>,
    /// Per source state, per target weights. Merged edge by edge.
    pub transitions: BTreeMap<String, BTreeMap<String, f64>>,
    pub data: BTreeMap<String, Value>,
}

impl WorkloadManifest {
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Write every field the manifest sets into `draft`.
    pub fn apply<T>(&self, draft: &mut ConfigDraft<T>) {
        if let Some(name) = &self.name {
            draft.name(name.clone());
        }
        if let Some(concurrency) = self.concurrency {
            draft.concurrency(concurrency);
        }
        if let Some(iterations) = self.iterations {
            draft.iterations(iterations);
        }
        if let Some(start) = &self.start_state {
            draft.start_state(start.clone());
        }
        for (from, edges) in &self.transitions {
            draft.transitions(from.clone(), edges.iter().map(|(to, w)| (to.clone(), *w)));
        }
        for (key, value) in &self.data {
            draft.data(key.clone(), value.clone());
        }
    }

    /// Derive a workload from `base` with this manifest layered on top.
    pub fn layer_onto<T>(&self, base: &Config<T>) -> ConfigResult<Config<T>> {
        compose(base, |draft, _| {
            self.apply(draft);
            Ok(())
        })
    }
}
