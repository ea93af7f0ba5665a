//! Named workloads and the registry the CLI looks them up in.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{ConfigError, ConfigResult};

/// A workload definition that can be looked up by name.
///
/// `config` builds a fresh [`Config`] on every call, so derived workloads can
/// call their base's `config` and compose on top of it.
pub trait Workload<T>: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn config(&self) -> ConfigResult<Config<T>>;
}

/// Workloads keyed by name, listed in name order.
pub struct WorkloadRegistry<T> {
    workloads: BTreeMap<String, Box<dyn Workload<T>>>,
}

impl<T> Default for WorkloadRegistry<T> {
    fn default() -> Self {
        Self {
            workloads: BTreeMap::new(),
        }
    }
}

impl<T> WorkloadRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workload: impl Workload<T> + 'static) -> ConfigResult<()> {
        let name = workload.name().to_string();
        if self.workloads.contains_key(&name) {
            return Err(ConfigError::DuplicateWorkload { name });
        }
        self.workloads.insert(name, Box::new(workload));
        Ok(())
    }

    pub fn get(&self, name: &str) -> ConfigResult<&dyn Workload<T>> {
        self.workloads
            .get(name)
            .map(|w| w.as_ref())
            .ok_or_else(|| ConfigError::UnknownWorkload {
                name: name.to_string(),
            })
    }

    /// Build the config of the named workload.
    pub fn config(&self, name: &str) -> ConfigResult<Config<T>> {
        self.get(name)?.config()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Workload<T>> {
        self.workloads.values().map(|w| w.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workloads.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentContext;
    use crate::config::{HandlerResult, Step};
    use futures::future::BoxFuture;

    fn noop<'a>(_: &'a (), _: &'a mut AgentContext) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async { Ok(Step::Continue) })
    }

    struct Idle;

    impl Workload<()> for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        fn description(&self) -> &str {
            "does nothing, forever"
        }

        fn config(&self) -> ConfigResult<Config<()>> {
            let mut draft = Config::<()>::builder("idle");
            draft.iterations(3).state("init", noop).transition("init", "init", 1.0);
            draft.build()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = WorkloadRegistry::new();
        registry.register(Idle).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("idle").unwrap().description(), "does nothing, forever");
        assert_eq!(registry.config("idle").unwrap().iterations(), 3);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["idle"]);
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        let mut registry = WorkloadRegistry::new();
        registry.register(Idle).unwrap();
        assert!(matches!(
            registry.register(Idle),
            Err(ConfigError::DuplicateWorkload { .. })
        ));
        assert!(matches!(
            registry.get("busy"),
            Err(ConfigError::UnknownWorkload { .. })
        ));
    }
}
