//! Layered workload composition.
//!
//! [`compose`] derives a new workload from a base by running an override
//! against a draft seeded with the base's fields. The override edits states,
//! transitions and seed data entry by entry, so anything it does not touch is
//! inherited. It also sees the base read-only, which is how a derived state
//! wraps and calls through to the base handler:
//!
//! ```ignore
//! let derived = compose(&base, |draft, base| {
//!     let inner = base.handler("update")?;
//!     draft.state("update", move |db, agent| {
//!         let inner = inner.clone();
//!         Box::pin(async move {
//!             inner.call(db, agent).await?;
//!             agent.data_mut().bump("updates", 1);
//!             Ok(Step::Continue)
//!         })
//!     });
//!     Ok(())
//! })?;
//! ```

use crate::config::{Config, ConfigDraft};
use crate::error::{ConfigError, ConfigResult};

/// Derive a workload from `base`. `base` is never modified.
///
/// Errors returned by the override propagate unchanged. A derived config that
/// breaks an invariant fails with [`ConfigError::Composition`].
pub fn compose<T, F>(base: &Config<T>, overlay: F) -> ConfigResult<Config<T>>
where
    F: FnOnce(&mut ConfigDraft<T>, &Config<T>) -> ConfigResult<()>,
{
    let mut draft = ConfigDraft::from_config(base);
    overlay(&mut draft, base)?;
    draft
        .build()
        .map_err(|err| ConfigError::Composition(Box::new(err)))
}

/// The override that changes nothing.
pub fn identity<T>(_draft: &mut ConfigDraft<T>, _base: &Config<T>) -> ConfigResult<()> {
    Ok(())
}
