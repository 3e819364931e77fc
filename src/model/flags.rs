//! Boolean feature flags the host defines and the overlay lets users flip.
//!
//! Overrides live in the preference store under [`FEATURE_FLAGS_NAMESPACE`],
//! so they can be edited like any other preference and survive as long as
//! the store does.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use crate::common::prefs::{PreferenceStore, PreferenceStoreExt};

pub const FEATURE_FLAGS_NAMESPACE: &str = "feature_flags";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlag {
    pub key: String,
    pub default: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no feature flag named `{0}`")]
pub struct UnknownFlag(pub String);

pub struct FeatureFlags {
    prefs: Arc<dyn PreferenceStore>,
    defined: RwLock<Vec<FeatureFlag>>,
}

impl FeatureFlags {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self { Self { prefs, defined: RwLock::default() } }

    /// Returns false if `key` was already defined; the first definition wins.
    pub fn define(&self, key: &str, default: bool, description: Option<&str>) -> bool {
        let mut defined = self.defined.write();
        if defined.iter().any(|flag| flag.key == key) {
            debug!(key, "feature flag already defined");
            return false;
        }
        defined.push(FeatureFlag {
            key: key.to_owned(),
            default,
            description: description.map(str::to_owned),
        });
        true
    }

    fn definition(&self, key: &str) -> Option<FeatureFlag> {
        self.defined.read().iter().find(|flag| flag.key == key).cloned()
    }

    /// Undefined flags are off.
    pub fn is_enabled(&self, key: &str) -> bool {
        match self.definition(key) {
            Some(flag) => self.prefs.get(FEATURE_FLAGS_NAMESPACE, key, flag.default),
            None => {
                trace!(key, "reading an undefined feature flag");
                false
            }
        }
    }

    pub fn set(&self, key: &str, enabled: bool) -> Result<(), UnknownFlag> {
        self.definition(key).ok_or_else(|| UnknownFlag(key.to_owned()))?;
        self.prefs.put(FEATURE_FLAGS_NAMESPACE, key, enabled);
        Ok(())
    }

    /// Returns the new value.
    pub fn toggle(&self, key: &str) -> Result<bool, UnknownFlag> {
        let enabled = !self.is_enabled(key);
        self.set(key, enabled)?;
        Ok(enabled)
    }

    /// Drops the stored override so the default applies again.
    pub fn reset(&self, key: &str) { self.prefs.remove(FEATURE_FLAGS_NAMESPACE, key); }

    /// Definition-ordered flags with their current values.
    pub fn flags(&self) -> Vec<(FeatureFlag, bool)> {
        let defined = self.defined.read().clone();
        defined
            .into_iter()
            .map(|flag| {
                let enabled = self.prefs.get(FEATURE_FLAGS_NAMESPACE, &flag.key, flag.default);
                (flag, enabled)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool { self.defined.read().is_empty() }
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureFlags").field("defined", &self.defined.read().len()).finish()
    }
}
