use std::sync::{Arc, RwLock};

use drover_model::{SchedulerSettings, SettingsPatch};
use tracing::info;

use crate::error::CoreError;

/// Process-wide scheduler settings, mutable at runtime.
///
/// The scheduler reads the cap on every admission decision; writes are
/// validated and atomic with respect to those reads. Constructor-injected
/// so tests can run isolated instances.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<SchedulerSettings>>,
}

impl SettingsStore {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Current concurrency cap.
    pub fn max_concurrency(&self) -> usize {
        self.inner.read().unwrap().max_concurrency
    }

    /// Current settings snapshot.
    pub fn get(&self) -> SchedulerSettings {
        *self.inner.read().unwrap()
    }

    /// Apply a validated partial update.
    ///
    /// Returns `Ok(true)` when a value actually changed. An invalid patch
    /// is rejected without mutating anything.
    pub fn patch(&self, patch: SettingsPatch) -> Result<bool, CoreError> {
        patch
            .validate()
            .map_err(|msg| CoreError::InvalidSettings(msg.to_string()))?;

        let mut settings = self.inner.write().unwrap();
        if !patch.changes(&settings) {
            return Ok(false);
        }
        patch.apply(&mut settings);
        info!(max_concurrency = settings.max_concurrency, "settings updated");
        Ok(true)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}
