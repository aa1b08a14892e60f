use serde::{Deserialize, Serialize};

/// Runtime-mutable scheduler configuration.
///
/// Read on every admission decision; changes apply to the next decision,
/// never to jobs already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Maximum number of concurrently running jobs. Always >= 1.
    pub max_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { max_concurrency: 2 }
    }
}

/// Partial update to [`SchedulerSettings`].
///
/// Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl SettingsPatch {
    /// Returns the offending field name if the patch is invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(cap) = self.max_concurrency
            && cap < 1
        {
            return Err("maxConcurrency must be >= 1");
        }
        Ok(())
    }

    /// Returns `true` if applying the patch to `current` would change it.
    pub fn changes(&self, current: &SchedulerSettings) -> bool {
        self.max_concurrency
            .is_some_and(|cap| cap != current.max_concurrency)
    }

    /// Apply the patch in place. Caller validates first.
    pub fn apply(&self, settings: &mut SchedulerSettings) {
        if let Some(cap) = self.max_concurrency {
            settings.max_concurrency = cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_rejected() {
        let patch = SettingsPatch {
            max_concurrency: Some(0),
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn empty_patch_is_valid_and_changes_nothing() {
        let patch = SettingsPatch::default();
        assert!(patch.validate().is_ok());
        assert!(!patch.changes(&SchedulerSettings::default()));
    }

    #[test]
    fn apply_overwrites_cap() {
        let mut settings = SchedulerSettings::default();
        let patch = SettingsPatch {
            max_concurrency: Some(8),
        };
        assert!(patch.changes(&settings));
        patch.apply(&mut settings);
        assert_eq!(settings.max_concurrency, 8);
    }
}
