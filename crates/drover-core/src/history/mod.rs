use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
    time::Duration,
};

/// Rolling mean of completed run durations, kept per job kind.
///
/// Feeds the advisory queue-wait estimates only; never consulted for an
/// admission decision.
#[derive(Clone)]
pub struct DurationHistory {
    inner: Arc<RwLock<HashMap<String, VecDeque<Duration>>>>,
    window: usize,
    fallback: Duration,
}

impl DurationHistory {
    pub fn new(window: usize, fallback: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            window: window.max(1),
            fallback,
        }
    }

    /// Record one completed run for `kind`, evicting beyond the window.
    pub fn record(&self, kind: &str, duration: Duration) {
        let mut inner = self.inner.write().unwrap();
        let samples = inner.entry(kind.to_string()).or_default();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(duration);
    }

    /// Mean run duration for `kind`, or the global fallback without history.
    pub fn average(&self, kind: &str) -> Duration {
        let inner = self.inner.read().unwrap();
        match inner.get(kind) {
            Some(samples) if !samples.is_empty() => {
                let total: Duration = samples.iter().sum();
                total / samples.len() as u32
            }
            _ => self.fallback,
        }
    }
}

impl Default for DurationHistory {
    fn default() -> Self {
        // 20 completions of history, one minute when a kind has none yet.
        Self::new(20, Duration::from_secs(60))
    }
}
