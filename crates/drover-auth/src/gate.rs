use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument};

use drover_model::LoginLockStatus;

use crate::AuthError;

/// Serializes login attempts per account and guards one-time-code windows.
///
/// One authentication attempt per account proceeds at a time; acquirers
/// queue FIFO behind the holder (tokio's mutex is fair). The gate also
/// remembers which code window each account last consumed, so a holder can
/// wait out the current window when its code was already spent.
pub struct LoginGate {
    step: Duration,
    margin: Duration,
    accounts: Mutex<HashMap<String, Arc<AccountLock>>>,
}

struct AccountLock {
    gate: Arc<tokio::sync::Mutex<()>>,
    waiting: AtomicUsize,
    meta: Mutex<AccountMeta>,
}

#[derive(Default)]
struct AccountMeta {
    held: bool,
    last_step_used: Option<u64>,
    last_used_at: Option<SystemTime>,
}

impl LoginGate {
    /// `step` is the one-time-code window length; `margin` is the extra
    /// slack slept past a window boundary before trusting a fresh code.
    pub fn new(step: Duration, margin: Duration) -> Result<Self, AuthError> {
        if step.is_zero() {
            return Err(AuthError::ZeroStep);
        }
        Ok(Self {
            step,
            margin,
            accounts: Mutex::new(HashMap::new()),
        })
    }

    /// Window length in whole seconds, for status reporting.
    pub fn step_seconds(&self) -> u64 {
        self.step.as_secs()
    }

    /// Index of the window the current wall-clock time falls into.
    pub fn current_step(&self) -> u64 {
        window_index(epoch_now(), self.step)
    }

    /// Acquire the login lock for `account`, queueing FIFO if held.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, account: &str) -> LoginPermit {
        let lock = self.lock_for(account);
        lock.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = Arc::clone(&lock.gate).lock_owned().await;
        lock.waiting.fetch_sub(1, Ordering::SeqCst);
        lock.meta.lock().unwrap().held = true;
        debug!(account, "login lock acquired");

        LoginPermit {
            account: account.to_string(),
            lock,
            step: self.step,
            margin: self.margin,
            _guard: guard,
        }
    }

    /// Per-account lock views. Read-only; for monitoring.
    pub fn status(&self) -> Vec<LoginLockStatus> {
        let accounts = self.accounts.lock().unwrap();
        let now = SystemTime::now();
        let current_step = self.current_step();
        let mut out: Vec<LoginLockStatus> = accounts
            .iter()
            .map(|(account, lock)| {
                let meta = lock.meta.lock().unwrap();
                LoginLockStatus {
                    account: account.clone(),
                    held: meta.held,
                    waiting: lock.waiting.load(Ordering::SeqCst),
                    current_step,
                    last_step_used: meta.last_step_used,
                    last_used_age_secs: meta.last_used_at.and_then(|at| {
                        now.duration_since(at).ok().map(|d| d.as_secs())
                    }),
                }
            })
            .collect();
        out.sort_by(|a, b| a.account.cmp(&b.account));
        out
    }

    fn lock_for(&self, account: &str) -> Arc<AccountLock> {
        let mut accounts = self.accounts.lock().unwrap();
        Arc::clone(accounts.entry(account.to_string()).or_insert_with(|| {
            Arc::new(AccountLock {
                gate: Arc::new(tokio::sync::Mutex::new(())),
                waiting: AtomicUsize::new(0),
                meta: Mutex::new(AccountMeta::default()),
            })
        }))
    }
}

/// Exclusive permission to attempt a login for one account.
///
/// Released on drop, waking the longest-waiting acquirer.
pub struct LoginPermit {
    account: String,
    lock: Arc<AccountLock>,
    step: Duration,
    margin: Duration,
    _guard: OwnedMutexGuard<()>,
}

impl LoginPermit {
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Index of the window the current wall-clock time falls into.
    pub fn current_step(&self) -> u64 {
        window_index(epoch_now(), self.step)
    }

    /// Block until the current code window was never consumed before.
    ///
    /// Call immediately before reading the one-time code. If the current
    /// window index equals the last one consumed for this account, sleeps
    /// until the window boundary plus the safety margin; bounded by one
    /// window length plus the margin.
    pub async fn wait_for_fresh_window(&self) {
        let now = epoch_now();
        let current = window_index(now, self.step);
        let last_used = self.lock.meta.lock().unwrap().last_step_used;
        if last_used != Some(current) {
            return;
        }

        let boundary_ms = (u128::from(current) + 1) * self.step.as_millis();
        let boundary = Duration::from_millis(boundary_ms as u64).saturating_add(self.margin);
        let wait = boundary.saturating_sub(now);
        debug!(account = %self.account, wait_ms = wait.as_millis() as u64, "waiting for fresh code window");
        tokio::time::sleep(wait).await;
    }

    /// Record the current window as consumed for this account.
    ///
    /// Must be called once the login attempt has read a code, whether or
    /// not the attempt succeeded, so the next holder never reuses it.
    pub fn mark_used(&self) {
        let current = window_index(epoch_now(), self.step);
        let mut meta = self.lock.meta.lock().unwrap();
        meta.last_step_used = Some(current);
        meta.last_used_at = Some(SystemTime::now());
        debug!(account = %self.account, step = current, "code window consumed");
    }
}

impl Drop for LoginPermit {
    fn drop(&mut self) {
        self.lock.meta.lock().unwrap().held = false;
        debug!(account = %self.account, "login lock released");
    }
}

fn epoch_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn window_index(epoch: Duration, step: Duration) -> u64 {
    (epoch.as_millis() / step.as_millis().max(1)) as u64
}
