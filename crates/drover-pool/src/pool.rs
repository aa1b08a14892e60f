use std::{
    collections::VecDeque,
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{ArtifactStore, FilterPolicy, PageHandle, PoolError, Session, SessionBackend};

/// Static pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Account identity used to key persisted session artifacts.
    pub account: String,
    /// Maximum live pages (busy + idle) drawn from the shared session.
    pub pool_size: usize,
    /// Maximum pages parked idle; releases beyond this close the page.
    pub max_idle: usize,
    /// How long the session survives with zero busy pages. Zero tears it
    /// down synchronously on the last release.
    pub idle_keepalive: Duration,
    /// Resource filtering applied to every page of the session.
    pub policy: FilterPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            pool_size: 4,
            max_idle: 2,
            idle_keepalive: Duration::from_secs(60),
            policy: FilterPolicy::default(),
        }
    }
}

/// A page borrowed from the pool.
///
/// Exclusively owned by the borrower; must be returned with
/// [`PagePool::release`] (or [`PagePool::discard`] after a crash) for the
/// slot to be reused.
pub struct PooledPage {
    handle: Box<dyn PageHandle>,
    epoch: u64,
}

impl PooledPage {
    pub fn page(&self) -> &dyn PageHandle {
        self.handle.as_ref()
    }

    pub fn page_mut(&mut self) -> &mut dyn PageHandle {
        self.handle.as_mut()
    }
}

/// Counts exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub busy: usize,
    pub idle: usize,
    pub waiting: usize,
    pub session_active: bool,
}

enum SessionSlot {
    Absent,
    /// First requester is opening the session; the rest wait here.
    Opening(Vec<oneshot::Sender<Result<(), PoolError>>>),
    Ready(Arc<dyn Session>),
}

type Waiter = oneshot::Sender<Result<PooledPage, PoolError>>;

struct PoolInner {
    session: SessionSlot,
    busy: usize,
    idle: Vec<Box<dyn PageHandle>>,
    waiters: VecDeque<Waiter>,
    /// Bumped on every teardown; pages carrying an older epoch belong to a
    /// dead session and are closed on return instead of reused.
    epoch: u64,
    teardown_deadline: Option<Instant>,
}

enum Due {
    Now,
    At(Instant),
    No,
}

struct PoolShared {
    cfg: PoolConfig,
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn ArtifactStore>,
    inner: Mutex<PoolInner>,
}

/// Multiplexes a bounded set of reusable pages over one shared session.
///
/// Pages are created lazily up to `pool_size`; under contention callers
/// queue FIFO and a released page is handed directly to the longest
/// waiter. The session itself is created on first demand (hydrated from
/// persisted artifacts when fresh) and torn down after an idle period,
/// persisting its artifacts first. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PagePool {
    shared: Arc<PoolShared>,
}

impl PagePool {
    pub fn new(
        cfg: PoolConfig,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                cfg,
                backend,
                store,
                inner: Mutex::new(PoolInner {
                    session: SessionSlot::Absent,
                    busy: 0,
                    idle: Vec::new(),
                    waiters: VecDeque::new(),
                    epoch: 0,
                    teardown_deadline: None,
                }),
            }),
        }
    }

    /// Borrow a page, suspending until one is available.
    ///
    /// Creates the shared session on first demand. A session-creation
    /// failure is returned to every caller waiting on that attempt; the
    /// pool does not retry on its own.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self) -> Result<PooledPage, PoolError> {
        loop {
            let step = {
                let mut inner = self.shared.inner.lock().unwrap();
                if let SessionSlot::Ready(session) = &inner.session {
                    let session = Arc::clone(session);
                    if let Some(handle) = inner.idle.pop() {
                        inner.busy += 1;
                        inner.teardown_deadline = None;
                        Step::Acquired(PooledPage {
                            handle,
                            epoch: inner.epoch,
                        })
                    } else if inner.busy + inner.idle.len() < self.shared.cfg.pool_size {
                        inner.busy += 1;
                        inner.teardown_deadline = None;
                        let (tx, rx) = oneshot::channel();
                        let pool = self.clone();
                        let epoch = inner.epoch;
                        // Detached: the slot accounting must resolve even
                        // if this caller gives up mid-create.
                        tokio::spawn(async move {
                            pool.create_page(session, epoch, tx).await;
                        });
                        Step::WaitPage(rx)
                    } else {
                        let (tx, rx) = oneshot::channel();
                        inner.waiters.push_back(tx);
                        debug!(waiting = inner.waiters.len(), "pool full, queued");
                        Step::WaitPage(rx)
                    }
                } else if let SessionSlot::Opening(pending) = &mut inner.session {
                    let (tx, rx) = oneshot::channel();
                    pending.push(tx);
                    Step::WaitSession(rx)
                } else {
                    let (tx, rx) = oneshot::channel();
                    inner.session = SessionSlot::Opening(vec![tx]);
                    let pool = self.clone();
                    // Detached for the same reason: the Opening slot must
                    // resolve whatever happens to this caller.
                    tokio::spawn(async move { pool.open_session().await });
                    Step::WaitSession(rx)
                }
            };

            match step {
                Step::Acquired(page) => return Ok(page),
                Step::WaitSession(rx) => match rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(_) => return Err(PoolError::Terminated),
                },
                Step::WaitPage(rx) => {
                    return match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(PoolError::Terminated),
                    };
                }
            }
        }
    }

    /// Return a page to the pool.
    ///
    /// Hands it to the longest waiter if any, parks it idle below the idle
    /// cap, closes it otherwise. Releasing the last busy page arms the
    /// idle teardown timer, or tears the session down before returning
    /// when the keep-alive is zero.
    pub async fn release(&self, page: PooledPage) {
        let PooledPage { handle, epoch } = page;
        let (leftover, due) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if epoch != inner.epoch {
                // Page from a torn-down session; nothing to account.
                (Some(handle), Due::No)
            } else {
                inner.busy = inner.busy.saturating_sub(1);
                match hand_off_locked(&mut inner, handle, epoch) {
                    None => (None, Due::No),
                    Some(handle) => {
                        let leftover = if inner.idle.len() < self.shared.cfg.max_idle {
                            inner.idle.push(handle);
                            None
                        } else {
                            Some(handle)
                        };
                        let due = self.idle_due_locked(&mut inner);
                        (leftover, due)
                    }
                }
            }
        };

        if let Some(handle) = leftover {
            handle.close().await;
        }
        self.run_due(due).await;
    }

    /// Drop a crashed page.
    ///
    /// The page is detached from the accounting and never reaches a
    /// waiter; its freed slot lets the longest waiter create a fresh page
    /// instead.
    pub async fn discard(&self, page: PooledPage) {
        let PooledPage { handle, epoch } = page;
        let (refill, due) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if epoch != inner.epoch {
                (None, Due::No)
            } else {
                inner.busy = inner.busy.saturating_sub(1);
                let refill = if !inner.waiters.is_empty()
                    && inner.busy + inner.idle.len() < self.shared.cfg.pool_size
                    && let SessionSlot::Ready(session) = &inner.session
                {
                    let session = Arc::clone(session);
                    inner.busy += 1;
                    inner
                        .waiters
                        .pop_front()
                        .map(|tx| (tx, session, inner.epoch))
                } else {
                    None
                };
                let due = if refill.is_none() {
                    self.idle_due_locked(&mut inner)
                } else {
                    Due::No
                };
                (refill, due)
            }
        };

        handle.close().await;

        if let Some((tx, session, epoch)) = refill {
            let pool = self.clone();
            tokio::spawn(async move { pool.create_page(session, epoch, tx).await });
        }
        self.run_due(due).await;
    }

    /// Current counts.
    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock().unwrap();
        PoolStats {
            busy: inner.busy,
            idle: inner.idle.len(),
            waiting: inner.waiters.len(),
            session_active: matches!(inner.session, SessionSlot::Ready(_)),
        }
    }

    /// Create a page against an already-busy slot and deliver it to `tx`.
    ///
    /// Runs detached from the requester: if the receiver is gone by the
    /// time the page exists, the page is released back instead of leaking
    /// the slot.
    async fn create_page(&self, session: Arc<dyn Session>, epoch: u64, tx: Waiter) {
        match session.new_page().await {
            Ok(handle) => {
                let page = PooledPage { handle, epoch };
                if let Err(Ok(page)) = tx.send(Ok(page)) {
                    self.release(page).await;
                }
            }
            Err(err) => {
                let due = {
                    let mut inner = self.shared.inner.lock().unwrap();
                    inner.busy = inner.busy.saturating_sub(1);
                    self.idle_due_locked(&mut inner)
                };
                self.run_due(due).await;
                let _ = tx.send(Err(err));
            }
        }
    }

    /// Resolve a pending session-open and notify everyone waiting on it.
    ///
    /// Runs detached from the requester that started the open, so the
    /// `Opening` slot always resolves.
    async fn open_session(&self) {
        let account = self.shared.cfg.account.as_str();
        let artifacts = match self.shared.store.load(account).await {
            Ok(artifacts) => artifacts,
            Err(err) => {
                warn!(%err, "artifact load failed, opening cold");
                None
            }
        };
        let hydrated = artifacts.is_some();
        let result = self
            .shared
            .backend
            .open(artifacts, &self.shared.cfg.policy)
            .await;

        let (pending, outcome) = {
            let mut inner = self.shared.inner.lock().unwrap();
            let pending = match mem::replace(&mut inner.session, SessionSlot::Absent) {
                SessionSlot::Opening(pending) => pending,
                other => {
                    inner.session = other;
                    Vec::new()
                }
            };
            let outcome = match result {
                Ok(session) => {
                    inner.session = SessionSlot::Ready(session);
                    info!(hydrated, "shared session ready");
                    Ok(())
                }
                Err(err) => Err(err),
            };
            (pending, outcome)
        };

        for tx in pending {
            let _ = tx.send(outcome.clone());
        }
    }

    /// Decide teardown scheduling after a page returned. Caller holds the
    /// state lock.
    fn idle_due_locked(&self, inner: &mut PoolInner) -> Due {
        if inner.busy > 0 || !matches!(inner.session, SessionSlot::Ready(_)) {
            return Due::No;
        }
        if self.shared.cfg.idle_keepalive.is_zero() {
            return Due::Now;
        }
        let deadline = Instant::now() + self.shared.cfg.idle_keepalive;
        inner.teardown_deadline = Some(deadline);
        Due::At(deadline)
    }

    async fn run_due(&self, due: Due) {
        match due {
            Due::Now => self.teardown_now().await,
            Due::At(deadline) => self.spawn_teardown_timer(deadline),
            Due::No => {}
        }
    }

    fn spawn_teardown_timer(&self, deadline: Instant) {
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let inner = pool.shared.inner.lock().unwrap();
                inner.busy == 0 && inner.teardown_deadline == Some(deadline)
            };
            if due {
                pool.teardown_now().await;
            }
        });
    }

    /// Persist artifacts, close everything, discard the session.
    ///
    /// The next `get()` transparently opens a fresh session.
    #[instrument(level = "debug", skip(self))]
    async fn teardown_now(&self) {
        let (session, handles) = {
            let mut inner = self.shared.inner.lock().unwrap();
            let session = match mem::replace(&mut inner.session, SessionSlot::Absent) {
                SessionSlot::Ready(session) => session,
                other => {
                    inner.session = other;
                    return;
                }
            };
            inner.epoch += 1;
            inner.teardown_deadline = None;
            // Busy pages from the old epoch close themselves on return.
            inner.busy = 0;
            (session, mem::take(&mut inner.idle))
        };

        match session.export_artifacts().await {
            Ok(artifacts) => {
                if let Err(err) = self
                    .shared
                    .store
                    .save(&self.shared.cfg.account, &artifacts)
                    .await
                {
                    warn!(%err, "failed to persist session artifacts");
                }
            }
            Err(err) => warn!(%err, "failed to export session artifacts"),
        }

        for handle in handles {
            handle.close().await;
        }
        session.close().await;
        info!("shared session torn down");
    }
}

enum Step {
    Acquired(PooledPage),
    WaitSession(oneshot::Receiver<Result<(), PoolError>>),
    WaitPage(oneshot::Receiver<Result<PooledPage, PoolError>>),
}

/// Hand a released page to the longest waiter still listening.
///
/// Returns the page back when no waiter takes it.
fn hand_off_locked(
    inner: &mut PoolInner,
    mut handle: Box<dyn PageHandle>,
    epoch: u64,
) -> Option<Box<dyn PageHandle>> {
    while let Some(tx) = inner.waiters.pop_front() {
        match tx.send(Ok(PooledPage { handle, epoch })) {
            Ok(()) => {
                // Ownership transferred; the page stays busy.
                inner.busy += 1;
                return None;
            }
            Err(rejected) => {
                let Ok(page) = rejected else { return None };
                handle = page.handle;
            }
        }
    }
    Some(handle)
}
