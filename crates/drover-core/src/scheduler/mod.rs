use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use tracing::{debug, info, instrument, warn};

use drover_model::{
    CapacitySnapshot, EngineStatus, JobId, JobInfo, JobMeta, JobState, LoginLockStatus,
    QueueEstimate, StageRecord, SubmitReceipt,
};

use crate::{
    audit::{AuditSink, JobRecord},
    error::CoreError,
    history::DurationHistory,
    settings::SettingsStore,
};

/// Future returned by a job task body.
pub type JobFuture =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, anyhow::Error>> + Send + 'static>>;

/// Single-shot unit of work run on behalf of a job.
///
/// Invoked once with the job's [`JobContext`] when the job is admitted;
/// the scheduler awaits the returned future on a dedicated task.
pub type JobTask = Box<dyn FnOnce(JobContext) -> JobFuture + Send + 'static>;

struct SchedulerInner {
    /// Live job table, including finished jobs until they are deleted
    /// or archived by an external collaborator.
    jobs: HashMap<JobId, JobInfo>,
    /// Queued job ids in FIFO admission order.
    queue: VecDeque<JobId>,
    /// Task bodies waiting for admission, keyed by job id.
    pending: HashMap<JobId, JobTask>,
    /// Number of jobs currently running.
    running: usize,
}

struct Shared {
    state: Mutex<SchedulerInner>,
    settings: SettingsStore,
    history: DurationHistory,
    audit: Arc<dyn AuditSink>,
}

/// Admission-controlled job scheduler.
///
/// Accepts submissions without blocking, enforces the concurrency cap read
/// from the [`SettingsStore`] on every admission decision, runs admitted
/// task bodies on their own tokio tasks and tracks lifecycle and stage
/// progress in an in-memory table. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(settings: SettingsStore, history: DurationHistory, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerInner {
                    jobs: HashMap::new(),
                    queue: VecDeque::new(),
                    pending: HashMap::new(),
                    running: 0,
                }),
                settings,
                history,
                audit,
            }),
        }
    }

    /// Accept a job for execution.
    ///
    /// Never blocks: when a slot is free and nothing is queued ahead the job
    /// starts synchronously as part of admission, otherwise it joins the
    /// FIFO queue. Must be called from within a tokio runtime.
    #[instrument(level = "debug", skip(self, public_meta, created_by, task), fields(kind = %kind))]
    pub fn submit(
        &self,
        kind: &str,
        public_meta: JobMeta,
        created_by: JobMeta,
        task: JobTask,
    ) -> SubmitReceipt {
        let id = JobId::new();
        let now = SystemTime::now();
        let avg = self.shared.history.average(kind);

        let mut inner = self.shared.state.lock().unwrap();
        let cap = self.shared.settings.max_concurrency();

        inner.jobs.insert(
            id.clone(),
            JobInfo {
                id: id.clone(),
                kind: kind.to_string(),
                public_meta,
                state: JobState::Queued,
                accepted_at: now,
                started_at: None,
                finished_at: None,
                stages: Vec::new(),
                result: None,
                error: None,
                created_by,
            },
        );

        // FIFO: a fresh submission may only jump straight to running when
        // nothing is queued ahead of it.
        let admit_now = inner.queue.is_empty() && inner.running < cap;
        let queue_position = if admit_now { 0 } else { inner.queue.len() + 1 };

        let launch = if admit_now {
            self.mark_running_locked(&mut inner, &id);
            Some(task)
        } else {
            inner.queue.push_back(id.clone());
            inner.pending.insert(id.clone(), task);
            None
        };

        let capacity = CapacitySnapshot::new(cap, inner.running, inner.queue.len());
        drop(inner);

        // The closure runs only after the lock is released: its synchronous
        // prologue may call back into the scheduler.
        if let Some(task) = launch {
            self.launch(id.clone(), task);
        }

        let estimate = project(queue_position, avg, cap);
        info!(job = %id, queue_position, running = capacity.running, "job accepted");

        SubmitReceipt {
            job_id: id,
            accepted_at: now,
            queue_position,
            estimate,
            capacity,
        }
    }

    /// Look up a job by id.
    pub fn get_job(&self, id: &JobId) -> Option<JobInfo> {
        let inner = self.shared.state.lock().unwrap();
        inner.jobs.get(id).cloned()
    }

    /// Remove a job from the live table.
    ///
    /// Deleting a queued job drops its task before it ever runs. Deleting a
    /// running job only removes the record; the task body is not preempted
    /// and its eventual completion is a no-op. Idempotent in the sense that
    /// a missing id reports [`CoreError::JobNotFound`] without touching
    /// anything else.
    pub fn delete_job(&self, id: &JobId) -> Result<(), CoreError> {
        let mut inner = self.shared.state.lock().unwrap();
        if inner.jobs.remove(id).is_none() {
            return Err(CoreError::JobNotFound(id.clone()));
        }
        inner.pending.remove(id);
        inner.queue.retain(|queued| queued != id);
        debug!(job = %id, "job deleted");
        Ok(())
    }

    /// Consistent snapshot of counts for status queries.
    ///
    /// Login-lock views and the code-window length live outside this crate;
    /// the outer layer passes them in and forwards the result 1:1.
    pub fn status(
        &self,
        login_locks: Vec<LoginLockStatus>,
        totp_step_seconds: u64,
    ) -> EngineStatus {
        let inner = self.shared.state.lock().unwrap();
        EngineStatus {
            running: inner.running,
            queued: inner.queue.len(),
            finished: inner
                .jobs
                .values()
                .filter(|job| job.state.is_terminal())
                .count(),
            max_concurrency: self.shared.settings.max_concurrency(),
            login_locks,
            totp_step_seconds,
        }
    }

    /// Capacity view without login-lock detail.
    pub fn capacity(&self) -> CapacitySnapshot {
        let inner = self.shared.state.lock().unwrap();
        CapacitySnapshot::new(
            self.shared.settings.max_concurrency(),
            inner.running,
            inner.queue.len(),
        )
    }

    /// Transition a job to running. Caller holds the state lock.
    fn mark_running_locked(&self, inner: &mut SchedulerInner, id: &JobId) {
        let now = SystemTime::now();
        if let Some(job) = inner.jobs.get_mut(id) {
            job.state = JobState::Running;
            job.started_at = Some(now);
        }
        inner.running += 1;
    }

    /// Invoke the task body for a job already counted as running and
    /// supervise it. Never called under the state lock; the closure may
    /// re-enter the scheduler before returning its future.
    fn launch(&self, id: JobId, task: JobTask) {
        let ctx = JobContext {
            id: id.clone(),
            shared: Arc::clone(&self.shared),
        };
        let scheduler = self.clone();
        let fut = task(ctx);
        tokio::spawn(async move {
            // A second spawn so a panicking task body surfaces as a
            // JoinError instead of tearing down the completion handler.
            let outcome = match tokio::spawn(fut).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) if err.is_panic() => Err("task panicked".to_string()),
                Err(_) => Err("task aborted".to_string()),
            };
            scheduler.complete(id, outcome).await;
        });
    }

    /// Completion bookkeeping plus follow-up admission, under one lock.
    async fn complete(&self, id: JobId, outcome: Result<serde_json::Value, String>) {
        let (record, admitted) = {
            let mut inner = self.shared.state.lock().unwrap();
            inner.running = inner.running.saturating_sub(1);
            let now = SystemTime::now();

            let record = match inner.jobs.get_mut(&id) {
                Some(job) => {
                    job.finished_at = Some(now);
                    match outcome {
                        Ok(value) => {
                            job.state = JobState::Succeeded;
                            job.result = Some(value);
                        }
                        Err(msg) => {
                            job.state = JobState::Failed;
                            if let Some(stage) = job.stages.last_mut() {
                                stage.error = Some(msg.clone());
                            }
                            job.error = Some(msg);
                            warn!(job = %id, "job failed");
                        }
                    }
                    if let Some(stage) = job.stages.last_mut() {
                        stage.close(now);
                    }
                    if let Some(run_ms) = job.run_ms() {
                        self.shared
                            .history
                            .record(&job.kind, Duration::from_millis(run_ms));
                    }
                    Some(JobRecord::from(&*job))
                }
                // Deleted while running: the record is gone, only the slot
                // is returned.
                None => None,
            };

            let admitted = self.pop_admissible_locked(&mut inner);
            (record, admitted)
        };

        for (id, task) in admitted {
            self.launch(id, task);
        }
        if let Some(record) = record {
            self.shared.audit.record(record).await;
        }
    }

    /// Mark queued jobs running while slots are free. Caller holds the
    /// state lock; the returned task bodies are launched after it is
    /// released.
    fn pop_admissible_locked(&self, inner: &mut SchedulerInner) -> Vec<(JobId, JobTask)> {
        let cap = self.shared.settings.max_concurrency();
        let mut admitted = Vec::new();
        while inner.running < cap {
            let Some(id) = inner.queue.pop_front() else {
                break;
            };
            let Some(task) = inner.pending.remove(&id) else {
                continue;
            };
            self.mark_running_locked(inner, &id);
            admitted.push((id, task));
        }
        admitted
    }
}

/// Narrow handle a task body uses to report progress on its own job.
#[derive(Clone)]
pub struct JobContext {
    id: JobId,
    shared: Arc<Shared>,
}

impl JobContext {
    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    /// Open a new progress stage, closing the previous one.
    ///
    /// Additive and infallible: calls against a deleted or already finished
    /// job are silently dropped.
    pub fn set_stage(&self, name: &str, meta: Option<JobMeta>) {
        let now = SystemTime::now();
        let mut inner = self.shared.state.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&self.id)
            && job.state == JobState::Running
        {
            if let Some(prev) = job.stages.last_mut() {
                prev.close(now);
            }
            job.stages.push(StageRecord::open(name, meta, now));
        }
    }
}

/// Advisory start/finish projection from queue position and history.
///
/// Jobs ahead are assumed to run in parallel batches of the cap size.
fn project(queue_position: usize, avg: Duration, cap: usize) -> QueueEstimate {
    let avg_secs = avg.as_secs();
    let start_seconds = (queue_position as u64).saturating_mul(avg_secs) / cap.max(1) as u64;
    QueueEstimate {
        start_seconds,
        finish_seconds: start_seconds + avg_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogSink;
    use drover_model::{SchedulerSettings, SettingsPatch};
    use tokio::sync::oneshot;

    fn logging() {
        let cfg = drover_observe::LogConfig {
            filter: "drover_core=debug".to_string(),
            ..drover_observe::LogConfig::default()
        };
        match drover_observe::init(&cfg) {
            Ok(()) | Err(drover_observe::ObserveError::AlreadyInstalled) => {}
            Err(err) => panic!("logging bootstrap failed: {err}"),
        }
    }

    fn scheduler(cap: usize) -> (Scheduler, SettingsStore) {
        logging();
        let settings = SettingsStore::new(SchedulerSettings {
            max_concurrency: cap,
        });
        let sched = Scheduler::new(
            settings.clone(),
            DurationHistory::default(),
            Arc::new(LogSink),
        );
        (sched, settings)
    }

    fn gated_task(rx: oneshot::Receiver<()>) -> JobTask {
        Box::new(move |_ctx| {
            Box::pin(async move {
                let _ = rx.await;
                Ok(serde_json::json!("done"))
            })
        })
    }

    fn failing_task(msg: &'static str) -> JobTask {
        Box::new(move |_ctx| Box::pin(async move { Err(anyhow::anyhow!(msg)) }))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn admission_respects_cap_and_fifo() {
        let (sched, _) = scheduler(2);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();

        let r1 = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx1));
        let r2 = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx2));
        let r3 = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx3));

        assert_eq!(r1.queue_position, 0);
        assert_eq!(r2.queue_position, 0);
        assert_eq!(r2.capacity.running, 2);
        assert_eq!(r3.queue_position, 1);
        assert_eq!(r3.capacity.slots_available, 0);

        assert_eq!(sched.get_job(&r3.job_id).unwrap().state, JobState::Queued);

        // Finishing the first running job admits the queued one.
        tx1.send(()).unwrap();
        let sched2 = sched.clone();
        let id3 = r3.job_id.clone();
        wait_until(move || sched2.get_job(&id3).unwrap().state == JobState::Running).await;

        let snap = sched.capacity();
        assert_eq!(snap.running, 2);
        assert_eq!(snap.queued, 0);

        tx2.send(()).unwrap();
        tx3.send(()).unwrap();
        let sched2 = sched.clone();
        wait_until(move || sched2.capacity().running == 0).await;

        let status = sched.status(Vec::new(), 30);
        assert_eq!(status.finished, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn running_never_exceeds_cap() {
        let (sched, _) = scheduler(3);
        let mut gates = Vec::new();
        for _ in 0..10 {
            let (tx, rx) = oneshot::channel();
            sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx));
            gates.push(tx);
        }
        assert_eq!(sched.capacity().running, 3);
        assert_eq!(sched.capacity().queued, 7);

        for tx in gates {
            assert!(sched.capacity().running <= 3);
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let sched2 = sched.clone();
        wait_until(move || sched2.capacity().running == 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn task_prologue_may_reenter_the_scheduler() {
        let (sched, _) = scheduler(1);

        // The closure does synchronous scheduler work before returning its
        // future; submit must still return promptly.
        fn reentrant(sched: Scheduler) -> JobTask {
            Box::new(move |ctx| {
                ctx.set_stage("init", None);
                let _ = sched.capacity();
                Box::pin(async move { Ok(serde_json::json!("ok")) })
            })
        }

        let first = sched.submit("demo", JobMeta::new(), JobMeta::new(), reentrant(sched.clone()));
        // Queued behind the first: exercises the admit-on-completion path.
        let second = sched.submit("demo", JobMeta::new(), JobMeta::new(), reentrant(sched.clone()));

        let sched2 = sched.clone();
        let id = second.job_id.clone();
        wait_until(move || sched2.get_job(&id).unwrap().state.is_terminal()).await;

        for receipt in [first, second] {
            let job = sched.get_job(&receipt.job_id).unwrap();
            assert_eq!(job.state, JobState::Succeeded);
            assert_eq!(job.stages[0].name, "init");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_records_error() {
        let (sched, _) = scheduler(1);
        let receipt = sched.submit("demo", JobMeta::new(), JobMeta::new(), failing_task("boom"));

        let sched2 = sched.clone();
        let id = receipt.job_id.clone();
        wait_until(move || sched2.get_job(&id).unwrap().state.is_terminal()).await;

        let job = sched.get_job(&receipt.job_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
        assert!(job.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_marks_job_failed() {
        let (sched, _) = scheduler(1);
        let task: JobTask = Box::new(|_ctx| Box::pin(async move { panic!("kaboom") }));
        let receipt = sched.submit("demo", JobMeta::new(), JobMeta::new(), task);

        let sched2 = sched.clone();
        let id = receipt.job_id.clone();
        wait_until(move || sched2.get_job(&id).unwrap().state.is_terminal()).await;

        let job = sched.get_job(&receipt.job_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("task panicked"));

        // The slot is free again.
        let (tx, rx) = oneshot::channel();
        let next = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx));
        assert_eq!(next.queue_position, 0);
        let _ = tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_unknown_job_reports_not_found() {
        let (sched, _) = scheduler(1);
        let id = JobId::from("no-such-job");
        assert!(matches!(
            sched.delete_job(&id),
            Err(CoreError::JobNotFound(_))
        ));
        // Still not found the second time, nothing else disturbed.
        assert!(sched.delete_job(&id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_running_job_hides_it_but_frees_slot_on_completion() {
        let (sched, _) = scheduler(1);
        let (tx, rx) = oneshot::channel();
        let receipt = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx));

        sched.delete_job(&receipt.job_id).unwrap();
        assert!(sched.get_job(&receipt.job_id).is_none());
        assert_eq!(sched.status(Vec::new(), 30).finished, 0);

        // Completion of the hidden job is a no-op against the table but
        // still admits the next queued job.
        let (tx2, rx2) = oneshot::channel();
        let next = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx2));
        assert_eq!(next.queue_position, 1);

        tx.send(()).unwrap();
        let sched2 = sched.clone();
        let id2 = next.job_id.clone();
        wait_until(move || sched2.get_job(&id2).unwrap().state == JobState::Running).await;
        let _ = tx2.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_queued_job_never_runs() {
        let (sched, _) = scheduler(1);
        let (tx1, rx1) = oneshot::channel();
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx1));

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task: JobTask = Box::new(move |_ctx| {
            Box::pin(async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::json!(null))
            })
        });
        let queued = sched.submit("demo", JobMeta::new(), JobMeta::new(), task);
        sched.delete_job(&queued.job_id).unwrap();

        tx1.send(()).unwrap();
        let sched2 = sched.clone();
        wait_until(move || sched2.capacity().running == 0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stages_are_ordered_and_closed() {
        let (sched, _) = scheduler(1);
        let task: JobTask = Box::new(|ctx| {
            Box::pin(async move {
                ctx.set_stage("login", None);
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.set_stage("fill-form", None);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(serde_json::json!("ok"))
            })
        });
        let receipt = sched.submit("demo", JobMeta::new(), JobMeta::new(), task);

        let sched2 = sched.clone();
        let id = receipt.job_id.clone();
        wait_until(move || sched2.get_job(&id).unwrap().state.is_terminal()).await;

        let job = sched.get_job(&receipt.job_id).unwrap();
        assert_eq!(job.stages.len(), 2);
        assert_eq!(job.stages[0].name, "login");
        assert_eq!(job.stages[1].name, "fill-form");
        assert!(job.stages[0].ended_at.is_some());
        // Final stage is closed by completion.
        assert!(job.stages[1].ended_at.is_some());
        assert!(job.stages[0].started_at <= job.stages[1].started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_cap_applies_on_next_admission_decision() {
        let (sched, settings) = scheduler(1);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx1));
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx2));
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx3));
        assert_eq!(sched.capacity().running, 1);

        settings
            .patch(SettingsPatch {
                max_concurrency: Some(3),
            })
            .unwrap();

        // Next decision point: a completion admits everything eligible.
        tx1.send(()).unwrap();
        let sched2 = sched.clone();
        wait_until(move || sched2.capacity().running == 2).await;
        assert_eq!(sched.capacity().queued, 0);

        let _ = tx2.send(());
        let _ = tx3.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn estimate_uses_recorded_history() {
        let settings = SettingsStore::new(SchedulerSettings { max_concurrency: 2 });
        let history = DurationHistory::new(5, Duration::from_secs(60));
        history.record("demo", Duration::from_secs(100));
        let sched = Scheduler::new(settings, history, Arc::new(LogSink));

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx1));
        sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx2));
        let r3 = sched.submit("demo", JobMeta::new(), JobMeta::new(), gated_task(rx3));

        // position 1, avg 100s, cap 2 -> starts in 50s, finishes in 150s.
        assert_eq!(r3.estimate.start_seconds, 50);
        assert_eq!(r3.estimate.finish_seconds, 150);

        let _ = tx1.send(());
        let _ = tx2.send(());
        let _ = tx3.send(());
    }
}
