//! The lifecycle manager: the registry of live jobs and the coordination of
//! cron ticks, one-shot timers, and manual triggers against the store.
//!
//! All runtime maps live behind a single reader/writer lock. Executions
//! post their outcomes to a buffered results channel consumed by one
//! processor task; a full channel drops the result rather than ever
//! blocking an execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{Broker, JOB_UPDATE_TOPIC};
use crate::errors::{Error, Result};
use crate::jobs::{FnJob, Job, JobConfig, WorkFn};
use crate::models::{JobDef, JobResult, JobRun, JobStatus, ManagerConfig, SchedType};
use crate::schedule::cron::{next_occurrence, CronDriver, EntryId};
use crate::schedule::parse::parse_schedule;
use crate::schedule::timer::{run_at, ScheduledTimer};
use crate::storage::{JobStore, SqliteJobStore};

/// Cron registration state for a periodic job. A paused job keeps a
/// placeholder so "was scheduled, is paused" is distinct from "never
/// scheduled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronSlot {
    Active(EntryId),
    PausedPlaceholder,
}

#[derive(Default)]
struct ManagerState {
    jobs: HashMap<String, Arc<dyn Job>>,
    cron_slots: HashMap<String, CronSlot>,
    running_jobs: HashMap<String, CancellationToken>,
    timers: HashMap<String, ScheduledTimer>,
    shutdown: bool,
}

/// Count of in-flight executions, awaitable at zero.
struct RunningCount {
    count: AtomicUsize,
    zero: Notify,
}

impl RunningCount {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            zero: Notify::new(),
        }
    }

    fn add_one(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }

    async fn wait_zero(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let notified = self.zero.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count.load(Ordering::SeqCst) == 0;
            }
        }
    }
}

/// Shared pieces reachable from executions, timers, and cron callbacks.
struct ManagerCore {
    store: Arc<dyn JobStore>,
    broker: Arc<Broker>,
    state: RwLock<ManagerState>,
    running: RunningCount,
    /// Taken (and thereby closed) during shutdown.
    results_tx: StdMutex<Option<mpsc::Sender<JobResult>>>,
    jobs_updated_tx: mpsc::Sender<()>,
}

impl ManagerCore {
    fn spawn_execution(self: &Arc<Self>, id: &str) {
        let core = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            core.execute_job(&id).await;
        });
    }

    async fn execute_job(&self, id: &str) {
        let (job, token) = {
            let mut st = self.state.write().await;
            if st.shutdown {
                return;
            }
            let Some(job) = st.jobs.get(id).cloned() else {
                tracing::warn!(job_id = %id, "job not found for execution");
                return;
            };
            let token = CancellationToken::new();
            st.running_jobs.insert(id.to_string(), token.clone());
            self.running.add_one();
            (job, token)
        };

        let start_time = Utc::now();
        let outcome = job.run(token).await;
        let end_time = Utc::now();

        let mut result = JobResult {
            result_id: 0,
            job_id: id.to_string(),
            start_time,
            end_time,
            duration: end_time - start_time,
            status: JobStatus::Complete,
            success_msg: String::new(),
            error_msg: String::new(),
        };
        match outcome {
            Ok(stats) => result.success_msg = stats.success_msg,
            Err(e) => {
                result.status = JobStatus::Failed;
                result.error_msg = e.to_string();
            }
        }

        let send_outcome = {
            let guard = self.results_tx.lock().expect("results sender lock poisoned");
            match guard.as_ref() {
                Some(tx) => tx.try_send(result),
                None => Err(TrySendError::Closed(result)),
            }
        };
        if let Err(err) = send_outcome {
            match err {
                TrySendError::Full(_) => {
                    tracing::warn!(job_id = %id, "results channel full, dropping result");
                }
                TrySendError::Closed(_) => {
                    tracing::warn!(job_id = %id, "results channel closed, dropping result");
                }
            }
            // The processor would normally do both of these
            self.state.write().await.running_jobs.remove(id);
            self.running.done();
        }
    }

    /// Best-effort change signal: the capacity-1 channel coalesces bursts,
    /// and the broker fan-out never blocks.
    fn notify_updated(&self) {
        let _ = self.jobs_updated_tx.try_send(());
        self.broker.publish(JOB_UPDATE_TOPIC, "updated");
    }
}

async fn process_results(core: Arc<ManagerCore>, mut rx: mpsc::Receiver<JobResult>) {
    while let Some(result) = rx.recv().await {
        let job_id = result.job_id.clone();
        let status = result.status;

        if let Err(e) = core.store.record_job_result(&result).await {
            tracing::error!(job_id = %job_id, "failed to record job result: {}", e);
        }

        if matches!(status, JobStatus::Complete | JobStatus::Failed) {
            match core.store.get_job(&job_id).await {
                Ok(def) => {
                    // Periodic jobs stay Running in the store; their cron
                    // registration is what keeps them live. Only one-time
                    // jobs settle into a terminal status here.
                    if def.sched_type == SchedType::OneTime {
                        if let Err(e) = core.store.update_job_status(&job_id, status).await {
                            tracing::error!(job_id = %job_id, "failed to update job status: {}", e);
                        }
                    }
                    core.notify_updated();
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, "failed to load job for result: {}", e);
                }
            }
        }

        core.state.write().await.running_jobs.remove(&job_id);
        core.running.done();
    }
}

async fn cleanup_loop(core: std::sync::Weak<ManagerCore>, interval: Duration, retention: Duration) {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(7));
    let mut ticker = tokio::time::interval(interval);
    loop {
        // The first tick completes immediately, so cleanup also runs on
        // startup.
        ticker.tick().await;
        let Some(core) = core.upgrade() else { break };
        if core.state.read().await.shutdown {
            break;
        }
        if let Err(e) = core.store.cleanup_job_results(retention).await {
            tracing::error!("job results cleanup failed: {}", e);
        }
    }
}

/// The job-scheduling engine.
///
/// Owns the runtime registry, the cron and timer drivers, the results
/// pipeline, and the store. Cheap reads go through the store; everything
/// that mutates runtime state goes through the operations here.
pub struct JobManager {
    core: Arc<ManagerCore>,
    cron: Arc<CronDriver>,
    config: ManagerConfig,
    updates_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    processor: StdMutex<Option<JoinHandle<()>>>,
    cleanup: StdMutex<Option<JoinHandle<()>>>,
    shutdown_started: AtomicBool,
}

impl JobManager {
    /// Open the configured store and start the manager's driver tasks.
    pub async fn new(config: ManagerConfig) -> Result<Self> {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::open(config.db_path.as_deref()).await?);
        Ok(Self::with_store(store, config))
    }

    /// Build a manager over an existing store. Must be called from within a
    /// tokio runtime; this spawns the result processor, the cron tick loop,
    /// and the cleanup loop.
    pub fn with_store(store: Arc<dyn JobStore>, config: ManagerConfig) -> Self {
        let broker = Arc::new(Broker::new(config.subscriber_fail_threshold));
        let (results_tx, results_rx) = mpsc::channel(config.results_capacity.max(1));
        let (jobs_updated_tx, jobs_updated_rx) = mpsc::channel(1);

        let core = Arc::new(ManagerCore {
            store,
            broker,
            state: RwLock::new(ManagerState::default()),
            running: RunningCount::new(),
            results_tx: StdMutex::new(Some(results_tx)),
            jobs_updated_tx,
        });

        let processor = tokio::spawn(process_results(Arc::clone(&core), results_rx));

        let cron = CronDriver::new();
        cron.start();

        let cleanup = tokio::spawn(cleanup_loop(
            Arc::downgrade(&core),
            config.cleanup_interval(),
            config.cleanup_retention(),
        ));

        Self {
            core,
            cron,
            config,
            updates_rx: StdMutex::new(Some(jobs_updated_rx)),
            processor: StdMutex::new(Some(processor)),
            cleanup: StdMutex::new(Some(cleanup)),
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The broker carrying `job.update` notifications.
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.core.broker)
    }

    /// Take the capacity-1 change-signal channel. Each received unit means
    /// "at least one job changed since you last looked". Can be taken once.
    pub fn take_updates_rx(&self) -> Option<mpsc::Receiver<()>> {
        self.updates_rx
            .lock()
            .expect("updates receiver lock poisoned")
            .take()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a job with its schedule. Returns the job id, minting a UUID
    /// when the job does not bring one.
    pub async fn setup_job(&self, job: Arc<dyn Job>, schedule: &str) -> Result<String> {
        let mut st = self.core.state.write().await;
        if st.shutdown {
            return Err(Error::ShuttingDown);
        }

        let mut job_id = job.id().to_string();
        if job_id.is_empty() {
            job_id = Uuid::now_v7().to_string();
        }
        if st.jobs.contains_key(&job_id) {
            return Err(Error::JobExists(job_id));
        }

        let now = Utc::now();
        let next_run_time = match job.sched_type() {
            SchedType::Periodic => Some(next_occurrence(schedule, now)?),
            SchedType::OneTime => {
                if schedule.is_empty() {
                    // Run immediately once started
                    Some(now)
                } else {
                    Some(parse_schedule(schedule)?)
                }
            }
        };

        let def = JobDef {
            job_id: job_id.clone(),
            job_name: job.name().to_string(),
            sched_type: job.sched_type(),
            schedule: schedule.to_string(),
            next_run_time,
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
        };
        self.core.store.save_job(&def).await?;

        st.jobs.insert(job_id.clone(), job);
        Ok(job_id)
    }

    /// Build an [`FnJob`] from a registration descriptor, set it up, and
    /// start it when `auto_start` is set.
    pub async fn register(&self, config: &JobConfig, work: WorkFn) -> Result<String> {
        let job = FnJob::from_config(config, work).with_grace(self.config.deadline_grace());
        let job_id = self.setup_job(Arc::new(job), &config.schedule).await?;
        if config.auto_start {
            self.start_job(&job_id).await?;
        }
        Ok(job_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Begin execution: periodic jobs register with cron, scheduled
    /// one-time jobs arm a timer, everything else runs immediately.
    pub async fn start_job(&self, id: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        if st.shutdown {
            return Err(Error::ShuttingDown);
        }
        let job = st
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        if st.running_jobs.contains_key(id) {
            return Err(Error::JobAlreadyRunning(id.to_string()));
        }

        self.core.store.update_job_status(id, JobStatus::Running).await?;
        let def = self.core.store.get_job(id).await?;

        match job.sched_type() {
            SchedType::Periodic => {
                if !matches!(st.cron_slots.get(id), Some(CronSlot::Active(_))) {
                    let entry = self.register_cron_entry(id, &def.schedule)?;
                    st.cron_slots.insert(id.to_string(), CronSlot::Active(entry));
                }
            }
            SchedType::OneTime => {
                if def.schedule.is_empty() {
                    self.core.spawn_execution(id);
                } else {
                    match def.next_run_time {
                        Some(at) if at > Utc::now() => {
                            self.core
                                .store
                                .update_job_status(id, JobStatus::Scheduled)
                                .await?;
                            self.install_timer(&mut st, id, at);
                        }
                        // Fire time already passed; run now
                        _ => self.core.spawn_execution(id),
                    }
                }
            }
        }

        Ok(())
    }

    /// Halt a job: deregister from cron, cancel a running execution, or
    /// cancel a pending timer. A scheduled one-time job that never fired
    /// ends up Cancelled, everything else Stopped.
    pub async fn stop_job(&self, id: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        let job = st
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        let def = self.core.store.get_job(id).await?;

        let mut final_status = JobStatus::Stopped;

        if let Some(CronSlot::Active(entry)) = st.cron_slots.get(id) {
            self.cron.remove(*entry);
        }
        st.cron_slots.remove(id);

        if let Some(token) = st.running_jobs.remove(id) {
            // The execution observes this and still posts its result
            token.cancel();
        } else if job.sched_type() == SchedType::OneTime {
            if let Some(timer) = st.timers.remove(id) {
                timer.stop();
                final_status = JobStatus::Cancelled;
            } else if def.status == JobStatus::Scheduled {
                // Timer already fired or was dropped before we got here
                final_status = JobStatus::Cancelled;
            }
        }

        self.core.store.update_job_status(id, final_status).await?;
        self.core.notify_updated();
        Ok(())
    }

    /// Suspend a job. Periodic jobs come off the cron driver but keep a
    /// placeholder slot; a running one-time job cannot be paused.
    pub async fn pause_job(&self, id: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        let job = st
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        if let Some(slot) = st.cron_slots.get_mut(id) {
            if let CronSlot::Active(entry) = *slot {
                self.cron.remove(entry);
            }
            *slot = CronSlot::PausedPlaceholder;
        }

        if job.sched_type() != SchedType::Periodic && st.running_jobs.contains_key(id) {
            return Err(Error::JobAlreadyRunning(id.to_string()));
        }

        self.core.store.update_job_status(id, JobStatus::Paused).await?;
        self.core.notify_updated();
        Ok(())
    }

    /// Resume a paused job; periodic jobs re-register with cron.
    pub async fn resume_job(&self, id: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        let job = st
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        let def = self.core.store.get_job(id).await?;
        if def.status != JobStatus::Paused {
            return Err(Error::JobNotPaused(id.to_string()));
        }

        self.core.store.update_job_status(id, JobStatus::Running).await?;

        if job.sched_type() == SchedType::Periodic
            && st.cron_slots.get(id) == Some(&CronSlot::PausedPlaceholder)
        {
            let entry = self.register_cron_entry(id, &def.schedule)?;
            st.cron_slots.insert(id.to_string(), CronSlot::Active(entry));
        }

        self.core.notify_updated();
        Ok(())
    }

    /// Move a pending one-time job to a new fire time.
    pub async fn reschedule_job(&self, id: &str, new_schedule: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        let job = st
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        if job.sched_type() != SchedType::OneTime {
            return Err(Error::WrongScheduleType(
                "only one-time jobs can be rescheduled".to_string(),
            ));
        }

        let mut def = self.core.store.get_job(id).await?;
        if !matches!(def.status, JobStatus::Created | JobStatus::Scheduled) {
            return Err(Error::NotReschedulable {
                id: id.to_string(),
                status: def.status,
            });
        }

        let new_time = parse_schedule(new_schedule)?;

        if let Some(timer) = st.timers.remove(id) {
            timer.stop();
        }

        def.schedule = new_schedule.to_string();
        def.next_run_time = Some(new_time);
        def.updated_at = Utc::now();
        self.core.store.save_job(&def).await?;
        self.core.store.update_next_run_time(id, new_time).await?;

        self.install_timer(&mut st, id, new_time);

        self.core.notify_updated();
        Ok(())
    }

    /// Run a job right now, regardless of its schedule. A periodic job's
    /// cron registration is untouched and keeps ticking.
    pub async fn trigger_job_now(&self, id: &str) -> Result<()> {
        {
            let st = self.core.state.read().await;
            if st.shutdown {
                return Err(Error::ShuttingDown);
            }
            if !st.jobs.contains_key(id) {
                return Err(Error::JobNotFound(id.to_string()));
            }
        }
        self.core.spawn_execution(id);
        self.core.notify_updated();
        Ok(())
    }

    /// Remove a job and everything it owns: cron entry, running execution,
    /// pending timer, definition, results.
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let mut st = self.core.state.write().await;
        if !st.jobs.contains_key(id) {
            return Err(Error::JobNotFound(id.to_string()));
        }

        if let Some(CronSlot::Active(entry)) = st.cron_slots.get(id) {
            self.cron.remove(*entry);
        }
        st.cron_slots.remove(id);

        if let Some(token) = st.running_jobs.remove(id) {
            token.cancel();
        }

        if let Some(timer) = st.timers.remove(id) {
            timer.stop();
        }

        st.jobs.remove(id);
        self.core.store.delete_job(id).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Live status: Running while an execution is in flight, otherwise
    /// whatever the store has recorded.
    pub async fn get_job_status(&self, id: &str) -> Result<JobStatus> {
        let st = self.core.state.read().await;
        if st.running_jobs.contains_key(id) {
            return Ok(JobStatus::Running);
        }
        let def = self.core.store.get_job(id).await?;
        Ok(def.status)
    }

    pub async fn get_job_history(&self, id: &str, limit: i64) -> Result<Vec<JobResult>> {
        {
            let st = self.core.state.read().await;
            if !st.jobs.contains_key(id) {
                return Err(Error::JobNotFound(id.to_string()));
            }
        }
        self.core.store.get_job_results(id, limit).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        sched_type: Option<SchedType>,
    ) -> Result<Vec<JobDef>> {
        self.core.store.list_jobs(status, sched_type).await
    }

    pub async fn list_jobs_with_pagination(
        &self,
        results_per_job: i64,
    ) -> Result<(Vec<JobRun>, HashMap<String, i64>)> {
        self.core.store.get_job_runs_with_pagination(results_per_job).await
    }

    pub async fn get_job_results_paginated(
        &self,
        id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<JobResult>, i64)> {
        self.core.store.get_job_results_paginated(id, offset, limit).await
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Gracefully stop: reject new work, stop cron, cancel running
    /// executions, drain results within `timeout`, close the store.
    /// Idempotent; a second call is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("job manager shutting down");

        let tokens: Vec<(String, CancellationToken)> = {
            let mut st = self.core.state.write().await;
            st.shutdown = true;
            st.running_jobs
                .iter()
                .map(|(id, token)| (id.clone(), token.clone()))
                .collect()
        };

        let cron_drain = self.cron.stop();

        for (id, token) in tokens {
            tracing::info!(job_id = %id, "cancelling running job for shutdown");
            token.cancel();
        }

        if !self.core.running.wait_zero(timeout).await {
            tracing::warn!("shutdown timed out; some jobs may not have completed");
        }

        // Dropping the sender closes the channel; the processor drains
        // whatever is buffered and exits.
        self.core
            .results_tx
            .lock()
            .expect("results sender lock poisoned")
            .take();
        let processor = self.processor.lock().expect("processor lock poisoned").take();
        if let Some(handle) = processor {
            let _ = handle.await;
        }

        cron_drain.wait().await;

        let cleanup = self.cleanup.lock().expect("cleanup lock poisoned").take();
        if let Some(handle) = cleanup {
            handle.abort();
        }

        self.core.store.close().await?;
        tracing::info!("job manager shutdown complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

impl JobManager {
    fn register_cron_entry(&self, id: &str, schedule: &str) -> Result<EntryId> {
        let weak = Arc::downgrade(&self.core);
        let job_id = id.to_string();
        self.cron.add(schedule, move || {
            let weak = weak.clone();
            let job_id = job_id.clone();
            async move {
                if let Some(core) = weak.upgrade() {
                    core.execute_job(&job_id).await;
                }
            }
        })
    }

    fn install_timer(&self, st: &mut ManagerState, id: &str, at: DateTime<Utc>) {
        let weak = Arc::downgrade(&self.core);
        let job_id = id.to_string();
        let timer = run_at(at, async move {
            if let Some(core) = weak.upgrade() {
                // The timer consumed itself by firing
                core.state.write().await.timers.remove(&job_id);
                core.execute_job(&job_id).await;
            }
        });
        st.timers.insert(id.to_string(), timer);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::work_fn;

    fn quick_config() -> ManagerConfig {
        ManagerConfig::default()
    }

    async fn memory_manager() -> JobManager {
        JobManager::new(quick_config()).await.expect("manager")
    }

    fn noop_job(id: &str, sched_type: SchedType) -> Arc<dyn Job> {
        Arc::new(FnJob::new(
            id,
            format!("{} job", id),
            sched_type,
            Duration::ZERO,
            work_fn(|_| async { Ok("ok".to_string()) }),
        ))
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_setup_job_persists_created_definition() {
        let mgr = memory_manager().await;
        let id = mgr
            .setup_job(noop_job("job-1", SchedType::Periodic), "*/5 * * * * *")
            .await
            .expect("setup");
        assert_eq!(id, "job-1");

        let jobs = mgr.list_jobs(None, None).await.expect("list");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Created);
        assert!(jobs[0].next_run_time.is_some());
    }

    #[tokio::test]
    async fn test_setup_job_mints_uuid_for_empty_id() {
        let mgr = memory_manager().await;
        let id = mgr
            .setup_job(noop_job("", SchedType::OneTime), "")
            .await
            .expect("setup");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_setup_job_rejects_duplicates() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("dup", SchedType::OneTime), "")
            .await
            .expect("first setup");
        let err = mgr
            .setup_job(noop_job("dup", SchedType::OneTime), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobExists(_)));
    }

    #[tokio::test]
    async fn test_setup_periodic_rejects_bad_cron() {
        let mgr = memory_manager().await;
        let err = mgr
            .setup_job(noop_job("bad", SchedType::Periodic), "not a cron")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchedule(_)));

        // An empty expression is no better for a periodic job
        let err = mgr
            .setup_job(noop_job("bad2", SchedType::Periodic), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn test_setup_onetime_rejects_bad_literal() {
        let mgr = memory_manager().await;
        let err = mgr
            .setup_job(noop_job("bad", SchedType::OneTime), "sometime later")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchedule(_)));
    }

    // -----------------------------------------------------------------------
    // Lifecycle errors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_unknown_job_not_found() {
        let mgr = memory_manager().await;
        let err = mgr.start_job("ghost").await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_resume_never_paused_job_fails() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("j", SchedType::Periodic), "0 0 * * * *")
            .await
            .expect("setup");
        let err = mgr.resume_job("j").await.unwrap_err();
        assert!(matches!(err, Error::JobNotPaused(_)));
    }

    #[tokio::test]
    async fn test_reschedule_periodic_job_rejected() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("p", SchedType::Periodic), "0 0 * * * *")
            .await
            .expect("setup");
        let err = mgr.reschedule_job("p", "in 1h").await.unwrap_err();
        assert!(matches!(err, Error::WrongScheduleType(_)));
    }

    #[tokio::test]
    async fn test_reschedule_updates_next_run_time() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("o", SchedType::OneTime), "in 1h")
            .await
            .expect("setup");
        mgr.start_job("o").await.expect("start");
        assert_eq!(
            mgr.get_job_status("o").await.expect("status"),
            JobStatus::Scheduled
        );

        mgr.reschedule_job("o", "in 2h").await.expect("reschedule");

        let jobs = mgr.list_jobs(None, None).await.expect("list");
        let def = &jobs[0];
        assert_eq!(def.schedule, "in 2h");
        let lead = def.next_run_time.unwrap() - Utc::now();
        assert!(lead > chrono::Duration::minutes(110));
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_pause_resume_periodic_roundtrip() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("p", SchedType::Periodic), "0 0 * * * *")
            .await
            .expect("setup");
        mgr.start_job("p").await.expect("start");
        assert_eq!(
            mgr.get_job_status("p").await.expect("status"),
            JobStatus::Running
        );

        mgr.pause_job("p").await.expect("pause");
        assert_eq!(
            mgr.get_job_status("p").await.expect("status"),
            JobStatus::Paused
        );

        // Pausing an already-paused job stays Paused
        mgr.pause_job("p").await.expect("pause again");
        assert_eq!(
            mgr.get_job_status("p").await.expect("status"),
            JobStatus::Paused
        );

        mgr.resume_job("p").await.expect("resume");
        assert_eq!(
            mgr.get_job_status("p").await.expect("status"),
            JobStatus::Running
        );
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_shutdown_rejects_new_operations() {
        let mgr = memory_manager().await;
        mgr.shutdown(Duration::from_secs(1)).await.expect("shutdown");

        let err = mgr
            .setup_job(noop_job("late", SchedType::OneTime), "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mgr = memory_manager().await;
        mgr.shutdown(Duration::from_secs(1)).await.expect("first");
        mgr.shutdown(Duration::from_secs(1)).await.expect("second");
    }

    #[tokio::test]
    async fn test_get_job_status_falls_back_to_store() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("j", SchedType::OneTime), "")
            .await
            .expect("setup");
        // Not started: nothing in the running map, so the store answers
        assert_eq!(
            mgr.get_job_status("j").await.expect("status"),
            JobStatus::Created
        );

        let err = mgr.get_job_status("ghost").await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_job_removes_definition() {
        let mgr = memory_manager().await;
        mgr.setup_job(noop_job("j", SchedType::OneTime), "")
            .await
            .expect("setup");
        mgr.delete_job("j").await.expect("delete");

        assert!(mgr.list_jobs(None, None).await.expect("list").is_empty());
        let err = mgr.delete_job("j").await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_unknown_job_not_found() {
        let mgr = memory_manager().await;
        let err = mgr.trigger_job_now("ghost").await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }
}
