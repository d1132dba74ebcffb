//! Background polling loop.
//!
//! One tokio task per running period drives ticks off an interval timer. A
//! tick walks a snapshot of pending jobs one at a time and advances each by at
//! most one step. The loop suspends itself once nothing is pending and is
//! restarted by [`BackgroundScheduler::ensure_running`].

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use super::clock::Clock;
use super::errors::WorkflowError;
use super::registry::{JobRegistry, PendingSnapshot};
use super::transition::{self, SideEffect, TickStart, Transition};
use super::types::{Job, JobState};
use super::writer::PersistenceWriter;
use crate::client::ProvisioningClient;
use crate::config::WorkflowConfig;
use crate::persistence::OwnerUpdate;
use crate::telemetry::{create_job_span, create_tick_span, generate_correlation_id};

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick held the guard; nothing was done
    pub skipped: bool,
    /// No pending jobs at tick start
    pub idle: bool,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Transient query errors plus panicked jobs
    pub errors: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn idle() -> Self {
        Self {
            idle: true,
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Discarded | JobOutcome::Skipped => return,
            JobOutcome::Progressed => {}
            JobOutcome::Retrying => self.errors += 1,
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Failed => self.failed += 1,
        }
        self.processed += 1;
    }
}

/// What happened to a single job during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    /// Cancelled or replaced mid-flight; result dropped
    Discarded,
    /// Already terminal
    Skipped,
    /// Advanced or still waiting upstream
    Progressed,
    /// Status query failed; retried next tick
    Retrying,
    Completed,
    Failed,
}

struct SchedulerState {
    running: bool,
    generation: u64,
    handle: Option<JoinHandle<()>>,
    stop: Arc<Notify>,
}

struct SchedulerInner {
    registry: Arc<JobRegistry>,
    client: Arc<dyn ProvisioningClient>,
    writer: Arc<PersistenceWriter>,
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    tick_guard: tokio::sync::Mutex<()>,
    state: Mutex<SchedulerState>,
}

pub struct BackgroundScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("running", &self.is_running())
            .field("poll_interval", &self.inner.config.poll_interval())
            .finish()
    }
}

impl BackgroundScheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        client: Arc<dyn ProvisioningClient>,
        writer: Arc<PersistenceWriter>,
        clock: Arc<dyn Clock>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                client,
                writer,
                clock,
                config,
                tick_guard: tokio::sync::Mutex::new(()),
                state: Mutex::new(SchedulerState {
                    running: false,
                    generation: 0,
                    handle: None,
                    stop: Arc::new(Notify::new()),
                }),
            }),
        }
    }

    /// Start the polling loop unless it is already running
    pub fn ensure_running(&self) {
        let (generation, stop) = {
            let mut state = self.inner.state();
            if state.running {
                return;
            }

            state.generation += 1;
            state.running = true;
            state.stop = Arc::new(Notify::new());
            (state.generation, Arc::clone(&state.stop))
        };

        // Spawned outside the state lock; `LoopExit` takes it when dropped
        let exit = LoopExit {
            inner: Arc::clone(&self.inner),
            generation,
        };
        let handle = tokio::spawn(run_loop(exit, stop));

        let mut state = self.inner.state();
        if state.generation == generation {
            state.handle = Some(handle);
        }
        drop(state);

        info!(
            generation,
            poll_interval_secs = self.inner.config.poll_interval_secs,
            "Workflow scheduler started"
        );
    }

    /// Ask the loop to exit; a tick already in progress runs to completion
    pub fn stop(&self) -> bool {
        self.take_loop().is_some()
    }

    fn take_loop(&self) -> Option<Option<JoinHandle<()>>> {
        let mut state = self.inner.state();
        if !state.running {
            return None;
        }

        state.running = false;
        state.generation += 1;
        state.stop.notify_one();
        info!("Workflow scheduler stopping");
        Some(state.handle.take())
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    /// Run one tick now, sharing the guard with the timer loop
    pub async fn tick_now(&self) -> TickReport {
        self.inner.run_tick().await
    }

    /// Stop the loop and wait until no tick is in progress
    pub async fn shutdown(&self) {
        if let Some(Some(handle)) = self.take_loop() {
            if let Err(e) = handle.await {
                error!(error = %e, "Workflow scheduler loop ended abnormally");
            }
        }
        let _idle = self.inner.tick_guard.lock().await;
        debug!("Workflow scheduler idle");
    }
}

/// Clears `running` if the loop for `generation` ends without going through
/// `stop` or `suspend_if_idle`, so `ensure_running` can spawn a new one.
/// Passed into the loop by value so it also fires when the task is dropped
/// before its first poll.
struct LoopExit {
    inner: Arc<SchedulerInner>,
    generation: u64,
}

impl Drop for LoopExit {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if state.running && state.generation == self.generation {
            state.running = false;
            state.handle = None;
            warn!(generation = self.generation, "Workflow scheduler loop exited unexpectedly");
        }
    }
}

async fn run_loop(exit: LoopExit, stop: Arc<Notify>) {
    let inner = &exit.inner;
    let generation = exit.generation;
    let period = inner.config.poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => break,
        }
        if !inner.is_generation(generation) {
            break;
        }

        let report = inner.run_tick().await;
        if report.idle && inner.suspend_if_idle(generation) {
            break;
        }
    }

    debug!(generation, "Workflow scheduler loop exited");
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_generation(&self, generation: u64) -> bool {
        let state = self.state();
        state.running && state.generation == generation
    }

    /// Mark the scheduler stopped if nothing became pending since the tick
    /// started. Returns true when the loop for `generation` should exit.
    fn suspend_if_idle(&self, generation: u64) -> bool {
        let mut state = self.state();
        if !state.running || state.generation != generation {
            return true;
        }
        if self.registry.pending_count() > 0 {
            return false;
        }

        state.running = false;
        state.handle = None;
        info!(generation, "No pending jobs, workflow scheduler suspended");
        true
    }

    async fn run_tick(&self) -> TickReport {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Previous tick still in progress, skipping");
            return TickReport::skipped();
        };

        let pending = self.registry.all_pending();
        if pending.is_empty() {
            debug!("Tick found no pending jobs");
            return TickReport::idle();
        }

        let correlation_id = generate_correlation_id();
        let span = create_tick_span(&correlation_id, pending.len());
        self.process_snapshot(pending).instrument(span).await
    }

    async fn process_snapshot(&self, pending: PendingSnapshot) -> TickReport {
        let delay = self.config.inter_job_delay();
        let mut report = TickReport::default();

        for (index, job) in pending.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let owner_id = job.owner_id.clone();
            let span = create_job_span(
                owner_id.as_str(),
                &job.id.to_string(),
                &job.state.to_string(),
            );
            let processing = AssertUnwindSafe(self.process_job(job.clone()).instrument(span));

            match processing.catch_unwind().await {
                Ok(outcome) => report.record(outcome),
                Err(panic) => {
                    report.errors += 1;
                    let failure = WorkflowError::JobPanicked {
                        owner_id: owner_id.to_string(),
                    };
                    error!(owner_id = %owner_id, cause = panic_message(&*panic), "{}", failure);
                }
            }
        }

        debug!(
            processed = report.processed,
            completed = report.completed,
            failed = report.failed,
            errors = report.errors,
            "Tick finished"
        );
        report
    }

    async fn process_job(&self, job: Job) -> JobOutcome {
        if !self.registry.is_current(&job.owner_id, job.id) {
            return JobOutcome::Discarded;
        }

        let mut retrying = false;
        let transition = match transition::begin_tick(&job, self.clock.now(), self.config.max_attempts) {
            TickStart::Skip(_) => return JobOutcome::Skipped,
            TickStart::Query(next) => {
                let result = self
                    .client
                    .get_status(&next.source_resource_id)
                    .await
                    .map_err(|e| {
                        if e.is_transient() {
                            warn!(
                                source_resource_id = %next.source_resource_id,
                                attempts = next.attempts,
                                error = %e,
                                "Status query failed, will retry"
                            );
                        } else {
                            error!(
                                source_resource_id = %next.source_resource_id,
                                attempts = next.attempts,
                                error = %e,
                                "Status query rejected by provider, will retry"
                            );
                        }
                        retrying = true;
                        e.to_string()
                    });
                transition::on_status(&next, result)
            }
            TickStart::Create(t) => t,
            TickStart::Exhausted(t) => {
                warn!(attempts = t.job.attempts, "Job exceeded max attempts");
                t
            }
            TickStart::Interrupted(t) => {
                warn!("Derived resource creation was interrupted before completing");
                t
            }
        };

        let outcome = if transition.effects.contains(&SideEffect::CreateDerived) {
            self.create_derived(job.state, transition).await
        } else {
            self.commit(job.state, transition)
        };

        match outcome {
            JobOutcome::Progressed if retrying => JobOutcome::Retrying,
            other => other,
        }
    }

    async fn create_derived(&self, from: JobState, transition: Transition) -> JobOutcome {
        let creating = transition::mark_creating(&transition.job);
        if !self.registry.replace_if_current(creating.clone()) {
            debug!("Job cancelled before derived creation, dropping");
            return JobOutcome::Discarded;
        }
        log_transition(&creating, from);

        let result = self
            .client
            .create_derived(&creating.owner_context())
            .await
            .map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, "Derived resource creation failed");
                } else {
                    error!(error = %e, "Derived resource creation rejected by provider");
                }
                e.to_string()
            });

        self.commit(creating.state, transition::on_derived(&creating, result))
    }

    /// Write the transition back and run its effects, unless the run was
    /// cancelled or replaced while it was in flight
    fn commit(&self, from: JobState, transition: Transition) -> JobOutcome {
        let Transition { job, effects } = transition;

        if !self.registry.replace_if_current(job.clone()) {
            debug!(owner_id = %job.owner_id, "Job no longer current, discarding result");
            return JobOutcome::Discarded;
        }
        if job.state != from {
            log_transition(&job, from);
        }

        let now = self.clock.now();
        for effect in effects {
            match effect {
                SideEffect::PersistFailure { error } => {
                    self.writer
                        .submit(job.owner_id.clone(), OwnerUpdate::failed(error, now));
                }
                SideEffect::PersistCompletion {
                    derived_resource_id,
                } => {
                    self.writer.submit(
                        job.owner_id.clone(),
                        OwnerUpdate::completed(derived_resource_id, now),
                    );
                }
                SideEffect::RemoveJob => {
                    self.registry.remove_if_current(&job.owner_id, job.id);
                }
                SideEffect::CreateDerived => {
                    debug!("Ignoring nested derived creation request");
                }
            }
        }

        match job.state {
            JobState::Completed => JobOutcome::Completed,
            JobState::Failed => JobOutcome::Failed,
            _ => JobOutcome::Progressed,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn log_transition(job: &Job, from: JobState) {
    match job.state {
        JobState::Failed => warn!(
            owner_id = %job.owner_id,
            source_resource_id = %job.source_resource_id,
            from = %from,
            attempts = job.attempts,
            error = job.error.as_deref().unwrap_or_default(),
            "Provisioning failed"
        ),
        state => info!(
            owner_id = %job.owner_id,
            source_resource_id = %job.source_resource_id,
            from = %from,
            to = %state,
            attempts = job.attempts,
            "Job state transition"
        ),
    }
}
