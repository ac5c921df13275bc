//! Scheduling engine — owns one timer per active task and the periodic
//! sweep/health-check/cleanup loops that keep timers honest. See
//! `spec.md` §4.4. Per-task timers (rather than a single priority queue)
//! per the design note in §9; concurrency guarding follows the
//! teacher's `ConcurrencyGuard`/`ScheduleRunner` shape.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use scheduler_domain::{EngineConfig, Error, Result, ScheduledTask, TaskStatus};

use crate::event_bus::{Event, EventBus, EventSink};
use crate::executor::{ExecutionOverrides, TaskExecutor};
use crate::repository::TaskRepository;

struct TimerRecord {
    scheduled_for: DateTime<Utc>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    task_snapshot: ScheduledTask,
    abort: tokio::task::AbortHandle,
}

#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub sweeps: u64,
    pub executed: u64,
    pub failed: u64,
    pub timers_cancelled: u64,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub in_flight_ids: Vec<String>,
    pub timer_count: usize,
    pub stats: EngineStats,
    /// Next five upcoming fires, sorted by `scheduled_for`.
    pub upcoming: Vec<(String, DateTime<Utc>)>,
}

pub struct SchedulingEngine {
    config: EngineConfig,
    repository: Arc<dyn TaskRepository>,
    executor: Arc<TaskExecutor>,
    event_bus: Arc<EventBus>,
    timers: RwLock<HashMap<String, TimerRecord>>,
    in_flight: RwLock<HashSet<String>>,
    running: AtomicBool,
    stats: Mutex<EngineStats>,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SchedulingEngine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn TaskRepository>,
        executor: Arc<TaskExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: config.clamped(),
            repository,
            executor,
            event_bus,
            timers: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashSet::new()),
            running: AtomicBool::new(false),
            stats: Mutex::new(EngineStats::default()),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().clone()
    }

    pub fn status(&self) -> EngineStatus {
        let timers = self.timers.read();
        let mut upcoming: Vec<(String, DateTime<Utc>)> = timers.iter().map(|(id, r)| (id.clone(), r.scheduled_for)).collect();
        upcoming.sort_by_key(|(_, scheduled_for)| *scheduled_for);
        upcoming.truncate(5);
        EngineStatus {
            running: self.is_running(),
            in_flight_ids: self.in_flight.read().iter().cloned().collect(),
            timer_count: timers.len(),
            stats: self.stats.lock().clone(),
            upcoming,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `start(load_existing)` per §4.4. A second call while already
    /// running is a no-op (logged, not an error).
    pub async fn start(self: &Arc<Self>, load_existing: bool) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduling engine already running; start() is a no-op");
            return Ok(());
        }

        if load_existing {
            let now = Utc::now();
            for mut task in self.repository.find_active().await? {
                let Some(next_fire) = task.next_execution_time else { continue };
                if next_fire <= now {
                    // Deferred overdue execution: fire shortly after start
                    // rather than immediately, per §4.4.
                    task.next_execution_time = Some(now + chrono::Duration::seconds(1));
                    task = self.repository.save(task).await?;
                }
                if let Err(e) = self.schedule_task(task).await {
                    tracing::warn!(error = %e, "failed to schedule task during start(load_existing)");
                }
            }
        }

        self.spawn_periodic_timers();
        self.event_bus.publish(Event::Started);
        Ok(())
    }

    fn spawn_periodic_timers(self: &Arc<Self>) {
        let mut handles = self.background.lock();
        handles.clear();

        let sweep = Arc::clone(self);
        let check_interval = Duration::from_secs(self.config.check_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !sweep.is_running() {
                    break;
                }
                sweep.execute_due_tasks().await;
            }
        }));

        let health = Arc::clone(self);
        let health_interval = Duration::from_secs(self.config.health_check_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !health.is_running() {
                    break;
                }
                health.health_check().await;
            }
        }));

        let cleanup = Arc::clone(self);
        let cleanup_interval = Duration::from_secs(self.config.timer_cleanup_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !cleanup.is_running() {
                    break;
                }
                cleanup.timer_cleanup().await;
            }
        }));
    }

    /// `stop(cancel_active)` per §4.4.
    pub async fn stop(&self, cancel_active: bool) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        for handle in self.background.lock().drain(..) {
            handle.abort();
        }

        let mut cancelled = 0u64;
        for (_, record) in self.timers.write().drain() {
            record.abort.abort();
            cancelled += 1;
        }
        self.stats.lock().timers_cancelled += cancelled;

        if !cancel_active {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
            while !self.in_flight.read().is_empty() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        self.event_bus.publish(Event::Stopped);
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Per-task scheduling
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn schedule_task(self: &Arc<Self>, task: ScheduledTask) -> Result<()> {
        if !self.is_running() {
            return Err(Error::EngineNotReady("engine is not running".into()));
        }
        if task.status != TaskStatus::Active {
            return Err(Error::StateRule("only ACTIVE tasks may be scheduled".into()));
        }
        let next_fire = task
            .next_execution_time
            .ok_or_else(|| Error::StateRule("task has no next_execution_time".into()))?;

        self.unschedule_internal(&task.id);

        let now = Utc::now();
        let delay = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
        let task_id = task.id.clone();
        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(task_id).await;
        });

        self.timers.write().insert(
            task.id.clone(),
            TimerRecord { scheduled_for: next_fire, created_at: now, task_snapshot: task.clone(), abort: join.abort_handle() },
        );
        self.event_bus.publish(Event::TaskScheduled { task_id: task.id.clone(), scheduled_for: next_fire });
        Ok(())
    }

    /// Idempotent: unscheduling an id with no timer is a silent no-op.
    pub fn unschedule_task(&self, id: &str) {
        if self.unschedule_internal(id) {
            self.event_bus.publish(Event::TaskUnscheduled { task_id: id.to_string() });
        }
    }

    fn unschedule_internal(&self, id: &str) -> bool {
        if let Some(record) = self.timers.write().remove(id) {
            record.abort.abort();
            self.stats.lock().timers_cancelled += 1;
            true
        } else {
            false
        }
    }

    pub async fn reschedule_task(self: &Arc<Self>, task: ScheduledTask) -> Result<()> {
        self.unschedule_task(&task.id);
        self.schedule_task(task).await
    }

    /// Timer-fire path for `task_id` per §4.4.
    async fn fire(self: Arc<Self>, task_id: String) {
        self.timers.write().remove(&task_id);
        if !self.is_running() {
            return;
        }

        if self.in_flight.read().len() >= self.config.max_concurrent_executions {
            // Back-pressure: defer the fire by 30s rather than block.
            if let Ok(Some(mut task)) = self.repository.find_by_id(&task_id).await {
                task.next_execution_time = Some(Utc::now() + chrono::Duration::seconds(30));
                if let Ok(saved) = self.repository.save(task).await {
                    let _ = self.schedule_task(saved).await;
                }
            }
            return;
        }

        self.in_flight.write().insert(task_id.clone());
        self.event_bus.publish(Event::TaskExecutionStarted { task_id: task_id.clone(), attempt: 0 });

        let fetched = self.repository.find_by_id(&task_id).await;
        let run_success = match fetched {
            Ok(Some(task)) => {
                // Fixed per-fire override per §4.4, independent of the
                // executor's own configured defaults.
                let overrides = ExecutionOverrides { timeout_ms: Some(300_000), max_retries: Some(3), retry_on_timeout: None };
                let outcome = self.executor.execute_task(&task_id, task.action_params.clone(), overrides).await;
                match outcome {
                    Ok(result) => {
                        let mut updated = task;
                        if result.success {
                            updated.record_success(Utc::now());
                        } else {
                            updated.mark_failed(result.error.unwrap_or_else(|| "execution failed".into()), Utc::now());
                        }
                        if let Err(e) = self.repository.save(updated).await {
                            self.event_bus.publish(Event::Error { kind: "repository".into(), task_id: Some(task_id.clone()), error: e.to_string() });
                        }
                        result.success
                    }
                    Err(e) => {
                        self.event_bus.publish(Event::Error { kind: "executor".into(), task_id: Some(task_id.clone()), error: e.to_string() });
                        false
                    }
                }
            }
            Ok(None) => false,
            Err(e) => {
                self.event_bus.publish(Event::Error { kind: "repository".into(), task_id: Some(task_id.clone()), error: e.to_string() });
                false
            }
        };

        self.in_flight.write().remove(&task_id);
        {
            let mut stats = self.stats.lock();
            stats.executed += 1;
            if !run_success {
                stats.failed += 1;
            }
        }
        self.event_bus.publish(Event::TaskExecutionCompleted { task_id: task_id.clone(), success: run_success, total_retries: 0 });

        if let Ok(Some(fresh)) = self.repository.find_by_id(&task_id).await {
            if fresh.status == TaskStatus::Active && fresh.next_execution_time.is_some() {
                if let Err(e) = self.schedule_task(fresh).await {
                    tracing::warn!(error = %e, task_id = %task_id, "failed to reschedule after execution");
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Sweeps
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Manual `executeDueTasks()`, also the body of the periodic sweep.
    pub async fn execute_due_tasks(self: &Arc<Self>) {
        let now = Utc::now();
        let budget = self.config.max_concurrent_executions.saturating_sub(self.in_flight.read().len());
        if budget > 0 {
            let due = match self.repository.find_by_next_execution_time_before(now + chrono::Duration::seconds(1)).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    self.event_bus.publish(Event::Error { kind: "repository".into(), task_id: None, error: e.to_string() });
                    Vec::new()
                }
            };

            let mut launched = 0usize;
            for task in due {
                if launched >= budget || task.status != TaskStatus::Active {
                    continue;
                }
                if task.is_overdue(now, self.config.execution_tolerance_minutes) {
                    tracing::warn!(task_id = %task.id, tolerance_minutes = self.config.execution_tolerance_minutes, "task is overdue beyond the configured tolerance");
                    self.event_bus.publish(Event::Error {
                        kind: "overdue".into(),
                        task_id: Some(task.id.clone()),
                        error: format!("execution overdue beyond {}-minute tolerance", self.config.execution_tolerance_minutes),
                    });
                }
                self.unschedule_internal(&task.id);
                launched += 1;
                let this = Arc::clone(self);
                let id = task.id.clone();
                tokio::spawn(async move { this.fire(id).await });
            }
        }

        self.stats.lock().sweeps += 1;
        self.refresh_schedules().await;
    }

    /// `refreshSchedules` per §4.4: reconciles the timer map against the
    /// repository's current ACTIVE set.
    pub async fn refresh_schedules(self: &Arc<Self>) {
        let active = match self.repository.find_active().await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.event_bus.publish(Event::Error { kind: "repository".into(), task_id: None, error: e.to_string() });
                return;
            }
        };
        let active_ids: HashSet<String> = active.iter().map(|t| t.id.clone()).collect();

        let stale: Vec<String> = self.timers.read().keys().filter(|id| !active_ids.contains(*id)).cloned().collect();
        for id in stale {
            self.unschedule_task(&id);
        }

        for task in active {
            let Some(next_fire) = task.next_execution_time else { continue };
            let needs_reschedule = match self.timers.read().get(&task.id) {
                Some(record) => record.scheduled_for != next_fire,
                None => true,
            };
            if needs_reschedule {
                if let Err(e) = self.schedule_task(task).await {
                    tracing::warn!(error = %e, "refresh_schedules failed to (re)schedule task");
                }
            }
        }
    }

    /// Health check per §4.4: purge timers whose `scheduled_for` has
    /// drifted more than `max_timer_drift_secs` into the past.
    pub async fn health_check(self: &Arc<Self>) {
        let now = Utc::now();
        let drift = chrono::Duration::seconds(self.config.max_timer_drift_secs as i64);
        let stale: Vec<String> = self
            .timers
            .read()
            .iter()
            .filter(|(_, record)| record.scheduled_for < now - drift)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0usize;
        for id in &stale {
            if self.unschedule_internal(id) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.refresh_schedules().await;
        }
        self.event_bus.publish(Event::HealthCheck { stale_timers_removed: removed });
    }

    /// Timer cleanup per §4.4: a full resync via `refreshSchedules`.
    pub async fn timer_cleanup(self: &Arc<Self>) {
        let before = self.timers.read().len();
        self.refresh_schedules().await;
        let after = self.timers.read().len();
        self.event_bus.publish(Event::TimerCleanup { before, after });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoopActionDispatcher;
    use crate::repository::InMemoryTaskRepository;
    use scheduler_domain::{ArmMode, ExecutorConfig, ScheduleExpression, Time, Weekday};

    fn test_engine(config: EngineConfig) -> (Arc<SchedulingEngine>, Arc<InMemoryTaskRepository>) {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let bus = Arc::new(EventBus::default());
        let executor = Arc::new(TaskExecutor::new(ExecutorConfig::default(), Arc::new(NoopActionDispatcher), bus.clone()));
        let engine = SchedulingEngine::new(config, repo.clone(), executor, bus);
        (engine, repo)
    }

    fn fast_config() -> EngineConfig {
        let mut c = EngineConfig::default();
        c.check_interval_secs = 1;
        c.health_check_interval_secs = 1;
        c.timer_cleanup_interval_secs = 1;
        c.max_concurrent_executions = 5;
        c
    }

    fn active_task(id: &str, next_fire: DateTime<Utc>) -> ScheduledTask {
        let expr = ScheduleExpression::new(vec![Weekday::Monday], Time::new(9, 0).unwrap(), "UTC").unwrap();
        let mut t = ScheduledTask::new_arm(id, "u1", expr, ArmMode::Away, vec![]).unwrap();
        t.activate().unwrap();
        t.next_execution_time = Some(next_fire);
        t
    }

    #[tokio::test]
    async fn schedule_rejects_when_not_running() {
        let (engine, _repo) = test_engine(fast_config());
        let task = active_task("t1", Utc::now() + chrono::Duration::seconds(5));
        let result = engine.schedule_task(task).await;
        assert!(matches!(result, Err(Error::EngineNotReady(_))));
    }

    #[tokio::test]
    async fn schedule_rejects_non_active_task() {
        let (engine, _repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();
        let expr = ScheduleExpression::new(vec![Weekday::Monday], Time::new(9, 0).unwrap(), "UTC").unwrap();
        let pending = ScheduledTask::new_arm("t1", "u1", expr, ArmMode::Away, vec![]).unwrap();
        let result = engine.schedule_task(pending).await;
        assert!(matches!(result, Err(Error::StateRule(_))));
        engine.stop(true).await.unwrap();
    }

    // Testable properties 9/10: schedule/unschedule are idempotent.
    #[tokio::test]
    async fn schedule_and_unschedule_are_idempotent() {
        let (engine, _repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();
        let task = active_task("t1", Utc::now() + chrono::Duration::seconds(30));

        engine.schedule_task(task.clone()).await.unwrap();
        assert_eq!(engine.status().timer_count, 1);
        // Re-scheduling the same id replaces the existing timer, not adds one.
        engine.schedule_task(task.clone()).await.unwrap();
        assert_eq!(engine.status().timer_count, 1);

        engine.unschedule_task("t1");
        assert_eq!(engine.status().timer_count, 0);
        // Unscheduling an already-unscheduled id is a silent no-op.
        engine.unschedule_task("t1");
        assert_eq!(engine.status().timer_count, 0);

        engine.stop(true).await.unwrap();
    }

    // Boundary 12 / Scenario S6: an overdue ACTIVE task at
    // start(load_existing=true) is deferred to now+1s and fires within 2s.
    #[tokio::test]
    async fn scenario_s6_overdue_task_deferred_and_fires_soon() {
        let (engine, repo) = test_engine(fast_config());
        let overdue = active_task("t1", Utc::now() - chrono::Duration::minutes(10));
        repo.save(overdue).await.unwrap();

        let before_start = Utc::now();
        engine.start(true).await.unwrap();

        let rescheduled = repo.find_by_id("t1").await.unwrap().unwrap();
        let next_fire = rescheduled.next_execution_time.unwrap();
        assert!(next_fire >= before_start + chrono::Duration::milliseconds(900));
        assert!(next_fire <= before_start + chrono::Duration::seconds(2));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let after = repo.find_by_id("t1").await.unwrap().unwrap();
        assert!(after.execution_count >= 1);

        engine.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_schedules_removes_stale_and_adds_missing() {
        let (engine, repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();

        let task = active_task("t1", Utc::now() + chrono::Duration::seconds(60));
        repo.save(task.clone()).await.unwrap();
        engine.refresh_schedules().await;
        assert_eq!(engine.status().timer_count, 1);

        // Cancel the task out from under the engine without going through unschedule_task.
        let mut cancelled = task;
        cancelled.cancel("test").unwrap();
        repo.save(cancelled).await.unwrap();
        engine.refresh_schedules().await;
        assert_eq!(engine.status().timer_count, 0);

        engine.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn health_check_purges_drifted_timers() {
        let mut cfg = fast_config();
        cfg.max_timer_drift_secs = 0;
        let (engine, repo) = test_engine(cfg);
        engine.start(false).await.unwrap();

        // Schedule far enough out that the fire task itself won't run
        // before we force drift by mutating the stored next_execution_time.
        let task = active_task("t1", Utc::now() + chrono::Duration::seconds(120));
        repo.save(task.clone()).await.unwrap();
        engine.schedule_task(task).await.unwrap();
        assert_eq!(engine.status().timer_count, 1);

        engine.health_check().await;
        assert_eq!(engine.status().timer_count, 0);

        engine.stop(true).await.unwrap();
    }

    // Testable property 4: |timers| + |in-flight| <= |active tasks in repo|.
    #[tokio::test]
    async fn timers_plus_in_flight_never_exceeds_active_tasks() {
        let (engine, repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();

        for i in 0..3 {
            let task = active_task(&format!("t{i}"), Utc::now() + chrono::Duration::seconds(60));
            repo.save(task.clone()).await.unwrap();
            engine.schedule_task(task).await.unwrap();
        }

        let status = engine.status();
        let active_count = repo.find_active().await.unwrap().len();
        assert!(status.timer_count + status.in_flight_ids.len() <= active_count);

        engine.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn status_upcoming_sorted_and_capped_at_five() {
        let (engine, repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();

        for i in 0..7 {
            let task = active_task(&format!("t{i}"), Utc::now() + chrono::Duration::seconds(60 - i));
            repo.save(task.clone()).await.unwrap();
            engine.schedule_task(task).await.unwrap();
        }

        let status = engine.status();
        assert_eq!(status.upcoming.len(), 5);
        for pair in status.upcoming.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }

        engine.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_timers_and_marks_not_running() {
        let (engine, repo) = test_engine(fast_config());
        engine.start(false).await.unwrap();
        let task = active_task("t1", Utc::now() + chrono::Duration::seconds(60));
        repo.save(task.clone()).await.unwrap();
        engine.schedule_task(task).await.unwrap();

        engine.stop(true).await.unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.status().timer_count, 0);
    }
}
