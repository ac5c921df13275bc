//! Bootstrap — wires engine, executor, repository, and event bus
//! together, forwards lifecycle events into the engine, installs a
//! signal handler, and reports aggregate health. See `spec.md` §4.6.
//! Grounded in the teacher's `build_app_state()`/`spawn_background_tasks()`
//! wiring in `bootstrap.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;

use scheduler_domain::Result;

use crate::engine::SchedulingEngine;
use crate::event_bus::{Event, EventBus, EventSink};
use crate::executor::TaskExecutor;
use crate::repository::TaskRepository;

#[derive(Debug, Clone, Copy)]
pub struct BootstrapOptions {
    pub auto_start: bool,
    pub load_existing: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self { auto_start: true, load_existing: true }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    pub timeout: Duration,
    pub cancel_active: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), cancel_active: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Error,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: Vec<String>,
}

pub struct Bootstrap {
    engine: Arc<SchedulingEngine>,
    executor: Arc<TaskExecutor>,
    #[allow(dead_code)]
    repository: Arc<dyn TaskRepository>,
    event_bus: Arc<EventBus>,
    initialized: AtomicBool,
    started: AtomicBool,
    shutting_down: AtomicBool,
    startup_time: Mutex<Option<DateTime<Utc>>>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
    signal_handler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Bootstrap {
    pub fn new(engine: Arc<SchedulingEngine>, executor: Arc<TaskExecutor>, repository: Arc<dyn TaskRepository>, event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            executor,
            repository,
            event_bus,
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            startup_time: Mutex::new(None),
            listener: Mutex::new(None),
            signal_handler: Mutex::new(None),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// `initialize(opts)` per §4.6: dependencies (engine, executor,
    /// repository, event bus) are non-null by construction — every field
    /// here is an `Arc`, so the validation step is the type system.
    /// Subscribes to lifecycle events and, if `auto_start`, starts.
    pub async fn initialize(self: &Arc<Self>, opts: BootstrapOptions) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!("bootstrap already initialized; initialize() is a no-op");
            return Ok(());
        }

        self.subscribe_lifecycle_events();

        if opts.auto_start {
            self.start(opts.load_existing).await?;
        }
        Ok(())
    }

    fn subscribe_lifecycle_events(self: &Arc<Self>) {
        let mut rx = self.event_bus.subscribe();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::ScheduleCreated { task }) => {
                        if let Err(e) = this.engine.schedule_task(task).await {
                            tracing::warn!(error = %e, "failed to schedule task from ScheduleCreated event");
                        }
                    }
                    Ok(Event::ScheduleUpdated { task }) => {
                        if let Err(e) = this.engine.reschedule_task(task).await {
                            tracing::warn!(error = %e, "failed to reschedule task from ScheduleUpdated event");
                        }
                    }
                    Ok(Event::ScheduleCancelled { task_id }) => {
                        this.engine.unschedule_task(&task_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "bootstrap lifecycle listener lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.listener.lock() = Some(handle);
    }

    /// Installs a `ctrl_c` handler that drives a graceful `stop()` before
    /// exiting the process, per §4.6 ("exits process only after stop
    /// completes or its timeout elapses").
    fn install_signal_handler(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received termination signal, shutting down gracefully");
                let _ = this.stop(StopOptions::default()).await;
                std::process::exit(0);
            }
        });
        *self.signal_handler.lock() = Some(handle);
    }

    /// `start` per §4.6: start the engine, install the signal handler,
    /// mark started, emit `scheduler.started`.
    pub async fn start(self: &Arc<Self>, load_existing: bool) -> Result<()> {
        self.engine.start(load_existing).await?;
        self.install_signal_handler();
        *self.startup_time.lock() = Some(Utc::now());
        self.started.store(true, Ordering::SeqCst);
        self.event_bus.publish(Event::SchedulerStarted);
        Ok(())
    }

    /// `stop(opts)` per §4.6: concurrently stop the engine and shut down
    /// the executor, each wrapped to swallow its own error, raced against
    /// `opts.timeout`.
    pub async fn stop(self: &Arc<Self>, opts: StopOptions) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        let executor = Arc::clone(&self.executor);
        let cancel_active = opts.cancel_active;
        let shutdown_timeout = opts.timeout;

        let combined = async move {
            tokio::join!(
                async {
                    if let Err(e) = engine.stop(cancel_active).await {
                        tracing::warn!(error = %e, "engine.stop reported an error during shutdown");
                    }
                },
                async {
                    executor.shutdown(shutdown_timeout).await;
                }
            );
        };
        if tokio::time::timeout(shutdown_timeout, combined).await.is_err() {
            tracing::warn!("shutdown timed out before engine/executor fully drained");
        }

        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.signal_handler.lock().take() {
            handle.abort();
        }

        self.started.store(false, Ordering::SeqCst);
        self.event_bus.publish(Event::SchedulerStopped);
        Ok(())
    }

    /// Aggregate health per §4.6.
    pub fn health_check(&self) -> HealthReport {
        if !self.is_initialized() || !self.is_started() {
            return HealthReport { status: HealthStatus::Unhealthy, details: vec!["bootstrap is not initialized/started".into()] };
        }
        if !self.engine.is_running() {
            return HealthReport { status: HealthStatus::Unhealthy, details: vec!["scheduling engine is not running".into()] };
        }

        let queue_len = self.executor.queue_depth();
        if queue_len > 10 {
            return HealthReport {
                status: HealthStatus::Degraded,
                details: vec![format!("executor queue length {queue_len} exceeds 10")],
            };
        }

        HealthReport { status: HealthStatus::Healthy, details: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::NoopActionDispatcher;
    use crate::repository::InMemoryTaskRepository;
    use scheduler_domain::{ArmMode, EngineConfig, ExecutorConfig, ScheduleExpression, Time, Weekday};

    fn test_bootstrap() -> Arc<Bootstrap> {
        let repo: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
        let bus = Arc::new(EventBus::default());
        let executor = Arc::new(TaskExecutor::new(ExecutorConfig::default(), Arc::new(NoopActionDispatcher), bus.clone()));
        let mut engine_cfg = EngineConfig::default();
        engine_cfg.check_interval_secs = 1;
        engine_cfg.health_check_interval_secs = 1;
        engine_cfg.timer_cleanup_interval_secs = 1;
        let engine = SchedulingEngine::new(engine_cfg, repo.clone(), executor.clone(), bus.clone());
        Bootstrap::new(engine, executor, repo, bus)
    }

    fn sample_task(id: &str) -> scheduler_domain::ScheduledTask {
        let expr = ScheduleExpression::new(vec![Weekday::Monday], Time::new(9, 0).unwrap(), "UTC").unwrap();
        let mut t = scheduler_domain::ScheduledTask::new_arm(id, "u1", expr, ArmMode::Away, vec![]).unwrap();
        t.activate().unwrap();
        t
    }

    #[tokio::test]
    async fn initialize_with_auto_start_reports_healthy() {
        let bootstrap = test_bootstrap();
        bootstrap.initialize(BootstrapOptions { auto_start: true, load_existing: false }).await.unwrap();
        assert!(bootstrap.is_initialized());
        assert!(bootstrap.is_started());
        let health = bootstrap.health_check();
        assert_eq!(health.status, HealthStatus::Healthy);
        bootstrap.stop(StopOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn health_unhealthy_before_started() {
        let bootstrap = test_bootstrap();
        let health = bootstrap.health_check();
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let bootstrap = test_bootstrap();
        bootstrap.initialize(BootstrapOptions { auto_start: false, load_existing: false }).await.unwrap();
        bootstrap.initialize(BootstrapOptions { auto_start: false, load_existing: false }).await.unwrap();
        assert!(bootstrap.is_initialized());
        assert!(!bootstrap.is_started());
    }

    #[tokio::test]
    async fn schedule_created_event_is_forwarded_to_engine() {
        let bootstrap = test_bootstrap();
        bootstrap.initialize(BootstrapOptions { auto_start: true, load_existing: false }).await.unwrap();

        let task = sample_task("t1");
        bootstrap.event_bus.publish(Event::ScheduleCreated { task });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bootstrap.engine.status().timer_count, 1);

        bootstrap.event_bus.publish(Event::ScheduleCancelled { task_id: "t1".into() });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bootstrap.engine.status().timer_count, 0);

        bootstrap.stop(StopOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn stop_marks_not_started_and_is_idempotent() {
        let bootstrap = test_bootstrap();
        bootstrap.initialize(BootstrapOptions { auto_start: true, load_existing: false }).await.unwrap();
        bootstrap.stop(StopOptions::default()).await.unwrap();
        assert!(!bootstrap.is_started());
        // A second stop is a no-op, not an error.
        bootstrap.stop(StopOptions::default()).await.unwrap();
    }
}
