//! Task executor — bounded concurrent runner with queueing, per-attempt
//! timeout, and exponential-backoff retries. See `spec.md` §4.5.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use scheduler_domain::{ActionParams, Error, ExecutorConfig, Result};

use crate::dispatcher::{ActionDispatcher, ActionError, ExecutionRequest};
use crate::event_bus::{Event, EventBus, EventSink};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
struct ExecutionRecord {
    attempt: u32,
    started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionOverrides {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    /// `retryOnTimeout` per `spec.md` §4.5, default `true`.
    pub retry_on_timeout: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub task_id: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub current_retry: u32,
    pub total_retries: u32,
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ExecutorMetrics {
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub retried: u64,
    pub queue_high_water: usize,
    total_latency_ms: u64,
}

impl ExecutorMetrics {
    pub fn average_latency_ms(&self) -> f64 {
        if self.executed == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.executed as f64
        }
    }
}

enum RetryDecision {
    Retry(u32),
    Final(ExecutionOutcome),
}

enum Admission {
    Granted(tokio::sync::OwnedSemaphorePermit),
    QueueTimeout,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskExecutor {
    config: ExecutorConfig,
    dispatcher: Arc<dyn ActionDispatcher>,
    event_bus: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<RwLock<HashMap<String, ExecutionRecord>>>,
    shutting_down: Arc<AtomicBool>,
    queue_depth: Arc<AtomicUsize>,
    metrics: Arc<Mutex<ExecutorMetrics>>,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig, dispatcher: Arc<dyn ActionDispatcher>, event_bus: Arc<EventBus>) -> Self {
        let clamped = config.clamped();
        Self {
            semaphore: Arc::new(Semaphore::new(clamped.max_concurrent_tasks)),
            config: clamped,
            dispatcher,
            event_bus,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(Mutex::new(ExecutorMetrics::default())),
        }
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.metrics.lock().clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.read().len()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// `executeTask(id, overrides)` per §4.5.
    pub async fn execute_task(
        &self,
        task_id: &str,
        action_params: ActionParams,
        overrides: ExecutionOverrides,
    ) -> Result<ExecutionOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ExecutorNotReady("executor is shutting down".into()));
        }

        if let Some(existing) = self.in_flight.read().get(task_id).cloned() {
            return Ok(ExecutionOutcome {
                task_id: task_id.to_string(),
                success: false,
                started_at: existing.started_at,
                current_retry: existing.attempt,
                total_retries: existing.attempt,
                error: Some("already in-flight".into()),
            });
        }

        let permit = match self.acquire_permit(task_id).await? {
            Admission::Granted(permit) => permit,
            Admission::QueueTimeout => {
                return Ok(ExecutionOutcome {
                    task_id: task_id.to_string(),
                    success: false,
                    started_at: Utc::now(),
                    current_retry: 0,
                    total_retries: 0,
                    error: Some("queue-timeout".into()),
                });
            }
        };

        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ExecutorNotReady("executor is shutting down".into()));
        }

        self.run_with_retries(task_id, action_params, overrides, permit).await
    }

    /// Admit one attempt through the concurrency gate, with the same
    /// queue-timeout semantics whether this is the initial admission or
    /// re-admission after a retry's backoff.
    async fn acquire_permit(&self, task_id: &str) -> Result<Admission> {
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        {
            let mut m = self.metrics.lock();
            m.queue_high_water = m.queue_high_water.max(self.queue_depth.load(Ordering::SeqCst));
        }
        self.event_bus.publish(Event::TaskQueued { task_id: task_id.to_string() });

        let queue_timeout = Duration::from_millis(self.config.queue_timeout_ms);
        let permit_result = tokio::time::timeout(queue_timeout, self.semaphore.clone().acquire_owned()).await;
        self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        self.event_bus.publish(Event::TaskDequeued { task_id: task_id.to_string() });

        match permit_result {
            Ok(Ok(permit)) => Ok(Admission::Granted(permit)),
            Ok(Err(_)) => Err(Error::ExecutorNotReady("admission semaphore closed".into())),
            Err(_) => Ok(Admission::QueueTimeout),
        }
    }

    /// Final failure recorded when re-admission after a retry's backoff
    /// itself times out: the slot was released during the wait per §4.5
    /// and never became available again in time.
    fn finalize_requeue_timeout(&self, task_id: &str, started_at: DateTime<Utc>, attempt: u32) -> ExecutionOutcome {
        self.in_flight.write().remove(task_id);
        {
            let mut m = self.metrics.lock();
            m.executed += 1;
            m.failed += 1;
        }
        self.event_bus.publish(Event::TaskExecutionFailed { task_id: task_id.to_string(), error: "queue-timeout".into() });
        self.event_bus.publish(Event::TaskExecutionCompleted { task_id: task_id.to_string(), success: false, total_retries: attempt });
        ExecutionOutcome {
            task_id: task_id.to_string(),
            success: false,
            started_at,
            current_retry: attempt,
            total_retries: attempt,
            error: Some("queue-timeout".into()),
        }
    }

    async fn run_with_retries(
        &self,
        task_id: &str,
        action_params: ActionParams,
        overrides: ExecutionOverrides,
        mut permit: tokio::sync::OwnedSemaphorePermit,
    ) -> Result<ExecutionOutcome> {
        let max_retries = overrides.max_retries.unwrap_or(self.config.max_retries);
        let timeout_ms = overrides.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let retry_on_timeout = overrides.retry_on_timeout.unwrap_or(true);
        let started_at = Utc::now();
        let mut attempt = 0u32;

        loop {
            self.in_flight.write().insert(task_id.to_string(), ExecutionRecord { attempt, started_at });
            self.event_bus.publish(Event::TaskExecutionStarted { task_id: task_id.to_string(), attempt });

            let request = ExecutionRequest {
                action_params: action_params.clone(),
                execution_time: Utc::now(),
                ignore_overdue: false,
            };
            let attempt_result = tokio::time::timeout(Duration::from_millis(timeout_ms), self.dispatcher.execute(task_id, request)).await;

            let outcome = match attempt_result {
                Ok(r) => r,
                Err(_) => Err(ActionError::Timeout(format!("attempt {attempt} exceeded {timeout_ms}ms"))),
            };

            let retry_decision = match outcome {
                Ok(action_outcome) if action_outcome.success => {
                    drop(permit);
                    self.in_flight.write().remove(task_id);
                    let latency = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
                    {
                        let mut m = self.metrics.lock();
                        m.executed += 1;
                        m.succeeded += 1;
                        m.total_latency_ms += latency;
                    }
                    self.event_bus.publish(Event::TaskExecutionCompleted {
                        task_id: task_id.to_string(),
                        success: true,
                        total_retries: attempt,
                    });
                    return Ok(ExecutionOutcome {
                        task_id: task_id.to_string(),
                        success: true,
                        started_at,
                        current_retry: attempt,
                        total_retries: attempt,
                        error: None,
                    });
                }
                Ok(action_outcome) => {
                    let err = ActionError::Retryable(action_outcome.detail.unwrap_or_else(|| "action reported failure".into()));
                    self.handle_failure(task_id, err, attempt, max_retries, retry_on_timeout, started_at)
                }
                Err(action_err) => self.handle_failure(task_id, action_err, attempt, max_retries, retry_on_timeout, started_at),
            };

            match retry_decision {
                RetryDecision::Final(out) => {
                    drop(permit);
                    return Ok(out);
                }
                RetryDecision::Retry(next) => {
                    // Release the concurrency slot during the backoff so a
                    // concurrently-submitted task can use it, per §4.5.
                    drop(permit);
                    self.wait_and_reannounce(task_id, attempt).await;
                    permit = match self.acquire_permit(task_id).await? {
                        Admission::Granted(p) => p,
                        Admission::QueueTimeout => return Ok(self.finalize_requeue_timeout(task_id, started_at, next)),
                    };
                    attempt = next;
                }
            }
        }
    }

    /// Decide retry vs. final failure per §4.5's classification rules and
    /// (on final failure) record metrics + events. Does not sleep — the
    /// caller awaits the backoff so this stays a plain, testable function.
    fn handle_failure(
        &self,
        task_id: &str,
        err: ActionError,
        attempt: u32,
        max_retries: u32,
        retry_on_timeout: bool,
        started_at: DateTime<Utc>,
    ) -> RetryDecision {
        let attempts_remain = attempt < max_retries;
        let should_retry = match &err {
            ActionError::NonRetryable(_) => false,
            ActionError::Timeout(_) => retry_on_timeout && attempts_remain,
            ActionError::Retryable(_) => attempts_remain,
        };

        if should_retry {
            self.in_flight.write().remove(task_id);
            self.metrics.lock().retried += 1;
            return RetryDecision::Retry(attempt + 1);
        }

        self.in_flight.write().remove(task_id);
        {
            let mut m = self.metrics.lock();
            m.executed += 1;
            m.failed += 1;
            if matches!(err, ActionError::Timeout(_)) {
                m.timed_out += 1;
            }
        }
        self.event_bus.publish(Event::TaskExecutionFailed { task_id: task_id.to_string(), error: err.to_string() });
        self.event_bus.publish(Event::TaskExecutionCompleted {
            task_id: task_id.to_string(),
            success: false,
            total_retries: attempt,
        });
        RetryDecision::Final(ExecutionOutcome {
            task_id: task_id.to_string(),
            success: false,
            started_at,
            current_retry: attempt,
            total_retries: attempt,
            error: Some(err.to_string()),
        })
    }

    async fn wait_and_reannounce(&self, task_id: &str, attempt: u32) {
        let delay_ms = self.retry_delay_ms(attempt);
        self.event_bus.publish(Event::ExecutionRetry { task_id: task_id.to_string(), delay_ms, next_attempt: attempt + 1 });
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    /// `delay = min(retry-delay-max, base * 2^attempt * (0.5 + rand*0.5))`.
    fn retry_delay_ms(&self, attempt: u32) -> u64 {
        let base = self.config.retry_delay_base_ms as f64;
        let max = self.config.retry_delay_max_ms as f64;
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        let raw = base * 2f64.powi(attempt as i32) * jitter;
        raw.min(max).max(0.0).round() as u64
    }

    /// Batch execute: admits up to `min(batch_max_concurrent,
    /// executor-max-concurrent)` at once. If `continue_on_error` is
    /// false, stops launching new work after the first failure but
    /// waits for already-launched executions.
    pub async fn execute_batch(
        &self,
        requests: Vec<(String, ActionParams)>,
        batch_max_concurrent: usize,
        continue_on_error: bool,
    ) -> Vec<(String, Result<ExecutionOutcome>)> {
        let limit = batch_max_concurrent.min(self.config.max_concurrent_tasks).max(1);

        if continue_on_error {
            return stream::iter(requests)
                .map(|(id, params)| {
                    let this = self;
                    async move {
                        let outcome = this.execute_task(&id, params, ExecutionOverrides::default()).await;
                        (id, outcome)
                    }
                })
                .buffer_unordered(limit)
                .collect()
                .await;
        }

        let mut results = Vec::new();
        let mut remaining = requests.into_iter();
        let mut in_flight = stream::FuturesUnordered::new();
        let mut stop_launching = false;

        loop {
            while !stop_launching && in_flight.len() < limit {
                match remaining.next() {
                    Some((id, params)) => {
                        let this = self;
                        in_flight.push(async move {
                            let outcome = this.execute_task(&id, params, ExecutionOverrides::default()).await;
                            (id, outcome)
                        });
                    }
                    None => break,
                }
            }
            if in_flight.is_empty() {
                break;
            }
            if let Some((id, outcome)) = in_flight.next().await {
                let is_failure = match &outcome {
                    Ok(o) => !o.success,
                    Err(_) => true,
                };
                if is_failure {
                    stop_launching = true;
                }
                results.push((id, outcome));
            }
        }
        results
    }

    /// `shutdown(timeout)` per §4.5: set shutting-down, drop the queue
    /// (new admissions are rejected immediately), wait up to `timeout`
    /// for in-flight drain.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.in_flight.read().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let remaining = self.in_flight.read().len();
        self.event_bus.publish(Event::Shutdown { remaining_active: remaining });
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ActionOutcome;
    use std::sync::atomic::AtomicU32;

    struct FlakyDispatcher {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ActionDispatcher for FlakyDispatcher {
        async fn execute(&self, _task_id: &str, _request: ExecutionRequest) -> std::result::Result<crate::dispatcher::ActionOutcome, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ActionError::Retryable("transient".into()))
            } else {
                Ok(ActionOutcome { success: true, detail: None })
            }
        }
    }

    struct AlwaysFailDispatcher(ActionError);

    #[async_trait::async_trait]
    impl ActionDispatcher for AlwaysFailDispatcher {
        async fn execute(&self, _task_id: &str, _request: ExecutionRequest) -> std::result::Result<ActionOutcome, ActionError> {
            Err(self.0.clone())
        }
    }

    struct SlowDispatcher(Duration);

    #[async_trait::async_trait]
    impl ActionDispatcher for SlowDispatcher {
        async fn execute(&self, _task_id: &str, _request: ExecutionRequest) -> std::result::Result<ActionOutcome, ActionError> {
            tokio::time::sleep(self.0).await;
            Ok(ActionOutcome { success: true, detail: None })
        }
    }

    fn cfg() -> ExecutorConfig {
        let mut c = ExecutorConfig::default();
        c.max_concurrent_tasks = 2;
        c.max_retries = 3;
        c.retry_delay_base_ms = 10;
        c.retry_delay_max_ms = 100;
        c.default_timeout_ms = 2_000;
        c.queue_timeout_ms = 1_000;
        c
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let exec = TaskExecutor::new(cfg(), Arc::new(FlakyDispatcher { fail_times: 0, calls: AtomicU32::new(0) }), Arc::new(EventBus::default()));
        let outcome = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.total_retries, 0);
        assert_eq!(exec.metrics().succeeded, 1);
    }

    // S3: fails twice, succeeds on attempt 3.
    #[tokio::test]
    async fn scenario_s3_retries_then_succeeds() {
        let exec = TaskExecutor::new(cfg(), Arc::new(FlakyDispatcher { fail_times: 2, calls: AtomicU32::new(0) }), Arc::new(EventBus::default()));
        let outcome = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.total_retries, 2);
        let m = exec.metrics();
        assert_eq!(m.succeeded, 1);
        assert_eq!(m.retried, 2);
    }

    // S4: non-retryable failure, no retry, FAILED immediately.
    #[tokio::test]
    async fn scenario_s4_non_retryable_fails_immediately() {
        let exec = TaskExecutor::new(
            cfg(),
            Arc::new(AlwaysFailDispatcher(ActionError::NonRetryable("user not found".into()))),
            Arc::new(EventBus::default()),
        );
        let outcome = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.total_retries, 0);
        assert_eq!(outcome.error.as_deref(), Some("non-retryable: user not found"));
        assert_eq!(exec.metrics().failed, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_then_final_failure() {
        let mut c = cfg();
        c.max_retries = 1;
        let exec = TaskExecutor::new(c, Arc::new(AlwaysFailDispatcher(ActionError::Retryable("down".into()))), Arc::new(EventBus::default()));
        let outcome = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.total_retries, 1);
    }

    #[tokio::test]
    async fn already_in_flight_returns_non_success() {
        let exec = Arc::new(TaskExecutor::new(cfg(), Arc::new(SlowDispatcher(Duration::from_millis(200))), Arc::new(EventBus::default())));
        let e1 = exec.clone();
        let handle = tokio::spawn(async move { e1.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("already in-flight"));
        handle.await.unwrap().unwrap();
    }

    // S5: max-concurrent-tasks=2, queue-timeout=500ms, third is queued and times out.
    #[tokio::test]
    async fn scenario_s5_third_submission_queue_times_out() {
        let mut c = cfg();
        c.max_concurrent_tasks = 2;
        c.queue_timeout_ms = 500;
        let exec = Arc::new(TaskExecutor::new(c, Arc::new(SlowDispatcher(Duration::from_secs(2))), Arc::new(EventBus::default())));

        let e1 = exec.clone();
        let e2 = exec.clone();
        let h1 = tokio::spawn(async move { e1.execute_task("a", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await });
        let h2 = tokio::spawn(async move { e2.execute_task("b", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let third = exec.execute_task("c", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(!third.success);
        assert_eq!(third.error.as_deref(), Some("queue-timeout"));

        // Cancel the two long-running slow executions rather than waiting out the 2s sleep.
        h1.abort();
        h2.abort();
    }

    // Testable property 14: concurrency never exceeds max-concurrent-tasks.
    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let mut c = cfg();
        c.max_concurrent_tasks = 2;
        c.queue_timeout_ms = 2_000;
        let exec = Arc::new(TaskExecutor::new(c, Arc::new(SlowDispatcher(Duration::from_millis(100))), Arc::new(EventBus::default())));

        let mut handles = Vec::new();
        for i in 0..5 {
            let e = exec.clone();
            handles.push(tokio::spawn(async move {
                e.execute_task(&format!("t{i}"), ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(exec.in_flight_count(), 0);
    }

    // Concurrency slot is released during a retry's backoff wait, so a
    // task submitted while another is backing off is admitted immediately
    // instead of queueing for a free slot.
    #[tokio::test]
    async fn permit_released_during_backoff_allows_other_task_to_run() {
        let mut c = cfg();
        c.max_concurrent_tasks = 1;
        c.retry_delay_base_ms = 300;
        c.retry_delay_max_ms = 300;
        c.queue_timeout_ms = 50;
        let exec = Arc::new(TaskExecutor::new(
            c,
            Arc::new(FlakyDispatcher { fail_times: 1, calls: AtomicU32::new(0) }),
            Arc::new(EventBus::default()),
        ));

        let e1 = exec.clone();
        let handle = tokio::spawn(async move { e1.execute_task("a", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await });
        // Give "a" time to fail its first attempt and enter the backoff wait.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = exec.execute_task("b", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await.unwrap();
        assert!(second.success, "second task should be admitted while the first backs off, not queue-time out");

        let first = handle.await.unwrap().unwrap();
        assert!(first.success);
    }

    // Testable property 15: retry delay bounds.
    #[test]
    fn retry_delay_within_bounds() {
        let exec = TaskExecutor::new(cfg(), Arc::new(NoopForDelayTest), Arc::new(EventBus::default()));
        for attempt in 0..5u32 {
            let delay = exec.retry_delay_ms(attempt);
            let base = exec.config.retry_delay_base_ms as f64;
            let max = exec.config.retry_delay_max_ms as f64;
            let lower = (base * 2f64.powi(attempt as i32) * 0.5).floor() as u64;
            let upper = max.min(base * 2f64.powi(attempt as i32)).ceil() as u64;
            assert!(delay >= lower, "delay {delay} below lower bound {lower} at attempt {attempt}");
            assert!(delay <= upper, "delay {delay} above upper bound {upper} at attempt {attempt}");
        }
    }

    struct NoopForDelayTest;
    #[async_trait::async_trait]
    impl ActionDispatcher for NoopForDelayTest {
        async fn execute(&self, _task_id: &str, _request: ExecutionRequest) -> std::result::Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome { success: true, detail: None })
        }
    }

    #[tokio::test]
    async fn batch_execute_continue_on_error() {
        let exec = TaskExecutor::new(cfg(), Arc::new(FlakyDispatcher { fail_times: 0, calls: AtomicU32::new(0) }), Arc::new(EventBus::default()));
        let requests: Vec<_> = (0..4).map(|i| (format!("t{i}"), ActionParams::DisarmSystem { zone_ids: vec![] })).collect();
        let results = exec.execute_batch(requests, 2, true).await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().success));
    }

    #[tokio::test]
    async fn batch_execute_stops_on_first_failure_when_not_continuing() {
        let exec = TaskExecutor::new(cfg(), Arc::new(AlwaysFailDispatcher(ActionError::NonRetryable("invalid".into()))), Arc::new(EventBus::default()));
        let requests: Vec<_> = (0..4).map(|i| (format!("t{i}"), ActionParams::DisarmSystem { zone_ids: vec![] })).collect();
        let results = exec.execute_batch(requests, 2, false).await;
        // At least the first admitted batch (<= limit) attempted; no launches after the stop flag trips.
        assert!(results.len() <= 4);
        assert!(results.iter().any(|(_, r)| !r.as_ref().unwrap().success));
    }

    #[tokio::test]
    async fn shutdown_waits_for_drain_then_reports_remaining() {
        let exec = Arc::new(TaskExecutor::new(cfg(), Arc::new(SlowDispatcher(Duration::from_millis(50))), Arc::new(EventBus::default())));
        let e1 = exec.clone();
        let handle = tokio::spawn(async move { e1.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let remaining = exec.shutdown(Duration::from_millis(500)).await;
        assert_eq!(remaining, 0);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_admissions() {
        let exec = TaskExecutor::new(cfg(), Arc::new(NoopForDelayTest), Arc::new(EventBus::default()));
        exec.shutdown(Duration::from_millis(10)).await;
        let res = exec.execute_task("t1", ActionParams::DisarmSystem { zone_ids: vec![] }, ExecutionOverrides::default()).await;
        assert!(matches!(res, Err(Error::ExecutorNotReady(_))));
    }
}
