//! Scheduler configuration: engine, executor, and feature-flag settings.
//! See `spec.md` §6 and the component tables in §4.4/§4.5.

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine configuration (spec.md §4.4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the periodic sweep runs, in seconds. Clamped `1..=3600`.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Tasks overdue by more than this many minutes are logged as missed
    /// rather than silently fired. Clamped `0..=1440`.
    #[serde(default = "default_execution_tolerance_minutes")]
    pub execution_tolerance_minutes: i64,

    /// Ceiling on simultaneously in-flight executions across all tasks.
    /// Clamped `1..=10_000`.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// How often the engine's health check runs, in seconds.
    /// Clamped `1..=3600`.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// How often stale per-task timers are purged, in seconds.
    /// Clamped `1..=86_400`.
    #[serde(default = "default_timer_cleanup_interval_secs")]
    pub timer_cleanup_interval_secs: u64,

    /// Maximum allowed drift, in seconds, between a timer's intended fire
    /// instant and its actual fire before it's logged as drifted.
    /// Clamped `0..=3600`.
    #[serde(default = "default_max_timer_drift_secs")]
    pub max_timer_drift_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            execution_tolerance_minutes: default_execution_tolerance_minutes(),
            max_concurrent_executions: default_max_concurrent_executions(),
            health_check_interval_secs: default_health_check_interval_secs(),
            timer_cleanup_interval_secs: default_timer_cleanup_interval_secs(),
            max_timer_drift_secs: default_max_timer_drift_secs(),
        }
    }
}

impl EngineConfig {
    /// Clamp every field to its allowed range, per the teacher's
    /// `TaskConfig::clamped` pattern.
    pub fn clamped(&self) -> Self {
        Self {
            check_interval_secs: self.check_interval_secs.clamp(1, 3600),
            execution_tolerance_minutes: self.execution_tolerance_minutes.clamp(0, 1440),
            max_concurrent_executions: self.max_concurrent_executions.clamp(1, 10_000),
            health_check_interval_secs: self.health_check_interval_secs.clamp(1, 3600),
            timer_cleanup_interval_secs: self.timer_cleanup_interval_secs.clamp(1, 86_400),
            max_timer_drift_secs: self.max_timer_drift_secs.clamp(0, 3600),
        }
    }
}

fn default_check_interval_secs() -> u64 {
    60
}
fn default_execution_tolerance_minutes() -> i64 {
    5
}
fn default_max_concurrent_executions() -> usize {
    5
}
fn default_health_check_interval_secs() -> u64 {
    300
}
fn default_timer_cleanup_interval_secs() -> u64 {
    1_800
}
fn default_max_timer_drift_secs() -> u64 {
    60
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor configuration (spec.md §4.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of actions that may execute concurrently.
    /// Clamped `1..=64`.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Per-attempt timeout in milliseconds. Clamped `100..=300_000`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Maximum number of retry attempts after the initial attempt.
    /// Clamped `0..=10`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds before the first retry.
    /// Clamped `10..=60_000`.
    #[serde(default = "default_retry_delay_base_ms")]
    pub retry_delay_base_ms: u64,

    /// Backoff is capped at this many milliseconds regardless of attempt
    /// count. Clamped `1_000..=600_000`.
    #[serde(default = "default_retry_delay_max_ms")]
    pub retry_delay_max_ms: u64,

    /// How long a task may wait for a free execution slot before being
    /// dropped, in milliseconds. Clamped `1_000..=600_000`.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// How long `shutdown` waits for in-flight executions to drain before
    /// forcing cancellation, in milliseconds. Clamped `0..=120_000`.
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_base_ms: default_retry_delay_base_ms(),
            retry_delay_max_ms: default_retry_delay_max_ms(),
            queue_timeout_ms: default_queue_timeout_ms(),
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent_tasks: self.max_concurrent_tasks.clamp(1, 64),
            default_timeout_ms: self.default_timeout_ms.clamp(100, 300_000),
            max_retries: self.max_retries.clamp(0, 10),
            retry_delay_base_ms: self.retry_delay_base_ms.clamp(10, 60_000),
            retry_delay_max_ms: self.retry_delay_max_ms.clamp(1_000, 600_000),
            queue_timeout_ms: self.queue_timeout_ms.clamp(1_000, 600_000),
            graceful_shutdown_timeout_ms: self.graceful_shutdown_timeout_ms.clamp(0, 120_000),
        }
    }
}

fn default_max_concurrent_tasks() -> usize {
    3
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_base_ms() -> u64 {
    1_000
}
fn default_retry_delay_max_ms() -> u64 {
    30_000
}
fn default_queue_timeout_ms() -> u64 {
    600_000
}
fn default_graceful_shutdown_timeout_ms() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Feature flags (spec.md §6 — "none are required for the core to function")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub enable_dst: bool,
    #[serde(default)]
    pub enable_advanced_retries: bool,
    #[serde(default)]
    pub enable_persistence: bool,
    #[serde(default)]
    pub enable_distributed: bool,
    #[serde(default)]
    pub enable_performance_monitoring: bool,
    #[serde(default)]
    pub enable_analytics: bool,
    #[serde(default)]
    pub enable_failure_notifications: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_dst: default_true(),
            enable_advanced_retries: false,
            enable_persistence: false,
            enable_distributed: false,
            enable_performance_monitoring: false,
            enable_analytics: false,
            enable_failure_notifications: false,
        }
    }
}

fn default_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

macro_rules! warn_if_clamped {
    ($issues:expr, $field:literal, $orig:expr, $clamped:expr) => {
        if $clamped != $orig {
            $issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: $field.into(),
                message: format!("out of range, clamped {} -> {}", $orig, $clamped),
            });
        }
    };
}

impl SchedulerConfig {
    /// Validate the configuration and return a list of issues. Out-of-range
    /// numeric fields are not errors — per spec.md §6 they snap to the
    /// nearest bound with a warning; [`SchedulerConfig::clamped`] performs
    /// that snap.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.executor.retry_delay_max_ms < self.executor.retry_delay_base_ms {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "executor.retry_delay_max_ms".into(),
                message: "retry_delay_max_ms must be >= retry_delay_base_ms".into(),
            });
        }

        let e = self.engine.clamped();
        warn_if_clamped!(issues, "engine.check_interval_secs", self.engine.check_interval_secs, e.check_interval_secs);
        warn_if_clamped!(
            issues,
            "engine.execution_tolerance_minutes",
            self.engine.execution_tolerance_minutes,
            e.execution_tolerance_minutes
        );
        warn_if_clamped!(
            issues,
            "engine.max_concurrent_executions",
            self.engine.max_concurrent_executions,
            e.max_concurrent_executions
        );
        warn_if_clamped!(
            issues,
            "engine.health_check_interval_secs",
            self.engine.health_check_interval_secs,
            e.health_check_interval_secs
        );
        warn_if_clamped!(
            issues,
            "engine.timer_cleanup_interval_secs",
            self.engine.timer_cleanup_interval_secs,
            e.timer_cleanup_interval_secs
        );
        warn_if_clamped!(issues, "engine.max_timer_drift_secs", self.engine.max_timer_drift_secs, e.max_timer_drift_secs);

        let x = self.executor.clamped();
        warn_if_clamped!(issues, "executor.max_concurrent_tasks", self.executor.max_concurrent_tasks, x.max_concurrent_tasks);
        warn_if_clamped!(issues, "executor.default_timeout_ms", self.executor.default_timeout_ms, x.default_timeout_ms);
        warn_if_clamped!(issues, "executor.max_retries", self.executor.max_retries, x.max_retries);
        warn_if_clamped!(issues, "executor.queue_timeout_ms", self.executor.queue_timeout_ms, x.queue_timeout_ms);
        warn_if_clamped!(
            issues,
            "executor.graceful_shutdown_timeout_ms",
            self.executor.graceful_shutdown_timeout_ms,
            x.graceful_shutdown_timeout_ms
        );

        issues
    }

    /// A fully clamped copy, safe to hand to the runtime regardless of
    /// what `validate()` reported.
    pub fn clamped(&self) -> Self {
        Self {
            engine: self.engine.clamped(),
            executor: self.executor.clamped(),
            features: self.features.clone(),
        }
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}
