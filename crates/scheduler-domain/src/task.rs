//! Scheduled-task entity and its lifecycle state machine.
//! See `spec.md` §3.4, §4.2, §4.3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expression::ScheduleExpression;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArmMode {
    Away,
    Stay,
}

/// Tagged sum over action kinds (`spec.md` §9 "Polymorphism across action
/// kinds"). The entity stores the tag and a typed parameter record; the
/// executor hands the tag opaquely to the action-dispatcher interface.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_kind", rename_all = "snake_case")]
pub enum ActionParams {
    ArmSystem {
        mode: ArmMode,
        #[serde(default)]
        zone_ids: Vec<String>,
    },
    DisarmSystem {
        #[serde(default)]
        zone_ids: Vec<String>,
    },
}

impl ActionParams {
    fn validate(&self) -> Result<()> {
        // Both variants are structurally valid by construction — `mode`
        // is a closed enum and `zone_ids` has no further constraint.
        // This hook exists so future action kinds with richer params
        // (e.g. a required non-empty zone list) have a single place to
        // enforce invariant 5 ("action-params is valid for action-kind
        // at all times").
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status / state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduledTask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub user_id: String,
    pub expression: ScheduleExpression,
    pub action_params: ActionParams,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}

impl ScheduledTask {
    /// Factory constructor. Validates `action_params` up front (invariant 5)
    /// and starts the task `PENDING` with no cached next-fire (invariant 1).
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        expression: ScheduleExpression,
        action_params: ActionParams,
    ) -> Result<Self> {
        action_params.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: id.into(),
            user_id: user_id.into(),
            expression,
            action_params,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            next_execution_time: None,
            last_execution_time: None,
            execution_count: 0,
            failure_count: 0,
            last_error: None,
        })
    }

    /// Convenience factory for an ARM_SYSTEM task.
    pub fn new_arm(
        id: impl Into<String>,
        user_id: impl Into<String>,
        expression: ScheduleExpression,
        mode: ArmMode,
        zone_ids: Vec<String>,
    ) -> Result<Self> {
        Self::new(id, user_id, expression, ActionParams::ArmSystem { mode, zone_ids })
    }

    /// Convenience factory for a DISARM_SYSTEM task.
    pub fn new_disarm(
        id: impl Into<String>,
        user_id: impl Into<String>,
        expression: ScheduleExpression,
        zone_ids: Vec<String>,
    ) -> Result<Self> {
        Self::new(id, user_id, expression, ActionParams::DisarmSystem { zone_ids })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Recompute `next_execution_time` from the current status + expression.
    /// On failure to evaluate the expression, transitions to FAILED per
    /// §4.2 ("if recomputation raises, the task transitions to FAILED").
    fn recompute_next_fire(&mut self, from: &DateTime<Utc>) {
        if self.status.is_terminal() {
            self.next_execution_time = None;
            return;
        }
        match self.expression.next_fire(from) {
            Ok(next) => self.next_execution_time = Some(next),
            Err(e) => {
                self.status = TaskStatus::Failed;
                self.last_error = Some(e.to_string());
                self.next_execution_time = None;
            }
        }
    }

    /// `PENDING -> ACTIVE`; also permitted as a recovery transition from
    /// `FAILED`. Rejected from terminal states (`COMPLETED`, `CANCELLED`).
    pub fn activate(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::StateRule(format!(
                "cannot activate task in terminal state {:?}",
                self.status
            )));
        }
        self.status = TaskStatus::Active;
        self.recompute_next_fire(&Utc::now());
        self.touch();
        Ok(())
    }

    /// Increment execution/failure counters, record the error, clear the
    /// next-fire, and transition to `FAILED`.
    pub fn mark_failed(&mut self, err: impl Into<String>, at: DateTime<Utc>) {
        self.execution_count += 1;
        self.failure_count += 1;
        self.last_error = Some(err.into());
        self.last_execution_time = Some(at);
        self.status = TaskStatus::Failed;
        self.next_execution_time = None;
        self.touch();
    }

    /// Increment `execution_count`, clear `last_error`, and — since every
    /// well-formed expression in scope is recurring — recompute the next
    /// fire and remain `ACTIVE`.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.execution_count += 1;
        self.last_execution_time = Some(at);
        self.last_error = None;
        self.recompute_next_fire(&at);
        self.touch();
    }

    /// `ACTIVE -> COMPLETED` for a non-recurring task. Every expression in
    /// scope admits a future fire (`spec.md` glossary: "Recurring task"),
    /// so callers use this for externally-driven completion (e.g. an
    /// operator retiring the task), not for a natural end-of-series.
    pub fn complete(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::StateRule(format!(
                "cannot complete task in terminal state {:?}",
                self.status
            )));
        }
        self.status = TaskStatus::Completed;
        self.next_execution_time = None;
        self.touch();
        Ok(())
    }

    /// Any non-terminal status -> `CANCELLED`.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::StateRule(format!(
                "cannot cancel task already in terminal state {:?}",
                self.status
            )));
        }
        self.status = TaskStatus::Cancelled;
        self.next_execution_time = None;
        self.last_error = Some(reason.into());
        self.touch();
        Ok(())
    }

    pub fn is_ready_for_execution(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Active
            && self.next_execution_time.map_or(false, |next| next <= now)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>, tolerance_minutes: i64) -> bool {
        self.is_ready_for_execution(now)
            && self
                .next_execution_time
                .map_or(false, |next| next <= now - chrono::Duration::minutes(tolerance_minutes))
    }

    /// Invariant checks, exposed for tests and defensive assertions at
    /// call sites that mutate tasks outside this module (e.g. a
    /// repository deserializing from storage).
    pub fn check_invariants(&self) -> Result<()> {
        if self.execution_count < self.failure_count {
            return Err(Error::Validation("execution_count must be >= failure_count".into()));
        }
        if self.updated_at < self.created_at {
            return Err(Error::Validation("updated_at must be >= created_at".into()));
        }
        let next_fire_null_expected = matches!(self.status, TaskStatus::Completed | TaskStatus::Cancelled);
        if next_fire_null_expected && self.next_execution_time.is_some() {
            return Err(Error::Validation(
                "next_execution_time must be null for COMPLETED/CANCELLED".into(),
            ));
        }
        self.action_params.validate()?;
        Ok(())
    }
}
