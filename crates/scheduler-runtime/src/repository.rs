//! Scheduled-task repository — the consumed storage contract of
//! `spec.md` §6, plus an in-memory reference implementation so the crate
//! is runnable and testable standalone (the production store is a
//! separate crate that implements this trait, the way the teacher's
//! HTTP/persistence layers sit behind `sa-domain`'s interfaces).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scheduler_domain::{Error, Result, ScheduledTask};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save(&self, task: ScheduledTask) -> Result<ScheduledTask>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>>;
    async fn find_active(&self) -> Result<Vec<ScheduledTask>>;
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<ScheduledTask>>;
    async fn find_by_next_execution_time_before(&self, t: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// `HashMap`-backed reference repository, guarded the way the teacher
/// guards `ScheduleStore`'s in-memory map: narrow methods, no lock held
/// across an `.await`.
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: ScheduledTask) -> Result<ScheduledTask> {
        let mut tasks = self.tasks.write();
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn find_active(&self) -> Result<Vec<ScheduledTask>> {
        use scheduler_domain::TaskStatus;
        Ok(self.tasks.read().values().filter(|t| t.status == TaskStatus::Active).cloned().collect())
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<ScheduledTask>> {
        Ok(self.tasks.read().values().filter(|t| t.user_id == user_id).cloned().collect())
    }

    async fn find_by_next_execution_time_before(&self, t: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|task| task.next_execution_time.map_or(false, |next| next < t))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.write().remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.read().contains_key(id))
    }
}

/// Convenience used by the engine/bootstrap to surface a consistent
/// repository-error kind on access failures that the in-memory store
/// itself never raises but a real backend would.
pub fn repository_error(msg: impl Into<String>) -> Error {
    Error::Repository(msg.into())
}
