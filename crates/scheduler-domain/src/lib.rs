pub mod config;
pub mod error;
pub mod expression;
pub mod task;
pub mod time;
pub mod weekday;

pub use config::{ConfigIssue, ConfigSeverity, EngineConfig, ExecutorConfig, FeatureFlags, SchedulerConfig};
pub use error::{Error, Result};
pub use expression::ScheduleExpression;
pub use task::{ActionParams, ArmMode, ScheduledTask, TaskStatus};
pub use time::Time;
pub use weekday::Weekday;
