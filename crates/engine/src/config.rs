//! Engine configuration.
//!
//! Both structs deserialize with per-field defaults so a partial config file
//! (or none at all) yields a working engine. Durations accept humantime
//! strings (`"30s"`, `"5m"`, `"1h"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Worker pool sizing, auto-scaling, and shutdown behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Lower bound on live workers; floor for scale-down.
    pub min_workers: usize,
    /// Upper bound on live workers; ceiling for scale-up.
    pub max_workers: usize,
    /// Whether the auto-scaler loop runs at all.
    pub enable_auto_scaling: bool,
    /// Queue usage above which workers are added.
    pub scale_up_threshold: f64,
    /// Queue usage below which workers are removed.
    pub scale_down_threshold: f64,
    /// Auto-scaler wake period.
    #[serde(with = "humantime_serde")]
    pub scale_check_interval: Duration,
    /// Maximum wait for a clean pool stop.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_workers: 5,
            max_workers: 50,
            enable_auto_scaling: true,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_check_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Rejects configurations the pool cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 {
            return Err(Error::InvalidConfig(
                "worker.min_workers must be at least 1".into(),
            ));
        }
        if self.max_workers < self.min_workers {
            return Err(Error::InvalidConfig(format!(
                "worker.max_workers ({}) must not be below worker.min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if !(0.0..=1.0).contains(&self.scale_up_threshold)
            || !(0.0..=1.0).contains(&self.scale_down_threshold)
        {
            return Err(Error::InvalidConfig(
                "worker scale thresholds must be within 0.0..=1.0".into(),
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(Error::InvalidConfig(
                "worker.scale_down_threshold must be below worker.scale_up_threshold".into(),
            ));
        }
        if self.scale_check_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "worker.scale_check_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Task queue sizing and per-task lifecycle knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Bounded job queue size.
    pub queue_capacity: usize,
    /// Advisory cap on concurrently executing tasks.
    pub max_concurrent_tasks: usize,
    /// Per-job deadline when the submission supplies nothing tighter.
    #[serde(with = "humantime_serde")]
    pub default_task_timeout: Duration,
    /// How long terminal tasks stay in the registry before reaping.
    #[serde(with = "humantime_serde")]
    pub cleanup_completed_tasks_after: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_concurrent_tasks: 100,
            default_task_timeout: Duration::from_secs(300),
            cleanup_completed_tasks_after: Duration::from_secs(3600),
        }
    }
}

impl TaskConfig {
    /// Rejects configurations the manager cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "task.queue_capacity must be at least 1".into(),
            ));
        }
        if self.default_task_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "task.default_task_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn worker_defaults() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.min_workers, 5);
        assert_eq!(cfg.max_workers, 50);
        assert!(cfg.enable_auto_scaling);
        assert_eq!(cfg.scale_up_threshold, 0.8);
        assert_eq!(cfg.scale_down_threshold, 0.3);
        assert_eq!(cfg.scale_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(30));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn task_defaults() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.max_concurrent_tasks, 100);
        assert_eq!(cfg.default_task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.cleanup_completed_tasks_after, Duration::from_secs(3600));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: WorkerConfig = serde_json::from_value(json!({
            "min_workers": 2,
            "scale_check_interval": "100ms",
        }))
        .unwrap();
        assert_eq!(cfg.min_workers, 2);
        assert_eq!(cfg.max_workers, 50);
        assert_eq!(cfg.scale_check_interval, Duration::from_millis(100));
    }

    #[test]
    fn humantime_strings_parse() {
        let cfg: TaskConfig = serde_json::from_value(json!({
            "default_task_timeout": "5m",
            "cleanup_completed_tasks_after": "1h",
        }))
        .unwrap();
        assert_eq!(cfg.default_task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.cleanup_completed_tasks_after, Duration::from_secs(3600));
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let cfg = WorkerConfig {
            min_workers: 10,
            max_workers: 2,
            ..WorkerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = WorkerConfig {
            min_workers: 0,
            ..WorkerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = WorkerConfig {
            scale_up_threshold: 0.2,
            scale_down_threshold: 0.5,
            ..WorkerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = TaskConfig {
            queue_capacity: 0,
            ..TaskConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
