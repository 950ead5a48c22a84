//! Backup monitoring agent
//!
//! Watches backup task state and cadence. Learning features:
//! - Learns each task's typical interval and adjusts overdue thresholds
//! - Flags runs that take much longer than the learned duration
//! - Flags transfers that are suspiciously large or small
//! - Tracks the fleet-wide success rate trend

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, BackupInfo, BackupTaskRecord};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

const GIB: f64 = (1u64 << 30) as f64;

/// Default overdue thresholds in days, adjustable by learning.
const BACKUP_CRITICAL_DAYS: i64 = 7;
const BACKUP_WARNING_DAYS: i64 = 3;

/// Samples of a task's interval needed before thresholds adapt.
const INTERVAL_LEARNING_SAMPLES: u64 = 5;

struct OverdueThresholds {
    warning_days: i64,
    critical_days: i64,
}

pub struct BackupAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
}

impl BackupAgent {
    pub const NAME: &'static str = "backup";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
        }
    }

    fn analyze_backup_tasks(&mut self, info: &BackupInfo) -> Result<()> {
        if info.tasks.is_empty() {
            self.learning.add_feedback(
                Priority::Medium,
                "No backup tasks configured",
                Some("Consider setting up a backup task for data protection".to_string()),
            );
            return Ok(());
        }

        let now = Utc::now();
        let total_tasks = info.tasks.len();
        let mut successful_tasks = 0;

        for task in &info.tasks {
            let task_name = if task.name.is_empty() {
                "Unknown".to_string()
            } else {
                task.name.clone()
            };

            if task.transferred_bytes > 0 {
                self.learning.observe(
                    &format!("backup_size_{}", task_name),
                    task.transferred_bytes as f64 / GIB,
                    Some(task_context(&task_name)),
                )?;
            }
            if task.duration_seconds > 0 {
                self.learning.observe(
                    &format!("backup_duration_{}", task_name),
                    task.duration_seconds as f64 / 60.0,
                    Some(task_context(&task_name)),
                )?;
            }

            if task.status == "error" {
                self.learning.add_feedback_with_context(
                    Priority::Critical,
                    format!("Backup task '{}' in error state", task_name),
                    "backup_error",
                    Context::from([
                        ("task".to_string(), ContextValue::from(task_name.clone())),
                        ("status".to_string(), ContextValue::from("error")),
                    ]),
                    task.error_message.clone(),
                )?;
                continue;
            }

            if task.status == "running" {
                self.check_running_duration(&task_name, task.duration_seconds)?;
                self.learning.add_feedback(
                    Priority::Info,
                    format!("Backup task '{}' currently running", task_name),
                    None,
                );
                continue;
            }

            match task.last_backup_time {
                Some(last_backup) => match Utc.timestamp_opt(last_backup, 0) {
                    chrono::LocalResult::Single(last_time) => {
                        self.analyze_backup_timing(&task_name, last_time, now)?;
                        if task.transferred_bytes > 0 {
                            self.check_backup_size_anomaly(&task_name, task.transferred_bytes)?;
                        }
                        successful_tasks += 1;
                    }
                    _ => {
                        self.learning.add_feedback(
                            Priority::Info,
                            format!("Unable to parse last backup time for '{}'", task_name),
                            None,
                        );
                    }
                },
                None => {
                    self.learning.add_feedback_with_context(
                        Priority::High,
                        format!("Backup task '{}' has never run", task_name),
                        "backup_never_run",
                        task_context(&task_name),
                        None,
                    )?;
                }
            }
        }

        let success_rate = successful_tasks as f64 / total_tasks as f64 * 100.0;
        self.learning.observe("backup_success_rate", success_rate, None)?;

        if self.learning.trend("backup_success_rate") == Trend::Decreasing
            && self.learning.has_sufficient_data("backup_success_rate")
        {
            self.learning.add_feedback(
                Priority::High,
                "Backup success rate is declining",
                Some(format!("Current: {:.0}% tasks successful", success_rate)),
            );
        }

        Ok(())
    }

    fn analyze_backup_timing(
        &mut self,
        task_name: &str,
        last_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let elapsed = now.signed_duration_since(last_time);
        let days_since = elapsed.num_days();
        let hours_since = elapsed.num_seconds() as f64 / 3600.0;

        self.learning.observe(
            &format!("hours_since_backup_{}", task_name),
            hours_since,
            Some(task_context(task_name)),
        )?;

        let thresholds = self.adjusted_thresholds(task_name);
        let context = Context::from([
            ("task".to_string(), ContextValue::from(task_name)),
            ("days_since".to_string(), ContextValue::from(days_since)),
        ]);
        let last_run = last_time.format("%Y-%m-%d %H:%M");

        if days_since >= thresholds.critical_days {
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("Backup '{}' not run for {} days", task_name, days_since),
                "backup_overdue_critical",
                context,
                Some(format!("Last backup: {}", last_run)),
            )?;
        } else if days_since >= thresholds.warning_days {
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("Backup '{}' not run for {} days", task_name, days_since),
                "backup_overdue_warning",
                context,
                Some(format!("Last backup: {}", last_run)),
            )?;
        } else {
            self.learning.add_feedback(
                Priority::Low,
                format!("Backup '{}' completed successfully", task_name),
                Some(format!("Last backup: {}", last_run)),
            );
        }

        Ok(())
    }

    /// Flag an in-flight run once it clearly exceeds the learned duration.
    fn check_running_duration(&mut self, task_name: &str, current_duration: u64) -> Result<()> {
        let metric_name = format!("backup_duration_{}", task_name);

        if !self.learning.has_sufficient_data(&metric_name) {
            return Ok(());
        }

        let current_minutes = current_duration as f64 / 60.0;
        if self.learning.is_anomaly(&metric_name, current_minutes) {
            if let Some(baseline) = self.learning.baseline_mean(&metric_name) {
                if current_minutes > baseline * 1.5 {
                    self.learning.add_feedback_with_context(
                        Priority::Medium,
                        format!("Backup '{}' running longer than usual", task_name),
                        "backup_slow",
                        Context::from([
                            ("task".to_string(), ContextValue::from(task_name)),
                            (
                                "duration_minutes".to_string(),
                                ContextValue::from(current_minutes),
                            ),
                        ]),
                        Some(format!(
                            "Current: {:.0}min, Normal: ~{:.0}min",
                            current_minutes, baseline
                        )),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn check_backup_size_anomaly(&mut self, task_name: &str, backup_size: u64) -> Result<()> {
        let metric_name = format!("backup_size_{}", task_name);
        let size_gb = backup_size as f64 / GIB;

        if !self.learning.has_sufficient_data(&metric_name) {
            return Ok(());
        }
        if !self.learning.is_anomaly(&metric_name, size_gb) {
            return Ok(());
        }

        if let Some(baseline) = self.learning.baseline_mean(&metric_name) {
            let context = Context::from([
                ("task".to_string(), ContextValue::from(task_name)),
                ("size_gb".to_string(), ContextValue::from(size_gb)),
            ]);
            if size_gb > baseline * 2.0 {
                self.learning.add_feedback_with_context(
                    Priority::Medium,
                    format!("Backup '{}' unusually large", task_name),
                    "backup_size_high",
                    context,
                    Some(format!(
                        "Size: {:.1}GB (normal: ~{:.1}GB)",
                        size_gb, baseline
                    )),
                )?;
            } else if size_gb < baseline * 0.5 {
                self.learning.add_feedback_with_context(
                    Priority::Medium,
                    format!("Backup '{}' unusually small", task_name),
                    "backup_size_low",
                    context,
                    Some(format!(
                        "Size: {:.1}GB (normal: ~{:.1}GB) - verify backup integrity",
                        size_gb, baseline
                    )),
                )?;
            }
        }

        Ok(())
    }

    /// Overdue thresholds, replaced by the learned interval once known.
    fn adjusted_thresholds(&self, task_name: &str) -> OverdueThresholds {
        let mut thresholds = OverdueThresholds {
            warning_days: BACKUP_WARNING_DAYS,
            critical_days: BACKUP_CRITICAL_DAYS,
        };

        let metric_name = format!("hours_since_backup_{}", task_name);
        let baseline = self.learning.memory().get_baseline(Self::NAME, &metric_name);

        if let Some(baseline) = baseline {
            if baseline.sample_count >= INTERVAL_LEARNING_SAMPLES {
                let typical_interval_days = baseline.mean / 24.0;
                if typical_interval_days > 0.0 {
                    let learned_warning = (typical_interval_days * 1.5) as i64;
                    let learned_critical = (typical_interval_days * 3.0) as i64;

                    if (1..=14).contains(&learned_warning) {
                        thresholds.warning_days = learned_warning;
                    }
                    if (2..=30).contains(&learned_critical) {
                        thresholds.critical_days = learned_critical;
                    }
                }
            }
        }

        thresholds
    }
}

fn task_context(task_name: &str) -> Context {
    Context::from([("task".to_string(), ContextValue::from(task_name))])
}

#[async_trait]
impl HealthAgent for BackupAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn learning(&self) -> &LearningAgent {
        &self.learning
    }

    fn learning_mut(&mut self) -> &mut LearningAgent {
        &mut self.learning
    }

    async fn check(&mut self) -> Result<Vec<Feedback>> {
        let backup_info = self.client.backup_info().await;
        match backup_info {
            Ok(info) => self.analyze_backup_tasks(&info)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Failed to retrieve backup information: {}", err),
                None,
            ),
        }
        Ok(self.learning.take_feedback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, MockClient};
    use tempfile::tempdir;

    fn task(name: &str, status: &str, last_backup_days_ago: Option<i64>) -> BackupTaskRecord {
        BackupTaskRecord {
            name: name.to_string(),
            status: status.to_string(),
            last_backup_time: last_backup_days_ago
                .map(|days| (Utc::now() - chrono::Duration::days(days)).timestamp()),
            transferred_bytes: 0,
            duration_seconds: 0,
            error_message: None,
        }
    }

    fn agent_with(client: MockClient) -> (tempfile::TempDir, BackupAgent) {
        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()).unwrap());
        (dir, BackupAgent::new(Arc::new(client), memory))
    }

    #[tokio::test]
    async fn test_overdue_backup_is_high() {
        let mut client = MockClient::default();
        client.backups = Ok(BackupInfo {
            tasks: vec![task("Daily", "done", Some(4))],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::High && f.message.contains("not run for 4 days")));
    }

    #[tokio::test]
    async fn test_very_overdue_backup_is_critical() {
        let mut client = MockClient::default();
        client.backups = Ok(BackupInfo {
            tasks: vec![task("Weekly", "done", Some(10))],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Critical && f.message.contains("not run for 10 days")));
    }

    #[tokio::test]
    async fn test_recent_backup_is_low() {
        let mut client = MockClient::default();
        client.backups = Ok(BackupInfo {
            tasks: vec![task("Daily", "done", Some(0))],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Low && f.message.contains("completed successfully")));
    }

    #[tokio::test]
    async fn test_error_state_is_critical() {
        let mut client = MockClient::default();
        let mut broken = task("Offsite", "error", Some(1));
        broken.error_message = Some("Destination unreachable".to_string());
        client.backups = Ok(BackupInfo { tasks: vec![broken] });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        let critical: Vec<_> = feedback
            .iter()
            .filter(|f| f.priority == Priority::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].details.as_deref(), Some("Destination unreachable"));
    }

    #[tokio::test]
    async fn test_never_run_task_is_high() {
        let mut client = MockClient::default();
        client.backups = Ok(BackupInfo {
            tasks: vec![task("Fresh", "done", None)],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::High && f.message.contains("has never run")));
    }

    #[tokio::test]
    async fn test_invalid_timestamp_emits_info_and_skips() {
        let mut client = MockClient::default();
        let mut broken = task("Daily", "done", Some(1));
        broken.last_backup_time = Some(i64::MAX);
        client.backups = Ok(BackupInfo { tasks: vec![broken] });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback.iter().any(|f| {
            f.priority == Priority::Info && f.message.contains("Unable to parse last backup time")
        }));
        assert!(!feedback.iter().any(|f| f.message.contains("not run for")));
    }

    #[tokio::test]
    async fn test_learned_interval_tightens_thresholds() {
        let mut client = MockClient::default();
        client.backups = Ok(BackupInfo {
            tasks: vec![task("Hourly", "done", Some(2))],
        });
        let (_dir, mut agent) = agent_with(client);

        // Typical interval around 16 hours: warning at 1 day, critical at 2.
        for _ in 0..6 {
            agent
                .learning()
                .observe("hours_since_backup_Hourly", 16.0, None)
                .unwrap();
        }

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Critical && f.message.contains("not run for 2 days")));
    }

    #[tokio::test]
    async fn test_unusually_small_backup_flagged() {
        let mut client = MockClient::default();
        let mut small = task("Daily", "done", Some(0));
        small.transferred_bytes = 1 << 30;
        client.backups = Ok(BackupInfo { tasks: vec![small] });
        let (_dir, mut agent) = agent_with(client);

        // Normal transfers hover around 10 GB.
        for value in [10.0, 10.2, 9.8, 10.1, 9.9, 10.0, 10.3, 9.7, 10.0, 10.1] {
            agent
                .learning()
                .observe("backup_size_Daily", value, None)
                .unwrap();
        }

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Medium && f.message.contains("unusually small")));
    }

    #[tokio::test]
    async fn test_api_failure_becomes_high_feedback() {
        let mut client = MockClient::default();
        client.backups = Err(ApiError::Auth("session expired".to_string()));
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].priority, Priority::High);
        assert!(feedback[0].message.contains("Failed to retrieve backup information"));
    }
}
