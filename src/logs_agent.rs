//! Log monitoring agent
//!
//! Triage over the most recent system log entries. Learning features:
//! - Learns the normal log volume and error rate
//! - Detects error spikes and suspicious volume drops
//! - Tracks recurring issue sources that are getting worse

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, LogBatch};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

const SYSTEM_LOG_LIMIT: u32 = 500;

/// A source appearing this often in one batch counts as recurring.
const RECURRING_THRESHOLD: usize = 5;

/// Messages containing any of these indicate serious trouble regardless of
/// the reported log level.
const CRITICAL_KEYWORDS: [&str; 8] = [
    "disk failure",
    "raid degraded",
    "volume crashed",
    "out of memory",
    "kernel panic",
    "data corruption",
    "hardware error",
    "temperature critical",
];

pub struct LogsAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
    /// Level/message patterns by descending severity; first match wins.
    error_patterns: Vec<(Regex, Priority)>,
}

impl LogsAgent {
    pub const NAME: &'static str = "logs";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        let error_patterns = vec![
            (Regex::new(r"critical|emergency|fatal").unwrap(), Priority::Critical),
            (Regex::new(r"error|failed|failure").unwrap(), Priority::High),
            (Regex::new(r"warning|warn").unwrap(), Priority::Medium),
        ];

        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
            error_patterns,
        }
    }

    fn analyze_logs(&mut self, logs: &LogBatch) -> Result<()> {
        if logs.logs.is_empty() {
            self.learning
                .add_feedback(Priority::Info, "No recent log entries to analyze", None);
            return Ok(());
        }

        let mut critical_count = 0usize;
        let mut error_count = 0usize;
        let mut warning_count = 0usize;
        let mut critical_messages: Vec<String> = Vec::new();
        let mut issue_sources: HashMap<String, usize> = HashMap::new();

        for entry in &logs.logs {
            let message = entry.message.to_lowercase();
            let level = entry.level.to_lowercase();
            let source = entry.source.as_deref().unwrap_or("unknown");

            if let Some(keyword) = CRITICAL_KEYWORDS.iter().find(|k| message.contains(*k)) {
                critical_count += 1;
                *issue_sources.entry(keyword.to_string()).or_default() += 1;
                if critical_messages.len() < 3 {
                    critical_messages.push(truncate(&entry.message, 100));
                }
                continue;
            }

            for (pattern, priority) in &self.error_patterns {
                if pattern.is_match(&level) || pattern.is_match(&message) {
                    match priority {
                        Priority::Critical => critical_count += 1,
                        Priority::High => error_count += 1,
                        _ => warning_count += 1,
                    }
                    *issue_sources.entry(source.to_string()).or_default() += 1;
                    break;
                }
            }
        }

        let total_entries = logs.logs.len();
        let total_errors = critical_count + error_count;
        let error_rate = total_errors as f64 / total_entries as f64 * 100.0;

        self.learning.observe("log_entries_count", total_entries, None)?;
        self.learning.observe("error_count", total_errors, None)?;
        self.learning.observe("error_rate", error_rate, None)?;
        self.learning.observe("critical_count", critical_count, None)?;
        self.learning.observe("warning_count", warning_count, None)?;

        self.check_log_anomalies(total_errors, total_entries)?;
        self.check_recurring_issues(&issue_sources)?;
        self.report_findings(
            critical_count,
            error_count,
            warning_count,
            &critical_messages,
            total_entries,
        )?;

        Ok(())
    }

    fn check_log_anomalies(&mut self, total_errors: usize, total_entries: usize) -> Result<()> {
        if self.learning.has_sufficient_data("error_count")
            && self.learning.is_anomaly("error_count", total_errors as f64)
        {
            if let Some(baseline) = self.learning.baseline_mean("error_count") {
                if total_errors as f64 > baseline * 2.0 {
                    self.learning.add_feedback_with_context(
                        Priority::High,
                        format!("Unusual spike in log errors: {} errors", total_errors),
                        "log_error_spike",
                        Context::from([(
                            "error_count".to_string(),
                            ContextValue::from(total_errors),
                        )]),
                        Some(format!("Normal: ~{:.0} errors", baseline)),
                    )?;
                }
            }
        }

        if self.learning.has_sufficient_data("log_entries_count")
            && self.learning.is_anomaly("log_entries_count", total_entries as f64)
        {
            if let Some(baseline) = self.learning.baseline_mean("log_entries_count") {
                if total_entries as f64 > baseline * 3.0 {
                    self.learning.add_feedback_with_context(
                        Priority::Medium,
                        format!("Unusual log volume: {} entries", total_entries),
                        "log_volume_high",
                        Context::from([(
                            "count".to_string(),
                            ContextValue::from(total_entries),
                        )]),
                        Some(format!(
                            "Normal: ~{:.0} entries - possible log spam or issues",
                            baseline
                        )),
                    )?;
                } else if (total_entries as f64) < baseline * 0.2 {
                    self.learning.add_feedback_with_context(
                        Priority::Medium,
                        format!("Unusually low log volume: {} entries", total_entries),
                        "log_volume_low",
                        Context::from([(
                            "count".to_string(),
                            ContextValue::from(total_entries),
                        )]),
                        Some(format!(
                            "Normal: ~{:.0} entries - logging may be broken",
                            baseline
                        )),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn check_recurring_issues(&mut self, issue_sources: &HashMap<String, usize>) -> Result<()> {
        let mut most_common: Vec<(&String, &usize)> = issue_sources.iter().collect();
        most_common.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (source, &count) in most_common.into_iter().take(3) {
            if count < RECURRING_THRESHOLD {
                continue;
            }

            let metric_name = format!("recurring_{}", source.replace(' ', "_"));
            self.learning.observe(&metric_name, count, None)?;

            if self.learning.trend(&metric_name) == Trend::Increasing {
                self.learning.add_feedback_with_context(
                    Priority::Medium,
                    format!("Recurring issue increasing: '{}' ({} occurrences)", source, count),
                    "recurring_issue",
                    Context::from([
                        ("source".to_string(), ContextValue::from(source.clone())),
                        ("count".to_string(), ContextValue::from(count)),
                    ]),
                    Some("This issue is becoming more frequent".to_string()),
                )?;
            }
        }

        Ok(())
    }

    fn report_findings(
        &mut self,
        critical_count: usize,
        error_count: usize,
        warning_count: usize,
        critical_messages: &[String],
        total_entries: usize,
    ) -> Result<()> {
        let trend_info = match self.learning.trend("error_count") {
            Trend::Increasing => " (trending up)",
            Trend::Decreasing => " (improving)",
            _ => "",
        };

        if critical_count > 0 {
            let details = if critical_messages.is_empty() {
                None
            } else {
                Some(critical_messages.join("; "))
            };
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("{} critical events in logs{}", critical_count, trend_info),
                "log_critical",
                Context::from([("count".to_string(), ContextValue::from(critical_count))]),
                details,
            )?;
        }

        if error_count > 0 {
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("{} error events in logs{}", error_count, trend_info),
                "log_errors",
                Context::from([("count".to_string(), ContextValue::from(error_count))]),
                None,
            )?;
        }

        if warning_count > 0 {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("{} warning events in logs", warning_count),
                "log_warnings",
                Context::from([("count".to_string(), ContextValue::from(warning_count))]),
                None,
            )?;
        }

        if critical_count + error_count + warning_count == 0 {
            self.learning.add_feedback(
                Priority::Low,
                format!("{} log entries analyzed without anomalies", total_entries),
                None,
            );
        }

        Ok(())
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}

#[async_trait]
impl HealthAgent for LogsAgent {
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
        let logs = self.client.system_logs(SYSTEM_LOG_LIMIT).await;
        match logs {
            Ok(logs) => self.analyze_logs(&logs)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not retrieve system logs: {}", err),
                None,
            ),
        }
        Ok(self.learning.take_feedback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, LogEntry, MockClient};
    use tempfile::tempdir;

    fn entry(level: &str, message: &str, source: &str) -> LogEntry {
        LogEntry {
            message: message.to_string(),
            level: level.to_string(),
            source: Some(source.to_string()),
            timestamp: chrono::Utc::now().timestamp(),
            event_type: String::new(),
            ip: String::new(),
            username: String::new(),
        }
    }

    fn agent_with(client: MockClient) -> (tempfile::TempDir, LogsAgent) {
        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()).unwrap());
        (dir, LogsAgent::new(Arc::new(client), memory))
    }

    #[tokio::test]
    async fn test_critical_keyword_beats_log_level() {
        let mut client = MockClient::default();
        client.syslog = Ok(LogBatch {
            logs: vec![entry("info", "RAID degraded on volume 2", "storaged")],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        let critical: Vec<_> = feedback
            .iter()
            .filter(|f| f.priority == Priority::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].message.contains("1 critical events"));
        assert!(critical[0]
            .details
            .as_deref()
            .unwrap()
            .contains("RAID degraded"));
    }

    #[tokio::test]
    async fn test_level_tiers_bucket_entries() {
        let mut client = MockClient::default();
        client.syslog = Ok(LogBatch {
            logs: vec![
                entry("error", "Service smbd failed to start", "smbd"),
                entry("error", "Connection failed", "sshd"),
                entry("warning", "Certificate expires soon", "nginx"),
                entry("info", "User logged in", "dsm"),
            ],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::High && f.message.contains("2 error events")));
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Medium && f.message.contains("1 warning events")));
    }

    #[tokio::test]
    async fn test_quiet_logs_report_low() {
        let mut client = MockClient::default();
        client.syslog = Ok(LogBatch {
            logs: vec![
                entry("info", "Scheduled task finished", "cron"),
                entry("info", "User logged in", "dsm"),
            ],
        });
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::Low && f.message.contains("2 log entries analyzed")));
    }

    #[tokio::test]
    async fn test_error_spike_detection() {
        let mut client = MockClient::default();
        let mut logs: Vec<LogEntry> = (0..20)
            .map(|i| entry("error", &format!("I/O failure {}", i), "kernel"))
            .collect();
        logs.push(entry("info", "noise", "dsm"));
        client.syslog = Ok(LogBatch { logs });
        let (_dir, mut agent) = agent_with(client);

        // Normal days see about 3 errors with a little spread.
        for value in [3.0, 2.0, 4.0, 3.0, 2.5, 3.5, 3.0, 2.8, 3.2, 3.0] {
            agent.learning().observe("error_count", value, None).unwrap();
        }

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.priority == Priority::High
                && f.message.contains("Unusual spike in log errors: 20")));
    }

    #[tokio::test]
    async fn test_trend_suffix_on_summary() {
        let mut client = MockClient::default();
        client.syslog = Ok(LogBatch {
            logs: vec![entry("error", "Connection failed", "sshd")],
        });
        let (_dir, mut agent) = agent_with(client);

        for value in [10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 20.0, 20.0, 20.0, 20.0] {
            agent.learning().observe("error_count", value, None).unwrap();
        }

        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.message.contains("error events in logs (trending up)")));
    }

    #[tokio::test]
    async fn test_recurring_issue_needs_increasing_trend() {
        let mut client = MockClient::default();
        client.syslog = Ok(LogBatch {
            logs: (0..6)
                .map(|i| entry("error", &format!("write failure {}", i), "smbd"))
                .collect(),
        });
        let (_dir, mut agent) = agent_with(client);

        // No history: the count alone does not raise the recurring alert.
        let feedback = agent.check().await.unwrap();
        assert!(!feedback.iter().any(|f| f.message.contains("Recurring issue")));

        // With a rising history for this source it does.
        for value in [1.0, 1.0, 2.0, 5.0, 6.0] {
            agent.learning().observe("recurring_smbd", value, None).unwrap();
        }
        let feedback = agent.check().await.unwrap();
        assert!(feedback
            .iter()
            .any(|f| f.message.contains("Recurring issue increasing: 'smbd'")));
    }

    #[tokio::test]
    async fn test_empty_batch_is_informational() {
        let client = MockClient::default();
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].priority, Priority::Info);
    }

    #[tokio::test]
    async fn test_api_failure_becomes_high_feedback() {
        let mut client = MockClient::default();
        client.syslog = Err(ApiError::Transport("tls handshake".to_string()));
        let (_dir, mut agent) = agent_with(client);

        let feedback = agent.check().await.unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].priority, Priority::High);
    }
}
