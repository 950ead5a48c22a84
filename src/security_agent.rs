//! Security monitoring agent
//!
//! Runs two isolated sub-checks: the appliance's security scan results and
//! the recent login logs. Learning features:
//! - Learns the normal daily failed-login volume and sets thresholds from it
//! - Detects spikes in unique attack-source IPs
//! - Flags logins during unusual night hours

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, LogBatch, SecurityScan};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

/// Default failed-login thresholds, replaced by the learned baseline.
const FAILED_LOGIN_CRITICAL: i64 = 50;
const FAILED_LOGIN_WARNING: i64 = 10;

/// Samples of daily failure counts needed before thresholds adapt.
const LOGIN_LEARNING_SAMPLES: u64 = 10;

const CONNECTION_LOG_LIMIT: u32 = 500;

struct LoginThresholds {
    warning: i64,
    critical: i64,
}

pub struct SecurityAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
}

impl SecurityAgent {
    pub const NAME: &'static str = "security";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
        }
    }

    fn analyze_security_scan(&mut self, scan: &SecurityScan) -> Result<()> {
        let mut critical_items: Vec<String> = Vec::new();
        let mut warning_items: Vec<String> = Vec::new();

        for item in &scan.items {
            let summary = format!("{}: {}", item.category, item.description);
            match item.status.as_str() {
                "danger" => critical_items.push(summary),
                "warning" => warning_items.push(summary),
                _ => {}
            }
        }

        let total_issues = critical_items.len() + warning_items.len();
        self.learning.observe("security_issues_total", total_issues, None)?;
        self.learning
            .observe("security_critical_count", critical_items.len(), None)?;
        self.learning
            .observe("security_warning_count", warning_items.len(), None)?;

        let trend = self.learning.trend("security_issues_total");

        if !critical_items.is_empty() {
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("{} critical security issues found", critical_items.len()),
                "security_critical",
                Context::from([(
                    "count".to_string(),
                    ContextValue::from(critical_items.len()),
                )]),
                Some(join_first(&critical_items, 3)),
            )?;
        }

        if !warning_items.is_empty() {
            let trend_info = if trend == Trend::Increasing {
                " (trending up)"
            } else {
                ""
            };
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("{} security warnings{}", warning_items.len(), trend_info),
                "security_warning",
                Context::from([(
                    "count".to_string(),
                    ContextValue::from(warning_items.len()),
                )]),
                Some(join_first(&warning_items, 3)),
            )?;
        }

        if critical_items.is_empty() && warning_items.is_empty() {
            self.learning
                .add_feedback(Priority::Low, "Security scan passed with no issues", None);
        }

        Ok(())
    }

    fn analyze_login_attempts(&mut self, logs: &LogBatch) -> Result<()> {
        let now = Utc::now();
        let last_24h = now - chrono::Duration::hours(24);

        let mut failed_attempts: i64 = 0;
        let mut successful_logins: i64 = 0;
        let mut attack_ips: HashSet<&str> = HashSet::new();
        let mut login_hours: Vec<u32> = Vec::new();

        for entry in &logs.logs {
            // An entry without a usable timestamp cannot be aged out, so it
            // stays in the 24-hour window.
            let entry_time = parse_timestamp(entry.timestamp);
            if let Some(time) = entry_time {
                if time <= last_24h {
                    continue;
                }
                login_hours.push(time.hour());
            }

            let event_type = entry.event_type.to_lowercase();
            if event_type.contains("fail") || event_type.contains("denied") {
                failed_attempts += 1;
                if !entry.ip.is_empty() {
                    attack_ips.insert(entry.ip.as_str());
                }
            } else if event_type.contains("success") || event_type.contains("login") {
                successful_logins += 1;
            }
        }

        self.learning.observe("failed_logins_24h", failed_attempts, None)?;
        self.learning
            .observe("successful_logins_24h", successful_logins, None)?;
        self.learning
            .observe("unique_ips_failed", attack_ips.len(), None)?;

        let total_attempts = failed_attempts + successful_logins;
        if total_attempts > 0 {
            let failure_rate = failed_attempts as f64 / total_attempts as f64 * 100.0;
            self.learning.observe("login_failure_rate", failure_rate, None)?;
        }

        let thresholds = self.adjusted_thresholds();
        let context = Context::from([
            (
                "failed_attempts".to_string(),
                ContextValue::from(failed_attempts),
            ),
            (
                "unique_ips".to_string(),
                ContextValue::from(attack_ips.len()),
            ),
        ]);

        let is_spike = self.learning.has_sufficient_data("failed_logins_24h")
            && self.learning.is_anomaly("failed_logins_24h", failed_attempts as f64);

        if failed_attempts >= thresholds.critical {
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("{} failed login attempts detected", failed_attempts),
                "login_failed_critical",
                context,
                Some(format!("From {} unique IPs", attack_ips.len())),
            )?;
        } else if failed_attempts >= thresholds.warning || is_spike {
            let spike_note = if is_spike { " (unusual spike)" } else { "" };
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("{} failed login attempts{}", failed_attempts, spike_note),
                "login_failed_warning",
                context,
                Some(format!("From {} unique IPs", attack_ips.len())),
            )?;
        } else if failed_attempts > 0 {
            self.learning.add_feedback(
                Priority::Info,
                format!("{} failed login attempts (normal range)", failed_attempts),
                None,
            );
        }

        self.check_unusual_login_times(&login_hours)?;
        self.check_attack_sources(attack_ips.len())?;

        Ok(())
    }

    /// More than a couple of logins between 02:00 and 05:00 UTC is worth a look.
    fn check_unusual_login_times(&mut self, login_hours: &[u32]) -> Result<()> {
        if login_hours.is_empty() {
            return Ok(());
        }

        for &hour in login_hours {
            self.learning.observe("login_hour", hour as i64, None)?;
        }

        let unusual = login_hours.iter().filter(|&&h| (2..=5).contains(&h)).count();
        if unusual > 2 {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("{} logins at unusual hours (2-5 AM)", unusual),
                "unusual_login_time",
                Context::from([("count".to_string(), ContextValue::from(unusual))]),
                Some("Verify these are legitimate".to_string()),
            )?;
        }

        Ok(())
    }

    fn check_attack_sources(&mut self, ip_count: usize) -> Result<()> {
        if ip_count == 0 {
            return Ok(());
        }

        self.learning.observe("attack_source_count", ip_count, None)?;

        if self.learning.has_sufficient_data("attack_source_count")
            && self.learning.is_anomaly("attack_source_count", ip_count as f64)
        {
            if let Some(baseline) = self.learning.baseline_mean("attack_source_count") {
                if ip_count as f64 > baseline * 2.0 {
                    self.learning.add_feedback_with_context(
                        Priority::High,
                        format!("Unusual number of attack sources: {} IPs", ip_count),
                        "attack_sources_spike",
                        Context::from([("ip_count".to_string(), ContextValue::from(ip_count))]),
                        Some(format!("Normal: ~{:.0} IPs", baseline)),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn adjusted_thresholds(&self) -> LoginThresholds {
        let mut thresholds = LoginThresholds {
            warning: FAILED_LOGIN_WARNING,
            critical: FAILED_LOGIN_CRITICAL,
        };

        let memory = self.learning.memory();
        if let Some(baseline) = memory.get_baseline(Self::NAME, "failed_logins_24h") {
            if baseline.sample_count >= LOGIN_LEARNING_SAMPLES {
                thresholds.warning = 10.max((baseline.mean + 2.0 * baseline.std_dev) as i64);
                thresholds.critical = 20.max((baseline.mean + 4.0 * baseline.std_dev) as i64);
            }
        }

        if memory.get_false_positive_rate(Self::NAME, "login_failed_warning") > 0.4 {
            thresholds.warning = (thresholds.warning as f64 * 1.5) as i64;
        }

        thresholds
    }
}

fn parse_timestamp(timestamp: i64) -> Option<DateTime<Utc>> {
    if timestamp <= 0 {
        return None;
    }
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(time) => Some(time),
        _ => None,
    }
}

fn join_first(items: &[String], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl HealthAgent for SecurityAgent {
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
        let scan = self.client.security_scan().await;
        match scan {
            Ok(scan) => self.analyze_security_scan(&scan)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not retrieve security scan: {}", err),
                None,
            ),
        }

        let logs = self.client.connection_logs(CONNECTION_LOG_LIMIT).await;
        match logs {
            Ok(logs) => self.analyze_login_attempts(&logs)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not retrieve connection logs: {}", err),
                None,
            ),
        }

        Ok(self.learning.take_feedback())
    }
}
