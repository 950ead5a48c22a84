//! Updates monitoring agent
//!
//! Watches system update availability and cadence. Learning features:
//! - Learns the typical time between updates and adjusts reminders
//! - Escalates security updates and critical fixes
//! - Notes when a reboot is pending

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, DsmInfo, UpdateInfo};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

/// Default update cadence thresholds in days, adjustable by learning.
const DAYS_WITHOUT_UPDATE_WARNING: i64 = 30;
const DAYS_WITHOUT_UPDATE_CRITICAL: i64 = 90;

/// Samples of update intervals needed before thresholds adapt.
const CADENCE_LEARNING_SAMPLES: u64 = 5;

/// Release-note phrases that mark an update as urgent.
const CRITICAL_FIX_KEYWORDS: [&str; 4] = ["critical", "vulnerability", "cve-", "security fix"];

struct CadenceThresholds {
    warning_days: i64,
    critical_days: i64,
}

pub struct UpdatesAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
}

impl UpdatesAgent {
    pub const NAME: &'static str = "updates";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
        }
    }

    fn analyze_updates(&mut self, dsm_info: &DsmInfo, update_info: &UpdateInfo) -> Result<()> {
        let current_version = if dsm_info.version_string.is_empty() {
            "Unknown"
        } else {
            dsm_info.version_string.as_str()
        };

        self.learning
            .observe("update_available", if update_info.available { 1 } else { 0 }, None)?;

        if dsm_info.last_update_time > 0 {
            match Utc.timestamp_opt(dsm_info.last_update_time, 0) {
                chrono::LocalResult::Single(last_update) => {
                    let days_since_update =
                        Utc::now().signed_duration_since(last_update).num_days();
                    self.learning
                        .observe("days_since_update", days_since_update, None)?;
                    self.check_update_cadence(days_since_update)?;
                }
                _ => {
                    self.learning.add_feedback(
                        Priority::Info,
                        "Unable to parse last update time",
                        None,
                    );
                }
            }
        }

        if update_info.available {
            self.handle_available_update(update_info, current_version)?;
        } else {
            self.learning.add_feedback(
                Priority::Low,
                format!("DSM {} is up to date", current_version),
                None,
            );
        }

        if update_info.reboot_needed {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                "System reboot required to complete updates",
                "reboot_required",
                Context::from([("pending".to_string(), ContextValue::from(true))]),
                None,
            )?;
        }

        self.check_update_patterns()?;
        Ok(())
    }

    fn handle_available_update(
        &mut self,
        update_info: &UpdateInfo,
        current_version: &str,
    ) -> Result<()> {
        let new_version = if update_info.version.is_empty() {
            "Unknown"
        } else {
            update_info.version.as_str()
        };

        let is_security = update_info.update_type.to_lowercase().contains("security");
        let release_notes = update_info.release_notes.to_lowercase();
        let has_critical_fixes = CRITICAL_FIX_KEYWORDS
            .iter()
            .any(|keyword| release_notes.contains(keyword));

        let context = Context::from([
            (
                "current_version".to_string(),
                ContextValue::from(current_version),
            ),
            ("new_version".to_string(), ContextValue::from(new_version)),
            ("is_security".to_string(), ContextValue::from(is_security)),
        ]);

        if is_security || has_critical_fixes {
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("Security update available: DSM {}", new_version),
                "update_security",
                context,
                Some(format!("Current version: {}", current_version)),
            )?;

            if has_critical_fixes {
                self.learning.add_feedback(
                    Priority::High,
                    "Update contains critical security fixes",
                    Some("Review release notes and update as soon as possible".to_string()),
                );
            }
        } else {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("DSM update available: {}", new_version),
                "update_available",
                context,
                Some(format!("Current version: {}", current_version)),
            )?;
        }

        Ok(())
    }

    fn check_update_cadence(&mut self, days_since_update: i64) -> Result<()> {
        let thresholds = self.adjusted_thresholds();
        let context = Context::from([(
            "days".to_string(),
            ContextValue::from(days_since_update),
        )]);

        if days_since_update >= thresholds.critical_days {
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("System not updated for {} days", days_since_update),
                "update_overdue",
                context,
                Some("Regular updates are important for security".to_string()),
            )?;
        } else if days_since_update >= thresholds.warning_days {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("System not updated for {} days", days_since_update),
                "update_reminder",
                context,
                Some("Consider checking for available updates".to_string()),
            )?;
        }

        Ok(())
    }

    /// Frequent releases with nothing installed suggests a schedule is needed.
    fn check_update_patterns(&mut self) -> Result<()> {
        if !self.learning.has_sufficient_data("update_available") {
            return Ok(());
        }

        if self.learning.trend("update_available") == Trend::Increasing {
            self.learning.add_feedback(
                Priority::Low,
                "Updates are being released frequently",
                Some("Consider establishing a regular update schedule".to_string()),
            );
        }

        Ok(())
    }

    fn adjusted_thresholds(&self) -> CadenceThresholds {
        let mut thresholds = CadenceThresholds {
            warning_days: DAYS_WITHOUT_UPDATE_WARNING,
            critical_days: DAYS_WITHOUT_UPDATE_CRITICAL,
        };

        let memory = self.learning.memory();
        if let Some(baseline) = memory.get_baseline(Self::NAME, "days_since_update") {
            if baseline.sample_count >= CADENCE_LEARNING_SAMPLES {
                let typical_interval = baseline.mean;
                if typical_interval < 14.0 {
                    thresholds.warning_days = 14.max((typical_interval * 2.0) as i64);
                    thresholds.critical_days = 30.max((typical_interval * 4.0) as i64);
                }
            }
        }

        if memory.get_false_positive_rate(Self::NAME, "update_reminder") > 0.5 {
            thresholds.warning_days = (thresholds.warning_days as f64 * 1.5) as i64;
        }

        thresholds
    }
}

#[async_trait]
impl HealthAgent for UpdatesAgent {
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
        let info = async {
            let dsm_info = self.client.dsm_info().await?;
            let update_info = self.client.check_updates().await?;
            Ok::<_, crate::api::ApiError>((dsm_info, update_info))
        }
        .await;

        match info {
            Ok((dsm_info, update_info)) => self.analyze_updates(&dsm_info, &update_info)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not check for updates: {}", err),
                None,
            ),
        }
        Ok(self.learning.take_feedback())
    }
}
