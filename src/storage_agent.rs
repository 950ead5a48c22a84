//! Storage monitoring agent
//!
//! Watches volume capacity and usage trends. Learning features:
//! - Learns normal usage patterns per volume
//! - Detects unusual growth spikes against the learned baseline
//! - Predicts when a volume will fill up
//! - Raises warning thresholds when users flag false positives

use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, StorageInfo, VolumeRecord};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

const GIB: f64 = (1u64 << 30) as f64;

/// Default usage thresholds in percent, adjustable by learning.
const SPACE_CRITICAL: f64 = 95.0;
const SPACE_HIGH: f64 = 90.0;
const SPACE_WARNING: f64 = 80.0;

struct SpaceThresholds {
    critical: f64,
    high: f64,
    warning: f64,
}

pub struct StorageAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
}

impl StorageAgent {
    pub const NAME: &'static str = "storage";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
        }
    }

    fn analyze_storage(&mut self, info: &StorageInfo) -> Result<()> {
        if info.volumes.is_empty() {
            self.learning
                .add_feedback(Priority::Medium, "No storage volumes found", None);
            return Ok(());
        }

        for volume in &info.volumes {
            let total = volume.size.total;
            if total == 0 {
                continue;
            }
            let used = volume.size.used;
            let usage_percent = used as f64 / total as f64 * 100.0;
            let free_gb = total.saturating_sub(used) as f64 / GIB;
            let used_gb = used as f64 / GIB;
            let vol_name = volume.label().to_string();

            let metric_name = format!("usage_percent_{}", vol_name);
            let observe_context =
                Context::from([("volume".to_string(), ContextValue::from(vol_name.clone()))]);
            self.learning
                .observe(&metric_name, usage_percent, Some(observe_context.clone()))?;

            // Absolute usage feeds growth detection.
            self.learning.observe(
                &format!("used_gb_{}", vol_name),
                used_gb,
                Some(observe_context),
            )?;

            self.check_growth_anomaly(&vol_name, used_gb)?;

            let trend = self.learning.trend(&metric_name);
            let trend_info = trend_note(trend);
            let thresholds = self.adjusted_thresholds();

            let context = Context::from([
                ("volume".to_string(), ContextValue::from(vol_name.clone())),
                ("usage_percent".to_string(), ContextValue::from(usage_percent)),
            ]);

            if usage_percent >= thresholds.critical {
                self.learning.add_feedback_with_context(
                    Priority::Critical,
                    format!(
                        "Volume {} critically low on space: {:.1}% used",
                        vol_name, usage_percent
                    ),
                    "storage_critical",
                    context,
                    Some(format!("Only {:.1} GB free. {}", free_gb, trend_info)),
                )?;
            } else if usage_percent >= thresholds.high {
                self.learning.add_feedback_with_context(
                    Priority::High,
                    format!(
                        "Volume {} running low on space: {:.1}% used",
                        vol_name, usage_percent
                    ),
                    "storage_high",
                    context,
                    Some(format!("{:.1} GB free. {}", free_gb, trend_info)),
                )?;
            } else if usage_percent >= thresholds.warning {
                self.learning.add_feedback_with_context(
                    Priority::Medium,
                    format!("Volume {} at {:.1}% capacity", vol_name, usage_percent),
                    "storage_warning",
                    context,
                    Some(format!("{:.1} GB free. {}", free_gb, trend_info)),
                )?;
            } else {
                self.learning.add_feedback(
                    Priority::Low,
                    format!("Volume {} healthy: {:.1}% used", vol_name, usage_percent),
                    Some(format!("{:.1} GB free. {}", free_gb, trend_info)),
                );
            }

            self.predict_full(&vol_name, free_gb);
        }

        self.check_volume_status(&info.volumes);
        Ok(())
    }

    /// Flag usage jumps that sit above the learned baseline.
    fn check_growth_anomaly(&mut self, vol_name: &str, used_gb: f64) -> Result<()> {
        let metric_name = format!("used_gb_{}", vol_name);

        if !self.learning.has_sufficient_data(&metric_name) {
            return Ok(());
        }

        if self.learning.is_anomaly(&metric_name, used_gb) {
            if let Some(baseline) = self.learning.baseline_mean(&metric_name) {
                if used_gb > baseline {
                    let growth = used_gb - baseline;
                    self.learning.add_feedback_with_context(
                        Priority::High,
                        format!(
                            "Unusual storage growth on {}: +{:.1} GB above normal",
                            vol_name, growth
                        ),
                        "storage_growth_anomaly",
                        Context::from([
                            ("volume".to_string(), ContextValue::from(vol_name)),
                            ("growth_gb".to_string(), ContextValue::from(growth)),
                        ]),
                        Some("This is significantly above the learned baseline".to_string()),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn adjusted_thresholds(&self) -> SpaceThresholds {
        let mut thresholds = SpaceThresholds {
            critical: SPACE_CRITICAL,
            high: SPACE_HIGH,
            warning: SPACE_WARNING,
        };

        let memory = self.learning.memory();
        if memory.get_false_positive_rate(Self::NAME, "storage_warning") > 0.3 {
            thresholds.warning = (thresholds.warning + 5.0).min(85.0);
        }
        if memory.get_false_positive_rate(Self::NAME, "storage_high") > 0.3 {
            thresholds.high = (thresholds.high + 2.0).min(92.0);
        }

        thresholds
    }

    /// Estimate days until the volume is full from recent growth. The learned
    /// std-dev stands in for daily growth, so treat the number as rough.
    fn predict_full(&mut self, vol_name: &str, free_gb: f64) {
        let metric_name = format!("used_gb_{}", vol_name);

        if !self.learning.has_sufficient_data(&metric_name) {
            return;
        }
        if self.learning.trend(&metric_name) != Trend::Increasing {
            return;
        }

        let baseline = self
            .learning
            .memory()
            .get_baseline(Self::NAME, &metric_name);
        if let Some(baseline) = baseline {
            if baseline.std_dev > 0.0 {
                let days_until_full = free_gb / baseline.std_dev;
                if days_until_full < 7.0 {
                    self.learning.add_feedback(
                        Priority::Critical,
                        format!(
                            "Volume {} may be full in ~{:.0} days",
                            vol_name, days_until_full
                        ),
                        Some("Based on recent growth patterns".to_string()),
                    );
                } else if days_until_full < 30.0 {
                    self.learning.add_feedback(
                        Priority::High,
                        format!(
                            "Volume {} may be full in ~{:.0} days",
                            vol_name, days_until_full
                        ),
                        Some("Consider expanding storage or cleaning up".to_string()),
                    );
                }
            }
        }
    }

    fn check_volume_status(&mut self, volumes: &[VolumeRecord]) {
        for volume in volumes {
            let vol_name = volume.label();
            match volume.status.as_str() {
                "crashed" => self.learning.add_feedback(
                    Priority::Critical,
                    format!("Volume {} has crashed!", vol_name),
                    Some("Immediate attention required".to_string()),
                ),
                "degraded" => self.learning.add_feedback(
                    Priority::Critical,
                    format!("Volume {} is degraded", vol_name),
                    Some("Check disk status and replace failed disk".to_string()),
                ),
                "normal" | "healthy" | "" => {}
                other => self.learning.add_feedback(
                    Priority::High,
                    format!("Volume {} status: {}", vol_name, other),
                    None,
                ),
            }
        }
    }
}

fn trend_note(trend: Trend) -> String {
    match trend {
        Trend::Unknown => String::new(),
        other => format!("Trend: {}", other),
    }
}

#[async_trait]
impl HealthAgent for StorageAgent {
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
        let storage_info = self.client.storage_info().await;
        match storage_info {
            Ok(info) => self.analyze_storage(&info)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not retrieve storage information: {}", err),
                None,
            ),
        }
        Ok(self.learning.take_feedback())
    }
}
