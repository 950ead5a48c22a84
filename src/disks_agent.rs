//! Disk health monitoring agent
//!
//! Watches per-disk status, S.M.A.R.T. verdicts, temperature, bad sectors,
//! and age, plus RAID pool state. Learning features:
//! - Adapts temperature thresholds to each disk's normal operating range
//! - Upgrades bad-sector alerts when the count is trending up
//! - Tracks overall fleet health rates over time

use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::api::{ApplianceClient, DiskInfo, DiskRecord, PoolRecord};
use crate::error::Result;
use crate::learning::LearningAgent;
use crate::memory::{Context, ContextValue, MemoryStore, Trend};

/// Default temperature thresholds in Celsius, adjustable by learning.
const TEMP_CRITICAL: i64 = 60;
const TEMP_WARNING: i64 = 50;
const TEMP_LOW_WARNING: i64 = 15;

/// Samples needed before temperature thresholds shift to the learned normal.
const TEMP_LEARNING_SAMPLES: u64 = 20;

const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

struct TempThresholds {
    critical: i64,
    warning: i64,
    low: i64,
}

pub struct DisksAgent {
    client: Arc<dyn ApplianceClient>,
    learning: LearningAgent,
}

impl DisksAgent {
    pub const NAME: &'static str = "disks";

    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self {
            client,
            learning: LearningAgent::new(Self::NAME, memory),
        }
    }

    fn analyze_disks(&mut self, info: &DiskInfo) -> Result<()> {
        if info.disks.is_empty() {
            self.learning
                .add_feedback(Priority::Medium, "No disk information available", None);
            return Ok(());
        }

        let total_disks = info.disks.len();
        let mut healthy_disks = 0;

        for disk in &info.disks {
            if self.analyze_single_disk(disk)? {
                healthy_disks += 1;
            }
        }

        let health_rate = healthy_disks as f64 / total_disks as f64 * 100.0;
        self.learning.observe("disk_health_rate", health_rate, None)?;
        self.learning.observe("healthy_disk_count", healthy_disks, None)?;
        self.learning.observe("total_disk_count", total_disks, None)?;

        self.analyze_pools(info.pools())?;
        Ok(())
    }

    /// Analyze one disk; returns whether it looks healthy.
    fn analyze_single_disk(&mut self, disk: &DiskRecord) -> Result<bool> {
        let disk_name = disk.label().to_string();
        let mut is_healthy = true;

        if disk.temp > 0 {
            self.learning.observe(
                &format!("temp_{}", disk_name),
                disk.temp,
                Some(disk_context(&disk_name)),
            )?;
        }
        self.learning.observe(
            &format!("bad_sectors_{}", disk_name),
            disk.bad_sector_count,
            Some(disk_context(&disk_name)),
        )?;
        if disk.power_on_hours > 0 {
            self.learning.observe(
                &format!("power_hours_{}", disk_name),
                disk.power_on_hours,
                Some(disk_context(&disk_name)),
            )?;
        }

        match disk.status.as_str() {
            "crashed" | "failed" => {
                self.learning.add_feedback(
                    Priority::Critical,
                    format!("Disk {} has FAILED", disk_name),
                    Some("Replace disk immediately".to_string()),
                );
                return Ok(false);
            }
            "warning" => {
                self.learning.add_feedback_with_context(
                    Priority::High,
                    format!("Disk {} showing warnings", disk_name),
                    "disk_warning",
                    Context::from([
                        ("disk".to_string(), ContextValue::from(disk_name.clone())),
                        ("status".to_string(), ContextValue::from("warning")),
                    ]),
                    Some("Monitor closely and prepare replacement".to_string()),
                )?;
                is_healthy = false;
            }
            _ => {}
        }

        match disk.smart_status.as_str() {
            "failing" => {
                self.learning.add_feedback(
                    Priority::Critical,
                    format!("Disk {} S.M.A.R.T. predicting failure", disk_name),
                    Some("Replace disk as soon as possible".to_string()),
                );
                return Ok(false);
            }
            "warning" => {
                self.learning.add_feedback_with_context(
                    Priority::High,
                    format!("Disk {} S.M.A.R.T. warnings", disk_name),
                    "smart_warning",
                    disk_context(&disk_name),
                    None,
                )?;
                is_healthy = false;
            }
            _ => {}
        }

        self.check_temperature(&disk_name, disk.temp)?;
        self.check_bad_sectors(&disk_name, disk.bad_sector_count)?;
        self.check_disk_wear(&disk_name, disk.power_on_hours)?;

        if is_healthy && matches!(disk.status.as_str(), "normal" | "healthy") {
            let details = (disk.temp > 0).then(|| format!("Temperature: {}\u{b0}C", disk.temp));
            self.learning.add_feedback(
                Priority::Low,
                format!("Disk {} healthy", disk_name),
                details,
            );
        }

        Ok(is_healthy)
    }

    fn check_temperature(&mut self, disk_name: &str, temp: i64) -> Result<()> {
        if temp <= 0 {
            return Ok(());
        }

        let metric_name = format!("temp_{}", disk_name);
        let thresholds = self.temp_thresholds(disk_name);
        let context = Context::from([
            ("disk".to_string(), ContextValue::from(disk_name)),
            ("temp".to_string(), ContextValue::from(temp)),
        ]);

        if temp >= thresholds.critical {
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("Disk {} overheating: {}\u{b0}C", disk_name, temp),
                "disk_temp_critical",
                context.clone(),
                Some("Check cooling system immediately".to_string()),
            )?;
        } else if temp >= thresholds.warning {
            self.learning.add_feedback_with_context(
                Priority::High,
                format!("Disk {} running hot: {}\u{b0}C", disk_name, temp),
                "disk_temp_high",
                context.clone(),
                Some("Consider improving cooling".to_string()),
            )?;
        } else if temp <= thresholds.low {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("Disk {} running cold: {}\u{b0}C", disk_name, temp),
                "disk_temp_low",
                context.clone(),
                Some("Very low temperatures can affect disk reliability".to_string()),
            )?;
        }

        // Deviation from this disk's own normal, independent of thresholds.
        if self.learning.has_sufficient_data(&metric_name)
            && self.learning.is_anomaly(&metric_name, temp as f64)
        {
            if let Some(baseline) = self.learning.baseline_mean(&metric_name) {
                if (temp as f64 - baseline).abs() > 5.0 {
                    let direction = if (temp as f64) > baseline { "higher" } else { "lower" };
                    self.learning.add_feedback_with_context(
                        Priority::Medium,
                        format!(
                            "Disk {} temperature anomaly: {}\u{b0}C ({} than usual)",
                            disk_name, temp, direction
                        ),
                        "disk_temp_anomaly",
                        context,
                        Some(format!("Normal: ~{:.0}\u{b0}C", baseline)),
                    )?;
                }
            }
        }

        Ok(())
    }

    fn check_bad_sectors(&mut self, disk_name: &str, bad_sectors: u64) -> Result<()> {
        if bad_sectors == 0 {
            return Ok(());
        }

        let metric_name = format!("bad_sectors_{}", disk_name);
        let context = Context::from([
            ("disk".to_string(), ContextValue::from(disk_name)),
            ("bad_sectors".to_string(), ContextValue::from(bad_sectors)),
        ]);

        if bad_sectors > 100 {
            self.learning.add_feedback_with_context(
                Priority::Critical,
                format!("Disk {} has {} bad sectors", disk_name, bad_sectors),
                "bad_sectors_critical",
                context,
                Some("Disk replacement recommended".to_string()),
            )?;
        } else {
            // A growing count is far worse than a static one.
            let (priority, trend_info) =
                if self.learning.trend(&metric_name) == Trend::Increasing {
                    (Priority::Critical, " (increasing!)")
                } else {
                    (Priority::High, "")
                };

            self.learning.add_feedback_with_context(
                priority,
                format!(
                    "Disk {} has {} bad sectors{}",
                    disk_name, bad_sectors, trend_info
                ),
                "bad_sectors_warning",
                context,
                Some("Monitor disk health closely".to_string()),
            )?;
        }

        Ok(())
    }

    fn check_disk_wear(&mut self, disk_name: &str, power_on_hours: u64) -> Result<()> {
        if power_on_hours == 0 {
            return Ok(());
        }

        let power_on_years = power_on_hours as f64 / HOURS_PER_YEAR;
        self.learning.observe(
            &format!("power_years_{}", disk_name),
            power_on_years,
            Some(disk_context(disk_name)),
        )?;

        if power_on_years >= 5.0 {
            self.learning.add_feedback_with_context(
                Priority::Medium,
                format!("Disk {} is {:.1} years old", disk_name, power_on_years),
                "disk_age_warning",
                Context::from([
                    ("disk".to_string(), ContextValue::from(disk_name)),
                    ("years".to_string(), ContextValue::from(power_on_years)),
                ]),
                Some("Consider proactive replacement - average HDD lifespan is 3-5 years".to_string()),
            )?;
        } else if power_on_years >= 3.0 {
            self.learning.add_feedback(
                Priority::Low,
                format!(
                    "Disk {} approaching typical lifespan ({:.1} years)",
                    disk_name, power_on_years
                ),
                Some("Monitor S.M.A.R.T. data closely".to_string()),
            );
        }

        Ok(())
    }

    fn analyze_pools(&mut self, pools: &[PoolRecord]) -> Result<()> {
        for pool in pools {
            let is_healthy = matches!(pool.status.as_str(), "normal" | "healthy" | "");
            self.learning.observe(
                &format!("raid_healthy_{}", pool.id),
                if is_healthy { 1 } else { 0 },
                None,
            )?;

            match pool.status.as_str() {
                "degraded" => self.learning.add_feedback(
                    Priority::Critical,
                    format!("RAID {} is DEGRADED", pool.id),
                    Some("Replace failed disk to restore redundancy".to_string()),
                ),
                "crashed" => self.learning.add_feedback(
                    Priority::Critical,
                    format!("RAID {} has CRASHED", pool.id),
                    Some("Data loss may have occurred".to_string()),
                ),
                "rebuilding" => self.learning.add_feedback_with_context(
                    Priority::High,
                    format!("RAID {} is rebuilding ({}%)", pool.id, pool.rebuild_progress),
                    "raid_rebuilding",
                    Context::from([
                        ("raid".to_string(), ContextValue::from(pool.id.clone())),
                        (
                            "progress".to_string(),
                            ContextValue::from(pool.rebuild_progress as i64),
                        ),
                    ]),
                    Some("Avoid heavy I/O until complete".to_string()),
                )?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Temperature thresholds, shifted once we know this disk's normal range.
    fn temp_thresholds(&self, disk_name: &str) -> TempThresholds {
        let mut thresholds = TempThresholds {
            critical: TEMP_CRITICAL,
            warning: TEMP_WARNING,
            low: TEMP_LOW_WARNING,
        };

        let metric_name = format!("temp_{}", disk_name);
        let baseline = self.learning.memory().get_baseline(Self::NAME, &metric_name);

        if let Some(baseline) = baseline {
            if baseline.sample_count >= TEMP_LEARNING_SAMPLES {
                let normal_temp = baseline.mean;
                if normal_temp > 40.0 {
                    thresholds.warning = TEMP_WARNING.max((normal_temp + 10.0) as i64);
                    thresholds.critical = TEMP_CRITICAL.max((normal_temp + 15.0) as i64);
                }
                if normal_temp > 30.0 {
                    thresholds.low = TEMP_LOW_WARNING.max((normal_temp - 15.0) as i64);
                }
            }
        }

        thresholds
    }
}

fn disk_context(disk_name: &str) -> Context {
    Context::from([("disk".to_string(), ContextValue::from(disk_name))])
}

#[async_trait]
impl HealthAgent for DisksAgent {
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
        let disk_info = self.client.disk_info().await;
        match disk_info {
            Ok(info) => self.analyze_disks(&info)?,
            Err(err) => self.learning.add_feedback(
                Priority::High,
                format!("Could not retrieve disk information: {}", err),
                None,
            ),
        }
        Ok(self.learning.take_feedback())
    }
}
