//! Report model
//!
//! The snapshot bundle handed to rendering adapters: system identity, disk
//! and volume summaries, update state, the aggregated feedback, and each
//! agent's learning insights. Rendering itself (text, HTML, email) lives
//! outside the library; adapters consume this model, typically as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::agent::{Feedback, Priority};
use crate::api::ApplianceClient;
use crate::memory::{LearningInsights, MemoryStore};

const GIB: f64 = (1u64 << 30) as f64;

/// System identity for the report header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub model: String,
    pub serial: String,
    pub dsm_version: String,
    pub temperature: i64,
    pub uptime: u64,
    pub ram: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSummary {
    pub name: String,
    pub status: String,
    pub temperature: i64,
    pub bad_sectors: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub name: String,
    pub status: String,
    pub used_gb: f64,
    pub free_gb: f64,
    pub total_gb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub available: bool,
    pub current_version: String,
    pub new_version: String,
    pub is_security: bool,
    pub reboot_needed: bool,
}

/// Complete report data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullReport {
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
    pub disks: Vec<DiskSummary>,
    pub volumes: Vec<VolumeSummary>,
    pub feedback: Vec<Feedback>,
    pub learning: HashMap<String, LearningInsights>,
    pub updates: Option<UpdateSummary>,
}

impl FullReport {
    pub fn has_critical_alerts(&self) -> bool {
        self.feedback
            .iter()
            .any(|f| f.priority == Priority::Critical)
    }

    pub fn has_high_alerts(&self) -> bool {
        self.feedback.iter().any(|f| f.priority == Priority::High)
    }

    pub fn alert_count_by_priority(&self) -> HashMap<Priority, usize> {
        let mut counts: HashMap<Priority, usize> =
            Priority::ALL.iter().map(|p| (*p, 0)).collect();
        for feedback in &self.feedback {
            *counts.entry(feedback.priority).or_default() += 1;
        }
        counts
    }
}

/// Assembles a [`FullReport`] from appliance snapshots plus the aggregated
/// feedback and learning state. Endpoint failures leave the corresponding
/// section empty rather than failing the whole report.
pub struct ReportBuilder {
    client: Arc<dyn ApplianceClient>,
    memory: Arc<MemoryStore>,
}

impl ReportBuilder {
    pub fn new(client: Arc<dyn ApplianceClient>, memory: Arc<MemoryStore>) -> Self {
        Self { client, memory }
    }

    pub async fn build(&self, feedback: Vec<Feedback>, agent_names: &[&str]) -> FullReport {
        let system = match self.client.dsm_info().await {
            Ok(info) => SystemInfo {
                model: info.model,
                serial: info.serial,
                dsm_version: info.version_string,
                temperature: info.temperature,
                uptime: info.uptime,
                ram: info.ram,
            },
            Err(err) => {
                warn!("report: system info unavailable: {}", err);
                SystemInfo::default()
            }
        };

        let disks = match self.client.disk_info().await {
            Ok(info) => info
                .disks
                .iter()
                .map(|d| DiskSummary {
                    name: d.label().to_string(),
                    status: d.status.clone(),
                    temperature: d.temp,
                    bad_sectors: d.bad_sector_count,
                })
                .collect(),
            Err(err) => {
                warn!("report: disk info unavailable: {}", err);
                Vec::new()
            }
        };

        let volumes = match self.client.storage_info().await {
            Ok(info) => info
                .volumes
                .iter()
                .filter(|v| v.size.total > 0)
                .map(|v| {
                    let total_gb = v.size.total as f64 / GIB;
                    let used_gb = v.size.used as f64 / GIB;
                    VolumeSummary {
                        name: v.label().to_string(),
                        status: v.status.clone(),
                        used_gb,
                        free_gb: total_gb - used_gb,
                        total_gb,
                        percent: v.size.used as f64 / v.size.total as f64 * 100.0,
                    }
                })
                .collect(),
            Err(err) => {
                warn!("report: storage info unavailable: {}", err);
                Vec::new()
            }
        };

        let updates = match self.client.check_updates().await {
            Ok(info) => Some(UpdateSummary {
                available: info.available,
                current_version: system.dsm_version.clone(),
                new_version: info.version,
                is_security: info.update_type.to_lowercase().contains("security"),
                reboot_needed: info.reboot_needed,
            }),
            Err(err) => {
                warn!("report: update info unavailable: {}", err);
                None
            }
        };

        let learning = agent_names
            .iter()
            .map(|name| (name.to_string(), self.memory.get_insights(name)))
            .collect();

        FullReport {
            timestamp: Utc::now(),
            system,
            disks,
            volumes,
            feedback,
            learning,
            updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ApiError, DiskInfo, DiskRecord, DsmInfo, MockClient, StorageInfo, UpdateInfo,
        VolumeRecord, VolumeSize,
    };
    use tempfile::tempdir;

    fn report_with_feedback(feedback: Vec<Feedback>) -> FullReport {
        FullReport {
            timestamp: Utc::now(),
            system: SystemInfo::default(),
            disks: Vec::new(),
            volumes: Vec::new(),
            feedback,
            learning: HashMap::new(),
            updates: None,
        }
    }

    #[test]
    fn test_alert_helpers() {
        let report = report_with_feedback(vec![
            Feedback::new(Priority::Critical, "storage", "full", None),
            Feedback::new(Priority::Low, "disks", "fine", None),
            Feedback::new(Priority::Low, "backup", "fine", None),
        ]);

        assert!(report.has_critical_alerts());
        assert!(!report.has_high_alerts());

        let counts = report.alert_count_by_priority();
        assert_eq!(counts[&Priority::Critical], 1);
        assert_eq!(counts[&Priority::Low], 2);
        assert_eq!(counts[&Priority::High], 0);
    }

    #[tokio::test]
    async fn test_build_collects_snapshots() {
        let mut client = MockClient::default();
        client.dsm = Ok(DsmInfo {
            version_string: "DSM 7.2".to_string(),
            model: "DS920+".to_string(),
            ..Default::default()
        });
        client.disks = Ok(DiskInfo {
            disks: vec![DiskRecord {
                id: "sda".to_string(),
                status: "normal".to_string(),
                temp: 38,
                ..Default::default()
            }],
            ..Default::default()
        });
        client.storage = Ok(StorageInfo {
            volumes: vec![VolumeRecord {
                id: "volume_1".to_string(),
                display_name: Some("Volume1".to_string()),
                status: "normal".to_string(),
                size: VolumeSize {
                    total: 100 << 30,
                    used: 40 << 30,
                },
            }],
            ..Default::default()
        });
        client.updates = Ok(UpdateInfo {
            available: true,
            version: "DSM 7.3".to_string(),
            update_type: "security".to_string(),
            ..Default::default()
        });

        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()).unwrap());
        memory
            .record_observation(crate::memory::Observation::new(
                "storage",
                "usage_percent_Volume1",
                40.0,
            ))
            .unwrap();

        let builder = ReportBuilder::new(Arc::new(client), memory);
        let report = builder.build(Vec::new(), &["storage", "disks"]).await;

        assert_eq!(report.system.model, "DS920+");
        assert_eq!(report.disks.len(), 1);
        assert_eq!(report.volumes.len(), 1);
        assert!((report.volumes[0].percent - 40.0).abs() < 1e-9);
        let updates = report.updates.unwrap();
        assert!(updates.available && updates.is_security);
        assert_eq!(updates.current_version, "DSM 7.2");
        assert_eq!(report.learning["storage"].baselines_learned, 1);
        assert_eq!(report.learning["disks"].baselines_learned, 0);
    }

    #[tokio::test]
    async fn test_build_tolerates_endpoint_failures() {
        let mut client = MockClient::default();
        client.dsm = Err(ApiError::Timeout);
        client.storage = Err(ApiError::Timeout);
        client.updates = Err(ApiError::Timeout);

        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()).unwrap());
        let builder = ReportBuilder::new(Arc::new(client), memory);
        let report = builder
            .build(
                vec![Feedback::new(Priority::High, "storage", "x", None)],
                &["storage"],
            )
            .await;

        assert_eq!(report.system, SystemInfo::default());
        assert!(report.volumes.is_empty());
        assert!(report.updates.is_none());
        assert_eq!(report.feedback.len(), 1);
    }
}
