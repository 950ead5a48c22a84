//! NAS Sentinel - a multi-agent NAS health monitor with online learning
//!
//! Six domain agents (storage, disks, backup, security, logs, updates) poll
//! an appliance over its HTTP API, record observations into a shared
//! per-device store, learn per-metric baselines, and emit prioritized
//! feedback. User feedback on alerts flows back into suppression patterns
//! and per-alert sensitivity, so the monitor gets quieter and sharper the
//! longer it runs.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod learning;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod report;

// Domain agents
pub mod backup_agent;
pub mod disks_agent;
pub mod logs_agent;
pub mod security_agent;
pub mod storage_agent;
pub mod updates_agent;

pub use agent::{Feedback, HealthAgent, Priority};
pub use api::{
    ApiError, ApiResult, ApplianceClient, BackupInfo, BackupTaskRecord, DiskInfo, DiskRecord,
    DsmClient, DsmInfo, LogBatch, LogEntry, MockClient, PoolRecord, SecurityScan,
    SecurityScanItem, StorageInfo, UpdateInfo, VolumeRecord, VolumeSize,
};
pub use config::{AppConfig, DeviceConfig};
pub use error::{Result, SentinelError};
pub use learning::{LearningAgent, LearningStatus, DEFAULT_SENSITIVITY};
pub use logging::{init_logging, LoggingConfig};
pub use memory::{
    Baseline, Context, ContextValue, FeedbackKind, LearningInsights, MemoryStore, Observation,
    Pattern, PatternAction, Trend, UserFeedback,
};
pub use orchestrator::{AgentResult, Orchestrator};
pub use report::{
    DiskSummary, FullReport, ReportBuilder, SystemInfo, UpdateSummary, VolumeSummary,
};

pub use backup_agent::BackupAgent;
pub use disks_agent::DisksAgent;
pub use logs_agent::LogsAgent;
pub use security_agent::SecurityAgent;
pub use storage_agent::StorageAgent;
pub use updates_agent::UpdatesAgent;

use std::sync::Arc;

/// Build the standard pool of six domain agents against one appliance.
pub fn standard_agents(
    client: Arc<dyn ApplianceClient>,
    memory: Arc<MemoryStore>,
) -> Vec<Box<dyn HealthAgent>> {
    vec![
        Box::new(StorageAgent::new(client.clone(), memory.clone())),
        Box::new(DisksAgent::new(client.clone(), memory.clone())),
        Box::new(BackupAgent::new(client.clone(), memory.clone())),
        Box::new(SecurityAgent::new(client.clone(), memory.clone())),
        Box::new(LogsAgent::new(client.clone(), memory.clone())),
        Box::new(UpdatesAgent::new(client, memory)),
    ]
}
