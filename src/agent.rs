//! Base agent types and the feedback model
//!
//! Every monitoring agent produces `Feedback` items ranked by `Priority`.
//! Agents implement the `HealthAgent` trait: an async `check()` that polls
//! the appliance plus access to the embedded learning substrate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::learning::LearningAgent;

/// Feedback priority levels. Lower numeric value is more severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// P0 - Immediate action required
    Critical = 0,
    /// P1 - Urgent attention needed
    High = 1,
    /// P2 - Planned attention
    Medium = 2,
    /// P3 - Informational
    Low = 3,
    /// P4 - Logging only
    Info = 4,
}

impl Priority {
    /// All priorities, most severe first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Info,
    ];

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Info => "INFO",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A prioritized finding emitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub priority: Priority,
    /// Emitting agent's name.
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn new(
        priority: Priority,
        category: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            priority,
            category: category.into(),
            message: message.into(),
            details,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A monitoring agent with learning capabilities.
///
/// Implementors poll one domain of the appliance in `check()` and report
/// findings through the embedded [`LearningAgent`] so that observations,
/// anomaly checks, and alert suppression all flow through the shared store.
#[async_trait]
pub trait HealthAgent: Send {
    /// Stable agent name, used as the feedback category and store key.
    fn name(&self) -> &str;

    /// Shared learning substrate for this agent.
    fn learning(&self) -> &LearningAgent;

    fn learning_mut(&mut self) -> &mut LearningAgent;

    /// Run this agent's checks and return its feedback.
    ///
    /// Appliance retrieval failures must be converted into a single high
    /// priority feedback rather than returned as an error; an `Err` from
    /// `check` signals an unexpected agent failure and is captured by the
    /// orchestrator.
    async fn check(&mut self) -> Result<Vec<Feedback>>;
}
