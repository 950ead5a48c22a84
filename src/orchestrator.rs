//! Agent orchestrator
//!
//! Runs every registered agent's `check()` concurrently, captures per-agent
//! failures instead of aborting the sweep, and merges all findings into one
//! priority-ordered report.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{Feedback, HealthAgent, Priority};
use crate::learning::LearningStatus;
use crate::memory::{Context, FeedbackKind};

/// Result from one agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub feedback: Vec<Feedback>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Coordinates the pool of monitoring agents against one appliance.
#[derive(Default)]
pub struct Orchestrator {
    agents: Vec<Box<dyn HealthAgent>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    pub fn register_agent(&mut self, agent: Box<dyn HealthAgent>) {
        debug!(agent = agent.name(), "agent registered");
        self.agents.push(agent);
    }

    pub fn register_agents(&mut self, agents: Vec<Box<dyn HealthAgent>>) {
        for agent in agents {
            self.register_agent(agent);
        }
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Run all registered agents concurrently and wait for every one of them.
    /// An agent that fails contributes an `AgentResult` with its error message
    /// and no feedback; it never cancels the other agents.
    pub async fn run_all(&mut self) -> Vec<AgentResult> {
        info!(agents = self.agents.len(), "running health check");

        let checks = self.agents.iter_mut().map(|agent| async move {
            let agent_name = agent.name().to_string();
            match agent.check().await {
                Ok(feedback) => AgentResult {
                    agent_name,
                    feedback,
                    error: None,
                },
                Err(err) => AgentResult {
                    agent_name,
                    feedback: Vec::new(),
                    error: Some(err.to_string()),
                },
            }
        });

        join_all(checks).await
    }

    /// Merge agent results into a single list, sorted by priority and then
    /// category. Agent errors become synthetic high-priority feedback ahead of
    /// that agent's own findings.
    pub fn aggregate(results: &[AgentResult], min_priority: Priority) -> Vec<Feedback> {
        let mut all_feedback: Vec<Feedback> = Vec::new();

        for result in results {
            if let Some(error) = &result.error {
                all_feedback.push(Feedback::new(
                    Priority::High,
                    result.agent_name.clone(),
                    format!("Agent error: {}", error),
                    None,
                ));
            }
            all_feedback.extend(result.feedback.iter().cloned());
        }

        let mut filtered: Vec<Feedback> = all_feedback
            .into_iter()
            .filter(|f| f.priority <= min_priority)
            .collect();
        filtered.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.category.cmp(&b.category))
        });
        filtered
    }

    /// Run all agents and return the aggregated feedback. Info-level items
    /// are included only when `show_info` is set.
    pub async fn check_health(&mut self, show_info: bool) -> Vec<Feedback> {
        let results = self.run_all().await;
        let min_priority = if show_info { Priority::Info } else { Priority::Low };
        Self::aggregate(&results, min_priority)
    }

    /// Learning status of every registered agent.
    pub fn learning_statuses(&self) -> Vec<LearningStatus> {
        self.agents
            .iter()
            .map(|a| a.learning().learning_status())
            .collect()
    }

    /// Route user feedback to the named agent. Returns false when no such
    /// agent is registered.
    pub fn receive_user_feedback(
        &mut self,
        agent_name: &str,
        alert_type: &str,
        kind: FeedbackKind,
        context: Option<Context>,
    ) -> crate::error::Result<bool> {
        for agent in &mut self.agents {
            if agent.name() == agent_name {
                agent
                    .learning_mut()
                    .receive_user_feedback(alert_type, kind, context)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
