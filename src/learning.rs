//! Learning substrate for domain agents
//!
//! Every domain agent embeds a [`LearningAgent`]: the uniform capability set
//! over the shared [`MemoryStore`]. It records observations, answers anomaly
//! and trend queries, buffers outgoing feedback, applies learned suppression
//! patterns to contextual alerts, and folds user feedback back into
//! per-alert-type sensitivity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::agent::{Feedback, Priority};
use crate::error::Result;
use crate::memory::{
    Context, ContextValue, FeedbackKind, MemoryStore, Observation, PatternAction, Trend,
    UserFeedback, ACTIVE_PATTERN_CONFIDENCE, MIN_SAMPLES_FOR_BASELINE,
};

/// Default anomaly sensitivity in standard deviations.
pub const DEFAULT_SENSITIVITY: f64 = 2.0;

/// Sensitivity clamp bounds applied by user-feedback tuning.
pub const MIN_SENSITIVITY: f64 = 1.0;
pub const MAX_SENSITIVITY: f64 = 4.0;

/// Learning status summary for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStatus {
    pub agent: String,
    pub baselines_learned: usize,
    pub patterns_learned: usize,
    pub active_patterns: usize,
    pub total_observations: usize,
    pub custom_sensitivities: usize,
}

/// Shared learning capabilities backing a domain agent.
///
/// Holds the agent's name, a reference to the per-device store, the
/// per-alert-type sensitivity overrides, and the feedback buffer filled
/// during a `check()` run.
#[derive(Debug)]
pub struct LearningAgent {
    name: String,
    memory: Arc<MemoryStore>,
    sensitivity: HashMap<String, f64>,
    feedback: Vec<Feedback>,
}

impl LearningAgent {
    pub fn new(name: impl Into<String>, memory: Arc<MemoryStore>) -> Self {
        Self {
            name: name.into(),
            memory,
            sensitivity: HashMap::new(),
            feedback: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared store backing this agent.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Record an observation for learning.
    pub fn observe(
        &self,
        metric: &str,
        value: impl Into<ContextValue>,
        context: Option<Context>,
    ) -> Result<()> {
        let mut observation = Observation::new(self.name.clone(), metric, value);
        if let Some(context) = context {
            observation = observation.with_context(context);
        }
        self.memory.record_observation(observation)
    }

    /// Check if a value is anomalous based on the learned baseline, using the
    /// sensitivity override for this metric when one has been set.
    pub fn is_anomaly(&self, metric: &str, value: f64) -> bool {
        let sensitivity = self
            .sensitivity
            .get(metric)
            .copied()
            .unwrap_or(DEFAULT_SENSITIVITY);
        self.memory.is_anomaly(&self.name, metric, value, sensitivity)
    }

    /// Learned baseline mean for a metric, if any samples exist.
    pub fn baseline_mean(&self, metric: &str) -> Option<f64> {
        self.memory.get_baseline(&self.name, metric).map(|b| b.mean)
    }

    /// True once the metric's baseline has enough samples to be trusted.
    pub fn has_sufficient_data(&self, metric: &str) -> bool {
        self.memory
            .get_baseline(&self.name, metric)
            .map_or(false, |b| b.sample_count >= MIN_SAMPLES_FOR_BASELINE)
    }

    /// Trend direction for a metric over the default 7-day window.
    pub fn trend(&self, metric: &str) -> Trend {
        self.memory.get_trend(&self.name, metric, 7)
    }

    /// Check whether a learned pattern suppresses an alert with this context.
    /// The first matching active `ignore` pattern is triggered and wins.
    pub fn should_suppress(&self, alert_type: &str, context: &Context) -> Result<bool> {
        for pattern in self.memory.get_patterns(&self.name) {
            if pattern.action != PatternAction::Ignore {
                continue;
            }
            if pattern.confidence < ACTIVE_PATTERN_CONFIDENCE {
                continue;
            }
            if pattern.matches(context) {
                debug!(
                    agent = %self.name,
                    alert_type,
                    pattern = %pattern.name,
                    "alert suppressed by learned pattern"
                );
                self.memory.trigger_pattern(&self.name, &pattern.name)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Buffer a feedback item.
    pub fn add_feedback(
        &mut self,
        priority: Priority,
        message: impl Into<String>,
        details: Option<String>,
    ) {
        self.feedback
            .push(Feedback::new(priority, self.name.clone(), message, details));
    }

    /// Buffer a contextual alert, applying learned suppression first.
    ///
    /// A suppressed alert is not dropped: it is downgraded to `Info` and its
    /// message prefixed with `[Suppressed]` so the finding stays visible.
    pub fn add_feedback_with_context(
        &mut self,
        priority: Priority,
        message: impl Into<String>,
        alert_type: &str,
        context: Context,
        details: Option<String>,
    ) -> Result<()> {
        let mut priority = priority;
        let mut message = message.into();

        if self.should_suppress(alert_type, &context)? {
            priority = Priority::Info;
            message = format!("[Suppressed] {}", message);
        }

        self.add_feedback(priority, message, details);
        Ok(())
    }

    /// Process user feedback on an alert.
    ///
    /// The judgment is recorded in the store (which may synthesize a
    /// suppression pattern), and `too_sensitive` / `too_late` nudge the
    /// per-alert-type sensitivity within [1.0, 4.0].
    pub fn receive_user_feedback(
        &mut self,
        alert_type: &str,
        feedback: FeedbackKind,
        context: Option<Context>,
    ) -> Result<()> {
        self.memory.record_feedback(UserFeedback::new(
            self.name.clone(),
            alert_type,
            feedback,
            context.unwrap_or_default(),
        ))?;

        let current = self
            .sensitivity
            .get(alert_type)
            .copied()
            .unwrap_or(DEFAULT_SENSITIVITY);
        match feedback {
            FeedbackKind::TooSensitive => {
                self.sensitivity
                    .insert(alert_type.to_string(), (current + 0.5).min(MAX_SENSITIVITY));
            }
            FeedbackKind::TooLate => {
                self.sensitivity
                    .insert(alert_type.to_string(), (current - 0.5).max(MIN_SENSITIVITY));
            }
            FeedbackKind::Useful | FeedbackKind::FalsePositive => {}
        }

        Ok(())
    }

    /// Effective sensitivity for an alert type or metric.
    pub fn sensitivity_for(&self, key: &str) -> f64 {
        self.sensitivity
            .get(key)
            .copied()
            .unwrap_or(DEFAULT_SENSITIVITY)
    }

    /// Learning status for this agent.
    pub fn learning_status(&self) -> LearningStatus {
        let insights = self.memory.get_insights(&self.name);
        LearningStatus {
            agent: self.name.clone(),
            baselines_learned: insights.baselines_learned,
            patterns_learned: insights.patterns_learned,
            active_patterns: insights.active_patterns,
            total_observations: insights.total_observations,
            custom_sensitivities: self.sensitivity.len(),
        }
    }

    /// Drain the buffered feedback collected during a check run.
    pub fn take_feedback(&mut self) -> Vec<Feedback> {
        std::mem::take(&mut self.feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn learner() -> (tempfile::TempDir, LearningAgent) {
        let dir = tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(dir.path()).unwrap());
        (dir, LearningAgent::new("storage", memory))
    }

    #[test]
    fn test_sensitivity_saturates_high() {
        let (_dir, mut agent) = learner();
        for _ in 0..10 {
            agent
                .receive_user_feedback("storage_warning", FeedbackKind::TooSensitive, None)
                .unwrap();
        }
        assert_eq!(agent.sensitivity_for("storage_warning"), MAX_SENSITIVITY);
    }

    #[test]
    fn test_sensitivity_saturates_low() {
        let (_dir, mut agent) = learner();
        for _ in 0..10 {
            agent
                .receive_user_feedback("storage_warning", FeedbackKind::TooLate, None)
                .unwrap();
        }
        assert_eq!(agent.sensitivity_for("storage_warning"), MIN_SENSITIVITY);
    }

    #[test]
    fn test_useful_feedback_keeps_default_sensitivity() {
        let (_dir, mut agent) = learner();
        agent
            .receive_user_feedback("storage_warning", FeedbackKind::Useful, None)
            .unwrap();
        assert_eq!(agent.sensitivity_for("storage_warning"), DEFAULT_SENSITIVITY);
    }

    #[test]
    fn test_suppression_requires_reinforced_pattern() {
        let (_dir, mut agent) = learner();
        let context = Context::from([("volume".to_string(), ContextValue::from("V1"))]);

        // First false positive creates the pattern at 0.5: not yet active.
        agent
            .receive_user_feedback(
                "storage_warning",
                FeedbackKind::FalsePositive,
                Some(context.clone()),
            )
            .unwrap();
        assert!(!agent.should_suppress("storage_warning", &context).unwrap());

        // Two reinforcements push confidence to 0.7: suppression kicks in.
        for _ in 0..2 {
            agent
                .receive_user_feedback(
                    "storage_warning",
                    FeedbackKind::FalsePositive,
                    Some(context.clone()),
                )
                .unwrap();
        }
        assert!(agent.should_suppress("storage_warning", &context).unwrap());
    }

    #[test]
    fn test_suppressed_alert_is_downgraded_not_dropped() {
        let (_dir, mut agent) = learner();
        let context = Context::from([("volume".to_string(), ContextValue::from("V1"))]);

        for _ in 0..3 {
            agent
                .receive_user_feedback(
                    "storage_warning",
                    FeedbackKind::FalsePositive,
                    Some(context.clone()),
                )
                .unwrap();
        }

        let mut alert_context = context.clone();
        alert_context.insert("usage_percent".to_string(), ContextValue::from(82.0));
        agent
            .add_feedback_with_context(
                Priority::Medium,
                "Volume V1 at 82.0% capacity",
                "storage_warning",
                alert_context,
                None,
            )
            .unwrap();

        let feedback = agent.take_feedback();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].priority, Priority::Info);
        assert!(feedback[0].message.starts_with("[Suppressed] "));

        // The pattern's trigger count was bumped.
        let pattern = agent
            .memory()
            .get_pattern("storage", "suppress_storage_warning")
            .unwrap();
        assert_eq!(pattern.occurrences, 3 + 1);
    }

    #[test]
    fn test_unsuppressed_alert_keeps_priority() {
        let (_dir, mut agent) = learner();
        agent
            .add_feedback_with_context(
                Priority::High,
                "Volume V1 running low on space",
                "storage_high",
                Context::new(),
                Some("12.0 GB free".to_string()),
            )
            .unwrap();

        let feedback = agent.take_feedback();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].priority, Priority::High);
        assert_eq!(feedback[0].category, "storage");
        assert_eq!(feedback[0].details.as_deref(), Some("12.0 GB free"));
    }

    #[test]
    fn test_anomaly_uses_metric_keyed_override() {
        let (_dir, mut agent) = learner();
        for value in [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 12.0, 12.0, 12.0, 12.0] {
            agent.observe("growth_rate", value, None).unwrap();
        }

        // z for 13.0 is about 2.2: anomalous at the default sensitivity.
        assert!(agent.is_anomaly("growth_rate", 13.0));

        // Desensitizing the identically-named alert type raises the bar to 2.5.
        agent
            .receive_user_feedback("growth_rate", FeedbackKind::TooSensitive, None)
            .unwrap();
        assert!(!agent.is_anomaly("growth_rate", 13.0));
    }

    #[test]
    fn test_learning_status_counts() {
        let (_dir, mut agent) = learner();
        agent.observe("usage_percent_v1", 80.0, None).unwrap();
        agent
            .receive_user_feedback("storage_warning", FeedbackKind::TooSensitive, None)
            .unwrap();

        let status = agent.learning_status();
        assert_eq!(status.agent, "storage");
        assert_eq!(status.baselines_learned, 1);
        assert_eq!(status.total_observations, 1);
        assert_eq!(status.custom_sensitivities, 1);
    }
}
