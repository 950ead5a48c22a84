//! # Agent Memory Store
//!
//! This module implements the durable learning substrate shared by all
//! monitoring agents:
//! - Observations: raw metric samples with a 30-day rolling retention window
//! - Baselines: online mean/variance statistics per (agent, metric) pair
//! - Patterns: learned condition-to-action rules used for alert suppression
//! - User feedback: the judgment log that drives automatic pattern synthesis
//!
//! ## Persistence
//!
//! State lives in four JSON files inside a per-device data directory. Every
//! mutation rewrites the affected file through a temp-file-then-rename step so
//! a crash mid-write never leaves an unreadable file behind. A corrupt file is
//! treated as an empty collection at load time; the monitor keeps running and
//! relearns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// Observations older than this are dropped on the next save.
pub const RETENTION_DAYS: i64 = 30;

/// Minimum samples before a baseline participates in anomaly detection.
pub const MIN_SAMPLES_FOR_BASELINE: u64 = 10;

/// Patterns at or above this confidence actively suppress alerts.
pub const ACTIVE_PATTERN_CONFIDENCE: f64 = 0.7;

/// A scalar value carried in observation and alert contexts.
///
/// Pattern conditions compare these by equality; `Int` and `Float` compare
/// numerically so a context built from an integer literal still matches a
/// condition recorded from a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ContextValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ContextValue::Int(v) => Some(*v as f64),
            ContextValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ContextValue::Bool(a), ContextValue::Bool(b)) => a == b,
            (ContextValue::Str(a), ContextValue::Str(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        ContextValue::Int(value as i64)
    }
}

impl From<u64> for ContextValue {
    fn from(value: u64) -> Self {
        ContextValue::Int(value as i64)
    }
}

impl From<usize> for ContextValue {
    fn from(value: usize) -> Self {
        ContextValue::Int(value as i64)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Str(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Str(value)
    }
}

/// Context map attached to observations, alerts, and pattern conditions.
pub type Context = HashMap<String, ContextValue>;

/// A single observation recorded by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub agent: String,
    pub metric: String,
    pub value: ContextValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Context,
}

impl Observation {
    pub fn new(
        agent: impl Into<String>,
        metric: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> Self {
        Self {
            agent: agent.into(),
            metric: metric.into(),
            value: value.into(),
            timestamp: Utc::now(),
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Learned baseline for a metric, maintained incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub agent: String,
    pub metric: String,
    pub mean: f64,
    pub std_dev: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl Baseline {
    /// Seed a new baseline from the first sample.
    fn seed(agent: &str, metric: &str, value: f64) -> Self {
        Self {
            agent: agent.to_string(),
            metric: metric.to_string(),
            mean: value,
            std_dev: 0.0,
            min_value: value,
            max_value: value,
            sample_count: 1,
            last_updated: Utc::now(),
        }
    }

    /// Fold one sample into the running statistics (Welford's algorithm,
    /// population variance).
    pub fn update(&mut self, value: f64) {
        let n = self.sample_count + 1;
        let delta = value - self.mean;
        let new_mean = self.mean + delta / n as f64;
        let delta2 = value - new_mean;
        let variance = if n > 1 {
            (self.std_dev.powi(2) * (n - 1) as f64 + delta * delta2) / n as f64
        } else {
            0.0
        };

        self.mean = new_mean;
        self.std_dev = variance.sqrt();
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
        self.sample_count = n;
        self.last_updated = Utc::now();
    }

    /// Check if a value is anomalous relative to this baseline.
    ///
    /// With zero spread any deviation from the mean is anomalous; otherwise a
    /// value is anomalous when its z-score strictly exceeds the sensitivity.
    pub fn is_anomaly(&self, value: f64, sensitivity: f64) -> bool {
        if self.std_dev == 0.0 {
            return value != self.mean;
        }
        let z_score = (value - self.mean).abs() / self.std_dev;
        z_score > sensitivity
    }
}

/// What a matched pattern does to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternAction {
    Ignore,
    Escalate,
    AdjustThreshold,
}

/// A learned or declared rule keyed by (agent, name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub agent: String,
    pub name: String,
    pub description: String,
    /// Context keys that must all match for the pattern to trigger.
    pub condition: Context,
    pub action: PatternAction,
    /// 0.0 to 1.0
    pub confidence: f64,
    #[serde(default)]
    pub occurrences: u64,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    pub fn new(
        agent: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        condition: Context,
        action: PatternAction,
        confidence: f64,
    ) -> Self {
        Self {
            agent: agent.into(),
            name: name.into(),
            description: description.into(),
            condition,
            action,
            confidence: confidence.clamp(0.0, 1.0),
            occurrences: 0,
            last_triggered: None,
            created_at: Utc::now(),
        }
    }

    /// True when every condition key is present in `context` with an equal
    /// value. Extra context keys are ignored.
    pub fn matches(&self, context: &Context) -> bool {
        self.condition
            .iter()
            .all(|(key, expected)| context.get(key) == Some(expected))
    }
}

/// A user's judgment about a past alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Useful,
    FalsePositive,
    TooLate,
    TooSensitive,
}

/// Immutable user feedback log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    pub agent: String,
    pub alert_type: String,
    pub feedback: FeedbackKind,
    #[serde(default)]
    pub context: Context,
    pub timestamp: DateTime<Utc>,
}

impl UserFeedback {
    pub fn new(
        agent: impl Into<String>,
        alert_type: impl Into<String>,
        feedback: FeedbackKind,
        context: Context,
    ) -> Self {
        Self {
            agent: agent.into(),
            alert_type: alert_type.into(),
            feedback,
            context,
            timestamp: Utc::now(),
        }
    }
}

/// Direction of a metric over a recent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Increasing => write!(f, "increasing"),
            Trend::Decreasing => write!(f, "decreasing"),
            Trend::Stable => write!(f, "stable"),
            Trend::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-agent learning counters derived from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub baselines_learned: usize,
    pub patterns_learned: usize,
    pub active_patterns: usize,
    pub total_observations: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    observations: Vec<Observation>,
    baselines: HashMap<String, Baseline>,
    patterns: HashMap<String, Pattern>,
    feedback: Vec<UserFeedback>,
}

/// Persistent storage for agent observations and learned patterns.
///
/// One store per monitored device. The store is shared between agents as an
/// `Arc<MemoryStore>`; every mutating operation locks the inner state for its
/// full read-modify-persist cycle, so concurrent agents always observe
/// committed state and baseline updates are equivalent to some serial order.
#[derive(Debug)]
pub struct MemoryStore {
    data_dir: PathBuf,
    observations_file: PathBuf,
    baselines_file: PathBuf,
    patterns_file: PathBuf,
    feedback_file: PathBuf,
    inner: Mutex<StoreState>,
}

impl MemoryStore {
    /// Open (or create) a store rooted at `data_dir`, loading any existing
    /// state from disk.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let observations_file = data_dir.join("observations.json");
        let baselines_file = data_dir.join("baselines.json");
        let patterns_file = data_dir.join("patterns.json");
        let feedback_file = data_dir.join("feedback.json");

        let mut state = StoreState::default();
        state.observations = load_collection(&observations_file, "observations");
        state.baselines = load_collection::<Baseline>(&baselines_file, "baselines")
            .into_iter()
            .map(|b| (store_key(&b.agent, &b.metric), b))
            .collect();
        state.patterns = load_collection::<Pattern>(&patterns_file, "patterns")
            .into_iter()
            .map(|p| (store_key(&p.agent, &p.name), p))
            .collect();
        state.feedback = load_collection(&feedback_file, "feedback");

        debug!(
            observations = state.observations.len(),
            baselines = state.baselines.len(),
            patterns = state.patterns.len(),
            feedback = state.feedback.len(),
            "memory store loaded from {}",
            data_dir.display()
        );

        Ok(Self {
            data_dir,
            observations_file,
            baselines_file,
            patterns_file,
            feedback_file,
            inner: Mutex::new(state),
        })
    }

    /// Directory this store persists into.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ========== Observations ==========

    /// Record a new observation. Numeric values also update the baseline for
    /// the observation's (agent, metric) pair.
    pub fn record_observation(&self, observation: Observation) -> Result<()> {
        let mut state = self.lock();

        state.observations.push(observation.clone());

        // Enforce the rolling retention window on every save.
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        state.observations.retain(|o| o.timestamp > cutoff);
        save_collection(&self.observations_file, &state.observations)?;

        if let Some(value) = observation.value.as_f64() {
            let key = store_key(&observation.agent, &observation.metric);
            state
                .baselines
                .entry(key)
                .and_modify(|baseline| baseline.update(value))
                .or_insert_with(|| {
                    Baseline::seed(&observation.agent, &observation.metric, value)
                });
            let baselines: Vec<&Baseline> = state.baselines.values().collect();
            save_collection(&self.baselines_file, &baselines)?;
        }

        Ok(())
    }

    /// Observations for an agent/metric, ascending by timestamp.
    pub fn get_observations(
        &self,
        agent: &str,
        metric: &str,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Observation> {
        let state = self.lock();
        let mut results: Vec<Observation> = state
            .observations
            .iter()
            .filter(|o| o.agent == agent && o.metric == metric)
            .filter(|o| since.map_or(true, |cutoff| o.timestamp > cutoff))
            .cloned()
            .collect();
        results.sort_by_key(|o| o.timestamp);
        results
    }

    // ========== Baselines ==========

    pub fn get_baseline(&self, agent: &str, metric: &str) -> Option<Baseline> {
        self.lock().baselines.get(&store_key(agent, metric)).cloned()
    }

    /// Check if a value is anomalous compared to the learned baseline.
    /// Returns false until the baseline has seen enough samples.
    pub fn is_anomaly(&self, agent: &str, metric: &str, value: f64, sensitivity: f64) -> bool {
        match self.get_baseline(agent, metric) {
            Some(baseline) if baseline.sample_count >= MIN_SAMPLES_FOR_BASELINE => {
                baseline.is_anomaly(value, sensitivity)
            }
            _ => false,
        }
    }

    // ========== Patterns ==========

    /// Add or replace a pattern keyed by (agent, name).
    pub fn add_pattern(&self, pattern: Pattern) -> Result<()> {
        let mut state = self.lock();
        state
            .patterns
            .insert(store_key(&pattern.agent, &pattern.name), pattern);
        let patterns: Vec<&Pattern> = state.patterns.values().collect();
        save_collection(&self.patterns_file, &patterns)
    }

    pub fn get_patterns(&self, agent: &str) -> Vec<Pattern> {
        self.lock()
            .patterns
            .values()
            .filter(|p| p.agent == agent)
            .cloned()
            .collect()
    }

    pub fn get_pattern(&self, agent: &str, name: &str) -> Option<Pattern> {
        self.lock().patterns.get(&store_key(agent, name)).cloned()
    }

    /// Record that a pattern was triggered. No-op if the pattern is absent.
    pub fn trigger_pattern(&self, agent: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(pattern) = state.patterns.get_mut(&store_key(agent, name)) {
            pattern.occurrences += 1;
            pattern.last_triggered = Some(Utc::now());
            let patterns: Vec<&Pattern> = state.patterns.values().collect();
            save_collection(&self.patterns_file, &patterns)?;
        }
        Ok(())
    }

    // ========== User Feedback ==========

    /// Record user feedback on an alert and learn from it.
    pub fn record_feedback(&self, feedback: UserFeedback) -> Result<()> {
        let mut state = self.lock();
        state.feedback.push(feedback.clone());
        save_collection(&self.feedback_file, &state.feedback)?;

        self.learn_from_feedback(&mut state, &feedback)
    }

    /// A `false_positive` judgment creates or strengthens a suppression
    /// pattern for the alert type. The first feedback's context becomes the
    /// pattern condition; later reinforcements only raise confidence.
    fn learn_from_feedback(&self, state: &mut StoreState, feedback: &UserFeedback) -> Result<()> {
        if feedback.feedback != FeedbackKind::FalsePositive {
            return Ok(());
        }

        let pattern_name = format!("suppress_{}", feedback.alert_type);
        let key = store_key(&feedback.agent, &pattern_name);

        match state.patterns.get_mut(&key) {
            Some(existing) => {
                existing.confidence = (existing.confidence + 0.1).min(1.0);
                existing.occurrences += 1;
            }
            None => {
                let mut pattern = Pattern::new(
                    feedback.agent.clone(),
                    pattern_name,
                    format!("Auto-learned: suppress {} alerts", feedback.alert_type),
                    feedback.context.clone(),
                    PatternAction::Ignore,
                    0.5,
                );
                pattern.occurrences = 1;
                state.patterns.insert(key, pattern);
            }
        }

        let patterns: Vec<&Pattern> = state.patterns.values().collect();
        save_collection(&self.patterns_file, &patterns)
    }

    /// Fraction of recorded feedback for (agent, alert_type) judged a false
    /// positive. Zero when no feedback exists.
    pub fn get_false_positive_rate(&self, agent: &str, alert_type: &str) -> f64 {
        let state = self.lock();
        let relevant: Vec<&UserFeedback> = state
            .feedback
            .iter()
            .filter(|f| f.agent == agent && f.alert_type == alert_type)
            .collect();
        if relevant.is_empty() {
            return 0.0;
        }
        let false_positives = relevant
            .iter()
            .filter(|f| f.feedback == FeedbackKind::FalsePositive)
            .count();
        false_positives as f64 / relevant.len() as f64
    }

    // ========== Learning Insights ==========

    /// Trend direction for a metric over the last `days` days, from a
    /// split-means comparison of the ordered numeric samples.
    pub fn get_trend(&self, agent: &str, metric: &str, days: i64) -> Trend {
        let since = Utc::now() - Duration::days(days);
        let observations = self.get_observations(agent, metric, Some(since));

        let values: Vec<f64> = observations
            .iter()
            .filter_map(|o| o.value.as_f64())
            .collect();
        if values.len() < 2 {
            return Trend::Unknown;
        }

        let mid = values.len() / 2;
        let first_half = values[..mid].iter().sum::<f64>() / mid as f64;
        let second_half = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;

        let diff_pct = if first_half == 0.0 {
            0.0
        } else {
            (second_half - first_half) / first_half * 100.0
        };

        if diff_pct > 10.0 {
            Trend::Increasing
        } else if diff_pct < -10.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Learning counters for one agent.
    pub fn get_insights(&self, agent: &str) -> LearningInsights {
        let state = self.lock();
        let prefix = format!("{}:", agent);

        let baselines_learned = state
            .baselines
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .count();
        let patterns: Vec<&Pattern> =
            state.patterns.values().filter(|p| p.agent == agent).collect();
        let active_patterns = patterns
            .iter()
            .filter(|p| p.confidence >= ACTIVE_PATTERN_CONFIDENCE)
            .count();
        let total_observations = state
            .observations
            .iter()
            .filter(|o| o.agent == agent)
            .count();

        LearningInsights {
            baselines_learned,
            patterns_learned: patterns.len(),
            active_patterns,
            total_observations,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // A poisoned lock means another thread panicked mid-update; the state
        // itself is still a committed snapshot, so keep serving it.
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn store_key(agent: &str, name: &str) -> String {
    format!("{}:{}", agent, name)
}

fn load_collection<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(items) => items,
            Err(err) => {
                warn!("corrupt {} file {}: {}", what, path.display(), err);
                Vec::new()
            }
        },
        Err(err) => {
            warn!("unreadable {} file {}: {}", what, path.display(), err);
            Vec::new()
        }
    }
}

fn save_collection<T: Serialize>(path: &Path, items: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn record_values(store: &MemoryStore, agent: &str, metric: &str, values: &[f64]) {
        for &value in values {
            store
                .record_observation(Observation::new(agent, metric, value))
                .unwrap();
        }
    }

    #[test]
    fn test_baseline_created_on_first_numeric_observation() {
        let (_dir, store) = test_store();

        store
            .record_observation(Observation::new("storage", "usage_percent_v1", 42.0))
            .unwrap();

        let baseline = store.get_baseline("storage", "usage_percent_v1").unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.mean, 42.0);
        assert_eq!(baseline.std_dev, 0.0);
        assert_eq!(baseline.min_value, 42.0);
        assert_eq!(baseline.max_value, 42.0);
    }

    #[test]
    fn test_non_numeric_observation_skips_baseline() {
        let (_dir, store) = test_store();

        store
            .record_observation(Observation::new("disks", "model_sda", "WD Red"))
            .unwrap();

        assert!(store.get_baseline("disks", "model_sda").is_none());
        assert_eq!(store.get_observations("disks", "model_sda", None).len(), 1);
    }

    #[test]
    fn test_welford_matches_population_statistics() {
        let (_dir, store) = test_store();
        let values = [12.0, 15.0, 11.0, 14.0, 13.0, 19.0, 12.5, 16.0];
        record_values(&store, "logs", "error_count", &values);

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let baseline = store.get_baseline("logs", "error_count").unwrap();
        assert_eq!(baseline.sample_count, values.len() as u64);
        assert!((baseline.mean - mean).abs() < 1e-9);
        assert!((baseline.std_dev - variance.sqrt()).abs() < 1e-9);
        assert_eq!(baseline.min_value, 11.0);
        assert_eq!(baseline.max_value, 19.0);
    }

    #[test]
    fn test_anomaly_boundary_is_strict() {
        let mut baseline = Baseline::seed("a", "m", 10.0);
        baseline.mean = 10.0;
        baseline.std_dev = 2.0;
        baseline.sample_count = 50;

        // z == sensitivity is not anomalous; strictly beyond it is.
        assert!(!baseline.is_anomaly(14.0, 2.0));
        assert!(baseline.is_anomaly(14.1, 2.0));
        assert!(baseline.is_anomaly(5.9, 2.0));
    }

    #[test]
    fn test_anomaly_monotonic_in_deviation() {
        let mut baseline = Baseline::seed("a", "m", 10.0);
        baseline.std_dev = 1.5;
        baseline.sample_count = 30;

        // Once a deviation is anomalous, any larger deviation stays anomalous.
        let mut previous = false;
        for step in 0..40 {
            let value = 10.0 + step as f64 * 0.25;
            let verdict = baseline.is_anomaly(value, 2.0);
            assert!(!(previous && !verdict), "verdict flipped back at {}", value);
            previous = verdict;
        }
        assert!(previous);
    }

    #[test]
    fn test_anomaly_with_zero_spread() {
        let baseline = Baseline::seed("a", "m", 10.0);
        assert!(!baseline.is_anomaly(10.0, 2.0));
        assert!(baseline.is_anomaly(10.0001, 2.0));
    }

    #[test]
    fn test_insufficient_samples_guard() {
        let (_dir, store) = test_store();
        record_values(&store, "security", "failed_logins_24h", &[5.0; 9]);

        // Nine samples: never anomalous regardless of how far off the value is.
        assert!(!store.is_anomaly("security", "failed_logins_24h", 500.0, 2.0));

        record_values(&store, "security", "failed_logins_24h", &[5.0]);
        assert!(store.is_anomaly("security", "failed_logins_24h", 500.0, 2.0));
    }

    #[test]
    fn test_observations_sorted_and_filtered() {
        let (_dir, store) = test_store();
        let now = Utc::now();

        let mut old = Observation::new("backup", "backup_size_daily", 10.0);
        old.timestamp = now - Duration::days(3);
        let mut recent = Observation::new("backup", "backup_size_daily", 12.0);
        recent.timestamp = now - Duration::hours(1);

        // Insert newest first; retrieval must sort ascending.
        store.record_observation(recent).unwrap();
        store.record_observation(old).unwrap();

        let all = store.get_observations("backup", "backup_size_daily", None);
        assert_eq!(all.len(), 2);
        assert!(all[0].timestamp < all[1].timestamp);

        let since = store.get_observations(
            "backup",
            "backup_size_daily",
            Some(now - Duration::days(1)),
        );
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].value, ContextValue::Float(12.0));
    }

    #[test]
    fn test_retention_prunes_old_observations() {
        let (_dir, store) = test_store();

        let mut stale = Observation::new("logs", "error_count", 3.0);
        stale.timestamp = Utc::now() - Duration::days(RETENTION_DAYS + 5);
        store.record_observation(stale).unwrap();
        store
            .record_observation(Observation::new("logs", "error_count", 4.0))
            .unwrap();

        let kept = store.get_observations("logs", "error_count", None);
        assert_eq!(kept.len(), 1);
        // The baseline still remembers both samples.
        let baseline = store.get_baseline("logs", "error_count").unwrap();
        assert_eq!(baseline.sample_count, 2);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();

        {
            let store = MemoryStore::new(dir.path()).unwrap();
            record_values(&store, "storage", "usage_percent_v1", &[80.0, 82.0, 85.0]);
            store
                .add_pattern(Pattern::new(
                    "storage",
                    "ignore_media_volume",
                    "Media volume fills up on purpose",
                    Context::from([("volume".to_string(), ContextValue::from("media"))]),
                    PatternAction::Ignore,
                    0.9,
                ))
                .unwrap();
            store.trigger_pattern("storage", "ignore_media_volume").unwrap();
            store
                .record_feedback(UserFeedback::new(
                    "storage",
                    "storage_warning",
                    FeedbackKind::Useful,
                    Context::new(),
                ))
                .unwrap();
        }

        let reloaded = MemoryStore::new(dir.path()).unwrap();

        let baseline = reloaded.get_baseline("storage", "usage_percent_v1").unwrap();
        assert_eq!(baseline.sample_count, 3);
        assert!((baseline.mean - 82.333333).abs() < 1e-5);

        let pattern = reloaded.get_pattern("storage", "ignore_media_volume").unwrap();
        assert_eq!(pattern.occurrences, 1);
        assert!(pattern.last_triggered.is_some());

        assert_eq!(
            reloaded.get_false_positive_rate("storage", "storage_warning"),
            0.0
        );
        assert_eq!(reloaded.get_observations("storage", "usage_percent_v1", None).len(), 3);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("baselines.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("patterns.json"), "[{\"agent\":1}]").unwrap();

        let store = MemoryStore::new(dir.path()).unwrap();
        assert!(store.get_baseline("storage", "anything").is_none());
        assert!(store.get_patterns("storage").is_empty());
    }

    #[test]
    fn test_trigger_pattern_missing_is_noop() {
        let (_dir, store) = test_store();
        store.trigger_pattern("storage", "does_not_exist").unwrap();
        assert!(store.get_pattern("storage", "does_not_exist").is_none());
    }

    #[test]
    fn test_false_positive_rate() {
        let (_dir, store) = test_store();
        for kind in [
            FeedbackKind::FalsePositive,
            FeedbackKind::Useful,
            FeedbackKind::FalsePositive,
            FeedbackKind::TooLate,
        ] {
            store
                .record_feedback(UserFeedback::new(
                    "disks",
                    "disk_temp_high",
                    kind,
                    Context::new(),
                ))
                .unwrap();
        }

        assert_eq!(store.get_false_positive_rate("disks", "disk_temp_high"), 0.5);
        assert_eq!(store.get_false_positive_rate("disks", "other_alert"), 0.0);
    }

    #[test]
    fn test_auto_learned_suppression_confidence_ramp() {
        let (_dir, store) = test_store();
        let context = Context::from([("volume".to_string(), ContextValue::from("V1"))]);

        let expected = [0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.0];
        for confidence in expected {
            store
                .record_feedback(UserFeedback::new(
                    "storage",
                    "storage_warning",
                    FeedbackKind::FalsePositive,
                    context.clone(),
                ))
                .unwrap();

            let pattern = store.get_pattern("storage", "suppress_storage_warning").unwrap();
            assert!((pattern.confidence - confidence).abs() < 1e-9);
            assert_eq!(pattern.action, PatternAction::Ignore);
        }

        // Condition keeps the first feedback's context.
        let pattern = store.get_pattern("storage", "suppress_storage_warning").unwrap();
        assert_eq!(pattern.condition, context);
        assert_eq!(pattern.occurrences, expected.len() as u64);
    }

    #[test]
    fn test_other_feedback_kinds_do_not_create_patterns() {
        let (_dir, store) = test_store();
        for kind in [FeedbackKind::Useful, FeedbackKind::TooLate, FeedbackKind::TooSensitive] {
            store
                .record_feedback(UserFeedback::new("logs", "log_errors", kind, Context::new()))
                .unwrap();
        }
        assert!(store.get_patterns("logs").is_empty());
    }

    #[test]
    fn test_trend_detection() {
        let (_dir, store) = test_store();

        record_values(
            &store,
            "logs",
            "error_count",
            &[10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 20.0, 20.0, 20.0, 20.0],
        );
        assert_eq!(store.get_trend("logs", "error_count", 7), Trend::Increasing);

        record_values(
            &store,
            "logs",
            "entries",
            &[100.0, 100.0, 100.0, 50.0, 50.0, 50.0],
        );
        assert_eq!(store.get_trend("logs", "entries", 7), Trend::Decreasing);

        record_values(&store, "logs", "warn_count", &[10.0, 10.5, 10.2, 10.1]);
        assert_eq!(store.get_trend("logs", "warn_count", 7), Trend::Stable);

        record_values(&store, "logs", "lonely", &[10.0]);
        assert_eq!(store.get_trend("logs", "lonely", 7), Trend::Unknown);
        assert_eq!(store.get_trend("logs", "missing", 7), Trend::Unknown);
    }

    #[test]
    fn test_trend_window_excludes_old_samples() {
        let (_dir, store) = test_store();

        let mut old = Observation::new("logs", "error_count", 1000.0);
        old.timestamp = Utc::now() - Duration::days(10);
        store.record_observation(old).unwrap();
        record_values(&store, "logs", "error_count", &[10.0, 10.0]);

        // The 1000.0 sample is outside the 7-day window.
        assert_eq!(store.get_trend("logs", "error_count", 7), Trend::Stable);
    }

    #[test]
    fn test_trend_zero_first_half_mean() {
        let (_dir, store) = test_store();
        record_values(&store, "security", "failed_logins_24h", &[0.0, 0.0, 5.0, 5.0]);
        assert_eq!(
            store.get_trend("security", "failed_logins_24h", 7),
            Trend::Stable
        );
    }

    #[test]
    fn test_insights_counts() {
        let (_dir, store) = test_store();
        record_values(&store, "storage", "usage_percent_v1", &[80.0, 81.0]);
        record_values(&store, "storage", "used_gb_v1", &[500.0]);
        record_values(&store, "disks", "temp_sda", &[40.0]);

        store
            .add_pattern(Pattern::new(
                "storage",
                "low_confidence",
                "not yet trusted",
                Context::new(),
                PatternAction::Ignore,
                0.5,
            ))
            .unwrap();
        store
            .add_pattern(Pattern::new(
                "storage",
                "trusted",
                "active suppression",
                Context::new(),
                PatternAction::Ignore,
                0.8,
            ))
            .unwrap();

        let insights = store.get_insights("storage");
        assert_eq!(insights.baselines_learned, 2);
        assert_eq!(insights.patterns_learned, 2);
        assert_eq!(insights.active_patterns, 1);
        assert_eq!(insights.total_observations, 3);

        let other = store.get_insights("disks");
        assert_eq!(other.baselines_learned, 1);
        assert_eq!(other.patterns_learned, 0);
        assert_eq!(other.total_observations, 1);
    }

    #[test]
    fn test_context_value_equality() {
        assert_eq!(ContextValue::Int(5), ContextValue::Float(5.0));
        assert_ne!(ContextValue::Int(5), ContextValue::Float(5.5));
        assert_eq!(ContextValue::from("V1"), ContextValue::Str("V1".to_string()));
        assert_ne!(ContextValue::from("5"), ContextValue::Int(5));
        assert_eq!(ContextValue::Bool(true), ContextValue::Bool(true));
        assert_ne!(ContextValue::Bool(true), ContextValue::Int(1));
    }

    #[test]
    fn test_pattern_matching_ignores_extra_context_keys() {
        let pattern = Pattern::new(
            "storage",
            "suppress_storage_warning",
            "",
            Context::from([("volume".to_string(), ContextValue::from("V1"))]),
            PatternAction::Ignore,
            0.8,
        );

        let mut context = Context::from([
            ("volume".to_string(), ContextValue::from("V1")),
            ("usage_percent".to_string(), ContextValue::from(82.0)),
        ]);
        assert!(pattern.matches(&context));

        context.insert("volume".to_string(), ContextValue::from("V2"));
        assert!(!pattern.matches(&context));

        context.remove("volume");
        assert!(!pattern.matches(&context));
    }

    #[test]
    fn test_concurrent_observations_on_disjoint_keys() {
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|agent_idx| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let agent = format!("agent{}", agent_idx);
                    for i in 0..25 {
                        store
                            .record_observation(Observation::new(
                                agent.clone(),
                                "metric",
                                i as f64,
                            ))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Each key saw exactly its own 25 samples, mean 12.
        for agent_idx in 0..4 {
            let agent = format!("agent{}", agent_idx);
            let baseline = store.get_baseline(&agent, "metric").unwrap();
            assert_eq!(baseline.sample_count, 25);
            assert!((baseline.mean - 12.0).abs() < 1e-9);
        }
    }
}
