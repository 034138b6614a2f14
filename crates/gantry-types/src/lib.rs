//! Shared types, errors, context, and outcome for the Gantry pipeline engine.
//!
//! This crate provides the foundational types used across all other Gantry crates:
//! - `GantryError` — unified error taxonomy
//! - `Context` — thread-safe key-value store for run state
//! - `Outcome` — result of executing a node handler

use serde::{Deserialize, Serialize};

/// Unified error type for all Gantry subsystems.
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    // === Parser Errors ===
    #[error("DOT parse error at line {line}, col {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Lint / Transform Errors ===
    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    #[error("Invalid condition '{condition}': {message}")]
    ConditionSyntax { condition: String, message: String },

    #[error("Stylesheet parse error: {0}")]
    Stylesheet(String),

    // === Executor Errors ===
    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    Handler {
        handler: String,
        node: String,
        message: String,
    },

    #[error("No handler registered for type '{handler_type}' (node '{node}')")]
    UnregisteredHandler { handler_type: String, node: String },

    #[error("goal-gate: node '{node}' did not reach SUCCESS")]
    GoalGateUnsatisfied { node: String },

    #[error("Max retries exhausted for node '{node}' after {attempts} attempts")]
    RetriesExhausted { node: String, attempts: usize },

    #[error("Node '{node}' visited {visits} times, exceeding max_visits={max}")]
    MaxVisitsExceeded {
        node: String,
        visits: usize,
        max: usize,
    },

    #[error("No eligible outgoing edge from non-exit node '{node}'")]
    NoEligibleEdge { node: String },

    #[error("Run canceled")]
    Canceled,

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    Tool { tool: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl GantryError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GantryError::CommandTimeout { .. })
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GantryError::Validation(_)
                | GantryError::Parse { .. }
                | GantryError::MaxVisitsExceeded { .. }
                | GantryError::Canceled
        )
    }
}

/// A convenience alias for `Result<T, GantryError>`.
pub type Result<T> = std::result::Result<T, GantryError>;

// ---------------------------------------------------------------------------
// Context — thread-safe key-value store for run state
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe key-value store shared across pipeline nodes.
///
/// Values are `serde_json::Value`, giving the context a tagged
/// string/number/boolean model; comparisons against strings happen only in
/// the condition evaluator.
///
/// Cloning a `Context` yields another handle to the **same** inner state.
/// Use [`clone_isolated`](Context::clone_isolated) to get a deep copy for
/// fan-out branch isolation.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<HashMap<String, serde_json::Value>>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Create a context pre-populated from a values map (checkpoint resume).
    pub fn from_values(values: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(values)),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.get(key).cloned()
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| default.to_owned())
    }

    /// Read a boolean-ish key: JSON `true` or the string `"true"`.
    pub async fn get_flag(&self, key: &str) -> bool {
        match self.inner.read().await.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.clone()
    }

    /// Deep copy that is fully independent of the original context.
    pub async fn clone_isolated(&self) -> Context {
        let guard = self.inner.read().await;
        Context {
            inner: Arc::new(tokio::sync::RwLock::new(guard.clone())),
        }
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.extend(updates);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StageStatus — outcome status of a pipeline node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl StageStatus {
    /// The snake_case wire form, also used for the `outcome` context key.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Retry => "retry",
            StageStatus::Fail => "fail",
            StageStatus::Skipped => "skipped",
        }
    }

    /// SUCCESS and PARTIAL_SUCCESS allow the walk to advance.
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::PartialSuccess)
    }
}

// ---------------------------------------------------------------------------
// Outcome — result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    #[serde(default)]
    pub preferred_label: Option<String>,
    #[serde(default)]
    pub suggested_next_ids: Vec<String>,
    #[serde(default)]
    pub context_updates: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Primary textual output of the node (generation response, tool stdout).
    #[serde(default)]
    pub output: Option<String>,
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: notes.into(),
            failure_reason: None,
            output: None,
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason.into()),
            output: None,
        }
    }

    /// Create a RETRY outcome with the given reason.
    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Retry,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason.into()),
            output: None,
        }
    }

    /// Create an outcome with a specific status and preferred label.
    pub fn with_label(status: StageStatus, label: impl Into<String>) -> Self {
        Self {
            status,
            preferred_label: Some(label.into()),
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
            output: None,
        }
    }

    /// Attach output text.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_parse() {
        let err = GantryError::Parse {
            line: 10,
            col: 5,
            message: "unexpected token".into(),
            source_snippet: Some("digraph {".into()),
        };
        assert_eq!(
            err.to_string(),
            "DOT parse error at line 10, col 5: unexpected token"
        );
    }

    #[test]
    fn error_display_validation() {
        let err = GantryError::Validation("dangling edge".into());
        assert_eq!(err.to_string(), "Pipeline validation failed: dangling edge");
    }

    #[test]
    fn error_display_handler() {
        let err = GantryError::Handler {
            handler: "codergen".into(),
            node: "summarize".into(),
            message: "prompt too long".into(),
        };
        assert_eq!(
            err.to_string(),
            "Handler 'codergen' failed on node 'summarize': prompt too long"
        );
    }

    #[test]
    fn error_display_goal_gate_carries_prefix() {
        let err = GantryError::GoalGateUnsatisfied {
            node: "review".into(),
        };
        assert!(err.to_string().starts_with("goal-gate:"));
        assert!(err.to_string().contains("review"));
    }

    #[test]
    fn error_display_retries_exhausted() {
        let err = GantryError::RetriesExhausted {
            node: "compile".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Max retries exhausted for node 'compile' after 3 attempts"
        );
    }

    #[test]
    fn error_display_max_visits() {
        let err = GantryError::MaxVisitsExceeded {
            node: "loop".into(),
            visits: 101,
            max: 100,
        };
        assert!(err.to_string().contains("max_visits=100"));
    }

    #[test]
    fn retryable_command_timeout() {
        let err = GantryError::CommandTimeout { timeout_ms: 5000 };
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn terminal_canceled() {
        assert!(GantryError::Canceled.is_terminal());
        assert!(!GantryError::Canceled.is_retryable());
    }

    #[test]
    fn terminal_validation() {
        assert!(GantryError::Validation("bad".into()).is_terminal());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GantryError = io_err.into();
        assert!(matches!(err, GantryError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: GantryError = json_err.into();
        assert!(matches!(err, GantryError::Json(_)));
    }

    // --- Context ---

    #[tokio::test]
    async fn context_set_and_get_round_trip() {
        let ctx = Context::new();
        ctx.set("key", serde_json::json!("hello")).await;
        assert_eq!(ctx.get("key").await, Some(serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn context_get_string_returns_default_when_missing() {
        let ctx = Context::new();
        assert_eq!(ctx.get_string("missing", "fallback").await, "fallback");
    }

    #[tokio::test]
    async fn context_get_flag_accepts_bool_and_string() {
        let ctx = Context::new();
        ctx.set("a", serde_json::json!(true)).await;
        ctx.set("b", serde_json::json!("true")).await;
        ctx.set("c", serde_json::json!("no")).await;
        assert!(ctx.get_flag("a").await);
        assert!(ctx.get_flag("b").await);
        assert!(!ctx.get_flag("c").await);
        assert!(!ctx.get_flag("missing").await);
    }

    #[tokio::test]
    async fn context_clone_isolated_is_independent() {
        let ctx = Context::new();
        ctx.set("a", serde_json::json!(1)).await;

        let isolated = ctx.clone_isolated().await;
        isolated.set("a", serde_json::json!(999)).await;
        isolated.set("b", serde_json::json!(2)).await;

        // Original is unaffected
        assert_eq!(ctx.get("a").await, Some(serde_json::json!(1)));
        assert_eq!(ctx.get("b").await, None);
    }

    #[tokio::test]
    async fn context_apply_updates_merges() {
        let ctx = Context::new();
        ctx.set("keep", serde_json::json!("old")).await;
        ctx.set("overwrite", serde_json::json!("old")).await;

        let mut updates = HashMap::new();
        updates.insert("overwrite".into(), serde_json::json!("new"));
        updates.insert("added".into(), serde_json::json!("fresh"));
        ctx.apply_updates(updates).await;

        assert_eq!(ctx.get("keep").await, Some(serde_json::json!("old")));
        assert_eq!(ctx.get("overwrite").await, Some(serde_json::json!("new")));
        assert_eq!(ctx.get("added").await, Some(serde_json::json!("fresh")));
    }

    #[tokio::test]
    async fn context_from_values_seeds_state() {
        let mut seed = HashMap::new();
        seed.insert("resume_key".to_string(), serde_json::json!("preset"));
        let ctx = Context::from_values(seed);
        assert_eq!(ctx.get_string("resume_key", "").await, "preset");
    }

    // --- StageStatus ---

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&StageStatus::PartialSuccess).unwrap(),
            "\"partial_success\""
        );
        assert_eq!(
            serde_json::to_string(&StageStatus::Fail).unwrap(),
            "\"fail\""
        );
    }

    #[test]
    fn stage_status_as_str_matches_serde() {
        for status in [
            StageStatus::Success,
            StageStatus::PartialSuccess,
            StageStatus::Retry,
            StageStatus::Fail,
            StageStatus::Skipped,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn stage_status_is_success() {
        assert!(StageStatus::Success.is_success());
        assert!(StageStatus::PartialSuccess.is_success());
        assert!(!StageStatus::Retry.is_success());
        assert!(!StageStatus::Fail.is_success());
    }

    // --- Outcome ---

    #[test]
    fn outcome_success_constructor() {
        let o = Outcome::success("all good");
        assert_eq!(o.status, StageStatus::Success);
        assert_eq!(o.notes, "all good");
        assert!(o.preferred_label.is_none());
        assert!(o.failure_reason.is_none());
        assert!(o.output.is_none());
    }

    #[test]
    fn outcome_fail_constructor() {
        let o = Outcome::fail("something broke");
        assert_eq!(o.status, StageStatus::Fail);
        assert_eq!(o.failure_reason, Some("something broke".to_string()));
    }

    #[test]
    fn outcome_retry_constructor() {
        let o = Outcome::retry("transient");
        assert_eq!(o.status, StageStatus::Retry);
        assert_eq!(o.failure_reason, Some("transient".to_string()));
    }

    #[test]
    fn outcome_with_label_and_output() {
        let o = Outcome::with_label(StageStatus::Success, "approve").with_output("report");
        assert_eq!(o.preferred_label, Some("approve".to_string()));
        assert_eq!(o.output, Some("report".to_string()));
    }

    #[test]
    fn outcome_deserializes_with_missing_optional_fields() {
        // The tool outcome-file convention allows sparse JSON.
        let o: Outcome = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(o.status, StageStatus::Success);
        assert!(o.context_updates.is_empty());
        assert!(o.output.is_none());
    }
}
