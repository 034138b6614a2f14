//! Mutable run state carried by the executor between steps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use gantry_types::Outcome;

/// Everything the executor accumulates while walking the graph. Serialized
/// into every checkpoint; restored wholesale on resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    /// Node ids in completion order.
    pub completed_nodes: Vec<String>,
    /// Final outcome per node (latest visit wins).
    pub node_outcomes: HashMap<String, Outcome>,
    /// Output text per node, for downstream prompt assembly.
    pub node_outputs: HashMap<String, String>,
    /// Fan-out branch outputs keyed by edge label (or target id).
    pub branch_outputs: HashMap<String, String>,
    /// Retry attempts consumed per node.
    pub retry_counts: HashMap<String, usize>,
    /// Times each node has been entered, for the max_visits guard.
    pub visit_counts: HashMap<String, usize>,
    /// Description of the failure that ended the run, if any.
    pub last_error: Option<String>,
}

impl EngineState {
    pub fn record_completed(&mut self, node_id: &str) {
        if self.completed_nodes.last().map(String::as_str) != Some(node_id) {
            self.completed_nodes.push(node_id.to_string());
        }
    }

    pub fn record_outcome(&mut self, node_id: &str, outcome: Outcome) {
        if let Some(output) = &outcome.output {
            self.node_outputs
                .insert(node_id.to_string(), output.clone());
        }
        self.node_outcomes.insert(node_id.to_string(), outcome);
    }

    /// Bump and return the visit count for a node.
    pub fn enter_node(&mut self, node_id: &str) -> usize {
        let count = self.visit_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop completion history for a fresh loop iteration. Visit counts are
    /// kept so max_visits still bounds the loop.
    pub fn restart_loop(&mut self) {
        self.completed_nodes.clear();
        self.node_outcomes.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Canceled,
}

/// What a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    /// Exit node id, when the run reached one.
    pub exit_node: Option<String>,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub node_outputs: HashMap<String, String>,
    pub branch_outputs: HashMap<String, String>,
    pub final_context: HashMap<String, serde_json::Value>,
}
