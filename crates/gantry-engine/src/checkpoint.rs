//! Crash-safe run checkpoints.
//!
//! `checkpoint.json` in the run's log directory is the sole durable resume
//! contract: it is rewritten after every finalized node outcome, and
//! `--resume` reconstructs the engine state from it alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gantry_types::{Outcome, Result};

use crate::state::EngineState;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// RFC 3339 write time.
    pub timestamp: String,
    /// Node the run will enter next (or the exit node, when finished).
    pub current_node_id: String,
    pub completed_nodes: Vec<String>,
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub node_outputs: HashMap<String, String>,
    #[serde(default)]
    pub branch_outputs: HashMap<String, String>,
    #[serde(default)]
    pub retry_counts: HashMap<String, usize>,
    #[serde(default)]
    pub node_outcomes: HashMap<String, Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunCheckpoint {
    pub fn capture(
        current_node_id: &str,
        state: &EngineState,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        RunCheckpoint {
            timestamp: chrono::Utc::now().to_rfc3339(),
            current_node_id: current_node_id.to_string(),
            completed_nodes: state.completed_nodes.clone(),
            context,
            node_outputs: state.node_outputs.clone(),
            branch_outputs: state.branch_outputs.clone(),
            retry_counts: state.retry_counts.clone(),
            node_outcomes: state.node_outcomes.clone(),
            last_error: state.last_error.clone(),
        }
    }

    /// Rebuild engine state from the checkpoint. Visit counts are not
    /// persisted; a resumed run re-counts from its resume point.
    pub fn restore_state(&self) -> EngineState {
        EngineState {
            completed_nodes: self.completed_nodes.clone(),
            node_outcomes: self.node_outcomes.clone(),
            node_outputs: self.node_outputs.clone(),
            branch_outputs: self.branch_outputs.clone(),
            retry_counts: self.retry_counts.clone(),
            visit_counts: HashMap::new(),
            last_error: self.last_error.clone(),
        }
    }
}

fn checkpoint_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(CHECKPOINT_FILE)
}

/// Write the checkpoint, creating the logs directory if needed.
pub async fn save_checkpoint(logs_dir: &Path, checkpoint: &RunCheckpoint) -> Result<()> {
    tokio::fs::create_dir_all(logs_dir).await?;
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(checkpoint_path(logs_dir), json).await?;
    Ok(())
}

/// Load a previously saved checkpoint. `Ok(None)` when none exists.
pub async fn load_checkpoint(logs_dir: &Path) -> Result<Option<RunCheckpoint>> {
    let path = checkpoint_path(logs_dir);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Remove the checkpoint file. Missing file is not an error.
pub async fn clear_checkpoint(logs_dir: &Path) -> Result<()> {
    match tokio::fs::remove_file(checkpoint_path(logs_dir)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
