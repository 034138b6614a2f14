//! Per-run log directory layout.
//!
//! ```text
//! <logs>/
//!   manifest.json         pipeline name, goal, start time, run id
//!   checkpoint.json       resume contract (see checkpoint module)
//!   <node_id>/            one stage dir per visited node
//!     prompt.md
//!     response.md
//!     status.json
//!     stdout.log / stderr.log   (tool nodes)
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gantry_types::{Outcome, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub pipeline: String,
    pub goal: String,
    pub started_at: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct RunLog {
    root: PathBuf,
}

impl RunLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RunLog { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory and write `manifest.json`.
    pub async fn init(&self, pipeline: &str, goal: &str) -> Result<RunManifest> {
        let manifest = RunManifest {
            pipeline: pipeline.to_string(),
            goal: goal.to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            run_id: uuid::Uuid::new_v4().to_string(),
        };
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(&manifest)?;
        tokio::fs::write(self.root.join("manifest.json"), json).await?;
        Ok(manifest)
    }

    pub fn stage_dir(&self, node_id: &str) -> PathBuf {
        self.root.join(node_id)
    }

    pub async fn write_prompt(&self, node_id: &str, prompt: &str) -> Result<()> {
        self.write_stage_file(node_id, "prompt.md", prompt.as_bytes())
            .await
    }

    pub async fn write_response(&self, node_id: &str, response: &str) -> Result<()> {
        self.write_stage_file(node_id, "response.md", response.as_bytes())
            .await
    }

    pub async fn write_status(&self, node_id: &str, outcome: &Outcome) -> Result<()> {
        let json = serde_json::to_string_pretty(outcome)?;
        self.write_stage_file(node_id, "status.json", json.as_bytes())
            .await
    }

    async fn write_stage_file(&self, node_id: &str, name: &str, contents: &[u8]) -> Result<()> {
        let dir = self.stage_dir(node_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), contents).await?;
        Ok(())
    }
}

/// Pick a fresh log directory under `prefix`: `<prefix>/<stem>-<8 hex>`.
/// The suffix hashes wall time and pid, so concurrent runs of the same
/// pipeline land in distinct directories.
pub fn unique_logs_dir(prefix: &Path, stem: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    let suffix = format!("{:08x}", hasher.finish() as u32);
    prefix.join(format!("{}-{}", stem, suffix))
}
