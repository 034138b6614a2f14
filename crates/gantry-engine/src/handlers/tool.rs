//! Tool handler: runs `tool_command` (plus optional hooks) via `sh -c`.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use gantry_types::{GantryError, Outcome, Result};

use crate::handler::{HandlerRequest, NodeHandler};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct ToolHandler {
    run_root: PathBuf,
    logs_root: PathBuf,
}

enum CommandResult {
    Finished(std::process::Output),
    TimedOut(Duration),
}

impl ToolHandler {
    pub fn new(run_root: impl Into<PathBuf>, logs_root: impl Into<PathBuf>) -> Self {
        ToolHandler {
            run_root: run_root.into(),
            logs_root: logs_root.into(),
        }
    }

    /// Resolve the working directory. `tool_workdir` must stay inside the
    /// run root.
    fn workdir(&self, node: &crate::graph::Node) -> std::result::Result<PathBuf, String> {
        match node.attr_string("tool_workdir") {
            None => Ok(self.run_root.clone()),
            Some(rel) => {
                let rel_path = Path::new(&rel);
                if rel_path.is_absolute() {
                    return Err(format!("tool_workdir '{}' must be relative", rel));
                }
                if rel_path
                    .components()
                    .any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(format!("tool_workdir '{}' escapes the run root", rel));
                }
                Ok(self.run_root.join(rel_path))
            }
        }
    }

    async fn run_shell(
        &self,
        command: &str,
        workdir: &Path,
        request: &HandlerRequest<'_>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("GANTRY_NODE_ID", &request.node.id)
            .env("GANTRY_LOGS_DIR", &self.logs_root);
        if let Some(stage) = &request.stage_dir {
            cmd.env("GANTRY_STAGE_DIR", stage);
        }

        let child = cmd.spawn().map_err(|e| GantryError::Tool {
            tool: command.to_string(),
            message: format!("failed to spawn: {e}"),
        })?;

        // dropping the future on timeout kills the child via kill_on_drop
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandResult::Finished(output)),
            Ok(Err(e)) => Err(GantryError::Tool {
                tool: command.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Ok(CommandResult::TimedOut(timeout)),
        }
    }
}

/// Read `outcome.json` from the stage dir, if the command wrote one. A
/// parseable file fully overrides the synthesized outcome.
async fn read_outcome_override(stage_dir: Option<&PathBuf>) -> Result<Option<Outcome>> {
    let Some(stage) = stage_dir else {
        return Ok(None);
    };
    let path = stage.join("outcome.json");
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_stage_artifact(stage_dir: Option<&PathBuf>, name: &str, contents: &[u8]) {
    let Some(stage) = stage_dir else { return };
    if tokio::fs::create_dir_all(stage).await.is_ok() {
        let _ = tokio::fs::write(stage.join(name), contents).await;
    }
}

#[async_trait]
impl NodeHandler for ToolHandler {
    async fn execute(&self, request: &HandlerRequest<'_>) -> Result<Outcome> {
        let node = request.node;
        let Some(command) = node.attr_string("tool_command") else {
            return Ok(Outcome::fail(format!(
                "tool node '{}' has no tool_command",
                node.id
            )));
        };
        let workdir = match self.workdir(node) {
            Ok(dir) => dir,
            Err(reason) => return Ok(Outcome::fail(reason)),
        };
        tokio::fs::create_dir_all(&workdir).await?;
        let timeout = node.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT);

        if let Some(pre) = node.attr_string("pre_hook") {
            match self.run_shell(&pre, &workdir, request, timeout).await? {
                CommandResult::Finished(out) if out.status.success() => {}
                CommandResult::Finished(out) => {
                    return Ok(Outcome::fail(format!(
                        "pre_hook exited with {}: {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    )));
                }
                CommandResult::TimedOut(t) => {
                    return Ok(Outcome::fail(format!(
                        "pre_hook timed out after {}s",
                        t.as_secs()
                    )));
                }
            }
        }

        let output = match self.run_shell(&command, &workdir, request, timeout).await? {
            CommandResult::Finished(output) => output,
            CommandResult::TimedOut(t) => {
                return Ok(Outcome::fail(format!(
                    "tool_command timed out after {}s and was killed",
                    t.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        write_stage_artifact(request.stage_dir.as_ref(), "stdout.log", stdout.as_bytes()).await;
        write_stage_artifact(request.stage_dir.as_ref(), "stderr.log", stderr.as_bytes()).await;

        if let Some(post) = node.attr_string("post_hook") {
            match self.run_shell(&post, &workdir, request, timeout).await? {
                CommandResult::Finished(out) if out.status.success() => {}
                CommandResult::Finished(out) => {
                    return Ok(Outcome::fail(format!(
                        "post_hook exited with {}: {}",
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    )));
                }
                CommandResult::TimedOut(t) => {
                    return Ok(Outcome::fail(format!(
                        "post_hook timed out after {}s",
                        t.as_secs()
                    )));
                }
            }
        }

        if let Some(override_outcome) = read_outcome_override(request.stage_dir.as_ref()).await? {
            return Ok(override_outcome);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        let mut outcome = if output.status.success() {
            Outcome::success("").with_output(stdout.trim().to_string())
        } else {
            Outcome::fail(format!(
                "tool_command exited with code {}: {}",
                exit_code,
                stderr.trim()
            ))
        };
        outcome.context_updates.insert(
            format!("{}.exit_code", node.id),
            serde_json::json!(exit_code),
        );
        outcome.context_updates.insert(
            format!("{}.stdout", node.id),
            serde_json::Value::String(stdout.trim().to_string()),
        );
        Ok(outcome)
    }
}
