//! Generation handler and the pluggable text generator behind it.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use gantry_types::{GantryError, Outcome, Result, StageStatus};

use crate::edge_selection::normalize_label;
use crate::handler::{HandlerRequest, NodeHandler};

const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Duration,
}

/// The seam between the engine and whatever produces text. Implementations
/// are shared across handlers via `Arc`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Deterministic generator for tests and `--simulate` runs.
pub struct SimulatedGenerator;

#[async_trait]
impl Generator for SimulatedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let last_line = request.prompt.lines().last().unwrap_or("").trim();
        Ok(format!("[simulated] {}", last_line))
    }
}

/// Shells out to a provider CLI and returns its stdout as the response.
pub struct ProviderCliGenerator;

impl ProviderCliGenerator {
    fn binary_for(provider: Option<&str>) -> &'static str {
        match provider {
            Some("openai") | Some("codex") => "codex",
            Some("google") | Some("gemini") => "gemini",
            _ => "claude",
        }
    }
}

#[async_trait]
impl Generator for ProviderCliGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let binary = Self::binary_for(request.provider.as_deref());
        let mut command = tokio::process::Command::new(binary);
        command
            .arg("-p")
            .arg(&request.prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = &request.model {
            command.arg("--model").arg(model);
        }
        if let Some(dir) = &request.workdir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| GantryError::Tool {
            tool: binary.to_string(),
            message: format!("failed to spawn: {e}"),
        })?;

        // dropping the future on timeout kills the child via kill_on_drop
        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| GantryError::CommandTimeout {
                timeout_ms: request.timeout.as_millis() as u64,
            })?
            .map_err(|e| GantryError::Tool {
                tool: binary.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(GantryError::Tool {
                tool: binary.to_string(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Runs a model call for box-shaped (and prompted conditional) nodes.
pub struct GenerationHandler {
    generator: Arc<dyn Generator>,
}

impl GenerationHandler {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        GenerationHandler { generator }
    }

    /// Assemble the full prompt: pipeline goal, outputs of completed
    /// upstream nodes, then the node's own prompt (label as fallback).
    fn build_prompt(request: &HandlerRequest<'_>) -> String {
        let mut sections = Vec::new();
        if !request.graph.goal.is_empty() {
            sections.push(format!("Goal: {}", request.graph.goal));
        }
        for node_id in request.completed {
            if let Some(output) = request.node_outputs.get(node_id) {
                if !output.is_empty() {
                    sections.push(format!("Output of {}:\n{}", node_id, output));
                }
            }
        }
        let own = request
            .node
            .prompt
            .clone()
            .unwrap_or_else(|| request.node.label.clone());
        sections.push(own);

        let mut prompt = sections.join("\n\n");

        let options = decision_options(request);
        if !options.is_empty() {
            prompt.push_str(&format!(
                "\n\nAnswer with exactly one of: {}",
                options.join(", ")
            ));
        }
        prompt
    }
}

/// Outgoing edge labels of a decision-shaped node; empty for plain nodes.
fn decision_options(request: &HandlerRequest<'_>) -> Vec<String> {
    if request.node.shape != "diamond" {
        return Vec::new();
    }
    request
        .graph
        .outgoing_edges(&request.node.id)
        .iter()
        .filter_map(|e| e.label.clone())
        .collect()
}

/// Find which option the response chose. The last few lines are checked
/// first (models tend to put the verdict at the end), then the whole body.
pub fn extract_label(response: &str, options: &[String]) -> Option<String> {
    let lines: Vec<&str> = response.lines().rev().take(5).collect();
    for option in options {
        let wanted = normalize_label(option);
        if wanted.is_empty() {
            continue;
        }
        for line in &lines {
            if normalize_label(line) == wanted {
                return Some(option.clone());
            }
        }
    }
    let upper = response.to_uppercase();
    for option in options {
        let wanted = normalize_label(option).to_uppercase();
        if !wanted.is_empty() && upper.contains(&wanted) {
            return Some(option.clone());
        }
    }
    None
}

#[async_trait]
impl NodeHandler for GenerationHandler {
    async fn execute(&self, request: &HandlerRequest<'_>) -> Result<Outcome> {
        let prompt = Self::build_prompt(request);
        let gen_request = GenerationRequest {
            prompt,
            model: request.node.model.clone(),
            provider: request.node.provider.clone(),
            reasoning_effort: request.node.reasoning_effort.clone(),
            workdir: request.stage_dir.clone(),
            timeout: request.node.timeout.unwrap_or(DEFAULT_GENERATION_TIMEOUT),
        };
        let response = self.generator.generate(&gen_request).await?;

        let mut outcome = Outcome::success("").with_output(response.clone());
        outcome.context_updates.insert(
            format!("{}.output", request.node.id),
            serde_json::Value::String(response.clone()),
        );

        let options = decision_options(request);
        if !options.is_empty() {
            match extract_label(&response, &options) {
                Some(label) => outcome.preferred_label = Some(label),
                None => {
                    return Ok(Outcome::retry(format!(
                        "response named none of the options: {}",
                        options.join(", ")
                    )))
                }
            }
        }
        Ok(outcome)
    }
}

/// Loop controller (house shape): consults a context flag before generating.
/// When the flag named by `stop_condition` coerces to "true", short-circuits
/// SUCCESS with preferred label "done".
pub struct LoopControllerHandler {
    inner: GenerationHandler,
}

impl LoopControllerHandler {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        LoopControllerHandler {
            inner: GenerationHandler::new(generator),
        }
    }
}

#[async_trait]
impl NodeHandler for LoopControllerHandler {
    async fn execute(&self, request: &HandlerRequest<'_>) -> Result<Outcome> {
        if let Some(key) = request.node.attr_string("stop_condition") {
            if request.context.get_flag(&key).await {
                return Ok(Outcome::with_label(StageStatus::Success, "done"));
            }
        }
        self.inner.execute(request).await
    }
}
