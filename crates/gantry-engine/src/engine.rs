//! The graph executor: walks a validated pipeline from start to exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use gantry_dot::AttributeValue;
use gantry_types::{Context, GantryError, Outcome, Result, StageStatus};

use crate::checkpoint::{self, RunCheckpoint};
use crate::edge_selection::select_edge;
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{Graph, Node};
use crate::handler::{HandlerRegistry, HandlerRequest, TYPE_FAN_OUT};
use crate::runlog::RunLog;
use crate::state::{EngineState, RunResult, RunStatus};
use crate::validation;

const FALLBACK_MAX_VISITS: usize = 100;

pub struct Executor {
    registry: HandlerRegistry,
    logs: Option<RunLog>,
    cancel: Arc<AtomicBool>,
    events: EventEmitter,
}

/// What one fan-out branch walk produced.
struct BranchResult {
    join_id: String,
    last_output: Option<String>,
    state: EngineState,
    context_values: HashMap<String, serde_json::Value>,
}

fn attr_to_json(value: &AttributeValue) -> serde_json::Value {
    match value {
        AttributeValue::String(s) => serde_json::Value::String(s.clone()),
        AttributeValue::Integer(i) => serde_json::json!(i),
        AttributeValue::Float(f) => serde_json::json!(f),
        AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
        AttributeValue::Duration(d) => serde_json::Value::String(format!("{}ms", d.as_millis())),
    }
}

fn json_to_condition_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Executor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Executor {
            registry,
            logs: None,
            cancel: Arc::new(AtomicBool::new(false)),
            events: EventEmitter::new(),
        }
    }

    pub fn with_logs(mut self, logs: RunLog) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Shared flag checked at every step boundary; set it to stop the run
    /// cleanly.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Validate and execute from the start node.
    pub async fn run(&self, graph: &Graph) -> Result<RunResult> {
        validation::validate(graph)?;
        let start = graph
            .start_node()
            .ok_or_else(|| GantryError::Validation("pipeline has no start node".to_string()))?;

        let context = Context::new();
        for (key, value) in &graph.attrs {
            context.set(key.clone(), attr_to_json(value)).await;
        }

        if let Some(logs) = &self.logs {
            logs.init(&graph.name, &graph.goal).await?;
        }
        self.events.emit(PipelineEvent::RunStarted {
            pipeline: graph.name.clone(),
        });
        info!(pipeline = %graph.name, start = %start.id, "run starting");

        self.drive(graph, EngineState::default(), context, start.id.clone())
            .await
    }

    /// Resume from a checkpoint: engine state and context are restored
    /// wholesale and the walk re-enters the checkpointed node.
    pub async fn run_resumed(&self, graph: &Graph, cp: RunCheckpoint) -> Result<RunResult> {
        validation::validate(graph)?;
        if graph.node(&cp.current_node_id).is_none() {
            return Err(GantryError::Validation(format!(
                "checkpoint node '{}' does not exist in the pipeline",
                cp.current_node_id
            )));
        }
        let state = cp.restore_state();
        let context = Context::from_values(cp.context.clone());
        info!(node = %cp.current_node_id, "resuming from checkpoint");
        self.drive(graph, state, context, cp.current_node_id).await
    }

    async fn drive(
        &self,
        graph: &Graph,
        mut state: EngineState,
        context: Context,
        start_id: String,
    ) -> Result<RunResult> {
        let mut current = start_id;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!(node = %current, "run canceled");
                self.events.emit(PipelineEvent::RunFinished {
                    status: RunStatus::Canceled,
                });
                return Ok(self.finish(RunStatus::Canceled, None, state, &context).await);
            }

            let node = graph.node(&current).ok_or_else(|| {
                GantryError::Validation(format!("edge leads to unknown node '{}'", current))
            })?;

            let visits = state.enter_node(&current);
            let max_visits = node
                .max_visits
                .or_else(|| graph.default_max_visits())
                .unwrap_or(FALLBACK_MAX_VISITS);
            if visits > max_visits {
                let err = GantryError::MaxVisitsExceeded {
                    node: current.clone(),
                    visits,
                    max: max_visits,
                };
                return Err(self.fail_run(&mut state, &context, &current, err).await);
            }

            let handler_type = self.registry.resolve_type(node);
            debug!(node = %current, handler = %handler_type, visit = visits, "entering node");

            if handler_type == TYPE_FAN_OUT {
                match self.run_fan_out(graph, node, &context, &mut state).await {
                    Ok(join_id) => {
                        state.record_completed(&current);
                        state.record_outcome(&current, Outcome::success("fan-out complete"));
                        self.save_checkpoint(&join_id, &state, &context).await?;
                        current = join_id;
                        continue;
                    }
                    Err(GantryError::Canceled) => {
                        self.events.emit(PipelineEvent::RunFinished {
                            status: RunStatus::Canceled,
                        });
                        return Ok(self.finish(RunStatus::Canceled, None, state, &context).await);
                    }
                    Err(err) => {
                        return Err(self.fail_run(&mut state, &context, &current, err).await)
                    }
                }
            }

            let outcome = match self
                .execute_with_retry(graph, node, &context, &mut state, &handler_type)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.fail_run(&mut state, &context, &current, err).await),
            };

            // Goal gate: a failing gated node redirects instead of failing.
            if node.goal_gate && !outcome.status.is_success() {
                let target = node
                    .retry_target
                    .clone()
                    .or_else(|| graph.default_retry_target())
                    .unwrap_or_else(|| current.clone());
                warn!(node = %current, target = %target, "goal gate unsatisfied, redirecting");
                state.record_outcome(&current, outcome.clone());
                context.apply_updates(outcome.context_updates.clone()).await;
                self.events.emit(PipelineEvent::GoalGateRedirect {
                    node_id: current.clone(),
                    target: target.clone(),
                });
                self.save_checkpoint(&target, &state, &context).await?;
                current = target;
                continue;
            }

            self.apply_outcome(&mut state, &context, &current, &outcome)
                .await?;
            self.events.emit(PipelineEvent::NodeFinished {
                node_id: current.clone(),
                status: outcome.status,
            });

            if node.is_exit() {
                info!(exit = %current, "run completed");
                self.save_checkpoint(&current, &state, &context).await?;
                if let Some(logs) = &self.logs {
                    checkpoint::clear_checkpoint(logs.root()).await?;
                }
                self.events.emit(PipelineEvent::RunFinished {
                    status: RunStatus::Completed,
                });
                return Ok(self
                    .finish(RunStatus::Completed, Some(current), state, &context)
                    .await);
            }

            let snapshot = context.snapshot().await;
            let resolve = |key: &str| -> Option<String> {
                let key = key.strip_prefix("context.").unwrap_or(key);
                snapshot.get(key).map(json_to_condition_string)
            };
            let selected = match select_edge(graph, &current, &outcome, resolve) {
                Ok(selected) => selected,
                Err(err) => return Err(self.fail_run(&mut state, &context, &current, err).await),
            };
            let Some(edge) = selected else {
                let err = GantryError::NoEligibleEdge {
                    node: current.clone(),
                };
                return Err(self.fail_run(&mut state, &context, &current, err).await);
            };

            if edge.loop_restart {
                debug!(from = %edge.from, to = %edge.to, "loop restart, clearing history");
                state.restart_loop();
            }
            self.save_checkpoint(&edge.to, &state, &context).await?;
            self.events.emit(PipelineEvent::CheckpointSaved {
                next_node_id: edge.to.clone(),
            });
            current = edge.to.clone();
        }
    }

    /// Run a node's handler, applying the retry policy: RETRY outcomes and
    /// retryable errors re-invoke up to `max_retries`; on exhaustion,
    /// `allow_partial` downgrades to PARTIAL_SUCCESS instead of failing.
    async fn execute_with_retry(
        &self,
        graph: &Graph,
        node: &Node,
        context: &Context,
        state: &mut EngineState,
        handler_type: &str,
    ) -> Result<Outcome> {
        let handler = self.registry.get(handler_type).ok_or_else(|| {
            GantryError::UnregisteredHandler {
                handler_type: handler_type.to_string(),
                node: node.id.clone(),
            }
        })?;
        let max_retries = node
            .max_retries
            .or_else(|| graph.default_max_retries())
            .unwrap_or(0);
        let mut attempts = state.retry_counts.get(&node.id).copied().unwrap_or(0);

        loop {
            attempts += 1;
            state.retry_counts.insert(node.id.clone(), attempts);
            self.events.emit(PipelineEvent::NodeStarted {
                node_id: node.id.clone(),
                attempt: attempts,
            });

            if let (Some(logs), Some(prompt)) = (&self.logs, &node.prompt) {
                logs.write_prompt(&node.id, prompt).await?;
            }

            let request = HandlerRequest {
                node,
                graph,
                context,
                completed: &state.completed_nodes,
                node_outputs: &state.node_outputs,
                attempt: attempts,
                stage_dir: self.logs.as_ref().map(|l| l.stage_dir(&node.id)),
                logs_dir: self.logs.as_ref().map(|l| l.root().to_path_buf()),
            };
            let result = handler.execute(&request).await;
            drop(request);

            match result {
                Ok(outcome) if outcome.status == StageStatus::Retry => {
                    if attempts <= max_retries {
                        warn!(node = %node.id, attempt = attempts, "handler asked to retry");
                        self.events.emit(PipelineEvent::RetryScheduled {
                            node_id: node.id.clone(),
                            attempt: attempts,
                        });
                        continue;
                    }
                    if node.allow_partial {
                        let mut downgraded = outcome;
                        downgraded.status = StageStatus::PartialSuccess;
                        return Ok(downgraded);
                    }
                    return Err(GantryError::RetriesExhausted {
                        node: node.id.clone(),
                        attempts,
                    });
                }
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempts <= max_retries => {
                    warn!(node = %node.id, attempt = attempts, error = %err, "retryable error");
                    self.events.emit(PipelineEvent::RetryScheduled {
                        node_id: node.id.clone(),
                        attempt: attempts,
                    });
                    continue;
                }
                Err(err) if err.is_retryable() && node.allow_partial => {
                    let mut outcome = Outcome::success("");
                    outcome.status = StageStatus::PartialSuccess;
                    outcome.failure_reason = Some(err.to_string());
                    return Ok(outcome);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Launch every outgoing branch concurrently on an isolated context,
    /// walk each to the fan-in node, and merge results back in edge
    /// declaration order. Returns the join node id.
    async fn run_fan_out(
        &self,
        graph: &Graph,
        node: &Node,
        context: &Context,
        state: &mut EngineState,
    ) -> Result<String> {
        let edges = graph.outgoing_edges(&node.id);
        if edges.is_empty() {
            return Err(GantryError::NoEligibleEdge {
                node: node.id.clone(),
            });
        }

        let mut keys = Vec::new();
        let mut futures = Vec::new();
        for edge in &edges {
            let key = edge.label.clone().unwrap_or_else(|| edge.to.clone());
            let branch_context = context.clone_isolated().await;
            let branch_state = state.clone();
            self.events.emit(PipelineEvent::BranchStarted { key: key.clone() });
            keys.push(key);
            futures.push(self.run_branch(graph, edge.to.clone(), branch_context, branch_state));
        }
        let parent_completed = state.completed_nodes.len();
        let results = join_all(futures).await;

        let mut join_id: Option<String> = None;
        for (key, result) in keys.into_iter().zip(results) {
            let branch = result?;
            self.events.emit(PipelineEvent::BranchFinished {
                key: key.clone(),
                status: StageStatus::Success,
            });
            if let Some(output) = branch.last_output {
                state.branch_outputs.insert(key, output);
            }
            state.node_outputs.extend(branch.state.node_outputs);
            for completed in branch.state.completed_nodes.iter().skip(parent_completed) {
                state.record_completed(completed);
                if let Some(outcome) = branch.state.node_outcomes.get(completed) {
                    state.node_outcomes.insert(completed.clone(), outcome.clone());
                }
            }
            context.apply_updates(branch.context_values).await;

            match &join_id {
                None => join_id = Some(branch.join_id),
                Some(existing) if *existing == branch.join_id => {}
                Some(existing) => {
                    return Err(GantryError::Validation(format!(
                        "fan-out branches of '{}' converge on different nodes ('{}' vs '{}')",
                        node.id, existing, branch.join_id
                    )));
                }
            }
        }
        join_id.ok_or_else(|| GantryError::NoEligibleEdge {
            node: node.id.clone(),
        })
    }

    /// Walk one branch until a fan-in-shaped node is reached.
    async fn run_branch(
        &self,
        graph: &Graph,
        start_id: String,
        context: Context,
        mut state: EngineState,
    ) -> Result<BranchResult> {
        let mut current = start_id;
        let mut last_output = None;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(GantryError::Canceled);
            }
            let node = graph.node(&current).ok_or_else(|| {
                GantryError::Validation(format!("edge leads to unknown node '{}'", current))
            })?;

            let handler_type = self.registry.resolve_type(node);
            if handler_type == crate::handler::TYPE_FAN_IN {
                return Ok(BranchResult {
                    join_id: current,
                    last_output,
                    context_values: context.snapshot().await,
                    state,
                });
            }

            let visits = state.enter_node(&current);
            let max_visits = node
                .max_visits
                .or_else(|| graph.default_max_visits())
                .unwrap_or(FALLBACK_MAX_VISITS);
            if visits > max_visits {
                return Err(GantryError::MaxVisitsExceeded {
                    node: current.clone(),
                    visits,
                    max: max_visits,
                });
            }

            let outcome = self
                .execute_with_retry(graph, node, &context, &mut state, &handler_type)
                .await?;
            state.record_completed(&current);
            context.apply_updates(outcome.context_updates.clone()).await;
            context
                .set("outcome", serde_json::json!(outcome.status.as_str()))
                .await;
            if let Some(output) = &outcome.output {
                last_output = Some(output.clone());
            }
            state.record_outcome(&current, outcome.clone());

            let snapshot = context.snapshot().await;
            let resolve = |key: &str| -> Option<String> {
                let key = key.strip_prefix("context.").unwrap_or(key);
                snapshot.get(key).map(json_to_condition_string)
            };
            match select_edge(graph, &current, &outcome, resolve)? {
                Some(edge) => current = edge.to.clone(),
                None => {
                    return Err(GantryError::NoEligibleEdge {
                        node: current.clone(),
                    })
                }
            }
        }
    }

    /// Record the outcome and fold it into the shared context.
    async fn apply_outcome(
        &self,
        state: &mut EngineState,
        context: &Context,
        node_id: &str,
        outcome: &Outcome,
    ) -> Result<()> {
        state.record_completed(node_id);
        state.record_outcome(node_id, outcome.clone());
        context.apply_updates(outcome.context_updates.clone()).await;
        context
            .set("outcome", serde_json::json!(outcome.status.as_str()))
            .await;
        if let Some(label) = &outcome.preferred_label {
            context
                .set("preferred_label", serde_json::Value::String(label.clone()))
                .await;
        }

        if let Some(logs) = &self.logs {
            if let Some(output) = &outcome.output {
                logs.write_response(node_id, output).await?;
            }
            logs.write_status(node_id, outcome).await?;
        }
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        next_node_id: &str,
        state: &EngineState,
        context: &Context,
    ) -> Result<()> {
        if let Some(logs) = &self.logs {
            let cp = RunCheckpoint::capture(next_node_id, state, context.snapshot().await);
            checkpoint::save_checkpoint(logs.root(), &cp).await?;
        }
        Ok(())
    }

    /// Record the failure in a final checkpoint, then hand the error back.
    async fn fail_run(
        &self,
        state: &mut EngineState,
        context: &Context,
        current: &str,
        err: GantryError,
    ) -> GantryError {
        warn!(node = %current, error = %err, "run failed");
        state.last_error = Some(err.to_string());
        if let Some(logs) = &self.logs {
            let cp = RunCheckpoint::capture(current, state, context.snapshot().await);
            if let Err(save_err) = checkpoint::save_checkpoint(logs.root(), &cp).await {
                warn!(error = %save_err, "failed to write final checkpoint");
            }
        }
        err
    }

    async fn finish(
        &self,
        status: RunStatus,
        exit_node: Option<String>,
        state: EngineState,
        context: &Context,
    ) -> RunResult {
        RunResult {
            status,
            exit_node,
            completed_nodes: state.completed_nodes,
            node_outcomes: state.node_outcomes,
            node_outputs: state.node_outputs,
            branch_outputs: state.branch_outputs,
            final_context: context.snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{default_registry, SimulatedGenerator};

    fn build_graph(dot: &str) -> Graph {
        let mut g = Graph::from_dot(gantry_dot::parse(dot).unwrap()).unwrap();
        crate::transforms::apply_all(&mut g, None).unwrap();
        g
    }

    fn simulated_executor(dir: &std::path::Path) -> Executor {
        Executor::new(default_registry(Arc::new(SimulatedGenerator), dir, dir))
    }

    #[tokio::test]
    async fn linear_pipeline_runs_to_exit() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            goal = "test run"
            start [shape="Mdiamond"]
            plan [shape="box", prompt="Make a plan"]
            done [shape="Msquare"]
            start -> plan -> done
        }"#,
        );
        let result = simulated_executor(dir.path()).run(&g).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.exit_node.as_deref(), Some("done"));
        assert_eq!(result.completed_nodes, vec!["start", "plan", "done"]);
        assert!(result.node_outputs["plan"].starts_with("[simulated]"));
        assert_eq!(result.final_context["outcome"], serde_json::json!("success"));
    }

    #[tokio::test]
    async fn graph_attrs_seed_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            goal = "g"
            budget = 12
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
        }"#,
        );
        let result = simulated_executor(dir.path()).run(&g).await.unwrap();
        assert_eq!(result.final_context["budget"], serde_json::json!(12));
        assert_eq!(result.final_context["goal"], serde_json::json!("g"));
    }

    #[tokio::test]
    async fn invalid_pipeline_refuses_to_run() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            a [shape="box", prompt="p"]
            b [shape="Msquare"]
            a -> b
        }"#,
        );
        let err = simulated_executor(dir.path()).run(&g).await.unwrap_err();
        assert!(matches!(err, GantryError::Validation(_)));
    }

    #[tokio::test]
    async fn cancellation_returns_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
        }"#,
        );
        let executor = simulated_executor(dir.path());
        executor.cancel_flag().store(true, Ordering::SeqCst);
        let result = executor.run(&g).await.unwrap();
        assert_eq!(result.status, RunStatus::Canceled);
        assert!(result.exit_node.is_none());
    }

    #[tokio::test]
    async fn max_visits_bounds_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            start [shape="Mdiamond"]
            a [shape="box", prompt="p", max_visits=3]
            done [shape="Msquare"]
            start -> a
            a -> a [weight=10]
            a -> done
        }"#,
        );
        let err = simulated_executor(dir.path()).run(&g).await.unwrap_err();
        assert!(matches!(err, GantryError::MaxVisitsExceeded { .. }));
    }

    #[tokio::test]
    async fn unregistered_declared_type_fails() {
        let dir = tempfile::tempdir().unwrap();
        let g = build_graph(
            r#"digraph Demo {
            start [shape="Mdiamond"]
            custom [type="bespoke", prompt="p"]
            done [shape="Msquare"]
            start -> custom -> done
        }"#,
        );
        let err = simulated_executor(dir.path()).run(&g).await.unwrap_err();
        assert!(matches!(err, GantryError::UnregisteredHandler { .. }));
    }
}
