//! Pipeline linting, validation, and classification.
//!
//! [`lint`] collects diagnostics without failing; [`validate`] turns any
//! ERROR-severity diagnostic into a hard error before execution.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use gantry_types::{GantryError, Result};

use crate::condition::validate_condition;
use crate::graph::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl Diagnostic {
    fn new(rule: &str, severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            rule: rule.to_string(),
            severity,
            message: message.into(),
            node_id: None,
            edge: None,
            fix: None,
        }
    }

    fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn with_edge(mut self, from: &str, to: &str) -> Self {
        self.edge = Some((from.to_string(), to.to_string()));
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

/// How a pipeline leans: prompt-driven planning, command-driven execution,
/// or a mix of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Synopsis {
    Planning,
    Execution,
    Hybrid,
}

impl Synopsis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Synopsis::Planning => "PLANNING",
            Synopsis::Execution => "EXECUTION",
            Synopsis::Hybrid => "HYBRID",
        }
    }
}

/// Run every lint rule. Never fails; callers decide what severity to act on.
pub fn lint(graph: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    check_start_node(graph, &mut diags);
    check_exit_no_outgoing(graph, &mut diags);
    check_edge_endpoints(graph, &mut diags);
    check_condition_syntax(graph, &mut diags);
    check_reachability(graph, &mut diags);
    check_generation_prompts(graph, &mut diags);
    check_retry_targets(graph, &mut diags);
    check_goal_gates(graph, &mut diags);

    diags
}

/// Fail if the graph has no start node or any ERROR diagnostic.
pub fn validate(graph: &Graph) -> Result<()> {
    if graph.start_node().is_none() {
        return Err(GantryError::Validation(
            "pipeline has no start node (shape=\"Mdiamond\" or id \"start\")".to_string(),
        ));
    }
    let errors: Vec<String> = lint(graph)
        .into_iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.rule, d.message))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(GantryError::Validation(errors.join("; ")))
    }
}

/// Classify the pipeline by the work its nodes do. Generation nodes (box
/// shape with a prompt) pull toward PLANNING; tool nodes (parallelogram)
/// pull toward EXECUTION.
pub fn classify(graph: &Graph) -> Synopsis {
    let mut has_generation = false;
    let mut has_tool = false;
    for node in graph.nodes_in_order() {
        if node.is_start() || node.is_exit() {
            continue;
        }
        match node.shape.as_str() {
            "parallelogram" => has_tool = true,
            "box" => has_generation = true,
            _ => {}
        }
    }
    match (has_generation, has_tool) {
        (true, true) => Synopsis::Hybrid,
        (false, true) => Synopsis::Execution,
        _ => Synopsis::Planning,
    }
}

fn check_start_node(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    let starts: Vec<&str> = graph
        .nodes_in_order()
        .filter(|n| n.shape == "Mdiamond")
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        1 => {}
        0 if graph.start_node().is_some() => {}
        0 => diags.push(
            Diagnostic::new("start_node", Severity::Warning, "no start node found")
                .with_fix("add a node with shape=\"Mdiamond\" or id \"start\""),
        ),
        _ => diags.push(
            Diagnostic::new(
                "start_node",
                Severity::Warning,
                format!("multiple start nodes found: {}", starts.join(", ")),
            )
            .with_fix("keep a single shape=\"Mdiamond\" node"),
        ),
    }
}

fn check_exit_no_outgoing(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    for node in graph.nodes_in_order() {
        if node.is_exit() && !graph.outgoing_edges(&node.id).is_empty() {
            diags.push(
                Diagnostic::new(
                    "exit_no_outgoing",
                    Severity::Error,
                    format!("exit node '{}' has outgoing edges", node.id),
                )
                .with_node(&node.id)
                .with_fix("remove edges leaving the exit node"),
            );
        }
    }
}

fn check_edge_endpoints(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    for edge in graph.all_edges() {
        for endpoint in [&edge.from, &edge.to] {
            if graph.node(endpoint).is_none() {
                diags.push(
                    Diagnostic::new(
                        "edge_endpoints",
                        Severity::Error,
                        format!(
                            "edge {} -> {} references unknown node '{}'",
                            edge.from, edge.to, endpoint
                        ),
                    )
                    .with_edge(&edge.from, &edge.to),
                );
            }
        }
    }
}

fn check_condition_syntax(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    for edge in graph.all_edges() {
        if let Some(cond) = &edge.condition {
            if let Err(err) = validate_condition(cond) {
                diags.push(
                    Diagnostic::new("condition_syntax", Severity::Error, err.to_string())
                        .with_edge(&edge.from, &edge.to),
                );
            }
        }
    }
}

fn check_reachability(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    let Some(start) = graph.start_node() else {
        return;
    };
    let mut reached: HashSet<String> = HashSet::new();
    let mut stack = vec![start.id.clone()];
    while let Some(id) = stack.pop() {
        if !reached.insert(id.clone()) {
            continue;
        }
        for edge in graph.outgoing_edges(&id) {
            stack.push(edge.to.clone());
        }
    }
    for node in graph.nodes_in_order() {
        if !reached.contains(&node.id) {
            diags.push(
                Diagnostic::new(
                    "reachability",
                    Severity::Error,
                    format!("node '{}' is unreachable from the start node", node.id),
                )
                .with_node(&node.id),
            );
        }
    }
}

fn check_generation_prompts(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    for node in graph.nodes_in_order() {
        if node.shape != "box" || node.is_start() || node.is_exit() {
            continue;
        }
        if node.prompt.is_none() && node.label == node.id {
            diags.push(
                Diagnostic::new(
                    "prompt_on_generation_nodes",
                    Severity::Warning,
                    format!("generation node '{}' has neither prompt nor label", node.id),
                )
                .with_node(&node.id)
                .with_fix("add a prompt attribute describing the work"),
            );
        }
    }
}

fn check_retry_targets(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    let mut seen: Vec<(Option<String>, String)> = graph
        .nodes_in_order()
        .filter_map(|n| {
            n.retry_target
                .clone()
                .map(|t| (Some(n.id.clone()), t))
        })
        .collect();
    if let Some(t) = graph.default_retry_target() {
        seen.push((None, t));
    }
    for (node_id, target) in seen {
        if graph.node(&target).is_none() {
            let mut diag = Diagnostic::new(
                "retry_target_exists",
                Severity::Error,
                format!("retry_target '{}' names an unknown node", target),
            );
            if let Some(id) = node_id {
                diag = diag.with_node(&id);
            }
            diags.push(diag);
        }
    }
}

fn check_goal_gates(graph: &Graph, diags: &mut Vec<Diagnostic>) {
    if graph.default_retry_target().is_some() {
        return;
    }
    for node in graph.nodes_in_order() {
        if node.goal_gate && node.retry_target.is_none() {
            diags.push(
                Diagnostic::new(
                    "goal_gate_has_retry_policy",
                    Severity::Info,
                    format!(
                        "goal gate '{}' has no retry_target; failures will re-run the node itself",
                        node.id
                    ),
                )
                .with_node(&node.id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_graph(dot: &str) -> Graph {
        Graph::from_dot(gantry_dot::parse(dot).unwrap()).unwrap()
    }

    fn rules(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.rule.as_str()).collect()
    }

    #[test]
    fn clean_pipeline_lints_clean() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            work [shape="box", prompt="do it"]
            done [shape="Msquare"]
            start -> work -> done
        }"#,
        );
        assert!(lint(&g).is_empty());
        assert!(validate(&g).is_ok());
    }

    #[test]
    fn missing_start_is_warning_in_lint_but_fails_validate() {
        let g = build_graph(
            r#"digraph G {
            a [shape="box", prompt="p"]
            b [shape="Msquare"]
            a -> b
        }"#,
        );
        let diags = lint(&g);
        assert!(rules(&diags).contains(&"start_node"));
        assert_eq!(
            diags.iter().find(|d| d.rule == "start_node").unwrap().severity,
            Severity::Warning
        );
        assert!(validate(&g).is_err());
    }

    #[test]
    fn multiple_starts_is_warning() {
        let g = build_graph(
            r#"digraph G {
            s1 [shape="Mdiamond"]
            s2 [shape="Mdiamond"]
            done [shape="Msquare"]
            s1 -> done
            s2 -> done
        }"#,
        );
        let diag = lint(&g)
            .into_iter()
            .find(|d| d.rule == "start_node")
            .unwrap();
        assert_eq!(diag.severity, Severity::Warning);
        assert!(diag.message.contains("multiple"));
    }

    #[test]
    fn exit_with_outgoing_edge_is_error() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
            done -> start
        }"#,
        );
        let diags = lint(&g);
        assert!(rules(&diags).contains(&"exit_no_outgoing"));
        assert!(validate(&g).is_err());
    }

    #[test]
    fn dangling_edge_endpoint_is_error() {
        // The parser auto-creates nodes at their first edge reference, so a
        // dangling endpoint can only arrive through a hand-assembled graph.
        let mut dot = gantry_dot::parse(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
        }"#,
        )
        .unwrap();
        dot.edges.push(gantry_dot::EdgeDef {
            from: "start".to_string(),
            to: "ghost".to_string(),
            attrs: Default::default(),
        });
        let g = Graph::from_dot(dot).unwrap();
        let diags = lint(&g);
        let diag = diags.iter().find(|d| d.rule == "edge_endpoints").unwrap();
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.edge, Some(("start".to_string(), "ghost".to_string())));
        assert!(validate(&g).is_err());
    }

    #[test]
    fn edge_referenced_nodes_are_created_and_pass_lint() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> helper [label="aside"]
            helper -> done
            start -> done
        }"#,
        );
        assert!(!rules(&lint(&g)).contains(&"edge_endpoints"));
        assert!(g.node("helper").is_some());
    }

    #[test]
    fn bad_condition_syntax_is_error() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done [condition="no operator here"]
        }"#,
        );
        let diags = lint(&g);
        let diag = diags.iter().find(|d| d.rule == "condition_syntax").unwrap();
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.edge, Some(("start".to_string(), "done".to_string())));
    }

    #[test]
    fn unreachable_node_is_error() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            orphan [shape="box", prompt="never runs"]
            start -> done
        }"#,
        );
        let diags = lint(&g);
        let diag = diags.iter().find(|d| d.rule == "reachability").unwrap();
        assert_eq!(diag.node_id.as_deref(), Some("orphan"));
        assert!(validate(&g).is_err());
    }

    #[test]
    fn promptless_generation_node_is_warning_only() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            bare
            done [shape="Msquare"]
            start -> bare -> done
        }"#,
        );
        let diags = lint(&g);
        assert!(rules(&diags).contains(&"prompt_on_generation_nodes"));
        assert!(validate(&g).is_ok());
    }

    #[test]
    fn labeled_generation_node_passes() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            step [label="Summarize findings"]
            done [shape="Msquare"]
            start -> step -> done
        }"#,
        );
        assert!(!rules(&lint(&g)).contains(&"prompt_on_generation_nodes"));
    }

    #[test]
    fn unknown_retry_target_is_error() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            gate [shape="box", prompt="p", goal_gate=true, retry_target="missing"]
            done [shape="Msquare"]
            start -> gate -> done
        }"#,
        );
        let diags = lint(&g);
        let diag = diags.iter().find(|d| d.rule == "retry_target_exists").unwrap();
        assert_eq!(diag.severity, Severity::Error);
    }

    #[test]
    fn goal_gate_without_policy_is_info() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            gate [shape="box", prompt="p", goal_gate=true]
            done [shape="Msquare"]
            start -> gate -> done
        }"#,
        );
        let diags = lint(&g);
        let diag = diags
            .iter()
            .find(|d| d.rule == "goal_gate_has_retry_policy")
            .unwrap();
        assert_eq!(diag.severity, Severity::Info);
        assert!(validate(&g).is_ok());
    }

    #[test]
    fn graph_level_retry_target_silences_goal_gate_info() {
        let g = build_graph(
            r#"digraph G {
            retry_target = "start"
            start [shape="Mdiamond"]
            gate [shape="box", prompt="p", goal_gate=true]
            done [shape="Msquare"]
            start -> gate -> done
        }"#,
        );
        assert!(!rules(&lint(&g)).contains(&"goal_gate_has_retry_policy"));
    }

    #[test]
    fn classify_planning_execution_hybrid() {
        let planning = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            think [shape="box", prompt="p"]
            done [shape="Msquare"]
            start -> think -> done
        }"#,
        );
        assert_eq!(classify(&planning), Synopsis::Planning);

        let execution = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            run [shape="parallelogram", tool_command="make test"]
            done [shape="Msquare"]
            start -> run -> done
        }"#,
        );
        assert_eq!(classify(&execution), Synopsis::Execution);

        let hybrid = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            think [shape="box", prompt="p"]
            run [shape="parallelogram", tool_command="make test"]
            done [shape="Msquare"]
            start -> think -> run -> done
        }"#,
        );
        assert_eq!(classify(&hybrid), Synopsis::Hybrid);
    }

    #[test]
    fn empty_middle_classifies_as_planning() {
        let g = build_graph(
            r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
        }"#,
        );
        assert_eq!(classify(&g), Synopsis::Planning);
    }
}
