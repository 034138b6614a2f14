use std::collections::HashMap;
use std::time::Duration;

use gantry_dot::{AttributeValue, DotGraph, EdgeDef, NodeDef};

/// The engine's view of a parsed pipeline: flattened nodes, ordered edges,
/// and an adjacency index. Declaration order is preserved for both nodes and
/// edges; it drives canonical serialization, edge tie-breaks, and fan-out
/// merge order.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub goal: String,
    pub attrs: HashMap<String, AttributeValue>,
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    /// All edges in declaration order (top-level first, then per subgraph).
    edges: Vec<Edge>,
    /// node_id -> indices into `edges`, in declaration order.
    adjacency: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub shape: String,
    pub node_type: Option<String>,
    pub prompt: Option<String>,
    pub max_retries: Option<usize>,
    pub max_visits: Option<usize>,
    pub goal_gate: bool,
    pub retry_target: Option<String>,
    pub allow_partial: bool,
    pub classes: Vec<String>,
    pub timeout: Option<Duration>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub raw_attrs: HashMap<String, AttributeValue>,
}

impl Node {
    pub fn is_start(&self) -> bool {
        self.shape == "Mdiamond" || self.id == "start" || self.id == "Start"
    }

    pub fn is_exit(&self) -> bool {
        self.shape == "Msquare"
    }

    pub fn attr_string(&self, key: &str) -> Option<String> {
        get_string_attr(&self.raw_attrs, key)
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
    pub condition: Option<String>,
    pub weight: i64,
    pub loop_restart: bool,
    pub raw_attrs: HashMap<String, AttributeValue>,
}

// --- Attribute extraction helpers ---

fn get_string_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::String(s) => Some(s.clone()),
        _ => None,
    })
}

/// First present key wins; used for the `model`/`llm_model` style aliases.
fn get_aliased_string(attrs: &HashMap<String, AttributeValue>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| get_string_attr(attrs, k))
}

fn get_bool_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<bool> {
    attrs.get(key).and_then(|v| v.as_bool())
}

fn get_int_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<i64> {
    attrs.get(key).and_then(|v| v.as_int())
}

fn get_duration_attr(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<Duration> {
    attrs.get(key).and_then(|v| v.as_duration())
}

// --- Conversions ---

/// Build a [`Node`] from a parsed node definition. The parser already folds
/// lexical `node [...]` defaults into each node's attrs; `extra_classes`
/// carries subgraph class labels, which append to (never replace) the node's
/// own class list.
fn node_from_def(node_def: &NodeDef, extra_classes: &[String]) -> Node {
    let attrs = &node_def.attrs;
    let id = node_def.id.clone();

    let shape = get_string_attr(attrs, "shape").unwrap_or_else(|| "box".to_string());
    let label = get_string_attr(attrs, "label").unwrap_or_else(|| id.clone());

    let mut classes: Vec<String> = get_string_attr(attrs, "class")
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    for c in extra_classes {
        if !classes.contains(c) {
            classes.push(c.clone());
        }
    }

    Node {
        label,
        shape,
        node_type: get_string_attr(attrs, "type"),
        prompt: get_string_attr(attrs, "prompt"),
        max_retries: get_int_attr(attrs, "max_retries").map(|v| v.max(0) as usize),
        max_visits: get_int_attr(attrs, "max_visits").map(|v| v.max(0) as usize),
        goal_gate: get_bool_attr(attrs, "goal_gate").unwrap_or(false),
        retry_target: get_string_attr(attrs, "retry_target"),
        allow_partial: get_bool_attr(attrs, "allow_partial").unwrap_or(false),
        classes,
        timeout: get_duration_attr(attrs, "timeout"),
        model: get_aliased_string(attrs, &["model", "llm_model"]),
        provider: get_aliased_string(attrs, &["provider", "llm_provider"]),
        reasoning_effort: get_string_attr(attrs, "reasoning_effort"),
        raw_attrs: attrs.clone(),
        id,
    }
}

fn edge_from_def(edge_def: &EdgeDef, edge_defaults: &HashMap<String, AttributeValue>) -> Edge {
    let mut attrs = edge_defaults.clone();
    attrs.extend(edge_def.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));

    Edge {
        from: edge_def.from.clone(),
        to: edge_def.to.clone(),
        label: get_string_attr(&attrs, "label"),
        condition: get_string_attr(&attrs, "condition"),
        weight: get_int_attr(&attrs, "weight").unwrap_or(0),
        loop_restart: get_bool_attr(&attrs, "loop_restart").unwrap_or(false),
        raw_attrs: attrs,
    }
}

/// Class labels a subgraph contributes to every node inside it: its own
/// `class` attribute plus any `class` in its node defaults.
fn subgraph_classes(sg: &gantry_dot::SubgraphDef) -> Vec<String> {
    let mut classes = Vec::new();
    for source in [&sg.attrs, &sg.node_defaults] {
        if let Some(s) = get_string_attr(source, "class") {
            for c in s.split_whitespace() {
                if !classes.iter().any(|existing: &String| existing == c) {
                    classes.push(c.to_string());
                }
            }
        }
    }
    classes
}

impl Graph {
    /// Flatten a parsed DOT graph into the engine model. Subgraphs merge into
    /// the flat node/edge collections; their class labels append to member
    /// nodes.
    pub fn from_dot(graph: DotGraph) -> gantry_types::Result<Self> {
        let mut nodes = HashMap::new();
        let mut node_order = Vec::new();
        let mut edges = Vec::new();

        for node_def in graph.nodes_in_order() {
            let n = node_from_def(node_def, &[]);
            node_order.push(n.id.clone());
            nodes.insert(n.id.clone(), n);
        }

        for sg in &graph.subgraphs {
            let classes = subgraph_classes(sg);
            for node_def in sg.nodes_in_order() {
                let n = node_from_def(node_def, &classes);
                if !nodes.contains_key(&n.id) {
                    node_order.push(n.id.clone());
                }
                nodes.insert(n.id.clone(), n);
            }
        }

        for edge_def in &graph.edges {
            edges.push(edge_from_def(edge_def, &graph.edge_defaults));
        }
        for sg in &graph.subgraphs {
            let mut sg_edge_defaults = graph.edge_defaults.clone();
            sg_edge_defaults.extend(sg.edge_defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
            for edge_def in &sg.edges {
                edges.push(edge_from_def(edge_def, &sg_edge_defaults));
            }
        }

        // Adjacency preserves edge declaration order per source node.
        let mut adjacency: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            adjacency.entry(edge.from.clone()).or_default().push(i);
        }

        let goal = get_string_attr(&graph.attrs, "goal").unwrap_or_default();

        Ok(Graph {
            name: graph.name,
            goal,
            attrs: graph.attrs,
            nodes,
            node_order,
            edges,
            adjacency,
        })
    }

    /// Find the start node: shape == "Mdiamond", falling back to id "start"/"Start".
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes_in_order()
            .find(|n| n.shape == "Mdiamond")
            .or_else(|| self.nodes.get("start").or_else(|| self.nodes.get("Start")))
    }

    /// Find an exit node: shape == "Msquare".
    pub fn exit_node(&self) -> Option<&Node> {
        self.nodes_in_order().find(|n| n.is_exit())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node in declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        match self.adjacency.get(node_id) {
            Some(indices) => indices.iter().map(|&i| &self.edges[i]).collect(),
            None => Vec::new(),
        }
    }

    /// Iterate nodes in declaration order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn all_nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn all_edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Graph-level `max_retries` fallback for nodes without their own.
    pub fn default_max_retries(&self) -> Option<usize> {
        get_int_attr(&self.attrs, "max_retries").map(|v| v.max(0) as usize)
    }

    /// Graph-level `max_visits` fallback; the engine caps at 100 when neither
    /// the node nor the graph sets one.
    pub fn default_max_visits(&self) -> Option<usize> {
        get_int_attr(&self.attrs, "max_visits").map(|v| v.max(0) as usize)
    }

    /// Graph-level `retry_target` fallback for goal-gate redirects.
    pub fn default_retry_target(&self) -> Option<String> {
        get_string_attr(&self.attrs, "retry_target")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_and_build(dot: &str) -> Graph {
        let parsed = gantry_dot::parse(dot).unwrap();
        Graph::from_dot(parsed).unwrap()
    }

    #[test]
    fn from_dot_simple_linear_pipeline() {
        let g = parse_and_build(
            r#"digraph Pipeline {
            start [shape="Mdiamond"]
            process [label="Process Data"]
            done [shape="Msquare"]
            start -> process -> done
        }"#,
        );

        assert_eq!(g.name, "Pipeline");
        assert_eq!(g.all_edges().len(), 2);
        assert!(g.node("start").is_some());
        assert_eq!(g.node("process").unwrap().label, "Process Data");
        assert!(g.node("done").unwrap().is_exit());
    }

    #[test]
    fn start_node_finds_mdiamond() {
        let g = parse_and_build(
            r#"digraph G {
            begin [shape="Mdiamond", label="Start Here"]
            work [shape="box"]
            begin -> work
        }"#,
        );

        assert_eq!(g.start_node().unwrap().id, "begin");
    }

    #[test]
    fn start_node_falls_back_to_id() {
        let g = parse_and_build(
            r#"digraph G {
            start [label="Go"]
            work [shape="box"]
            start -> work
        }"#,
        );

        assert_eq!(g.start_node().unwrap().id, "start");
    }

    #[test]
    fn nodes_iterate_in_declaration_order() {
        let g = parse_and_build(
            r#"digraph G {
            zulu [shape="box"]
            alpha [shape="box"]
            mike [shape="box"]
            zulu -> alpha -> mike
        }"#,
        );

        let ids: Vec<_> = g.nodes_in_order().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn outgoing_edges_preserve_declaration_order() {
        let g = parse_and_build(
            r#"digraph G {
            A -> C [label="second_declared_first"]
            A -> B [label="first_alphabetically"]
        }"#,
        );

        let edges = g.outgoing_edges("A");
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].to, "C");
        assert_eq!(edges[1].to, "B");
    }

    #[test]
    fn typed_attribute_extraction() {
        let g = parse_and_build(
            r#"digraph G {
            step [max_retries=3, max_visits=7, goal_gate=true, timeout=30s, allow_partial=true]
        }"#,
        );

        let node = g.node("step").unwrap();
        assert_eq!(node.max_retries, Some(3));
        assert_eq!(node.max_visits, Some(7));
        assert!(node.goal_gate);
        assert_eq!(node.timeout, Some(Duration::from_secs(30)));
        assert!(node.allow_partial);
    }

    #[test]
    fn model_attr_aliases() {
        let g = parse_and_build(
            r#"digraph G {
            a [model="m1"]
            b [llm_model="m2", llm_provider="p2"]
        }"#,
        );

        assert_eq!(g.node("a").unwrap().model.as_deref(), Some("m1"));
        assert_eq!(g.node("b").unwrap().model.as_deref(), Some("m2"));
        assert_eq!(g.node("b").unwrap().provider.as_deref(), Some("p2"));
    }

    #[test]
    fn subgraph_nodes_flattened_with_class_appended() {
        let g = parse_and_build(
            r#"digraph G {
            start -> A
            subgraph cluster_review {
                class = "review"
                A [class="fast"]
                A -> B
            }
            B -> done
        }"#,
        );

        let a = g.node("A").unwrap();
        assert!(a.classes.contains(&"fast".to_string()));
        assert!(a.classes.contains(&"review".to_string()));

        let b = g.node("B").unwrap();
        assert_eq!(b.classes, vec!["review".to_string()]);

        assert_eq!(g.all_edges().len(), 3);
    }

    #[test]
    fn goal_extracted_from_graph_attrs() {
        let g = parse_and_build(
            r#"digraph G {
            goal = "Complete the pipeline"
            A -> B
        }"#,
        );

        assert_eq!(g.goal, "Complete the pipeline");
    }

    #[test]
    fn edge_weight_condition_and_loop_restart() {
        let g = parse_and_build(
            r#"digraph G {
            A -> B [weight=5, condition="outcome == success", loop_restart=true]
        }"#,
        );

        let edges = g.outgoing_edges("A");
        assert_eq!(edges[0].weight, 5);
        assert_eq!(edges[0].condition.as_deref(), Some("outcome == success"));
        assert!(edges[0].loop_restart);
    }

    #[test]
    fn graph_level_defaults() {
        let g = parse_and_build(
            r#"digraph G {
            max_retries = 2
            max_visits = 50
            retry_target = "start"
            A -> B
        }"#,
        );

        assert_eq!(g.default_max_retries(), Some(2));
        assert_eq!(g.default_max_visits(), Some(50));
        assert_eq!(g.default_retry_target().as_deref(), Some("start"));
    }

    #[test]
    fn default_shape_is_box() {
        let g = parse_and_build(
            r#"digraph G {
            plain_node [label="No shape set"]
        }"#,
        );

        assert_eq!(g.node("plain_node").unwrap().shape, "box");
    }

    #[test]
    fn unrecognized_attrs_preserved_in_raw() {
        let g = parse_and_build(
            r#"digraph G {
            t [shape="parallelogram", tool_command="echo hi", custom_knob=42]
        }"#,
        );

        let t = g.node("t").unwrap();
        assert_eq!(t.attr_string("tool_command").as_deref(), Some("echo hi"));
        assert!(t.raw_attrs.contains_key("custom_knob"));
    }
}
