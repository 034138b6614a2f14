use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Shape assigned to nodes that are only ever referenced by edges.
pub const DEFAULT_SHAPE: &str = "box";

/// A parsed `digraph`. Node and edge declaration order is preserved: it is
/// semantically significant for canonical serialization and for the
/// executor's deterministic tie-breaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotGraph {
    pub name: String,
    pub attrs: HashMap<String, AttributeValue>,
    pub nodes: HashMap<String, NodeDef>,
    /// Node ids in declaration order (auto-created nodes at first reference).
    pub node_order: Vec<String>,
    pub edges: Vec<EdgeDef>,
    pub subgraphs: Vec<SubgraphDef>,
    pub node_defaults: HashMap<String, AttributeValue>,
    pub edge_defaults: HashMap<String, AttributeValue>,
}

impl DotGraph {
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.get(id)
    }

    /// Iterate top-level nodes in declaration order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &NodeDef> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub attrs: HashMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    pub attrs: HashMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphDef {
    pub name: Option<String>,
    pub attrs: HashMap<String, AttributeValue>,
    pub nodes: HashMap<String, NodeDef>,
    pub node_order: Vec<String>,
    pub edges: Vec<EdgeDef>,
    pub node_defaults: HashMap<String, AttributeValue>,
    pub edge_defaults: HashMap<String, AttributeValue>,
}

impl SubgraphDef {
    /// Iterate subgraph nodes in declaration order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &NodeDef> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    #[serde(with = "crate::duration_serde")]
    Duration(Duration),
}

impl AttributeValue {
    /// Coerce the value to a plain string (the form the condition evaluator
    /// and context merge compare against).
    pub fn coerce_string(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::Boolean(b) => b.to_string(),
            AttributeValue::Duration(d) => format!("{}ms", d.as_millis()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            AttributeValue::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            AttributeValue::Duration(d) => Some(*d),
            AttributeValue::Integer(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
            _ => None,
        }
    }
}
