//! Node handler trait and the open handler registry.
//!
//! Dispatch resolves a node to a handler type string: the explicit `type`
//! attribute wins, then the shape mapping, then the generation fallback.
//! Conditional-shaped nodes that carry a prompt route to generation so the
//! prompt actually runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use gantry_types::{Context, Outcome, Result};

use crate::graph::{Graph, Node};

/// Everything a handler may need for one node execution.
pub struct HandlerRequest<'a> {
    pub node: &'a Node,
    pub graph: &'a Graph,
    pub context: &'a Context,
    /// Node ids completed so far, in order.
    pub completed: &'a [String],
    /// Output text of completed nodes, for prompt assembly.
    pub node_outputs: &'a HashMap<String, String>,
    /// 1-based attempt number (bumped by the retry policy).
    pub attempt: usize,
    /// Per-node artifact directory, when the run has a log directory.
    pub stage_dir: Option<PathBuf>,
    /// The run's log directory.
    pub logs_dir: Option<PathBuf>,
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, request: &HandlerRequest<'_>) -> Result<Outcome>;
}

pub const TYPE_START: &str = "start";
pub const TYPE_EXIT: &str = "exit";
pub const TYPE_GENERATION: &str = "generation";
pub const TYPE_CONDITIONAL: &str = "conditional";
pub const TYPE_TOOL: &str = "tool";
pub const TYPE_WAIT_HUMAN: &str = "wait.human";
pub const TYPE_FAN_OUT: &str = "fan_out";
pub const TYPE_FAN_IN: &str = "fan_in";
pub const TYPE_LOOP: &str = "loop";

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    shape_types: HashMap<String, String>,
}

impl HandlerRegistry {
    /// An empty registry with the default shape mapping and no handlers.
    pub fn new() -> Self {
        let shape_types = [
            ("Mdiamond", TYPE_START),
            ("Msquare", TYPE_EXIT),
            ("box", TYPE_GENERATION),
            ("diamond", TYPE_CONDITIONAL),
            ("parallelogram", TYPE_TOOL),
            ("hexagon", TYPE_WAIT_HUMAN),
            ("component", TYPE_FAN_OUT),
            ("tripleoctagon", TYPE_FAN_IN),
            ("house", TYPE_LOOP),
        ]
        .into_iter()
        .map(|(shape, ty)| (shape.to_string(), ty.to_string()))
        .collect();

        HandlerRegistry {
            handlers: HashMap::new(),
            shape_types,
        }
    }

    pub fn register(&mut self, handler_type: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler_type.to_string(), handler);
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// Resolve the handler type for a node.
    pub fn resolve_type(&self, node: &Node) -> String {
        let resolved = match &node.node_type {
            Some(t) => t.clone(),
            None => self
                .shape_types
                .get(&node.shape)
                .cloned()
                .unwrap_or_else(|| TYPE_GENERATION.to_string()),
        };
        // a decision node with its own prompt wants a model call first
        if resolved == TYPE_CONDITIONAL && node.prompt.is_some() {
            return TYPE_GENERATION.to_string();
        }
        resolved
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
