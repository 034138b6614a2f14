//! DOT parser and canonical serializer for the Graphviz subset used by
//! Gantry pipelines.
//!
//! Parses `digraph Name { ... }` with nodes, edges, subgraphs, and typed
//! attributes, preserving declaration order. Produces a typed AST:
//! [`DotGraph`], [`NodeDef`], [`EdgeDef`], [`SubgraphDef`],
//! [`AttributeValue`]. [`to_canonical_dot`] is the deterministic inverse.
//!
//! # Example
//! ```
//! let dot = r#"digraph Pipeline { start -> process -> done }"#;
//! let graph = gantry_dot::parse(dot).unwrap();
//! assert_eq!(graph.name, "Pipeline");
//! assert_eq!(graph.edges.len(), 2);
//! ```

pub mod ast;
mod duration_serde;
mod parser;
mod writer;

pub use ast::*;
pub use parser::parse;
pub use writer::to_canonical_dot;
