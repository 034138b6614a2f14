//! Canonical DOT serializer — the parser's approximate inverse.
//!
//! Output is deterministic: graph attributes sorted by key, node statements
//! in declaration order with their attributes sorted by key, subgraph blocks
//! next, then edges in declaration order. Re-parsing canonical output and
//! serializing again yields byte-identical text, and every attribute
//! (recognized or not) survives the trip.

use std::collections::HashMap;

use crate::ast::{AttributeValue, DotGraph, EdgeDef, SubgraphDef};
use crate::duration_serde::format_duration;

const INDENT: &str = "    ";

/// Serialize a parsed graph back to canonical DOT text.
pub fn to_canonical_dot(graph: &DotGraph) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph {} {{\n", graph.name));

    write_graph_attrs(&mut out, &graph.attrs, 1);

    for node in graph.nodes_in_order() {
        write_node(&mut out, &node.id, &node.attrs, 1);
    }

    for sg in &graph.subgraphs {
        write_subgraph(&mut out, sg);
    }

    for edge in &graph.edges {
        write_edge(&mut out, edge, 1);
    }

    out.push_str("}\n");
    out
}

fn write_graph_attrs(out: &mut String, attrs: &HashMap<String, AttributeValue>, depth: usize) {
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(&INDENT.repeat(depth));
        out.push_str(&format!("{} = {}\n", key, render_value(&attrs[key])));
    }
}

fn write_node(out: &mut String, id: &str, attrs: &HashMap<String, AttributeValue>, depth: usize) {
    out.push_str(&INDENT.repeat(depth));
    if attrs.is_empty() {
        out.push_str(&format!("{}\n", id));
    } else {
        out.push_str(&format!("{} [{}]\n", id, render_attrs(attrs)));
    }
}

fn write_edge(out: &mut String, edge: &EdgeDef, depth: usize) {
    out.push_str(&INDENT.repeat(depth));
    if edge.attrs.is_empty() {
        out.push_str(&format!("{} -> {}\n", edge.from, edge.to));
    } else {
        out.push_str(&format!(
            "{} -> {} [{}]\n",
            edge.from,
            edge.to,
            render_attrs(&edge.attrs)
        ));
    }
}

fn write_subgraph(out: &mut String, sg: &SubgraphDef) {
    out.push_str(INDENT);
    match &sg.name {
        Some(name) => out.push_str(&format!("subgraph {} {{\n", name)),
        None => out.push_str("subgraph {\n"),
    }
    write_graph_attrs(out, &sg.attrs, 2);
    for node in sg.nodes_in_order() {
        write_node(out, &node.id, &node.attrs, 2);
    }
    for edge in &sg.edges {
        write_edge(out, edge, 2);
    }
    out.push_str(INDENT);
    out.push_str("}\n");
}

/// Render an attribute map as `k=v, k2=v2` with keys sorted.
fn render_attrs(attrs: &HashMap<String, AttributeValue>) -> String {
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| format!("{}={}", k, render_value(&attrs[k.as_str()])))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a typed value so that re-parsing yields the identical value.
fn render_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::String(s) => format!("\"{}\"", escape_string(s)),
        AttributeValue::Integer(i) => i.to_string(),
        // keep a decimal point so the value re-parses as a float
        AttributeValue::Float(f) if f.fract() == 0.0 => format!("{:.1}", f),
        AttributeValue::Float(f) => f.to_string(),
        AttributeValue::Boolean(b) => b.to_string(),
        AttributeValue::Duration(d) => format_duration(d),
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}
