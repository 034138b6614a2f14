//! Outgoing-edge selection after a node finishes.
//!
//! Criteria, in priority order:
//! 1. Conditional edges whose condition evaluates true (highest weight wins).
//! 2. Edge label matching the outcome's preferred label.
//! 3. Outcome's suggested next node ids.
//! 4. Unconditional edges by weight, declaration order breaking ties.
//!
//! Returns `None` when nothing qualifies; the engine treats that as fatal on
//! non-exit nodes.

use std::sync::OnceLock;

use regex::Regex;

use gantry_types::{Outcome, Result};

use crate::condition;
use crate::graph::{Edge, Graph};

/// Strip menu accelerator prefixes like `[Y] `, `Y) `, or `Y- ` so labels
/// compare by their text.
pub fn normalize_label(label: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(?:\[\w\]\s*|\w\)\s*|\w-\s*)").expect("static pattern")
    });
    re.replace(label.trim(), "").trim().to_lowercase()
}

/// Pick the edge to follow out of `node_id`. `resolve` maps condition keys
/// to context values.
pub fn select_edge<'a, F>(
    graph: &'a Graph,
    node_id: &str,
    outcome: &Outcome,
    resolve: F,
) -> Result<Option<&'a Edge>>
where
    F: Fn(&str) -> Option<String>,
{
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return Ok(None);
    }

    // 1. Satisfied conditions, highest weight first.
    let mut best_conditional: Option<&Edge> = None;
    for &edge in &edges {
        let Some(cond) = &edge.condition else { continue };
        if condition::evaluate(cond, &resolve)? {
            let better = match best_conditional {
                Some(current) => edge.weight > current.weight,
                None => true,
            };
            if better {
                best_conditional = Some(edge);
            }
        }
    }
    if let Some(edge) = best_conditional {
        return Ok(Some(edge));
    }

    // 2. Preferred label against edge labels.
    if let Some(preferred) = &outcome.preferred_label {
        let wanted = normalize_label(preferred);
        if !wanted.is_empty() {
            for &edge in &edges {
                if let Some(label) = &edge.label {
                    if normalize_label(label) == wanted {
                        return Ok(Some(edge));
                    }
                }
            }
        }
    }

    // 3. Suggested next node ids, in the order the handler listed them.
    for suggested in &outcome.suggested_next_ids {
        for &edge in &edges {
            if edge.to == *suggested {
                return Ok(Some(edge));
            }
        }
    }

    // 4. Unconditional edges by weight; declaration order breaks ties.
    let mut best: Option<&Edge> = None;
    for &edge in &edges {
        if edge.condition.is_some() {
            continue;
        }
        let better = match best {
            Some(current) => edge.weight > current.weight,
            None => true,
        };
        if better {
            best = Some(edge);
        }
    }
    Ok(best)
}
