//! Graph transforms applied after parsing and before validation.
//!
//! Order matters: subgraph flattening happens during [`Graph::from_dot`],
//! then `$variable` expansion, then the stylesheet cascade. Expansion runs
//! first so a stylesheet never sees half-substituted text.

use std::sync::OnceLock;

use regex::Regex;

use gantry_types::Result;

use crate::graph::Graph;
use crate::stylesheet::Stylesheet;

fn var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("static pattern"))
}

/// Replace `$name` references in node prompts and labels with the value of
/// the graph attribute `name`. Unknown references are left verbatim.
pub fn expand_variables(graph: &mut Graph) {
    let attrs = graph.attrs.clone();
    let substitute = |text: &str| -> String {
        var_pattern()
            .replace_all(text, |caps: &regex::Captures| {
                match attrs.get(&caps[1]) {
                    Some(value) => value.coerce_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    };

    for node in graph.all_nodes_mut() {
        if let Some(prompt) = &node.prompt {
            node.prompt = Some(substitute(prompt));
        }
        node.label = substitute(&node.label);
    }
}

/// Run the full transform pass: variable expansion, then the stylesheet
/// held by the graph's `model_stylesheet` attribute (if any), then an extra
/// stylesheet supplied by the caller (if any).
pub fn apply_all(graph: &mut Graph, extra_stylesheet: Option<&str>) -> Result<()> {
    expand_variables(graph);

    let inline = graph
        .attrs
        .get("model_stylesheet")
        .map(|v| v.coerce_string());
    if let Some(text) = inline {
        Stylesheet::parse(&text)?.apply(graph);
    }
    if let Some(text) = extra_stylesheet {
        Stylesheet::parse(text)?.apply(graph);
    }
    Ok(())
}
