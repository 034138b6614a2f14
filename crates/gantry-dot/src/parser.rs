use std::collections::HashMap;
use std::time::Duration;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, eof, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{literal, take_while};
use winnow::{ModalResult, Parser};

use crate::ast::*;

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

/// Strip `//` line comments and `/* */` block comments from the input.
/// Comment markers inside double-quoted strings are left untouched.
pub(crate) fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            // line comment, skip until newline
            chars.next();
            for n in chars.by_ref() {
                if n == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            // block comment, skip until */
            chars.next();
            let mut prev_star = false;
            for n in chars.by_ref() {
                if prev_star && n == '/' {
                    break;
                }
                // preserve newlines so line numbers stay correct
                if n == '\n' {
                    out.push('\n');
                }
                prev_star = n == '*';
            }
        } else if c == '"' {
            // inside a string literal, copy verbatim, handling escapes
            out.push('"');
            while let Some(n) = chars.next() {
                if n == '\\' {
                    out.push('\\');
                    if let Some(esc) = chars.next() {
                        out.push(esc);
                    }
                } else {
                    out.push(n);
                    if n == '"' {
                        break;
                    }
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// Parse an identifier: [A-Za-z_][A-Za-z0-9_]*
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Parse a qualified id: identifier ( '.' identifier )+  or plain identifier.
/// Returns the full dotted string.
fn qualified_or_plain_id(input: &mut &str) -> ModalResult<String> {
    let first = identifier.parse_next(input)?;
    let rest: Vec<&str> = repeat(0.., preceded('.', identifier)).parse_next(input)?;
    if rest.is_empty() {
        Ok(first.to_string())
    } else {
        let mut s = first.to_string();
        for part in rest {
            s.push('.');
            s.push_str(part);
        }
        Ok(s)
    }
}

/// Parse a double-quoted string with escape support.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = winnow::token::any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let esc = winnow::token::any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// Parse a duration value: integer + suffix (ms, s, m, h, d).
fn duration_value(input: &mut &str) -> ModalResult<Duration> {
    let digits: &str = digit1.parse_next(input)?;
    let val: u64 = digits
        .parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))?;
    let suffix = alt(("ms", "s", "m", "h", "d")).parse_next(input)?;
    let dur = match suffix {
        "ms" => Duration::from_millis(val),
        "s" => Duration::from_secs(val),
        "m" => Duration::from_secs(val * 60),
        "h" => Duration::from_secs(val * 3600),
        "d" => Duration::from_secs(val * 86400),
        _ => unreachable!(),
    };
    Ok(dur)
}

/// Parse a boolean value.
fn boolean_value(input: &mut &str) -> ModalResult<bool> {
    alt((literal("true").value(true), literal("false").value(false))).parse_next(input)
}

/// Parse a float: optional sign, digits, '.', digits.
fn float_value(input: &mut &str) -> ModalResult<f64> {
    let s: &str = (opt(alt(('-', '+'))), digit1, '.', digit1)
        .take()
        .parse_next(input)?;
    s.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

/// Parse an integer: optional sign + digits.
fn integer_value(input: &mut &str) -> ModalResult<i64> {
    let s: &str = (opt(alt(('-', '+'))), digit1).take().parse_next(input)?;
    s.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

/// Parse an attribute value.
fn attr_value(input: &mut &str) -> ModalResult<AttributeValue> {
    alt((
        quoted_string.map(AttributeValue::String),
        boolean_value.map(AttributeValue::Boolean),
        duration_value.map(AttributeValue::Duration),
        float_value.map(AttributeValue::Float),
        integer_value.map(AttributeValue::Integer),
    ))
    .parse_next(input)
}

/// Parse a single attribute: key '=' value.
fn attr(input: &mut &str) -> ModalResult<(String, AttributeValue)> {
    let key = qualified_or_plain_id.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let value = attr_value
        .context(StrContext::Expected(StrContextValue::Description(
            "attribute value",
        )))
        .parse_next(input)?;
    Ok((key, value))
}

/// Parse an attribute block: '[' attr ( ','? attr )* ']'
fn attr_block(input: &mut &str) -> ModalResult<HashMap<String, AttributeValue>> {
    let _ = '['.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    let mut attrs = HashMap::new();
    if let Some(first) = opt(attr).parse_next(input)? {
        attrs.insert(first.0, first.1);
        loop {
            let _ = ws.parse_next(input)?;
            // optional comma or semicolon separator
            let _ = opt(alt((',', ';'))).parse_next(input)?;
            let _ = ws.parse_next(input)?;
            if let Some(a) = opt(attr).parse_next(input)? {
                attrs.insert(a.0, a.1);
            } else {
                break;
            }
        }
    }

    let _ = ws.parse_next(input)?;
    let _ = ']'.parse_next(input)?;
    Ok(attrs)
}

/// Intermediate representation of a parsed statement, before merging into a DotGraph.
enum Statement {
    GraphAttrs(HashMap<String, AttributeValue>),
    NodeDefaults(HashMap<String, AttributeValue>),
    EdgeDefaults(HashMap<String, AttributeValue>),
    Node(String, HashMap<String, AttributeValue>),
    Edge(Vec<String>, HashMap<String, AttributeValue>),
    Subgraph(Option<String>, Vec<Statement>),
    GraphAttrDecl(String, AttributeValue),
}

/// Parse 'graph' '[' ... ']' ';'?
fn graph_attr_stmt(input: &mut &str) -> ModalResult<Statement> {
    let _ = literal("graph").parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let attrs = attr_block.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = opt(';').parse_next(input)?;
    Ok(Statement::GraphAttrs(attrs))
}

/// Parse 'node' '[' ... ']' ';'?
fn node_defaults_stmt(input: &mut &str) -> ModalResult<Statement> {
    let _ = literal("node").parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let attrs = attr_block.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = opt(';').parse_next(input)?;
    Ok(Statement::NodeDefaults(attrs))
}

/// Parse 'edge' '[' ... ']' ';'?
fn edge_defaults_stmt(input: &mut &str) -> ModalResult<Statement> {
    let _ = literal("edge").parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let attrs = attr_block.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = opt(';').parse_next(input)?;
    Ok(Statement::EdgeDefaults(attrs))
}

/// Parse 'subgraph' identifier? '{' statement* '}'
fn subgraph_stmt(input: &mut &str) -> ModalResult<Statement> {
    let _ = literal("subgraph").parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let name = opt(identifier).parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '{'.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let stmts = statements.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '}'.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = opt(';').parse_next(input)?;
    Ok(Statement::Subgraph(name.map(|s| s.to_string()), stmts))
}

/// Parse a node or edge statement. An edge starts as an identifier then has '->'.
fn node_or_edge_stmt(input: &mut &str) -> ModalResult<Statement> {
    let first = identifier.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    // Check for edge: '->'
    let arrow = opt(literal("->")).parse_next(input)?;
    if arrow.is_some() {
        // Edge statement — collect chain
        let mut chain = vec![first.to_string()];
        let _ = ws.parse_next(input)?;
        let next = identifier
            .context(StrContext::Expected(StrContextValue::Description(
                "edge target identifier",
            )))
            .parse_next(input)?;
        chain.push(next.to_string());

        loop {
            let _ = ws.parse_next(input)?;
            if opt(literal("->")).parse_next(input)?.is_some() {
                let _ = ws.parse_next(input)?;
                let n = identifier
                    .context(StrContext::Expected(StrContextValue::Description(
                        "edge target identifier",
                    )))
                    .parse_next(input)?;
                chain.push(n.to_string());
            } else {
                break;
            }
        }

        let _ = ws.parse_next(input)?;
        let attrs = opt(attr_block).parse_next(input)?.unwrap_or_default();
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::Edge(chain, attrs));
    }

    // Check for '--' to give a better error
    if opt(literal("--")).parse_next(input)?.is_some() {
        return Err(make_cut_error(
            "only directed edges (->); undirected edges (--) are not supported",
        ));
    }

    // An attr block means a node statement.
    let attrs = opt(attr_block).parse_next(input)?.unwrap_or_default();
    let _ = ws.parse_next(input)?;

    if !attrs.is_empty() {
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::Node(first.to_string(), attrs));
    }

    // Check for '=' which means this is a graph attr decl: key = value
    if opt('=').parse_next(input)?.is_some() {
        let _ = ws.parse_next(input)?;
        let val = attr_value.parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::GraphAttrDecl(first.to_string(), val));
    }

    let _ = opt(';').parse_next(input)?;
    Ok(Statement::Node(first.to_string(), attrs))
}

/// Parse a single statement.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    let _ = ws.parse_next(input)?;
    alt((
        graph_attr_stmt,
        node_defaults_stmt,
        edge_defaults_stmt,
        subgraph_stmt,
        node_or_edge_stmt,
    ))
    .parse_next(input)
}

/// Parse zero or more statements.
fn statements(input: &mut &str) -> ModalResult<Vec<Statement>> {
    let mut stmts = Vec::new();
    loop {
        let _ = ws.parse_next(input)?;
        if input.is_empty() || input.starts_with('}') {
            break;
        }
        let stmt = statement.parse_next(input)?;
        stmts.push(stmt);
    }
    Ok(stmts)
}

/// Flat-merge output: one lexical scope's worth of declarations.
struct MergedScope {
    graph_attrs: HashMap<String, AttributeValue>,
    nodes: HashMap<String, NodeDef>,
    node_order: Vec<String>,
    edges: Vec<EdgeDef>,
    subgraphs: Vec<SubgraphDef>,
    node_defaults: HashMap<String, AttributeValue>,
    edge_defaults: HashMap<String, AttributeValue>,
}

/// Merge statements into a scope, preserving declaration order.
///
/// Default statements mutate the running default sets, so they apply only to
/// statements that come after them in the same scope (subgraphs inherit the
/// parent's defaults as they stood at the subgraph statement).
fn merge_statements(
    stmts: Vec<Statement>,
    parent_node_defaults: &HashMap<String, AttributeValue>,
    parent_edge_defaults: &HashMap<String, AttributeValue>,
) -> MergedScope {
    let mut scope = MergedScope {
        graph_attrs: HashMap::new(),
        nodes: HashMap::new(),
        node_order: Vec::new(),
        edges: Vec::new(),
        subgraphs: Vec::new(),
        node_defaults: parent_node_defaults.clone(),
        edge_defaults: parent_edge_defaults.clone(),
    };

    for stmt in stmts {
        match stmt {
            Statement::GraphAttrs(attrs) => {
                scope.graph_attrs.extend(attrs);
            }
            Statement::NodeDefaults(attrs) => {
                scope.node_defaults.extend(attrs);
            }
            Statement::EdgeDefaults(attrs) => {
                scope.edge_defaults.extend(attrs);
            }
            Statement::Node(id, mut attrs) => {
                match scope.nodes.get_mut(&id) {
                    // Re-declaration keeps the original order slot. Only the
                    // explicitly written attrs override; defaults in force
                    // fill keys still absent after the merge.
                    Some(existing) => {
                        existing.attrs.extend(attrs);
                        for (k, v) in &scope.node_defaults {
                            existing.attrs.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                    None => {
                        for (k, v) in &scope.node_defaults {
                            attrs.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                        scope.node_order.push(id.clone());
                        scope.nodes.insert(id.clone(), NodeDef { id, attrs });
                    }
                }
            }
            Statement::Edge(chain, attrs) => {
                // Auto-create nodes that are only referenced by edges, at
                // their first reference, with a default shape.
                for node_id in &chain {
                    if !scope.nodes.contains_key(node_id) {
                        let mut na = scope.node_defaults.clone();
                        na.entry("shape".to_string())
                            .or_insert_with(|| AttributeValue::String(DEFAULT_SHAPE.to_string()));
                        scope.node_order.push(node_id.clone());
                        scope.nodes.insert(
                            node_id.clone(),
                            NodeDef {
                                id: node_id.clone(),
                                attrs: na,
                            },
                        );
                    }
                }
                // Expand chained edges: A -> B -> C => (A,B), (B,C)
                for pair in chain.windows(2) {
                    let mut merged = scope.edge_defaults.clone();
                    merged.extend(attrs.clone());
                    scope.edges.push(EdgeDef {
                        from: pair[0].clone(),
                        to: pair[1].clone(),
                        attrs: merged,
                    });
                }
            }
            Statement::Subgraph(name, inner_stmts) => {
                let inner =
                    merge_statements(inner_stmts, &scope.node_defaults, &scope.edge_defaults);
                scope.subgraphs.push(SubgraphDef {
                    name,
                    attrs: inner.graph_attrs,
                    nodes: inner.nodes,
                    node_order: inner.node_order,
                    edges: inner.edges,
                    node_defaults: inner.node_defaults,
                    edge_defaults: inner.edge_defaults,
                });
                // nested subgraphs get hoisted into the parent's list
                for nested in inner.subgraphs {
                    scope.subgraphs.push(nested);
                }
            }
            Statement::GraphAttrDecl(key, val) => {
                scope.graph_attrs.insert(key, val);
            }
        }
    }

    scope
}

/// Top-level parser: 'digraph' identifier '{' statements '}'.
fn parse_digraph(input: &mut &str) -> ModalResult<DotGraph> {
    let _ = ws.parse_next(input)?;

    // Reject 'strict'
    if input.starts_with("strict") {
        return Err(make_cut_error(
            "'digraph' keyword (strict graphs are not supported)",
        ));
    }

    // Reject undirected 'graph'
    if input.starts_with("graph") && !input.starts_with("graph [") {
        let after = &input[5..];
        let trimmed = after.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(make_cut_error(
                "'digraph' keyword (undirected graphs are not supported)",
            ));
        }
    }

    let _ = literal("digraph")
        .context(StrContext::Expected(StrContextValue::StringLiteral(
            "digraph",
        )))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let name = identifier
        .context(StrContext::Expected(StrContextValue::Description(
            "graph name identifier",
        )))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '{'.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let stmts = statements.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '}'.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = eof
        .context(StrContext::Expected(StrContextValue::Description(
            "end of input after closing '}'",
        )))
        .parse_next(input)?;

    let empty = HashMap::new();
    let scope = merge_statements(stmts, &empty, &empty);

    Ok(DotGraph {
        name: name.to_string(),
        attrs: scope.graph_attrs,
        nodes: scope.nodes,
        node_order: scope.node_order,
        edges: scope.edges,
        subgraphs: scope.subgraphs,
        node_defaults: scope.node_defaults,
        edge_defaults: scope.edge_defaults,
    })
}

/// Compute (line, col) from byte offset in the original (pre-stripped) text.
fn offset_to_line_col(original: &str, remaining_len: usize, stripped_len: usize) -> (usize, usize) {
    let consumed = stripped_len - remaining_len;
    // strip_comments preserves newlines, so line numbers carry over.
    let prefix = &original[..consumed.min(original.len())];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Public entry point. Malformed input never yields a partial graph.
pub fn parse(input: &str) -> std::result::Result<DotGraph, gantry_types::GantryError> {
    let stripped = strip_comments(input);
    let mut remaining = stripped.as_str();
    let stripped_len = stripped.len();

    parse_digraph.parse_next(&mut remaining).map_err(|e| {
        let (line, col) = offset_to_line_col(&stripped, remaining.len(), stripped_len);
        let message = format!("{}", e);

        let snippet = remaining.chars().take(40).collect::<String>();
        let source_snippet = if snippet.is_empty() {
            None
        } else {
            Some(snippet)
        };

        gantry_types::GantryError::Parse {
            line,
            col,
            message,
            source_snippet,
        }
    })
}
