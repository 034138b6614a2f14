//! CSS-like stylesheet cascade for pipeline graphs.
//!
//! A stylesheet assigns presentation-independent properties (model,
//! provider, reasoning effort, and arbitrary attributes) to nodes by
//! selector. Four selector forms, in increasing specificity:
//!
//! ```text
//! *          { model: default-model; }       // universal
//! box        { reasoning_effort: low; }      // shape
//! .review    { model: strict-model; }        // class
//! #plan_node { provider: other; }            // id
//! ```
//!
//! For each node and property, the winning declaration is the most specific
//! matching rule; among equal specificity the later declaration wins. An
//! attribute set explicitly on the node is never overwritten.

use std::collections::HashMap;

use gantry_dot::AttributeValue;
use gantry_types::{GantryError, Result};

use crate::graph::Graph;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Universal,
    Shape(String),
    Class(String),
    Id(String),
}

impl Selector {
    fn specificity(&self) -> u8 {
        match self {
            Selector::Universal => 0,
            Selector::Shape(_) => 1,
            Selector::Class(_) => 2,
            Selector::Id(_) => 3,
        }
    }

    fn matches(&self, node: &crate::graph::Node) -> bool {
        match self {
            Selector::Universal => true,
            Selector::Shape(s) => node.shape == *s,
            Selector::Class(c) => node.classes.contains(c),
            Selector::Id(id) => node.id == *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

/// `llm_model` and `llm_provider` are accepted as aliases in both node
/// attributes and stylesheet declarations.
fn canonical_property(name: &str) -> &str {
    match name {
        "llm_model" => "model",
        "llm_provider" => "provider",
        other => other,
    }
}

impl Stylesheet {
    pub fn parse(input: &str) -> Result<Self> {
        Parser::new(input).parse()
    }

    /// Apply the cascade to every node in the graph. Explicit node
    /// attributes always win over stylesheet declarations.
    pub fn apply(&self, graph: &mut Graph) {
        for node in graph.all_nodes_mut() {
            // property -> (specificity, rule index, value); later entries
            // with >= rank replace earlier ones.
            let mut winners: HashMap<String, (u8, usize, String)> = HashMap::new();
            for (index, rule) in self.rules.iter().enumerate() {
                if !rule.selector.matches(node) {
                    continue;
                }
                let spec = rule.selector.specificity();
                for (prop, value) in &rule.declarations {
                    let prop = canonical_property(prop).to_string();
                    let replace = match winners.get(&prop) {
                        Some(&(s, i, _)) => (spec, index) >= (s, i),
                        None => true,
                    };
                    if replace {
                        winners.insert(prop, (spec, index, value.clone()));
                    }
                }
            }

            for (prop, (_, _, value)) in winners {
                apply_property(node, &prop, value);
            }
        }
    }
}

fn apply_property(node: &mut crate::graph::Node, prop: &str, value: String) {
    match prop {
        "model" => {
            if node.model.is_none() {
                node.model = Some(value.clone());
            } else {
                return;
            }
        }
        "provider" => {
            if node.provider.is_none() {
                node.provider = Some(value.clone());
            } else {
                return;
            }
        }
        "reasoning_effort" => {
            if node.reasoning_effort.is_none() {
                node.reasoning_effort = Some(value.clone());
            } else {
                return;
            }
        }
        _ => {
            if node.raw_attrs.contains_key(prop)
                || node.raw_attrs.contains_key(alias_of(prop))
            {
                return;
            }
        }
    }
    node.raw_attrs
        .entry(prop.to_string())
        .or_insert_with(|| AttributeValue::String(value));
}

fn alias_of(prop: &str) -> &str {
    match prop {
        "model" => "llm_model",
        "provider" => "llm_provider",
        other => other,
    }
}

// --- Parser ---

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Stylesheet> {
        let nonempty_input = !std::str::from_utf8(self.input)
            .unwrap_or("")
            .trim()
            .is_empty();
        let mut rules = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.at_end() {
                break;
            }
            rules.push(self.parse_rule()?);
        }
        if rules.is_empty() && nonempty_input {
            return Err(GantryError::Stylesheet(
                "stylesheet text contains no rules".to_string(),
            ));
        }
        Ok(Stylesheet { rules })
    }

    fn parse_rule(&mut self) -> Result<Rule> {
        let selector = self.parse_selector()?;
        self.skip_whitespace_and_comments();
        self.expect(b'{')?;
        let mut declarations = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.peek() == Some(b'}') {
                self.pos += 1;
                break;
            }
            if self.at_end() {
                return Err(self.error("unterminated rule block, expected '}'"));
            }
            declarations.push(self.parse_declaration()?);
        }
        if declarations.is_empty() {
            return Err(self.error("rule has an empty declaration block"));
        }
        Ok(Rule {
            selector,
            declarations,
        })
    }

    fn parse_selector(&mut self) -> Result<Selector> {
        match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                Ok(Selector::Universal)
            }
            Some(b'.') => {
                self.pos += 1;
                let name = self.parse_ident()?;
                Ok(Selector::Class(name))
            }
            Some(b'#') => {
                self.pos += 1;
                let name = self.parse_ident()?;
                Ok(Selector::Id(name))
            }
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let name = self.parse_ident()?;
                Ok(Selector::Shape(name))
            }
            _ => Err(self.error("expected selector ('*', shape, '.class', or '#id')")),
        }
    }

    fn parse_declaration(&mut self) -> Result<(String, String)> {
        let prop = self.parse_ident()?;
        self.skip_whitespace_and_comments();
        self.expect(b':')?;
        self.skip_whitespace_and_comments();
        let value = self.parse_value()?;
        self.skip_whitespace_and_comments();
        self.expect(b';')?;
        Ok((prop, value))
    }

    fn parse_value(&mut self) -> Result<String> {
        if self.peek() == Some(b'"') {
            self.pos += 1;
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == b'"' {
                    let value = self.slice(start, self.pos);
                    self.pos += 1;
                    return Ok(value);
                }
                self.pos += 1;
            }
            return Err(self.error("unterminated string value"));
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b';' || c == b'}' || c == b'\n' {
                break;
            }
            self.pos += 1;
        }
        let value = self.slice(start, self.pos).trim().to_string();
        if value.is_empty() {
            return Err(self.error("empty declaration value"));
        }
        Ok(value)
    }

    fn parse_ident(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(self.slice(start, self.pos))
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(c) = self.peek() {
                if c.is_ascii_whitespace() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'*') {
                self.pos += 2;
                while !self.at_end() {
                    if self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/') {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c as char)))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn slice(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.input[start..end]).into_owned()
    }

    fn error(&self, message: impl std::fmt::Display) -> GantryError {
        GantryError::Stylesheet(format!("at byte {}: {}", self.pos, message))
    }
}
