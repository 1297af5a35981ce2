//! Segment trie matching request paths against route patterns.
//!
//! Patterns are absolute paths made of literal segments and two kinds of
//! parameters: `<str>` (alias `<string>`) captures one non-empty segment,
//! `<path>` captures the rest of the path and must come last. A pattern with
//! a trailing slash also matches the same path without it.

use std::collections::BTreeMap;

use http::Method;

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Str,
    Path,
}

/// Splits a pattern into segments.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let Some(rest) = pattern.strip_prefix('/') else {
        return Err(Error::InvalidPattern(pattern.to_string()));
    };
    let parts: Vec<&str> = rest.split('/').collect();
    let last = parts.len() - 1;

    let mut segments = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let segment = match *part {
            "<str>" | "<string>" => Segment::Str,
            "<path>" if i == last => Segment::Path,
            "" if i != last => return Err(Error::InvalidPattern(pattern.to_string())),
            part if part.starts_with('<') || part.ends_with('>') => {
                return Err(Error::InvalidPattern(pattern.to_string()));
            }
            part => Segment::Literal(part.to_string()),
        };
        segments.push(segment);
    }
    Ok(segments)
}

#[derive(Debug, Default)]
struct Node {
    literals: BTreeMap<String, usize>,
    str_child: Option<usize>,
    path_child: Option<usize>,
    /// Method → rule index, in registration order.
    methods: Vec<(Method, usize)>,
}

/// A match: the terminal node's methods and the captured parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieMatch<'a> {
    pub methods: &'a [(Method, usize)],
    pub params: Vec<String>,
}

#[derive(Debug)]
pub struct Trie {
    nodes: Vec<Node>,
}

impl Default for Trie {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rule` for `method` under `pattern`.
    pub fn add(&mut self, pattern: &str, method: Method, rule: usize) -> Result<()> {
        let segments = parse_pattern(pattern)?;
        let mut node = 0;
        for segment in segments {
            let existing = match &segment {
                Segment::Literal(name) => self.nodes[node].literals.get(name).copied(),
                Segment::Str => self.nodes[node].str_child,
                Segment::Path => self.nodes[node].path_child,
            };
            node = match existing {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    let parent = &mut self.nodes[node];
                    match segment {
                        Segment::Literal(name) => {
                            parent.literals.insert(name, child);
                        }
                        Segment::Str => parent.str_child = Some(child),
                        Segment::Path => parent.path_child = Some(child),
                    }
                    child
                }
            };
        }

        let methods = &mut self.nodes[node].methods;
        if methods.iter().any(|(m, _)| *m == method) {
            return Err(Error::DuplicateRoute {
                pattern: pattern.to_string(),
                method,
            });
        }
        methods.push((method, rule));
        Ok(())
    }

    /// Finds the most specific pattern matching `path`.
    ///
    /// Literal segments win over `<str>`, which wins over `<path>`.
    pub fn find(&self, path: &str) -> Option<TrieMatch<'_>> {
        let rest = path.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        let mut params = Vec::new();
        let node = self.search(0, &segments, &mut params)?;
        Some(TrieMatch {
            methods: &self.nodes[node].methods,
            params,
        })
    }

    fn search(&self, node: usize, segments: &[&str], params: &mut Vec<String>) -> Option<usize> {
        let current = &self.nodes[node];
        let Some((head, rest)) = segments.split_first() else {
            if !current.methods.is_empty() {
                return Some(node);
            }
            return current
                .literals
                .get("")
                .copied()
                .filter(|child| !self.nodes[*child].methods.is_empty());
        };

        if let Some(&child) = current.literals.get(*head) {
            if let Some(found) = self.search(child, rest, params) {
                return Some(found);
            }
        }

        if let Some(child) = current.str_child.filter(|_| !head.is_empty()) {
            params.push((*head).to_string());
            if let Some(found) = self.search(child, rest, params) {
                return Some(found);
            }
            params.pop();
        }

        if let Some(child) = current.path_child {
            if !self.nodes[child].methods.is_empty() {
                params.push(segments.join("/"));
                return Some(child);
            }
        }
        None
    }
}
