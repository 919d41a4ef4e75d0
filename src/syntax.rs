// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod yaml;

use std::rc::Rc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::number::Number;

/// A position within a source document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

/// A span of source text within a named environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    pub begin: Pos,
    pub end: Pos,
}

impl Range {
    /// A range that only names its environment.
    pub fn environment(name: &str) -> Range {
        Range {
            environment: name.to_string(),
            ..Range::default()
        }
    }
}

pub type NodeRef = Rc<Node>;

#[derive(Debug, Clone)]
pub struct ObjectProperty {
    pub key: NodeRef,
    pub value: NodeRef,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Null,
    Boolean(bool),
    Number(Number),
    String(Rc<str>),
    Array(Vec<NodeRef>),
    Object(Vec<ObjectProperty>),
}

/// A node of the decoded document. Every node knows its path from the
/// document root, e.g. `values.servers[0].host`.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub path: String,
    pub range: Option<Range>,
}

impl Node {
    pub fn new(kind: NodeKind, path: impl Into<String>) -> NodeRef {
        Rc::new(Node {
            kind,
            path: path.into(),
            range: None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Rebuilds the tree rooted at `node` bottom up. `visit` sees each node
/// after its children have been rebuilt and may replace it.
pub fn walk<F>(node: &NodeRef, visit: &mut F) -> Result<NodeRef>
where
    F: FnMut(NodeRef) -> Result<NodeRef>,
{
    let rebuilt = match &node.kind {
        NodeKind::Array(items) => {
            let items = items
                .iter()
                .map(|n| walk(n, visit))
                .collect::<Result<Vec<_>>>()?;
            Rc::new(Node {
                kind: NodeKind::Array(items),
                path: node.path.clone(),
                range: node.range.clone(),
            })
        }
        NodeKind::Object(props) => {
            let mut rebuilt = Vec::with_capacity(props.len());
            for p in props {
                rebuilt.push(ObjectProperty {
                    key: walk(&p.key, visit)?,
                    value: walk(&p.value, visit)?,
                });
            }
            Rc::new(Node {
                kind: NodeKind::Object(rebuilt),
                path: node.path.clone(),
                range: node.range.clone(),
            })
        }
        _ => node.clone(),
    };
    visit(rebuilt)
}
