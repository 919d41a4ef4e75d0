// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::iter::Peekable;
use std::rc::Rc;
use std::str::FromStr;
use std::vec::IntoIter;

use anyhow::{anyhow, Result};
use num_bigint::BigInt;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser, Tag};
use yaml_rust2::scanner::{Marker, TScalarStyle};
use yaml_rust2::yaml::{Hash, Yaml};
use yaml_rust2::YamlEmitter;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::number::Number;
use crate::syntax::{Node, NodeKind, NodeRef, ObjectProperty, Pos, Range};
use crate::utils::join_key;

#[derive(Default)]
struct Events(Vec<(Event, Marker)>);

impl MarkedEventReceiver for Events {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        self.0.push((ev, mark));
    }
}

// Byte offsets of the start of each line.
struct Lines<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> Lines<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    // `line` and `column` are 1-based; columns count characters.
    fn pos(&self, line: usize, column: usize) -> Pos {
        let byte = match self.starts.get(line.saturating_sub(1)) {
            Some(&start) => {
                let text = &self.source[start..];
                let skip = column.saturating_sub(1);
                text.char_indices()
                    .nth(skip)
                    .map_or(self.source.len(), |(b, _)| start + b)
            }
            None => self.source.len(),
        };
        Pos { line, column, byte }
    }

    fn marker(&self, mark: &Marker) -> Pos {
        self.pos(mark.line(), mark.col() + 1)
    }
}

struct Decoder<'a> {
    filename: &'a str,
    lines: Lines<'a>,
    events: Peekable<IntoIter<(Event, Marker)>>,
    diags: Diagnostics,
}

fn tag_name(tag: &Tag) -> String {
    format!("{}{}", tag.handle, tag.suffix)
}

fn number(text: &str) -> Option<Number> {
    let integer = |digits: &str, radix| {
        BigInt::parse_bytes(digits.as_bytes(), radix).and_then(|n| Number::from_str(&n.to_string()).ok())
    };
    if let Some(hex) = text.strip_prefix("0x") {
        return integer(hex, 16);
    }
    if let Some(oct) = text.strip_prefix("0o") {
        return integer(oct, 8);
    }
    match text.bytes().next() {
        Some(b) if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.') => Number::from_str(text).ok(),
        _ => None,
    }
}

impl Decoder<'_> {
    fn range(&self, begin: Pos, end: Pos) -> Range {
        Range {
            environment: self.filename.to_string(),
            begin,
            end,
        }
    }

    fn error(&mut self, range: &Range, path: &str, summary: impl Into<String>) {
        self.diags.push(Diagnostic::error(Some(range.clone()), path, summary));
    }

    fn scalar_end(&self, begin: Pos, value: &str, style: TScalarStyle) -> Pos {
        match style {
            TScalarStyle::Plain => self.lines.pos(begin.line, begin.column + value.chars().count()),
            TScalarStyle::SingleQuoted | TScalarStyle::DoubleQuoted => {
                self.lines.pos(begin.line, begin.column + value.chars().count() + 2)
            }
            _ => {
                // Block scalars start at their indicator and end on their last line.
                let body = value.trim_end_matches('\n');
                let last = body.rsplit('\n').next().unwrap_or_default();
                let line = begin.line + body.matches('\n').count() + 1;
                self.lines.pos(line, begin.column + last.chars().count())
            }
        }
    }

    fn scalar(&mut self, value: &str, style: TScalarStyle, range: &Range, path: &str) -> NodeKind {
        if !matches!(style, TScalarStyle::Plain) {
            return NodeKind::String(value.into());
        }
        match value {
            "" | "~" | "null" | "Null" | "NULL" => NodeKind::Null,
            "true" | "True" | "TRUE" => NodeKind::Boolean(true),
            "false" | "False" | "FALSE" => NodeKind::Boolean(false),
            ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" | "-.inf" | "-.Inf" | "-.INF" | ".nan"
            | ".NaN" | ".NAN" => {
                self.error(range, path, "numbers must be finite");
                NodeKind::Null
            }
            _ => match number(value) {
                Some(n) => NodeKind::Number(n),
                None => NodeKind::String(value.into()),
            },
        }
    }

    // Decodes the node starting at the next event. Returns the node and the
    // position it ends at.
    fn node(&mut self, path: &str) -> (NodeRef, Pos) {
        let Some((event, mark)) = self.events.next() else {
            let end = self.lines.pos(self.lines.starts.len(), 1);
            return (leaf(NodeKind::Null, path, None), end);
        };
        let begin = self.lines.marker(&mark);

        let (kind, end, tag) = match event {
            Event::Scalar(value, style, _, tag) => {
                let end = self.scalar_end(begin, &value, style);
                let range = self.range(begin, end);
                let kind = match tag {
                    Some(_) => NodeKind::Null,
                    None => self.scalar(&value, style, &range, path),
                };
                (kind, end, tag)
            }
            Event::SequenceStart(_, tag) => {
                let (items, end) = self.sequence(path, begin);
                (NodeKind::Array(items), end, tag)
            }
            Event::MappingStart(_, tag) => {
                let (props, end) = self.mapping(path, begin);
                (NodeKind::Object(props), end, tag)
            }
            Event::Alias(_) => {
                let range = self.range(begin, begin);
                self.error(&range, path, "alias nodes are not supported");
                (NodeKind::Null, begin, None)
            }
            _ => {
                let range = self.range(begin, begin);
                self.error(&range, path, "unexpected YAML event");
                (NodeKind::Null, begin, None)
            }
        };

        let range = self.range(begin, end);
        let kind = match tag {
            Some(tag) => {
                self.error(&range, path, format!("unsupported YAML tag {}", tag_name(&tag)));
                NodeKind::Null
            }
            None => kind,
        };
        (leaf(kind, path, Some(range)), end)
    }

    fn sequence(&mut self, path: &str, begin: Pos) -> (Vec<NodeRef>, Pos) {
        let mut items = vec![];
        let mut end = begin;
        loop {
            match self.events.peek() {
                Some((Event::SequenceEnd, _)) => {
                    self.events.next();
                    break;
                }
                None => break,
                _ => {
                    let (item, item_end) = self.node(&format!("{path}[{}]", items.len()));
                    items.push(item);
                    end = item_end;
                }
            }
        }
        (items, end)
    }

    fn mapping(&mut self, path: &str, begin: Pos) -> (Vec<ObjectProperty>, Pos) {
        let mut props = vec![];
        let mut end = begin;
        loop {
            let key = match self.events.peek() {
                Some((Event::MappingEnd, _)) => {
                    self.events.next();
                    break;
                }
                None => break,
                Some((Event::Scalar(_, _, _, None), _)) => match self.events.next() {
                    Some((Event::Scalar(text, style, _, _), mark)) => {
                        let begin = self.lines.marker(&mark);
                        let range = self.range(begin, self.scalar_end(begin, &text, style));
                        Some((text, range))
                    }
                    _ => None,
                },
                Some(_) => {
                    let (key, _) = self.node(path);
                    let range = key.range.clone().unwrap_or_else(|| Range::environment(self.filename));
                    self.error(&range, path, "object keys must be strings");
                    None
                }
            };

            let child = match &key {
                Some((text, _)) => join_key(path, text),
                None => path.to_string(),
            };
            let (value, value_end) = self.node(&child);
            end = value_end;

            if let Some((text, range)) = key {
                props.push(ObjectProperty {
                    key: leaf(NodeKind::String(text.as_str().into()), child, Some(range)),
                    value,
                });
            }
        }
        (props, end)
    }

    // Skips stream and document markers. Returns false for an empty stream.
    fn skip_to_node(&mut self) -> bool {
        while let Some((event, _)) = self.events.peek() {
            match event {
                Event::Scalar(..) | Event::SequenceStart(..) | Event::MappingStart(..) | Event::Alias(..) => {
                    return true
                }
                Event::StreamEnd => return false,
                _ => {
                    self.events.next();
                }
            }
        }
        false
    }
}

fn leaf(kind: NodeKind, path: impl Into<String>, range: Option<Range>) -> NodeRef {
    Rc::new(Node {
        kind,
        path: path.into(),
        range,
    })
}

/// Decodes a YAML document into a syntax tree. An empty document decodes to
/// an empty object.
///
/// Scalars keep their source text, so numbers are never rounded. Duplicate
/// mapping keys are kept and left for the caller to report.
pub fn decode_yaml(filename: &str, source: &str) -> (Option<NodeRef>, Diagnostics) {
    let lines = Lines::new(source);
    let mut diags = Diagnostics::new();

    let mut events = Events::default();
    if let Err(e) = Parser::new_from_str(source).load(&mut events, false) {
        let pos = lines.marker(e.marker());
        let range = Range {
            environment: filename.to_string(),
            begin: pos,
            end: pos,
        };
        diags.push(Diagnostic::error(Some(range), "", e.to_string()));
        return (None, diags);
    }

    let mut decoder = Decoder {
        filename,
        lines,
        events: events.0.into_iter().peekable(),
        diags,
    };
    if !decoder.skip_to_node() {
        let begin = Pos {
            line: 1,
            column: 1,
            byte: 0,
        };
        let range = decoder.range(begin, begin);
        return (Some(leaf(NodeKind::Object(vec![]), "", Some(range))), decoder.diags);
    }

    let (node, _) = decoder.node("");
    if decoder.diags.has_errors() {
        return (None, decoder.diags);
    }
    (Some(node), decoder.diags)
}

fn to_yaml(node: &Node) -> Yaml {
    match &node.kind {
        NodeKind::Null => Yaml::Null,
        NodeKind::Boolean(b) => Yaml::Boolean(*b),
        NodeKind::Number(n) => match n.as_str().parse::<i64>() {
            Ok(i) => Yaml::Integer(i),
            // Emitted verbatim.
            Err(_) => Yaml::Real(n.as_str().to_string()),
        },
        NodeKind::String(s) => Yaml::String(s.to_string()),
        NodeKind::Array(items) => Yaml::Array(items.iter().map(|n| to_yaml(n)).collect()),
        NodeKind::Object(props) => {
            let mut m = Hash::new();
            for p in props {
                m.insert(to_yaml(&p.key), to_yaml(&p.value));
            }
            Yaml::Hash(m)
        }
    }
}

/// Encodes a syntax tree back into YAML text.
pub fn encode_yaml(node: &Node) -> Result<String> {
    let mut out = String::new();
    YamlEmitter::new(&mut out)
        .dump(&to_yaml(node))
        .map_err(|e| anyhow!("encoding YAML: {e}"))?;
    let body = out.strip_prefix("---\n").unwrap_or(&out);
    Ok(format!("{body}\n"))
}
