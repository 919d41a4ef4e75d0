// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::syntax::{NodeRef, Range};
use crate::utils::edit_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single problem found while decoding, parsing or evaluating an
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Diagnostic {
    pub fn error(range: Option<Range>, path: impl Into<String>, summary: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: String::new(),
            range,
            path: path.into(),
        }
    }

    pub fn warning(range: Option<Range>, path: impl Into<String>, summary: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(range, path, summary)
        }
    }

    /// An error located at a syntax node, if there is one.
    pub fn node_error(node: Option<&NodeRef>, summary: impl Into<String>) -> Self {
        match node {
            Some(n) => Diagnostic::error(n.range.clone(), n.path.clone(), summary),
            None => Diagnostic::error(None, "", summary),
        }
    }

    pub fn node_warning(node: Option<&NodeRef>, summary: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::node_error(node, summary)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match (&self.range, self.path.is_empty()) {
            (Some(r), _) if !r.environment.is_empty() && r.begin.line > 0 => write!(
                f,
                "{severity}: {}:{}:{}: {}",
                r.environment, r.begin.line, r.begin.column, self.summary
            )?,
            (_, false) => write!(f, "{severity}: {}: {}", self.path, self.summary)?,
            (_, true) => write!(f, "{severity}: {}", self.summary)?,
        }
        if !self.detail.is_empty() {
            write!(f, "; {}", self.detail)?;
        }
        Ok(())
    }
}

/// An ordered list of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.0.push(d);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(v: Vec<Diagnostic>) -> Self {
        Diagnostics(v)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Message for a field that does not exist on `parent`. Existing fields are
/// suggested closest first.
pub fn non_existent_field_message(
    parent_label: &str,
    fields: &[&str],
    field: &str,
    field_label: &str,
) -> String {
    if fields.is_empty() {
        return format!("{field_label} '{field}' does not exist; {parent_label} has no fields");
    }

    let mut fields = fields.to_vec();
    fields.sort_unstable();
    fields.sort_by_key(|f| edit_distance(f, field));

    let existing = fields
        .iter()
        .map(|f| format!("'{f}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{field_label} '{field}' does not exist on {parent_label} Existing fields are: {existing}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_are_sorted_by_distance() {
        let msg = non_existent_field_message(
            "Object 'environment'",
            &["values", "imports", "description"],
            "valuse",
            "Field",
        );
        assert_eq!(
            msg,
            "Field 'valuse' does not exist on Object 'environment' Existing fields are: 'values', 'imports', 'description'"
        );
    }

    #[test]
    fn display() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error(None, "values.a", "cyclic reference to a"));
        diags.push(Diagnostic::warning(None, "", "careful"));
        assert!(diags.has_errors());
        assert_eq!(
            diags.to_string(),
            "error: values.a: cyclic reference to a\nwarning: careful"
        );
    }
}
