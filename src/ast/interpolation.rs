// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::property::{parse_property_access, PropertyAccess};
use crate::diagnostics::Diagnostics;
use crate::syntax::NodeRef;

/// A run of literal text optionally followed by a property access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolation {
    pub text: String,
    pub value: Option<PropertyAccess>,
}

/// Splits a string into literal text and `${...}` accesses. `$$` is a
/// literal `$`. Returns no parts if any access fails to parse.
pub fn parse_interpolation(node: Option<&NodeRef>, s: &str) -> (Vec<Interpolation>, Diagnostics) {
    let mut parts = vec![];
    let mut diags = Diagnostics::new();
    let mut text = String::new();
    let mut rest = s;

    while let Some(idx) = rest.find('$') {
        text.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];

        if let Some(r) = rest.strip_prefix('$') {
            text.push('$');
            rest = r;
        } else if let Some(r) = rest.strip_prefix('{') {
            let (consumed, access, d) = parse_property_access(node, r);
            diags.extend(d);
            parts.push(Interpolation {
                text: std::mem::take(&mut text),
                value: Some(access),
            });
            rest = &r[consumed..];
        } else {
            text.push('$');
        }
    }
    text.push_str(rest);

    if !text.is_empty() || parts.is_empty() {
        parts.push(Interpolation { text, value: None });
    }

    if diags.has_errors() {
        return (vec![], diags);
    }
    (parts, diags)
}
