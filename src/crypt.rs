// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Secrets at rest.
//!
//! Ciphertexts are stored as base64 of a small envelope:
//!
//! ```text
//!   0      4      8                      N-4         N
//!   +------+------+----------------------+-----------+
//!   |"escx"| ver=1|       ciphertext     |  crc32    |
//!   +------+------+----------------------+-----------+
//! ```
//!
//! The version and checksum are big-endian. The checksum (crc32/IEEE) covers
//! every byte before it.

use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use data_encoding::BASE64;

use crate::provider::Context;
use crate::syntax::yaml::{decode_yaml, encode_yaml};
use crate::syntax::{walk, Node, NodeKind, NodeRef, ObjectProperty};

const MAGIC: &[u8; 4] = b"escx";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;
const MIN_LEN: usize = 16;

pub trait Encrypter {
    fn encrypt(&self, ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>>;
}

pub trait Decrypter {
    fn decrypt(&self, ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("{0}")]
    Base64(#[from] data_encoding::DecodeError),
    #[error("EOF")]
    Eof,
    #[error("invalid header")]
    InvalidHeader,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("unsupported version")]
    UnsupportedVersion,
}

/// Wraps a ciphertext in an envelope.
///
/// Envelopes shorter than 16 bytes are rejected when decoding, so
/// ciphertexts shorter than four bytes do not survive the round trip.
pub fn encode_ciphertext(ciphertext: &[u8]) -> String {
    let mut envelope = Vec::with_capacity(HEADER_LEN + ciphertext.len() + 4);
    envelope.extend_from_slice(MAGIC);
    envelope.extend_from_slice(&VERSION.to_be_bytes());
    envelope.extend_from_slice(ciphertext);
    let checksum = crc32fast::hash(&envelope);
    envelope.extend_from_slice(&checksum.to_be_bytes());
    BASE64.encode(&envelope)
}

/// Unwraps an envelope produced by [`encode_ciphertext`].
pub fn decode_ciphertext(text: &str) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = BASE64.decode(text.as_bytes())?;
    if envelope.len() < MIN_LEN {
        return Err(EnvelopeError::Eof);
    }
    if &envelope[..4] != MAGIC {
        return Err(EnvelopeError::InvalidHeader);
    }

    let (body, checksum) = envelope.split_at(envelope.len() - 4);
    if crc32fast::hash(body).to_be_bytes() != checksum {
        return Err(EnvelopeError::InvalidChecksum);
    }
    if body[4..HEADER_LEN] != VERSION.to_be_bytes() {
        return Err(EnvelopeError::UnsupportedVersion);
    }
    Ok(body[HEADER_LEN..].to_vec())
}

// The argument of a `fn::secret` call, if `node` is one.
fn secret_arg(node: &Node) -> Option<&NodeRef> {
    match &node.kind {
        NodeKind::Object(props) => match props.as_slice() {
            [p] if p.key.as_str() == Some("fn::secret") => Some(&p.value),
            _ => None,
        },
        _ => None,
    }
}

fn ciphertext_of(arg: &Node) -> Option<&str> {
    match &arg.kind {
        NodeKind::Object(props) => match props.as_slice() {
            [p] if p.key.as_str() == Some("ciphertext") => p.value.as_str(),
            _ => None,
        },
        _ => None,
    }
}

fn with_arg(call: &NodeRef, arg: NodeRef) -> NodeRef {
    let NodeKind::Object(props) = &call.kind else {
        return call.clone();
    };
    let props = props
        .iter()
        .map(|p| ObjectProperty {
            key: p.key.clone(),
            value: arg.clone(),
        })
        .collect();
    Rc::new(Node {
        kind: NodeKind::Object(props),
        path: call.path.clone(),
        range: call.range.clone(),
    })
}

fn rewrite<F>(filename: &str, source: &str, mut f: F) -> Result<String>
where
    F: FnMut(&NodeRef) -> Result<Option<NodeRef>>,
{
    let (node, diags) = decode_yaml(filename, source);
    let Some(node) = node else {
        bail!("{diags}");
    };

    let rewritten = walk(&node, &mut |n| {
        let Some(arg) = secret_arg(&n) else {
            return Ok(n);
        };
        Ok(match f(arg)? {
            Some(arg) => with_arg(&n, arg),
            None => n,
        })
    })?;
    encode_yaml(&rewritten)
}

/// Replaces every `fn::secret: <plaintext>` in a YAML document with
/// `fn::secret: {ciphertext: <envelope>}`.
pub fn encrypt_secrets(
    ctx: &Context,
    filename: &str,
    source: &str,
    encrypter: &dyn Encrypter,
) -> Result<String> {
    rewrite(filename, source, |arg| {
        let Some(plaintext) = arg.as_str() else {
            return Ok(None);
        };
        ctx.check()?;
        let ciphertext = encrypter.encrypt(ctx, plaintext.as_bytes())?;
        let path = format!("{}.ciphertext", arg.path);
        let envelope = Node::new(NodeKind::String(encode_ciphertext(&ciphertext).into()), path.clone());
        Ok(Some(Node::new(
            NodeKind::Object(vec![ObjectProperty {
                key: Node::new(NodeKind::String("ciphertext".into()), path),
                value: envelope,
            }]),
            arg.path.clone(),
        )))
    })
}

/// Replaces every `fn::secret: {ciphertext: <envelope>}` in a YAML document
/// with the decrypted plaintext.
pub fn decrypt_secrets(
    ctx: &Context,
    filename: &str,
    source: &str,
    decrypter: &dyn Decrypter,
) -> Result<String> {
    rewrite(filename, source, |arg| {
        let Some(text) = ciphertext_of(arg) else {
            return Ok(None);
        };
        let ciphertext = decode_ciphertext(text).map_err(|e| anyhow!("invalid ciphertext: {e}"))?;
        ctx.check()?;
        let plaintext = decrypter.decrypt(ctx, &ciphertext)?;
        let plaintext = String::from_utf8(plaintext)?;
        Ok(Some(Node::new(NodeKind::String(plaintext.into()), arg.path.clone())))
    })
}
