// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod ast;
mod crypt;
mod diagnostics;
mod engine;
mod environment;
mod eval;
mod number;
mod provider;
mod schema;
mod syntax;
mod utils;
mod value;

pub use crypt::{
    decode_ciphertext, decrypt_secrets, encode_ciphertext, encrypt_secrets, Decrypter, Encrypter, EnvelopeError,
};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use engine::Engine;
pub use environment::{
    AccessExpr, Accessor, BuiltinExpr, Environment, EvaluatedExecutionContext, Expr, Interpolation, PropertyAccessor,
};
pub use number::{Number, ParseNumberError};
pub use provider::{Context, ContextError, EnvironmentLoader, ExecContext, Provider, ProviderLoader};
pub use schema::{Schema, SchemaDef, SchemaError, SchemaType};
pub use syntax::{Pos, Range};
pub use value::{Data, Trace, Value};

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::syntax::*;
}
