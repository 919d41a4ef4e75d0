// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::crypt::Decrypter;
use crate::schema::Schema;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("forbidden context key: {0:?}")]
    ForbiddenKey(String),
}

/// A cancellation token shared between the caller and an evaluation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails once the context has been cancelled.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        Ok(())
    }
}

/// A dynamic source of values, invoked by `fn::open`.
pub trait Provider {
    /// The schemas of the provider's inputs and outputs.
    fn schema(&self) -> (Schema, Schema);

    /// Produces a value from the given inputs.
    fn open(&self, ctx: &Context, inputs: &BTreeMap<String, Value>) -> Result<Value>;
}

pub trait ProviderLoader {
    fn load_provider(&self, ctx: &Context, name: &str) -> Result<Box<dyn Provider>>;
}

pub trait EnvironmentLoader {
    /// Returns the source of the named environment and the decrypter for its
    /// ciphertexts.
    fn load_environment(&self, ctx: &Context, name: &str) -> Result<(Vec<u8>, Box<dyn Decrypter>)>;
}

const CURRENT_ENVIRONMENT: &str = "currentEnvironment";
const ROOT_ENVIRONMENT: &str = "rootEnvironment";

/// Values exposed to environments as `${context.*}`.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    values: BTreeMap<String, Value>,
    current_environment: String,
    root_environment: String,
}

impl ExecContext {
    pub fn new(values: BTreeMap<String, Value>) -> Result<ExecContext, ContextError> {
        for key in [CURRENT_ENVIRONMENT, ROOT_ENVIRONMENT] {
            if values.contains_key(key) {
                return Err(ContextError::ForbiddenKey(key.to_string()));
            }
        }
        Ok(ExecContext {
            values,
            ..ExecContext::default()
        })
    }

    /// The context as seen from the named environment. The first environment
    /// a context is specialized for becomes the root.
    pub fn for_environment(&self, name: &str) -> ExecContext {
        let mut ctx = self.clone();
        if ctx.root_environment.is_empty() {
            ctx.root_environment = name.to_string();
        }
        ctx.current_environment = name.to_string();
        ctx
    }

    pub fn values(&self) -> BTreeMap<String, Value> {
        let mut values = self.values.clone();
        let named = |name: &str| Value::from(BTreeMap::from([("name".to_string(), Value::from(name))]));
        if !self.current_environment.is_empty() {
            values.insert(CURRENT_ENVIRONMENT.to_string(), named(&self.current_environment));
        }
        if !self.root_environment.is_empty() {
            values.insert(ROOT_ENVIRONMENT.to_string(), named(&self.root_environment));
        }
        values
    }
}
