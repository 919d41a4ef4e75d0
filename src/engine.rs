// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::crypt::Decrypter;
use crate::diagnostics::Diagnostics;
use crate::environment::Environment;
use crate::eval::evaluate_environment;
use crate::provider::*;

use anyhow::{bail, Result};
use log::info;

/// The environment evaluation engine.
pub struct Engine {
    providers: Box<dyn ProviderLoader>,
    environments: Box<dyn EnvironmentLoader>,
    show_secrets: bool,
    exec_context: ExecContext,
}

impl Engine {
    pub fn new(providers: Box<dyn ProviderLoader>, environments: Box<dyn EnvironmentLoader>) -> Self {
        Self {
            providers,
            environments,
            show_secrets: false,
            exec_context: ExecContext::default(),
        }
    }

    /// Decrypt static secrets when checking environments.
    pub fn set_show_secrets(&mut self, b: bool) {
        self.show_secrets = b;
    }

    /// Values exposed to environments as `${context.*}`.
    pub fn set_exec_context(&mut self, exec_context: ExecContext) {
        self.exec_context = exec_context;
    }

    fn evaluate(
        &self,
        ctx: &Context,
        validating: bool,
        name: &str,
        env: &EnvironmentDecl,
        decrypter: &dyn Decrypter,
    ) -> (Option<Environment>, Diagnostics) {
        evaluate_environment(
            ctx,
            validating,
            self.show_secrets,
            name,
            env,
            decrypter,
            self.providers.as_ref(),
            self.environments.as_ref(),
            &self.exec_context,
        )
    }

    /// Evaluates an environment, opening providers and decrypting secrets.
    pub fn eval_environment(
        &self,
        ctx: &Context,
        name: &str,
        env: &EnvironmentDecl,
        decrypter: &dyn Decrypter,
    ) -> (Option<Environment>, Diagnostics) {
        info!("evaluating environment {name}");
        self.evaluate(ctx, false, name, env, decrypter)
    }

    /// Type-checks an environment. Providers are never opened, and static
    /// secrets stay unknown unless `show_secrets` is set.
    pub fn check_environment(
        &self,
        ctx: &Context,
        name: &str,
        env: &EnvironmentDecl,
        decrypter: &dyn Decrypter,
    ) -> (Option<Environment>, Diagnostics) {
        info!("checking environment {name}");
        self.evaluate(ctx, true, name, env, decrypter)
    }

    /// Parses and evaluates an environment, failing on any error.
    pub fn open_environment(
        &self,
        ctx: &Context,
        name: &str,
        source: &str,
        decrypter: &dyn Decrypter,
    ) -> Result<Environment> {
        let (decl, diags) = load_yaml(name, source);
        let Some(decl) = decl else {
            bail!("{diags}");
        };

        let (env, diags) = self.eval_environment(ctx, name, &decl, decrypter);
        if diags.has_errors() {
            bail!("{diags}");
        }
        Ok(env.unwrap_or_default())
    }

    /// Loads the named environment through the environment loader and opens
    /// it.
    pub fn open(&self, ctx: &Context, name: &str) -> Result<Environment> {
        ctx.check()?;
        let (bytes, decrypter) = self.environments.load_environment(ctx, name)?;
        let source = String::from_utf8(bytes)?;
        self.open_environment(ctx, name, &source, decrypter.as_ref())
    }
}
