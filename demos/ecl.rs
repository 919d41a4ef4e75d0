// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use ecl::unstable::load_yaml;
use ecl::*;

// Demo "encryption": flips the high bit of every byte.
struct Xor;

impl Encrypter for Xor {
    fn encrypt(&self, _ctx: &Context, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ 0x80).collect())
    }
}

impl Decrypter for Xor {
    fn decrypt(&self, _ctx: &Context, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.iter().map(|b| b ^ 0x80).collect())
    }
}

/// Environments stored as `<dir>/<name>.yaml`.
struct Directory(PathBuf);

impl EnvironmentLoader for Directory {
    fn load_environment(&self, _ctx: &Context, name: &str) -> Result<(Vec<u8>, Box<dyn Decrypter>)> {
        let path = self.0.join(format!("{name}.yaml"));
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok((bytes, Box::new(Xor)))
    }
}

struct NoProviders;

impl ProviderLoader for NoProviders {
    fn load_provider(&self, _ctx: &Context, name: &str) -> Result<Box<dyn Provider>> {
        bail!("unknown provider {name}")
    }
}

fn ecl_eval(dir: PathBuf, name: &str, check: bool, show_secrets: bool, json: bool) -> Result<()> {
    let ctx = Context::new();
    let loader = Directory(dir);
    let (bytes, decrypter) = loader.load_environment(&ctx, name)?;
    let source = String::from_utf8(bytes)?;

    let (decl, diags) = load_yaml(name, &source);
    let Some(decl) = decl else {
        bail!("{diags}");
    };
    for d in diags.iter() {
        eprintln!("{d}");
    }

    let mut engine = Engine::new(Box::new(NoProviders), Box::new(loader));
    engine.set_show_secrets(show_secrets);
    let (env, diags) = match check {
        true => engine.check_environment(&ctx, name, &decl, decrypter.as_ref()),
        false => engine.eval_environment(&ctx, name, &decl, decrypter.as_ref()),
    };
    for d in diags.iter() {
        eprintln!("{d}");
    }

    let env = env.unwrap_or_default();
    if json {
        println!("{}", serde_json::to_string_pretty(&env)?);
    } else {
        let properties: serde_json::Map<String, serde_json::Value> = env
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json(!show_secrets)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&properties)?);
    }

    if diags.has_errors() {
        bail!("{name} has errors");
    }
    Ok(())
}

fn ecl_rewrite(file: String, encrypt: bool) -> Result<()> {
    let ctx = Context::new();
    let source = std::fs::read_to_string(&file).with_context(|| format!("Failed to read {file}"))?;
    let rewritten = match encrypt {
        true => encrypt_secrets(&ctx, &file, &source, &Xor)?,
        false => decrypt_secrets(&ctx, &file, &source, &Xor)?,
    };
    print!("{rewritten}");
    Ok(())
}

#[derive(Subcommand)]
enum EclCommand {
    /// Evaluate an environment.
    Eval {
        /// Environment name, relative to the environment directory.
        name: String,

        /// Print secrets in plaintext.
        #[arg(long, short)]
        show_secrets: bool,

        /// Print the whole evaluated environment as JSON.
        #[arg(long, short)]
        json: bool,
    },

    /// Type-check an environment without decrypting its secrets.
    Check {
        /// Environment name, relative to the environment directory.
        name: String,

        /// Decrypt static secrets anyway.
        #[arg(long, short)]
        show_secrets: bool,

        /// Print the whole checked environment as JSON.
        #[arg(long, short)]
        json: bool,
    },

    /// Encrypt the plaintext secrets of an environment file.
    Encrypt {
        /// Environment file.
        file: String,
    },

    /// Decrypt the secrets of an environment file.
    Decrypt {
        /// Environment file.
        file: String,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the environments.
    #[arg(long, short, default_value = ".", value_name = "dir")]
    dir: PathBuf,

    #[command(subcommand)]
    command: EclCommand,
}

fn main() -> Result<()> {
    env_logger::init();

    // Parse and dispatch command.
    let cli = Cli::parse();
    match cli.command {
        EclCommand::Eval {
            name,
            show_secrets,
            json,
        } => ecl_eval(cli.dir, &name, false, show_secrets, json),
        EclCommand::Check {
            name,
            show_secrets,
            json,
        } => ecl_eval(cli.dir, &name, true, show_secrets, json),
        EclCommand::Encrypt { file } => ecl_rewrite(file, true),
        EclCommand::Decrypt { file } => ecl_rewrite(file, false),
    }
}
