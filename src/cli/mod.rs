//! # Command Line Interface
//!
//! Operator commands for resolving references, expanding manifests, managing
//! encrypted values and probing Vault instances. Every command prints JSON on
//! stdout; logs go to stderr.

pub mod output;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::config::ResolverSettings;
use crate::observability::{init_logging, LoggingConfig};
use crate::secrets::{EncryptionBackend, SecretResolver};
use crate::template::{EnvironmentContext, ExpandOptions, TemplateExpander};

#[derive(Parser)]
#[command(name = "manifest-resolver")]
#[command(about = "Resolve secret references and placeholders in deployment manifests")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a single reference, e.g. `vault:primary:apps/db#password`
    Resolve {
        reference: String,
    },

    /// Resolve every string leaf of a JSON document
    ResolveFile {
        file: PathBuf,
    },

    /// Expand `${...}` placeholders in a JSON manifest
    Expand {
        file: PathBuf,

        /// Active environment name
        #[arg(short, long)]
        environment: String,

        /// JSON file with environment definitions; defaults to the manifest's
        /// own `environments` object
        #[arg(long)]
        environments: Option<PathBuf>,

        /// Expand placeholders in map keys as well as values
        #[arg(long)]
        expand_keys: bool,

        /// Fail when any placeholder is left unresolved
        #[arg(long)]
        strict: bool,
    },

    /// Encrypt a value with ENCRYPTION_KEY
    Encrypt {
        plaintext: String,
    },

    /// Decrypt an `encrypted:` token with ENCRYPTION_KEY
    Decrypt {
        token: String,
    },

    /// Encrypt string values of a JSON object
    EncryptFile {
        file: PathBuf,

        /// Only encrypt values under these keys
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },

    /// Decrypt `encrypted:` values of a JSON object
    DecryptFile {
        file: PathBuf,

        /// Only decrypt values under these keys
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },

    /// Generate a random 256-bit key suitable for ENCRYPTION_KEY
    GenerateKey,

    /// Vault instance commands
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
}

#[derive(Subcommand)]
pub enum VaultCommands {
    /// List configured instances
    Instances,

    /// Check the health of every configured instance
    Health,

    /// List secret names under a path
    List {
        instance: String,

        #[arg(default_value = "")]
        path: String,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env()?;
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    init_logging(&logging)?;

    let output = execute(cli.command).await?;
    output::print_json(&output)
}

/// Run one command and return its JSON output
pub async fn execute(command: Commands) -> anyhow::Result<Value> {
    match command {
        Commands::Resolve { reference } => {
            let resolver = build_resolver().await?;
            Ok(resolver.resolve(&reference).await?)
        }
        Commands::ResolveFile { file } => {
            let document = output::read_json_file(&file)?;
            let resolver = build_resolver().await?;
            Ok(resolver.resolve_tree(&document).await?)
        }
        Commands::Expand { file, environment, environments, expand_keys, strict } => {
            expand_manifest(&file, &environment, environments.as_deref(), expand_keys, strict)
        }
        Commands::Encrypt { plaintext } => {
            Ok(Value::String(EncryptionBackend::from_env()?.encrypt(&plaintext)?))
        }
        Commands::Decrypt { token } => {
            Ok(Value::String(EncryptionBackend::from_env()?.decrypt(&token)?))
        }
        Commands::EncryptFile { file, keys } => {
            let document = output::read_json_object(&file)?;
            let backend = EncryptionBackend::from_env()?;
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            Ok(Value::Object(backend.encrypt_dict(&document, key_filter(&keys))?))
        }
        Commands::DecryptFile { file, keys } => {
            let document = output::read_json_object(&file)?;
            let backend = EncryptionBackend::from_env()?;
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            Ok(Value::Object(backend.decrypt_dict(&document, key_filter(&keys))?))
        }
        Commands::GenerateKey => Ok(json!({ "key": EncryptionBackend::generate_key()? })),
        Commands::Vault { command } => handle_vault_command(command).await,
    }
}

async fn handle_vault_command(command: VaultCommands) -> anyhow::Result<Value> {
    let resolver = build_resolver().await?;

    match command {
        VaultCommands::Instances => Ok(json!(resolver.vault_instances().await)),
        VaultCommands::Health => {
            let report = resolver.health_check_all().await;
            for (name, health) in &report {
                if !health.healthy {
                    warn!(instance = %name, error = ?health.error, "Vault instance unhealthy");
                }
            }
            Ok(serde_json::to_value(report)?)
        }
        VaultCommands::List { instance, path } => {
            let client = resolver.vault_client(&instance).await?;
            Ok(json!(client.list_secrets(&path).await?))
        }
    }
}

async fn build_resolver() -> anyhow::Result<SecretResolver> {
    let settings = ResolverSettings::from_env()?;
    SecretResolver::from_settings(&settings).await.context("Failed to initialise secret resolver")
}

fn expand_manifest(
    file: &Path,
    environment: &str,
    environments_file: Option<&Path>,
    expand_keys: bool,
    strict: bool,
) -> anyhow::Result<Value> {
    let manifest = output::read_json_file(file)?;
    let environments = match environments_file {
        Some(path) => output::read_json_object(path)?,
        None => match manifest.get("environments") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => anyhow::bail!("`environments` in {} is not an object", file.display()),
            None => Map::new(),
        },
    };

    let context = EnvironmentContext::new(environment, &environments);
    let expansion = TemplateExpander::new(context)
        .with_options(ExpandOptions { expand_keys })
        .expand(&manifest);

    for unresolved in &expansion.unresolved {
        warn!(
            location = %unresolved.location,
            placeholder = %unresolved.placeholder,
            "Placeholder left unresolved"
        );
    }

    if strict && !expansion.is_complete() {
        let placeholders: Vec<String> = expansion
            .unresolved
            .iter()
            .map(|u| format!("{} at {}", u.placeholder, u.location))
            .collect();
        anyhow::bail!("Unresolved placeholders: {}", placeholders.join(", "));
    }

    Ok(expansion.value)
}

fn key_filter<'a>(keys: &'a [&'a str]) -> Option<&'a [&'a str]> {
    if keys.is_empty() {
        None
    } else {
        Some(keys)
    }
}
