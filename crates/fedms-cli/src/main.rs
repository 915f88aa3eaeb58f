//! fedms command-line tool
//!
//! Bootstraps attested key bundles, publishes trust specifications into a
//! filesystem statement store and evaluates published statements.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use fedms_core::{
    store, ChainEvaluator, FsStatementStore, KeyBundle, KeyBundleFactory, KeyDefinition, KeyJar,
    Operator, StatementBuilder, TrustSpec,
};

use config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "fedms", version, about = "Federation metadata statements")]
struct Cli {
    /// Directory of persisted key bundles [env: FEDMS_KEY_DIR]
    #[arg(long, global = true)]
    key_dir: Option<PathBuf>,

    /// Directory of the statement store [env: FEDMS_STORE_DIR]
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Prefix of published statement URIs [env: FEDMS_URI_BASE]
    #[arg(long, global = true)]
    uri_base: Option<String>,

    /// Issuer attesting generated bundles [env: FEDMS_AUTHORITY]
    #[arg(long, global = true)]
    authority: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate and persist attested key bundles
    Keys {
        #[arg(long = "issuer", required = true)]
        issuers: Vec<String>,

        /// Key definitions as JSON, e.g. '[{"type": "EC", "crv": "P-256"}]'
        #[arg(long)]
        defs: Option<String>,
    },
    /// Sign every trust path of a specification file
    Build {
        spec: PathBuf,

        /// Print nested tokens instead of publishing to the store
        #[arg(long)]
        inline: bool,
    },
    /// Verify a published statement and print its trust paths
    Evaluate { uri: String },
}

impl Cli {
    fn config(&self) -> CliConfig {
        let mut config = CliConfig::from_env();
        if let Some(dir) = &self.key_dir {
            config.key_dir = dir.clone();
        }
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(base) = &self.uri_base {
            config.uri_base = base.trim_end_matches('/').to_string();
        }
        if let Some(authority) = &self.authority {
            config.authority = authority.clone();
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    // Logs go to stderr; stdout carries the JSON output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let output = match cli.command {
        Command::Keys { issuers, defs } => keys(&config, &issuers, defs.as_deref())?,
        Command::Build { spec, inline } => build(&config, &spec, inline)?,
        Command::Evaluate { uri } => evaluate(&config, &uri)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Load the authority's bundle, generating and persisting it on first use
fn authority(config: &CliConfig) -> Result<Operator> {
    let path = KeyBundleFactory::bundle_path(&config.key_dir, &config.authority);
    let bundle = if path.exists() {
        KeyBundleFactory::load(&config.key_dir, &config.authority)
            .with_context(|| format!("Failed to load authority keys from {}", path.display()))?
    } else {
        std::fs::create_dir_all(&config.key_dir)
            .with_context(|| format!("Failed to create {}", config.key_dir.display()))?;
        let bundle = KeyBundle::generate(config.authority.as_str(), &KeyDefinition::defaults())?;
        KeyBundleFactory::persist(&config.key_dir, &bundle)?;
        info!(authority = %config.authority, "Generated authority keys");
        bundle
    };
    Ok(Operator::new(bundle))
}

/// Operators for every attested bundle, plus the authority trusting them all
fn federation(config: &CliConfig) -> Result<(Operator, BTreeMap<String, Operator>)> {
    let authority = authority(config)?;
    let jar = Arc::new(KeyJar::new());
    let mut bundles = Vec::new();

    for (issuer, bundle) in KeyBundleFactory::load_all(&config.key_dir)? {
        if issuer == authority.issuer() {
            continue;
        }
        let Some(attestation) = bundle.attestation() else {
            warn!(issuer = %issuer, "Skipping key bundle without attestation");
            continue;
        };
        let (subject, jwks) = authority
            .verify_attestation(attestation, authority.issuer())
            .with_context(|| format!("Attestation of {} does not verify", issuer))?;
        if subject != issuer {
            bail!("Attestation stored for {} names {}", issuer, subject);
        }
        jar.register(subject, &jwks);
        bundles.push(bundle);
    }

    let operators = bundles
        .into_iter()
        .map(|b| (b.issuer().to_string(), Operator::new(b).with_trusted(jar.clone())))
        .collect();
    Ok((authority.with_trusted(jar), operators))
}

fn keys(config: &CliConfig, issuers: &[String], defs: Option<&str>) -> Result<serde_json::Value> {
    if issuers.iter().any(|iss| *iss == config.authority) {
        bail!("{} is the attesting authority", config.authority);
    }
    let definitions: Vec<KeyDefinition> = match defs {
        Some(json) => serde_json::from_str(json).context("Invalid key definitions")?,
        None => KeyDefinition::defaults(),
    };

    let authority = authority(config)?;
    let bundles = KeyBundleFactory::new(&authority, definitions)
        .build_persisted(issuers, &config.key_dir)?;

    let kids: BTreeMap<&str, Vec<&str>> = bundles
        .iter()
        .map(|(iss, bundle)| (iss.as_str(), bundle.keys().iter().map(|k| k.kid()).collect()))
        .collect();
    Ok(serde_json::to_value(kids)?)
}

fn build(config: &CliConfig, spec_path: &Path, inline: bool) -> Result<serde_json::Value> {
    let raw = std::fs::read(spec_path)
        .with_context(|| format!("Failed to read {}", spec_path.display()))?;
    let spec: TrustSpec = serde_json::from_slice(&raw).context("Invalid trust specification")?;

    let (_, operators) = federation(config)?;
    let builder = StatementBuilder::new(&operators);
    let statements = if inline {
        builder.build(&spec)?
    } else {
        let store = FsStatementStore::open(config.store_dir.clone())?;
        builder.build_with_references(&spec, &store, &config.uri_base)?
    };
    Ok(serde_json::to_value(statements)?)
}

fn evaluate(config: &CliConfig, uri: &str) -> Result<serde_json::Value> {
    let (verifier, _) = federation(config)?;
    let store = FsStatementStore::open(config.store_dir.clone())?;

    let token = store::resolve(&store, &config.uri_base, uri)
        .with_context(|| format!("Failed to resolve {}", uri))?;
    let (signer, top) = verifier.verify_nested(&token)?;
    let results = ChainEvaluator::new(&verifier)
        .with_store(&store, config.uri_base.as_str())
        .evaluate(&top)?;

    info!(signer = %signer, paths = results.len(), "Evaluated statement");
    Ok(serde_json::json!({ "signer": signer, "paths": results }))
}
