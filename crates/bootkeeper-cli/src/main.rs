//! `bootkeeper` CLI: manage a cluster's bootstrap secrets in whichever
//! backend the cluster uses.
//!
//! Command output goes to stdout; logs go to stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use bootkeeper_core::store::LOCAL_SECRET_NAME;
use bootkeeper_core::workflow;
use bootkeeper_core::{Kind, KindResolver, SecretStore, verify};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{CliConfig, load_requirements};

// ── CLI structure ────────────────────────────────────────────────────

/// bootkeeper: cluster bootstrap secrets.
#[derive(Parser)]
#[command(
    name = "bootkeeper",
    version,
    about = "bootkeeper CLI: export, import and verify cluster bootstrap secrets",
    long_about = None,
    after_help = "Environment variables:\n  \
         BOOTKEEPER_NAMESPACE       Namespace of the cluster secret (default: cluster.namespace, then jx)\n  \
         KUBERNETES_API_URL         Kubernetes API server\n  \
         KUBERNETES_TOKEN           Kubernetes API token\n  \
         VAULT_ADDR, VAULT_TOKEN    Vault server and token\n  \
         GOOGLE_OAUTH_ACCESS_TOKEN  Access token for Google Secret Manager\n  \
         BOOTKEEPER_LOG_LEVEL       Log filter when RUST_LOG is unset (default: info)",
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Secret document operations.
    Secrets {
        #[command(subcommand)]
        action: SecretsCommands,
    },
    /// Print the kind of secret store this cluster resolves to.
    Kind {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Subcommand)]
enum SecretsCommands {
    /// Export the secrets as YAML.
    Export {
        /// File to write the secrets to.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Print the secrets to stdout instead of a file.
        #[arg(short, long)]
        console: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Replace the stored secrets with a YAML file.
    Import {
        /// File to read the secrets from.
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Overlay a YAML file onto the stored secrets, keeping entries it
    /// does not mention.
    Merge {
        /// File holding the entries to set.
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Check that every required secret is present.
    Verify {
        /// Verify this file instead of the stored secrets.
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Generate the secrets YAML file from the cluster secret.
    Yaml {
        /// File to write.
        #[arg(short, long, env = "BOOTKEEPER_SECRETS_YAML")]
        out: PathBuf,
        /// Name of the cluster secret.
        #[arg(long, default_value = LOCAL_SECRET_NAME)]
        name: String,
        /// Directory to search (with its ancestors) for jx-requirements.yml.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

/// How to pick the secret store.
#[derive(Args)]
struct StoreArgs {
    /// Secret store kind (local, vault, gsm, fake); decided from the cluster if omitted.
    #[arg(short, long)]
    kind: Option<String>,
    /// Directory to search (with its ancestors) for jx-requirements.yml.
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_env();
    init_tracing(&config.log_level);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(command: Commands, config: &CliConfig) -> Result<()> {
    match command {
        Commands::Kind { store } => cmd_kind(config, &store).await,
        Commands::Secrets { action } => match action {
            SecretsCommands::Export {
                file,
                console,
                store,
            } => cmd_export(config, &store, file.as_deref(), console).await,
            SecretsCommands::Import { file, store } => cmd_import(config, &store, &file).await,
            SecretsCommands::Merge { file, store } => cmd_merge(config, &store, &file).await,
            SecretsCommands::Verify { file, store } => {
                cmd_verify(config, &store, file.as_deref()).await
            }
            SecretsCommands::Yaml { out, name, dir } => cmd_yaml(config, &out, &name, &dir).await,
        },
    }
}

// ── Store resolution ─────────────────────────────────────────────────

fn explicit_kind(args: &StoreArgs) -> Result<Option<Kind>> {
    Ok(args.kind.as_deref().map(str::parse::<Kind>).transpose()?)
}

async fn resolve_store(config: &CliConfig, args: &StoreArgs) -> Result<Box<dyn SecretStore>> {
    let kind = explicit_kind(args)?;
    let requirements = load_requirements(&args.dir)?;
    let clients = config.backend_clients(&requirements)?;
    let store = KindResolver::new(&requirements, clients)
        .with_kind(kind)
        .resolve()
        .await?;
    Ok(store)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read secrets file {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write secrets file {}", path.display()))
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_kind(config: &CliConfig, args: &StoreArgs) -> Result<()> {
    let kind = explicit_kind(args)?;
    let requirements = load_requirements(&args.dir)?;
    let clients = config.backend_clients(&requirements)?;
    let kind = KindResolver::new(&requirements, clients)
        .with_kind(kind)
        .decide_kind()
        .await?;
    println!("{kind}");
    Ok(())
}

async fn cmd_export(
    config: &CliConfig,
    args: &StoreArgs,
    file: Option<&Path>,
    console: bool,
) -> Result<()> {
    if file.is_none() && !console {
        bail!("either --file or --console is required");
    }
    let store = resolve_store(config, args).await?;
    let yaml = workflow::export(store.as_ref())
        .await
        .with_context(|| format!("failed to load secrets from {store}"))?;

    match file {
        Some(path) if !console => {
            write_file(path, &yaml)?;
            tracing::info!(file = %path.display(), "exported secrets");
        }
        _ => print!("{yaml}"),
    }
    Ok(())
}

async fn cmd_import(config: &CliConfig, args: &StoreArgs, file: &Path) -> Result<()> {
    let text = read_file(file)?;
    let store = resolve_store(config, args).await?;
    workflow::import(store.as_ref(), &text)
        .await
        .with_context(|| format!("failed to import {} into {store}", file.display()))?;
    println!("imported secrets into {store}");
    Ok(())
}

async fn cmd_merge(config: &CliConfig, args: &StoreArgs, file: &Path) -> Result<()> {
    let text = read_file(file)?;
    let store = resolve_store(config, args).await?;
    workflow::merge(store.as_ref(), &text)
        .await
        .with_context(|| format!("failed to merge {} into {store}", file.display()))?;
    println!("merged secrets into {store}");
    Ok(())
}

async fn cmd_verify(config: &CliConfig, args: &StoreArgs, file: Option<&Path>) -> Result<()> {
    match file {
        Some(path) => {
            let text = read_file(path)?;
            verify::verify_yaml(&text)
                .with_context(|| format!("secrets file {} is incomplete", path.display()))?;
        }
        None => {
            let store = resolve_store(config, args).await?;
            workflow::verify_store(store.as_ref()).await?;
        }
    }
    println!("secrets are valid");
    Ok(())
}

async fn cmd_yaml(config: &CliConfig, out: &Path, name: &str, dir: &Path) -> Result<()> {
    let requirements = load_requirements(dir)?;
    let clients = config.backend_clients(&requirements)?;
    let Some(cluster) = clients.cluster else {
        bail!("no Kubernetes credentials: set KUBERNETES_TOKEN");
    };
    let yaml =
        workflow::yaml_from_cluster_secret(cluster.as_ref(), &clients.namespace, name).await?;
    write_file(out, &yaml)?;
    println!("generated secrets file {}", out.display());
    Ok(())
}
