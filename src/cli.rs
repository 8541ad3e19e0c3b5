//! Command-line interface.
//!
//! - `provision` - build a sandbox and print its layout
//! - `run` - build, boot and hold an instance until Ctrl+C

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::address::AddressAllocator;
use crate::config::HarnessConfig;
use crate::constants::CONFIG_FILE;
use crate::instance::AsteriskInstance;
use crate::layout::AstDir;
use crate::sandbox::{FixedRunDirectory, RunDirectory, TempRunDirectory};

#[derive(Parser, Debug)]
#[command(name = "asterisk-fixture", version)]
#[command(about = "Provision and run isolated Asterisk instances for testing")]
pub struct Cli {
    /// Harness configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a sandbox and print its layout without starting the server
    Provision(InstanceArgs),
    /// Build, start and hold an instance until interrupted
    Run(InstanceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    /// Instance identifier; selects `asterisk-<ID>` fixtures
    #[arg(long)]
    pub id: String,

    /// Fixture root holding `asterisk-<ID>/` config trees
    #[arg(long)]
    pub fixtures: PathBuf,

    /// Sandbox root (defaults to a fresh temporary directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Initialize logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("asterisk_fixture=info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Dispatch a parsed command line.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the instance fails.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Provision(args) => provision(&args, config).await,
        Command::Run(args) => run(&args, config).await,
    }
}

fn load_config(path: &Path) -> Result<HarnessConfig> {
    let config = HarnessConfig::load_or_default(path)?;
    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!(config = %path.display(), "{warning}");
    }
    Ok(config)
}

fn new_instance(
    args: &InstanceArgs,
    config: HarnessConfig,
    persist: bool,
) -> Result<AsteriskInstance> {
    let allocator = Arc::new(AddressAllocator::new(config.network.base_address));
    let run_dir: Arc<dyn RunDirectory> = match &args.out {
        Some(out) => Arc::new(FixedRunDirectory::new(&args.id, out, &args.fixtures)),
        None if persist => {
            let root = TempRunDirectory::new(&args.id, &args.fixtures)?.keep();
            Arc::new(FixedRunDirectory::new(&args.id, root, &args.fixtures))
        },
        None => Arc::new(TempRunDirectory::new(&args.id, &args.fixtures)?),
    };
    Ok(AsteriskInstance::new(run_dir, allocator, config))
}

async fn provision(args: &InstanceArgs, config: HarnessConfig) -> Result<()> {
    let mut instance = new_instance(args, config, true)?;
    instance
        .build()
        .await
        .with_context(|| format!("Failed to provision instance '{}'", args.id))?;

    print_layout(&instance);
    Ok(())
}

async fn run(args: &InstanceArgs, config: HarnessConfig) -> Result<()> {
    let mut instance = new_instance(args, config, false)?;
    instance
        .build()
        .await
        .with_context(|| format!("Failed to provision instance '{}'", args.id))?;

    if let Err(e) = instance.start().await {
        // A failed AMI connect leaves the server up.
        if let Err(stop_err) = instance.stop().await {
            warn!(error = %stop_err, "Failed to stop instance after start failure");
        }
        return Err(e).with_context(|| format!("Failed to start instance '{}'", args.id));
    }
    print_layout(&instance);

    info!(instance = %instance.id(), "Running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    instance.stop().await.context("Failed to stop instance")?;
    instance
        .check_stopped()
        .await
        .context("Reference leak check failed")?;
    Ok(())
}

fn print_layout(instance: &AsteriskInstance) {
    println!("instance: {}", instance.id());
    if let Some(address) = instance.server_address() {
        println!("address:  {address}");
    }
    println!("config:   {}", instance.asterisk_conf().display());
    for role in AstDir::ALL {
        println!("  {:<14} {}", role.key(), instance.astdir(role, &[]).display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "asterisk-fixture",
            "provision",
            "--id",
            "1",
            "--fixtures",
            "tests/fixtures",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
        assert!(!cli.log_json);
        let Command::Provision(args) = cli.command else {
            panic!("expected provision");
        };
        assert_eq!(args.id, "1");
        assert!(args.out.is_none());
    }

    #[test]
    fn test_parse_run_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "asterisk-fixture",
            "run",
            "--id",
            "a",
            "--fixtures",
            "f",
            "--out",
            "/tmp/sandbox",
            "--log-json",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(cli.command, Command::Run(ref a) if a.out.as_deref() == Some(Path::new("/tmp/sandbox"))));
    }

    #[test]
    fn test_id_is_required() {
        assert!(Cli::try_parse_from(["asterisk-fixture", "run", "--fixtures", "f"]).is_err());
    }
}
