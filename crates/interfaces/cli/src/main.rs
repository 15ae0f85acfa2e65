use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use keeper_config::{AppConfig, TelemetryConfig};
use keeper_reconcile::{EXIT_OK, render_pr_body};
use keeper_runtime::SyncRuntime;

#[derive(Debug, Parser)]
#[command(
    name = "keeper",
    version,
    about = "Keeps a file-based AI model catalog in sync with its providers"
)]
struct Cli {
    /// Path to the TOML config.  A missing file means defaults.
    #[arg(long, global = true, default_value = "config/keeper.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover, reconcile and write catalog changes, then open a pull
    /// request when `[github]` is configured.
    Sync {
        /// Compute and report changes without writing anything.
        #[arg(long)]
        dry_run: bool,
        /// Comma-separated provider list; overrides `[sync] providers`.
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
    },
    /// Report pending changes.  Exits 2 when there are any.
    Diff {
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
    },
    /// Print what one provider's sources report, as YAML.
    Discover {
        #[arg(long)]
        provider: String,
    },
    /// Check every stored record against the schema rules.
    Validate,
    /// Regenerate manifest.yaml from the stored catalog.
    Manifest,
}

fn init_tracing(telemetry: &TelemetryConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));

    let (file_layer, guard) = if telemetry.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&telemetry.log_dir, "keeper.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let guard = init_tracing(&config.telemetry);
    debug!(config = %cli.config.display(), catalog = %config.catalog.path, "configuration loaded");

    let code = run(cli.command, &mut config).await?;
    drop(guard);
    std::process::exit(code);
}

async fn run(command: Commands, config: &mut AppConfig) -> Result<i32> {
    match command {
        Commands::Sync { dry_run, providers } => {
            config.sync.dry_run |= dry_run;
            override_providers(config, providers);
            let runtime = SyncRuntime::new(config.clone())?;
            let outcome = runtime.sync().await?;

            print!("{}", render_pr_body(&outcome.report));
            match &outcome.submission {
                Some(sub) => println!("\nOpened {}", sub.pull_request.html_url),
                None if outcome.report.files_written() > 0 && !config.sync.dry_run => {
                    println!("\nChanges left in {}", config.catalog_root().display())
                }
                None => {}
            }
            Ok(outcome.exit_code())
        }
        Commands::Diff { providers } => {
            override_providers(config, providers);
            let runtime = SyncRuntime::new(config.clone())?;
            let report = runtime.diff().await?;
            print!("{}", render_pr_body(&report));
            Ok(report.exit_code(true))
        }
        Commands::Discover { provider } => {
            config.sync.providers = vec![provider.clone()];
            let runtime = SyncRuntime::new(config.clone())?;
            let models = runtime.discover(&provider).await?;
            print!("{}", serde_yaml::to_string(&models)?);
            eprintln!("{} models discovered for {provider}", models.len());
            Ok(EXIT_OK)
        }
        Commands::Validate => {
            let runtime = SyncRuntime::offline(config.clone());
            let report = runtime.validate()?;
            print!("{report}");
            Ok(if report.has_errors() { 1 } else { EXIT_OK })
        }
        Commands::Manifest => {
            let runtime = SyncRuntime::offline(config.clone());
            if runtime.manifest()? {
                println!("manifest.yaml regenerated");
            } else {
                println!("manifest.yaml already current");
            }
            Ok(EXIT_OK)
        }
    }
}

fn override_providers(config: &mut AppConfig, providers: Vec<String>) {
    let providers: Vec<String> = providers
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if !providers.is_empty() {
        config.sync.providers = providers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "keeper",
            "--config",
            "alt.toml",
            "sync",
            "--dry-run",
            "--providers",
            "openai,anthropic",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Commands::Sync { dry_run, providers } => {
                assert!(dry_run);
                assert_eq!(providers, ["openai", "anthropic"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global_and_defaults() {
        let cli = Cli::try_parse_from(["keeper", "validate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/keeper.toml"));
        let cli = Cli::try_parse_from(["keeper", "manifest", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn discover_requires_provider() {
        assert!(Cli::try_parse_from(["keeper", "discover"]).is_err());
    }

    #[test]
    fn provider_override_ignores_blanks() {
        let mut config = AppConfig::default();
        override_providers(&mut config, vec![" ".to_string()]);
        assert_eq!(config.sync.providers, ["openai"]);
        override_providers(&mut config, vec!["anthropic ".to_string()]);
        assert_eq!(config.sync.providers, ["anthropic"]);
    }
}
