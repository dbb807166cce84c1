use clap::Parser;
use tracing_subscriber::EnvFilter;

use kluster::cli::{Cli, Command};
use kluster::commands::{self, StartOptions};
use kluster::config::{self, Environment, Overrides};
use kluster::error::KlusterError;
use kluster::multipass::{LaunchSpec, Multipass};
use kluster::progress::OutputMode;
use kluster::release::GithubReleases;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(cli.verbose.as_deref())?)
        .init();

    let settings = config::load_optional(cli.config.as_deref())?.resolve(
        &Overrides {
            kubeconfig: cli.kubeconfig,
            release_cache: cli.release_cache,
            cache_expiry: cli.cache_expiry,
        },
        &Environment::from_process(),
    )?;
    tracing::debug!(?settings, "resolved settings");

    let host = Multipass::new(settings.multipass.clone(), settings.with_sudo);
    let releases = GithubReleases::default();

    match cli.command {
        Command::Start {
            profile,
            memory,
            cpus,
            disk_size,
            k3s_version,
            k3s_server_flags,
            with_kube_config,
        } => {
            let opts = StartOptions {
                launch: LaunchSpec {
                    name: profile,
                    memory,
                    cpus,
                    disk_size,
                },
                k3s_version,
                server_flags: k3s_server_flags,
                with_kube_config,
            };
            commands::start(&host, &releases, &settings, &opts, OutputMode::detect()).await?;
        }
        Command::Destroy {
            profile,
            remove_from_kube_context,
        } => {
            commands::destroy(&host, &settings, &profile, remove_from_kube_context).await?;
        }
        Command::Kubeconfig { profile, to_file } => {
            let target = to_file.unwrap_or_else(|| settings.kubeconfig.clone());
            commands::write_kubeconfig(&host, &target, &profile).await?;
        }
        Command::Versions { refresh } => {
            commands::versions(&releases, &settings, refresh).await?;
        }
    }

    Ok(())
}

/// `-v <level>` wins; otherwise `RUST_LOG`, falling back to warnings only.
fn log_filter(verbose: Option<&str>) -> Result<EnvFilter, KlusterError> {
    match verbose {
        Some(level) => {
            level
                .parse::<tracing::Level>()
                .map_err(|_| KlusterError::Validation {
                    message: format!(
                        "invalid log level '{level}' (use error, warn, info, debug or trace)"
                    ),
                })?;
            Ok(EnvFilter::new(format!("kluster={}", level.to_ascii_lowercase())))
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kluster=warn"))),
    }
}
