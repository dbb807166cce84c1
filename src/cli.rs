use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kluster",
    version,
    about = "Single-node k3s clusters on multipass, synced into your kubeconfig"
)]
pub struct Cli {
    /// Path to config file (default: <config dir>/kluster/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Kubeconfig to sync into (default: $KUBECONFIG, else ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// k3s release cache file
    #[arg(long, global = true)]
    pub release_cache: Option<PathBuf>,

    /// How long the release cache stays fresh, e.g. 24h, 30m
    #[arg(long, global = true)]
    pub cache_expiry: Option<String>,

    /// Log level: error, warn, info, debug, trace
    #[arg(short, long, global = true)]
    pub verbose: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a k3s VM and merge its kubeconfig
    Start {
        /// Kluster name
        #[arg(short, long, default_value = "cluster1")]
        profile: String,

        /// VM memory
        #[arg(short, long, default_value = "4g")]
        memory: String,

        /// VM CPU count
        #[arg(short, long, default_value_t = 2)]
        cpus: u32,

        /// VM disk size
        #[arg(short, long, default_value = "40g")]
        disk_size: String,

        /// k3s release to install (default: newest known release)
        #[arg(short, long)]
        k3s_version: Option<String>,

        /// Extra k3s server flags, repeatable
        #[arg(short = 's', long, allow_hyphen_values = true)]
        k3s_server_flags: Vec<String>,

        /// Merge the kluster's kubeconfig once it is up
        #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
        with_kube_config: bool,
    },

    /// Delete a k3s VM
    Destroy {
        /// Kluster name
        #[arg(short, long)]
        profile: String,

        /// Also remove the kluster's entries from the kubeconfig
        #[arg(short, long)]
        remove_from_kube_context: bool,
    },

    /// Merge a running kluster's kubeconfig
    Kubeconfig {
        /// Kluster name
        #[arg(short, long, default_value = "cluster1")]
        profile: String,

        /// Kubeconfig to write to instead of the default one
        #[arg(short = 'f', long)]
        to_file: Option<PathBuf>,
    },

    /// List known k3s releases, newest first
    Versions {
        /// Ignore the cache and query the releases endpoint
        #[arg(long)]
        refresh: bool,
    },
}
