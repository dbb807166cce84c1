use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::error::KlusterError;
use crate::paths;
use crate::release::DEFAULT_EXPIRY;
use crate::util::parse_duration;

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct Settings {
    pub kubeconfig: Option<String>,
    pub release_cache: Option<String>,
    pub cache_expiry: Option<String>,
    pub multipass: Option<String>,
    pub with_sudo: Option<bool>,
    #[facet(default)]
    pub ssh_authorized_keys: Vec<String>,
}

/// Values given on the command line; these win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub kubeconfig: Option<PathBuf>,
    pub release_cache: Option<PathBuf>,
    pub cache_expiry: Option<String>,
}

/// The parts of the process environment that feed into settings.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub kubeconfig: Option<PathBuf>,
    pub with_sudo: bool,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            kubeconfig: paths::kubeconfig_env(),
            with_sudo: std::env::var_os("KLUSTER_WITH_SUDO").is_some_and(|v| !v.is_empty()),
        }
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    pub kubeconfig: PathBuf,
    pub release_cache: PathBuf,
    pub cache_expiry: Duration,
    pub multipass: String,
    pub with_sudo: bool,
    pub ssh_authorized_keys: Vec<String>,
}

pub fn load_settings(path: &Path) -> Result<Settings, KlusterError> {
    let contents = std::fs::read_to_string(path).map_err(|source| KlusterError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    facet_toml::from_str(&contents).map_err(|e| KlusterError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load an explicit config file, or the default one if it exists.
///
/// A missing default file yields empty settings; a missing explicit file
/// is an error.
pub fn load_optional(explicit: Option<&Path>) -> Result<Settings, KlusterError> {
    if let Some(path) = explicit {
        return load_settings(path);
    }
    let path = paths::config_file();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Settings::default());
    }
    load_settings(&path)
}

impl Settings {
    /// Apply precedence: command line, then environment, then this file,
    /// then built-in defaults.
    pub fn resolve(
        &self,
        overrides: &Overrides,
        env: &Environment,
    ) -> Result<ResolvedSettings, KlusterError> {
        let kubeconfig = overrides
            .kubeconfig
            .clone()
            .or_else(|| env.kubeconfig.clone())
            .or_else(|| self.kubeconfig.as_deref().map(paths::expand_home))
            .unwrap_or_else(paths::home_kubeconfig);

        let release_cache = overrides
            .release_cache
            .clone()
            .or_else(|| self.release_cache.as_deref().map(paths::expand_home))
            .unwrap_or_else(paths::release_cache_file);

        let cache_expiry = match overrides
            .cache_expiry
            .as_deref()
            .or(self.cache_expiry.as_deref())
        {
            Some(s) => parse_duration(s)?,
            None => DEFAULT_EXPIRY,
        };

        Ok(ResolvedSettings {
            kubeconfig,
            release_cache,
            cache_expiry,
            multipass: self
                .multipass
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "multipass".into()),
            with_sudo: env.with_sudo || self.with_sudo.unwrap_or(false),
            ssh_authorized_keys: self.ssh_authorized_keys.clone(),
        })
    }
}
