use std::path::{Path, PathBuf};

/// First entry of `$KUBECONFIG`, if set and non-empty.
pub fn kubeconfig_env() -> Option<PathBuf> {
    kubeconfig_from_env(std::env::var_os("KUBECONFIG").as_deref())
}

/// `~/.kube/config`
pub fn home_kubeconfig() -> PathBuf {
    home_dir().join(".kube").join("config")
}

fn kubeconfig_from_env(value: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    value
        .and_then(|v| std::env::split_paths(v).next())
        .filter(|first| !first.as_os_str().is_empty())
}

/// k3s release cache: `~/.cache/kluster/k3s-releases`
pub fn release_cache_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("kluster")
        .join("k3s-releases")
}

/// Optional settings file: `~/.config/kluster/config.toml`
pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_dir().join(".config"))
        .join("kluster")
        .join("config.toml")
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => Path::new(path).to_path_buf(),
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}
