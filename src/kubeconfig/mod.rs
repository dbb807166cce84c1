//! Typed kubeconfig document.
//!
//! Only the fields kluster edits are modelled explicitly; everything else
//! (certificate data, auth providers, unknown top-level keys) rides along in
//! `extra` maps and is written back untouched.

pub mod sync;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

pub use sync::{KubeconfigFile, MergeOutcome};

/// Name k3s gives its cluster, user and context in `/etc/rancher/k3s/k3s.yaml`.
pub const PLACEHOLDER_NAME: &str = "default";

/// API server address k3s writes into its own kubeconfig.
pub const PLACEHOLDER_SERVER: &str = "https://127.0.0.1:6443";

pub fn server_url(ip: &str) -> String {
    format!("https://{ip}:6443")
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context", default, deserialize_with = "null_as_default")]
    pub current_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferences: Preferences,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<NamedUser>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extensions: Vec<NamedExtension>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedExtension {
    pub name: String,
    #[serde(default)]
    pub extension: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub extensions: Vec<NamedExtension>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A list entry addressed by its `name` field.
pub trait Named {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: &str);
}

macro_rules! impl_named {
    ($($ty:ty),+) => {
        $(impl Named for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: &str) {
                self.name = name.to_string();
            }
        })+
    };
}

impl_named!(NamedCluster, NamedContext, NamedUser, NamedExtension);

/// Replace same-named entries, append the rest.
fn upsert<T: Named>(entries: &mut Vec<T>, incoming: Vec<T>) {
    for entry in incoming {
        match entries.iter_mut().find(|e| e.name() == entry.name()) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
}

fn remove_by_name<T: Named>(entries: &mut Vec<T>, name: &str) -> usize {
    let before = entries.len();
    entries.retain(|e| e.name() != name);
    before - entries.len()
}

/// Rename placeholder entries to `name`, evicting stale entries that
/// already carry it.
fn rename_placeholders<T: Named>(entries: &mut Vec<T>, name: &str) -> bool {
    if name == PLACEHOLDER_NAME || !entries.iter().any(|e| e.name() == PLACEHOLDER_NAME) {
        return false;
    }
    entries.retain(|e| e.name() != name);
    for entry in entries.iter_mut().filter(|e| e.name() == PLACEHOLDER_NAME) {
        entry.set_name(name);
    }
    true
}

fn names<T: Named>(entries: &[T]) -> Vec<&str> {
    entries.iter().map(Named::name).collect()
}

/// Entries dropped by [`Kubeconfig::remove_named`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removed {
    pub clusters: usize,
    pub contexts: usize,
    pub users: usize,
    pub extensions: usize,
}

impl Removed {
    pub fn total(&self) -> usize {
        self.clusters + self.contexts + self.users + self.extensions
    }
}

impl Kubeconfig {
    /// Parse kubeconfig YAML. Blank input yields an empty document.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn cluster_names(&self) -> Vec<&str> {
        names(&self.clusters)
    }

    pub fn context_names(&self) -> Vec<&str> {
        names(&self.contexts)
    }

    pub fn user_names(&self) -> Vec<&str> {
        names(&self.users)
    }

    pub fn has_cluster(&self, name: &str) -> bool {
        self.clusters.iter().any(|c| c.name == name)
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Union `fragment` into this document; the fragment wins on conflict.
    pub fn merge_from(&mut self, fragment: Kubeconfig) {
        let Kubeconfig {
            api_version,
            clusters,
            contexts,
            current_context,
            kind,
            preferences,
            users,
            extensions,
            extra,
        } = fragment;

        if api_version.is_some() {
            self.api_version = api_version;
        }
        if kind.is_some() {
            self.kind = kind;
        }
        if !current_context.is_empty() {
            self.current_context = current_context;
        }
        upsert(&mut self.clusters, clusters);
        upsert(&mut self.contexts, contexts);
        upsert(&mut self.users, users);
        upsert(&mut self.extensions, extensions);
        upsert(&mut self.preferences.extensions, preferences.extensions);
        self.preferences.extra.extend(preferences.extra);
        self.extra.extend(extra);
    }

    /// Give the k3s placeholder entries their real cluster name and point
    /// the placeholder cluster at `ip`.
    ///
    /// Returns whether anything changed.
    pub fn rewrite_placeholders(&mut self, name: &str, ip: &str) -> bool {
        let mut changed = false;

        for cluster in self.clusters.iter_mut().filter(|c| c.name == PLACEHOLDER_NAME) {
            if cluster.cluster.server == PLACEHOLDER_SERVER {
                cluster.cluster.server = server_url(ip);
                changed = true;
            }
        }

        changed |= rename_placeholders(&mut self.clusters, name);
        changed |= rename_placeholders(&mut self.users, name);
        changed |= rename_placeholders(&mut self.contexts, name);

        if name != PLACEHOLDER_NAME {
            for context in &mut self.contexts {
                if context.context.cluster == PLACEHOLDER_NAME {
                    context.context.cluster = name.to_string();
                    changed = true;
                }
                if context.context.user == PLACEHOLDER_NAME {
                    context.context.user = name.to_string();
                    changed = true;
                }
            }
            if self.current_context == PLACEHOLDER_NAME {
                self.current_context = name.to_string();
                changed = true;
            }
        }

        changed
    }

    /// Drop every entry called `name` and clear `current-context`.
    pub fn remove_named(&mut self, name: &str) -> Removed {
        let removed = Removed {
            clusters: remove_by_name(&mut self.clusters, name),
            contexts: remove_by_name(&mut self.contexts, name),
            users: remove_by_name(&mut self.users, name),
            extensions: remove_by_name(&mut self.extensions, name)
                + remove_by_name(&mut self.preferences.extensions, name),
        };
        self.current_context.clear();
        removed
    }
}
