//! Klusters known to the hypervisor, decoded from its JSON output.

use std::collections::HashMap;
use std::fmt;

use crate::error::KlusterError;

// ── Cluster ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, facet::Facet)]
#[facet(default)]
pub struct Memory {
    #[facet(default)]
    pub total: u64,
    #[facet(default)]
    pub used: u64,
}

/// One k3s VM, identified by its multipass profile name.
#[derive(Debug, Clone, Default, PartialEq, facet::Facet)]
#[facet(default)]
pub struct Cluster {
    #[facet(default)]
    pub name: String,
    #[facet(default)]
    #[facet(rename = "ipv4")]
    pub ip_addresses: Vec<String>,
    #[facet(default)]
    pub release: String,
    #[facet(default)]
    pub state: String,
    #[facet(default)]
    pub memory: Memory,
}

impl Cluster {
    /// First IPv4 address, the one the API server is reached on.
    pub fn ip(&self) -> Option<&str> {
        self.ip_addresses.first().map(String::as_str)
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name {}, Release: {}, State: {}",
            self.name, self.release, self.state
        )
    }
}

// ── list ─────────────────────────────────────────────────

/// Output of `multipass list --format=json`.
#[derive(Debug, Clone, Default, facet::Facet)]
#[facet(default)]
pub struct ClusterList {
    #[facet(default)]
    pub list: Vec<Cluster>,
}

impl ClusterList {
    pub fn find(&self, name: &str) -> Option<&Cluster> {
        self.list.iter().find(|c| c.name == name)
    }
}

pub fn decode_list(json: &str) -> Result<ClusterList, KlusterError> {
    facet_json::from_str(json).map_err(|e| KlusterError::RegistryDecode {
        command: "multipass list".into(),
        message: e.to_string(),
    })
}

// ── info ─────────────────────────────────────────────────

/// Per-VM entry of `multipass info`; the VM name is the enclosing map key.
#[derive(Debug, Clone, Default, facet::Facet)]
#[facet(default)]
struct InfoEntry {
    #[facet(default)]
    ipv4: Vec<String>,
    #[facet(default)]
    image_release: Option<String>,
    #[facet(default)]
    release: Option<String>,
    #[facet(default)]
    state: String,
    #[facet(default)]
    memory: Memory,
}

#[derive(Debug, Clone, Default, facet::Facet)]
#[facet(default)]
struct InfoPayload {
    #[facet(default)]
    errors: Vec<String>,
    #[facet(default)]
    info: HashMap<String, InfoEntry>,
}

/// Decode `multipass info <name> --format=json`.
///
/// The payload keys the VM record by its name, so the map must hold
/// exactly one entry.
pub fn decode_details(json: &str) -> Result<Cluster, KlusterError> {
    let decode_err = |message: String| KlusterError::RegistryDecode {
        command: "multipass info".into(),
        message,
    };

    let payload: InfoPayload = facet_json::from_str(json).map_err(|e| decode_err(e.to_string()))?;

    if !payload.errors.is_empty() {
        return Err(decode_err(payload.errors.join("; ")));
    }

    let mut entries = payload.info.into_iter();
    let (name, entry) = match (entries.next(), entries.next()) {
        (Some(only), None) => only,
        (None, _) => return Err(decode_err("no instance in output".into())),
        (Some(_), Some(_)) => {
            return Err(decode_err("expected exactly one instance in output".into()));
        }
    };

    Ok(Cluster {
        name,
        ip_addresses: entry.ipv4,
        release: entry.image_release.or(entry.release).unwrap_or_default(),
        state: entry.state,
        memory: entry.memory,
    })
}

// ── Registry seam ────────────────────────────────────────

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait ClusterRegistry {
    async fn list_clusters(&self) -> Result<ClusterList, KlusterError>;
    async fn cluster_details(&self, name: &str) -> Result<Cluster, KlusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_JSON: &str = r#"{
        "list": [
            {"ipv4": ["192.168.64.5"], "name": "demo2", "release": "20.04 LTS", "state": "Running"},
            {"ipv4": [], "name": "demo1", "release": "20.04 LTS", "state": "Stopped"}
        ]
    }"#;

    const INFO_JSON: &str = r#"{
        "errors": [],
        "info": {
            "demo1": {
                "cpu_count": "2",
                "image_release": "20.04 LTS",
                "ipv4": ["192.168.64.5", "10.42.0.0"],
                "memory": {"total": 4125425664, "used": 1048576000},
                "state": "Running"
            }
        }
    }"#;

    #[test]
    fn decode_list_finds_clusters() {
        let list = decode_list(LIST_JSON).unwrap();
        let names: Vec<&str> = list.list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["demo2", "demo1"]);
        let demo2 = list.find("demo2").unwrap();
        assert_eq!(demo2.ip(), Some("192.168.64.5"));
        assert_eq!(list.find("demo1").unwrap().ip(), None);
        assert!(list.find("demo3").is_none());
    }

    #[test]
    fn decode_details_projects_single_key() {
        let cluster = decode_details(INFO_JSON).unwrap();
        assert_eq!(cluster.name, "demo1");
        assert_eq!(cluster.ip(), Some("192.168.64.5"));
        assert_eq!(cluster.release, "20.04 LTS");
        assert_eq!(cluster.state, "Running");
        assert_eq!(cluster.memory.total, 4125425664);
    }

    #[test]
    fn decode_details_falls_back_to_release_field() {
        let json = r#"{"errors": [], "info": {"demo1": {"release": "Ubuntu 22.04", "state": "Stopped"}}}"#;
        let cluster = decode_details(json).unwrap();
        assert_eq!(cluster.release, "Ubuntu 22.04");
        assert!(cluster.ip_addresses.is_empty());
    }

    #[test]
    fn decode_details_rejects_empty_info() {
        let json = r#"{"errors": [], "info": {}}"#;
        assert!(matches!(
            decode_details(json),
            Err(KlusterError::RegistryDecode { .. })
        ));
    }

    #[test]
    fn decode_details_rejects_multiple_instances() {
        let json = r#"{"errors": [], "info": {"a": {"state": "Running"}, "b": {"state": "Running"}}}"#;
        assert!(decode_details(json).is_err());
    }

    #[test]
    fn display_shows_name_release_state() {
        let cluster = decode_details(INFO_JSON).unwrap();
        assert_eq!(
            cluster.to_string(),
            "Name demo1, Release: 20.04 LTS, State: Running"
        );
    }
}
