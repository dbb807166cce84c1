use std::path::{Path, PathBuf};

use facet_value::{VArray, Value, value};

use crate::error::KlusterError;

/// Copies the admin kubeconfig to the default user once k3s is up.
pub const KUBECONFIG_COPY_CMD: &str =
    "mkdir -p /home/ubuntu/.kube && cp /etc/rancher/k3s/k3s.yaml /home/ubuntu/.kube/config";

const PACKAGES: &[&str] = &["net-tools", "traceroute", "arping", "bridge-utils", "jq"];

const BOOTCMD: &[&str] = &[
    "sysctl -w net.ipv4.ip_forward=1",
    "sysctl -w net.ipv6.conf.all.forwarding=1",
    "sysctl -p",
];

const SHELL_SETUP: &[&str] = &[
    "chown -R ubuntu:ubuntu /home/ubuntu/.kube",
    "echo \"source <(kubectl completion bash)\" >> /home/ubuntu/.bashrc",
    "echo \"alias k=kubectl\" >> /home/ubuntu/.bashrc",
    "echo \"complete -F __start_kubectl k\" >> /home/ubuntu/.bashrc",
];

/// Inputs for the k3s bootstrap user-data.
pub struct CloudInitSpec<'a> {
    pub k3s_version: &'a str,
    pub server_flags: &'a [String],
    pub ssh_authorized_keys: &'a [String],
}

/// The get.k3s.io installer invocation for `version`.
pub fn install_command(version: &str, server_flags: &[String]) -> String {
    format!(
        "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION=\"{version}\" INSTALL_K3S_EXEC=\"{}\" K3S_KUBECONFIG_MODE=\"644\" sh -s -",
        server_flags.join(" ")
    )
}

fn string_array(items: impl IntoIterator<Item = impl AsRef<str>>) -> Value {
    Value::from(VArray::from_iter(
        items.into_iter().map(|s| Value::from(s.as_ref())),
    ))
}

/// Render `#cloud-config` user-data that installs k3s on first boot.
pub fn render_user_data(spec: &CloudInitSpec) -> Result<String, KlusterError> {
    let mut user = value!({
        "name": "ubuntu",
        "groups": "sudo",
        "shell": "/bin/bash",
        "sudo": "ALL=(ALL) NOPASSWD:ALL",
    });

    if !spec.ssh_authorized_keys.is_empty()
        && let Some(obj) = user.as_object_mut()
    {
        obj.insert("ssh_authorized_keys", string_array(spec.ssh_authorized_keys));
    }

    let mut runcmd = VArray::new();
    runcmd.push(Value::from(
        install_command(spec.k3s_version, spec.server_flags).as_str(),
    ));
    runcmd.push(Value::from(KUBECONFIG_COPY_CMD));
    for cmd in SHELL_SETUP {
        runcmd.push(Value::from(*cmd));
    }

    let users = VArray::from_iter([Value::from("default"), user]);

    let config = value!({
        "package_update": true,
        "packages": (string_array(PACKAGES)),
        "bootcmd": (string_array(BOOTCMD)),
        "runcmd": (Value::from(runcmd)),
        "users": (Value::from(users)),
    });

    let yaml = facet_yaml::to_string(&config).map_err(|e| KlusterError::Serialize {
        what: "cloud-init user-data".into(),
        message: e.to_string(),
    })?;
    // cloud-init wants #cloud-config as the very first line
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);
    Ok(format!("#cloud-config\n{yaml}"))
}

/// Write user-data for `profile` into `dir`, returning the file path.
pub fn write_user_data(dir: &Path, profile: &str, user_data: &str) -> Result<PathBuf, KlusterError> {
    let path = dir.join(format!("{profile}-cloud-init"));
    std::fs::write(&path, user_data).map_err(|e| KlusterError::Io {
        context: format!("writing cloud-init file {}", path.display()),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), "generated cloud-init file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(version: &str, flags: &[String], keys: &[String]) -> serde_yaml::Value {
        let user_data = render_user_data(&CloudInitSpec {
            k3s_version: version,
            server_flags: flags,
            ssh_authorized_keys: keys,
        })
        .unwrap();
        assert!(user_data.starts_with("#cloud-config\n"));
        serde_yaml::from_str(&user_data).unwrap()
    }

    #[test]
    fn install_command_carries_version_and_flags() {
        assert_eq!(
            install_command("v1.21.8+k3s1", &["--disable traefik".into()]),
            "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION=\"v1.21.8+k3s1\" INSTALL_K3S_EXEC=\"--disable traefik\" K3S_KUBECONFIG_MODE=\"644\" sh -s -"
        );
        assert!(install_command("v1.21.8+k3s1", &[]).contains("INSTALL_K3S_EXEC=\"\""));
    }

    #[test]
    fn runcmd_installs_k3s_then_copies_kubeconfig() {
        let doc = render("v1.21.8+k3s1", &[], &[]);
        let runcmd = doc["runcmd"].as_sequence().unwrap();
        assert_eq!(
            runcmd[0].as_str(),
            Some(install_command("v1.21.8+k3s1", &[]).as_str())
        );
        assert_eq!(runcmd[1].as_str(), Some(KUBECONFIG_COPY_CMD));
    }

    #[test]
    fn server_flags_are_space_joined() {
        let flags = vec!["--disable traefik".to_string(), "--write-kubeconfig-mode 644".to_string()];
        let doc = render("v1.22.5+k3s1", &flags, &[]);
        let install = doc["runcmd"][0].as_str().unwrap();
        assert!(install.contains("INSTALL_K3S_EXEC=\"--disable traefik --write-kubeconfig-mode 644\""));
    }

    #[test]
    fn users_include_default_and_sudo_user() {
        let keys = vec!["ssh-ed25519 AAAAC3Nz demo@host".to_string()];
        let doc = render("v1.22.5+k3s1", &[], &keys);
        let users = doc["users"].as_sequence().unwrap();
        assert_eq!(users[0].as_str(), Some("default"));
        assert_eq!(users[1]["name"].as_str(), Some("ubuntu"));
        assert_eq!(
            users[1]["ssh_authorized_keys"][0].as_str(),
            Some("ssh-ed25519 AAAAC3Nz demo@host")
        );
    }

    #[test]
    fn no_keys_means_no_key_field() {
        let doc = render("v1.22.5+k3s1", &[], &[]);
        assert!(doc["users"][1].get("ssh_authorized_keys").is_none());
        assert_eq!(doc["package_update"].as_bool(), Some(true));
        assert_eq!(doc["packages"].as_sequence().unwrap().len(), PACKAGES.len());
    }

    #[test]
    fn write_user_data_names_file_after_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_user_data(dir.path(), "demo1", "#cloud-config\n").unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("demo1"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "#cloud-config\n");
    }
}
