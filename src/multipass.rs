use std::path::Path;

use crate::error::KlusterError;
use crate::registry::{self, Cluster, ClusterList, ClusterRegistry};

/// Where k3s writes the admin kubeconfig inside the VM.
pub const K3S_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

/// Resources for a new kluster VM.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub name: String,
    pub memory: String,
    pub cpus: u32,
    pub disk_size: String,
}

impl LaunchSpec {
    fn args(&self, cloud_init: &Path) -> Vec<String> {
        vec![
            "launch".into(),
            format!("--name={}", self.name),
            format!("--mem={}", self.memory),
            format!("--cpus={}", self.cpus),
            format!("--disk={}", self.disk_size),
            format!("--cloud-init={}", cloud_init.display()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched,
    AlreadyExists,
}

/// The `multipass` CLI, optionally run through `sudo -E`.
#[derive(Debug, Clone)]
pub struct Multipass {
    binary: String,
    with_sudo: bool,
}

impl Multipass {
    pub fn new(binary: impl Into<String>, with_sudo: bool) -> Self {
        Self {
            binary: binary.into(),
            with_sudo,
        }
    }

    fn command(&self, args: &[String]) -> tokio::process::Command {
        let mut cmd = if self.with_sudo {
            let mut cmd = tokio::process::Command::new("sudo");
            cmd.arg("-E").arg(&self.binary);
            cmd
        } else {
            tokio::process::Command::new(&self.binary)
        };
        cmd.args(args);
        cmd
    }

    fn display(&self, args: &[String]) -> String {
        let prefix = if self.with_sudo { "sudo -E " } else { "" };
        format!("{prefix}{} {}", self.binary, args.join(" "))
    }

    /// Run with `args`, returning stdout on success.
    async fn run(&self, args: &[String]) -> Result<String, KlusterError> {
        let shown = self.display(args);
        tracing::debug!(command = %shown, "executing");

        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| KlusterError::Io {
                context: format!("running {}", self.binary),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(command = %shown, %stderr, "command failed");
            return Err(KlusterError::Hypervisor {
                command: shown,
                message: stderr,
            });
        }

        tracing::debug!(command = %shown, "command succeeded");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ClusterRegistry for Multipass {
    async fn list_clusters(&self) -> Result<ClusterList, KlusterError> {
        let out = self.run(&["list".into(), "--format=json".into()]).await?;
        registry::decode_list(&out)
    }

    async fn cluster_details(&self, name: &str) -> Result<Cluster, KlusterError> {
        let out = self
            .run(&["info".into(), name.into(), "--format=json".into()])
            .await?;
        registry::decode_details(&out)
    }
}

/// A hypervisor that can run klusters.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait VmHost: ClusterRegistry {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        cloud_init: &Path,
    ) -> Result<LaunchOutcome, KlusterError>;
    async fn delete(&self, name: &str) -> Result<(), KlusterError>;
    /// The k3s admin kubeconfig of `name`, one entry per line.
    async fn read_kubeconfig(&self, name: &str) -> Result<Vec<String>, KlusterError>;
}

impl VmHost for Multipass {
    /// Launch a VM bootstrapped by `cloud_init`.
    ///
    /// An instance with the same name is reported, not treated as failure.
    async fn launch(
        &self,
        spec: &LaunchSpec,
        cloud_init: &Path,
    ) -> Result<LaunchOutcome, KlusterError> {
        match self.run(&spec.args(cloud_init)).await {
            Ok(out) => {
                tracing::info!(cluster = %spec.name, output = %out.trim(), "launched kluster");
                Ok(LaunchOutcome::Launched)
            }
            Err(KlusterError::Hypervisor { message, .. }) if is_already_exists(&message, &spec.name) => {
                tracing::info!(cluster = %spec.name, "kluster already exists");
                Ok(LaunchOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete and purge a VM.
    async fn delete(&self, name: &str) -> Result<(), KlusterError> {
        self.run(&["delete".into(), name.into(), "--purge".into()])
            .await?;
        tracing::info!(cluster = %name, "deleted kluster");
        Ok(())
    }

    /// Pull the k3s admin kubeconfig out of the VM, one entry per line.
    async fn read_kubeconfig(&self, name: &str) -> Result<Vec<String>, KlusterError> {
        tracing::debug!(cluster = %name, "getting kubeconfig from kluster");
        let out = self
            .run(&["exec".into(), name.into(), "cat".into(), K3S_KUBECONFIG.into()])
            .await?;
        Ok(sanitize(&out))
    }
}

fn is_already_exists(stderr: &str, name: &str) -> bool {
    stderr
        .lines()
        .next()
        .is_some_and(|l| l.trim() == format!("launch failed: instance \"{name}\" already exists"))
}

/// Split command output into lines, dropping trailing blank lines and
/// carriage returns.
fn sanitize(out: &str) -> Vec<String> {
    let mut lines: Vec<String> = out
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}
