//! The `start`, `destroy`, `kubeconfig` and `versions` commands.

use std::path::Path;

use crate::cloudinit::{self, CloudInitSpec};
use crate::config::ResolvedSettings;
use crate::error::KlusterError;
use crate::kubeconfig::{KubeconfigFile, MergeOutcome};
use crate::multipass::{LaunchOutcome, LaunchSpec, VmHost};
use crate::progress::{OutputMode, StepProgress};
use crate::registry::{Cluster, ClusterRegistry};
use crate::release::{Provenance, ReleaseCache, ReleaseSource};

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub launch: LaunchSpec,
    pub k3s_version: Option<String>,
    pub server_flags: Vec<String>,
    pub with_kube_config: bool,
}

pub async fn start<H, S>(
    host: &H,
    source: &S,
    settings: &ResolvedSettings,
    opts: &StartOptions,
    mode: OutputMode,
) -> Result<(), KlusterError>
where
    H: VmHost,
    S: ReleaseSource,
{
    let name = opts.launch.name.as_str();
    let total = if opts.with_kube_config { 2 } else { 1 };
    let mut progress = StepProgress::new(total, mode);

    let existing = host.list_clusters().await?;
    if existing.find(name).is_some() {
        progress.skip(&format!("Kluster {name} already exists"));
    } else {
        progress
            .run(&format!("Launching kluster {name}"), |step| async move {
                let version = match &opts.k3s_version {
                    Some(v) => v.clone(),
                    None => {
                        let cache = ReleaseCache::acquire(
                            &settings.release_cache,
                            settings.cache_expiry,
                            source,
                        )
                        .await?;
                        cache
                            .latest()
                            .map(str::to_string)
                            .ok_or_else(|| KlusterError::Validation {
                                message: "no k3s release available; pass --k3s-version".into(),
                            })?
                    }
                };
                tracing::info!(cluster = %name, %version, "selected k3s release");

                match launch(host, settings, opts, &version).await? {
                    LaunchOutcome::Launched => {
                        step.set_done_label(format!("Launched kluster {name} (k3s {version})"));
                    }
                    LaunchOutcome::AlreadyExists => {
                        step.set_done_label(format!("Kluster {name} already exists"));
                    }
                }
                Ok::<_, KlusterError>(())
            })
            .await?;
    }

    if opts.with_kube_config {
        let outcome = progress
            .run("Merging kubeconfig", |step| async move {
                let outcome = merge_kubeconfig(host, &settings.kubeconfig, name).await?;
                step.set_done_label(describe(outcome, &settings.kubeconfig));
                Ok::<_, KlusterError>(outcome)
            })
            .await?;
        tracing::debug!(?outcome, "kubeconfig step finished");
    }

    println!("kluster {name} is ready");
    Ok(())
}

/// Render cloud-init into a scoped directory and launch the VM from it.
async fn launch<H: VmHost>(
    host: &H,
    settings: &ResolvedSettings,
    opts: &StartOptions,
    version: &str,
) -> Result<LaunchOutcome, KlusterError> {
    let user_data = cloudinit::render_user_data(&CloudInitSpec {
        k3s_version: version,
        server_flags: &opts.server_flags,
        ssh_authorized_keys: &settings.ssh_authorized_keys,
    })?;

    let dir = tempfile::Builder::new()
        .prefix("kluster-cloud-init")
        .tempdir()
        .map_err(|e| KlusterError::Io {
            context: "creating cloud-init directory".into(),
            source: e,
        })?;
    let path = cloudinit::write_user_data(dir.path(), &opts.launch.name, &user_data)?;

    host.launch(&opts.launch, &path).await
}

/// Delete a kluster and optionally drop it from the kubeconfig.
pub async fn destroy<H: VmHost>(
    host: &H,
    settings: &ResolvedSettings,
    name: &str,
    remove_from_kube_context: bool,
) -> Result<(), KlusterError> {
    let clusters = host.list_clusters().await?;
    if clusters.find(name).is_some() {
        host.delete(name).await?;
        println!("kluster {name} destroyed");
    } else {
        println!("kluster {name} does not exist");
    }

    if remove_from_kube_context {
        let path = &settings.kubeconfig;
        if !path.exists() {
            println!("kubeconfig {} does not exist, nothing to remove", path.display());
            return Ok(());
        }
        let removed = KubeconfigFile::new(path.clone()).remove(name)?;
        println!(
            "removed {} kubeconfig entries for {name} from {}",
            removed.total(),
            path.display()
        );
    }
    Ok(())
}

/// Merge the kubeconfig of a running kluster into `target`.
pub async fn write_kubeconfig<H: VmHost>(
    host: &H,
    target: &Path,
    name: &str,
) -> Result<MergeOutcome, KlusterError> {
    let outcome = merge_kubeconfig(host, target, name).await?;
    println!("{}", describe(outcome, target));
    Ok(outcome)
}

async fn merge_kubeconfig<H: VmHost>(
    host: &H,
    target: &Path,
    name: &str,
) -> Result<MergeOutcome, KlusterError> {
    let cluster = find_cluster(host, name).await?;
    let fragment = host.read_kubeconfig(name).await?;
    let file = KubeconfigFile::open(target)?;
    tracing::debug!(path = %file.path().display(), cluster = %name, "merging kubeconfig");
    file.merge(&cluster, &fragment)
}

/// Details of `name`, or `ClusterNotFound` if the hypervisor doesn't list it.
async fn find_cluster<R: ClusterRegistry>(registry: &R, name: &str) -> Result<Cluster, KlusterError> {
    if registry.list_clusters().await?.find(name).is_none() {
        return Err(KlusterError::ClusterNotFound { name: name.into() });
    }
    let cluster = registry.cluster_details(name).await?;
    tracing::debug!(%cluster, "found kluster");
    Ok(cluster)
}

fn describe(outcome: MergeOutcome, path: &Path) -> String {
    match outcome {
        MergeOutcome::Created => format!("created kubeconfig {}", path.display()),
        MergeOutcome::Merged => format!("merged into kubeconfig {}", path.display()),
        MergeOutcome::AlreadyPresent => {
            format!("kubeconfig {} already has this kluster", path.display())
        }
    }
}

/// Print known k3s releases, newest first, to stdout.
pub async fn versions<S: ReleaseSource>(
    source: &S,
    settings: &ResolvedSettings,
    refresh: bool,
) -> Result<ReleaseCache, KlusterError> {
    let cache = if refresh {
        ReleaseCache::refresh(&settings.release_cache, settings.cache_expiry, source).await?
    } else {
        ReleaseCache::acquire(&settings.release_cache, settings.cache_expiry, source).await?
    };

    for version in &cache.versions {
        println!("{version}");
    }
    match cache.provenance {
        Provenance::FromCache => eprintln!("(from cache {})", cache.cache_path.display()),
        Provenance::Fresh => eprintln!("(fetched, cached at {})", cache.cache_path.display()),
    }
    Ok(cache)
}
