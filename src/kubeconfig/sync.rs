//! Keeps the persistent kubeconfig in step with the klusters kluster manages.
//!
//! Every mutation reads the whole file, edits the typed document and swaps
//! the result in with a rename. A failure at any point leaves the existing
//! file as it was.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Kubeconfig, Removed};
use crate::error::KlusterError;
use crate::lines;
use crate::registry::Cluster;

/// What [`KubeconfigFile::merge`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The kubeconfig did not exist; the fragment became its content.
    Created,
    /// The fragment was merged into the existing kubeconfig.
    Merged,
    /// The kubeconfig already has a cluster with this name; nothing written.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct KubeconfigFile {
    path: PathBuf,
}

impl KubeconfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Like [`KubeconfigFile::new`], creating the parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KlusterError> {
        let file = Self::new(path);
        let dir = file.dir();
        fs::create_dir_all(dir).map_err(|e| KlusterError::Io {
            context: format!("creating kubeconfig directory {}", dir.display()),
            source: e,
        })?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Read and parse the persistent kubeconfig.
    pub fn load(&self) -> Result<Kubeconfig, KlusterError> {
        let text = fs::read_to_string(&self.path).map_err(|e| KlusterError::Io {
            context: format!("reading kubeconfig {}", self.path.display()),
            source: e,
        })?;
        parse(&self.path, &text)
    }

    /// Merge the kubeconfig fragment pulled from `cluster` into this file.
    ///
    /// A cluster already listed in the file is left alone, so re-running
    /// `start` never duplicates entries.
    pub fn merge(
        &self,
        cluster: &Cluster,
        fragment_lines: &[String],
    ) -> Result<MergeOutcome, KlusterError> {
        let ip = cluster.ip().ok_or_else(|| KlusterError::MissingClusterAddress {
            name: cluster.name.clone(),
        })?;

        let existing = match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(parse(&self.path, &text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(KlusterError::Io {
                    context: format!("reading kubeconfig {}", self.path.display()),
                    source: e,
                });
            }
        };

        if let Some(doc) = &existing
            && doc.has_cluster(&cluster.name)
        {
            tracing::info!(
                cluster = %cluster.name,
                path = %self.path.display(),
                "kubeconfig already has this kluster, skipping merge"
            );
            return Ok(MergeOutcome::AlreadyPresent);
        }

        let staging = tempfile::Builder::new()
            .prefix("kluster-kubeconfigs")
            .tempdir()
            .map_err(|e| KlusterError::Io {
                context: "creating kubeconfig staging directory".into(),
                source: e,
            })?;
        let mut fragment = stage_fragment(staging.path(), fragment_lines)?;
        // Only the fragment's placeholders belong to this kluster; a `default`
        // entry already in the file is someone else's.
        fragment.rewrite_placeholders(&cluster.name, ip);

        let (doc, outcome) = match existing {
            None => {
                tracing::debug!(path = %self.path.display(), "kubeconfig is empty, writing fragment as its content");
                (fragment, MergeOutcome::Created)
            }
            Some(mut doc) => {
                doc.merge_from(fragment);
                (doc, MergeOutcome::Merged)
            }
        };

        self.replace(&doc)?;

        tracing::info!(
            cluster = %cluster.name,
            path = %self.path.display(),
            "wrote kubeconfig for kluster"
        );
        Ok(outcome)
    }

    /// Remove every entry named `cluster_name` and clear `current-context`.
    pub fn remove(&self, cluster_name: &str) -> Result<Removed, KlusterError> {
        let mut doc = self.load()?;
        let removed = doc.remove_named(cluster_name);
        self.replace(&doc)?;
        tracing::info!(
            cluster = %cluster_name,
            path = %self.path.display(),
            removed = removed.total(),
            "removed kluster from kubeconfig"
        );
        Ok(removed)
    }

    /// Atomically swap `doc` in as the file's content.
    fn replace(&self, doc: &Kubeconfig) -> Result<(), KlusterError> {
        let yaml = doc.to_yaml().map_err(|e| KlusterError::Serialize {
            what: "kubeconfig".into(),
            message: e.to_string(),
        })?;

        let dir = self.dir();
        let io_err = |context: String| {
            move |source: std::io::Error| KlusterError::Io { context, source }
        };

        fs::create_dir_all(dir)
            .map_err(io_err(format!("creating kubeconfig directory {}", dir.display())))?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)
            .map_err(io_err(format!("creating temp file in {}", dir.display())))?;
        staged
            .write_all(yaml.as_bytes())
            .map_err(io_err("writing staged kubeconfig".into()))?;
        staged
            .as_file()
            .sync_all()
            .map_err(io_err("flushing staged kubeconfig".into()))?;
        staged
            .persist(&self.path)
            .map_err(|e| e.error)
            .map_err(io_err(format!("replacing kubeconfig {}", self.path.display())))?;
        Ok(())
    }
}

fn parse(path: &Path, text: &str) -> Result<Kubeconfig, KlusterError> {
    Kubeconfig::parse(text).map_err(|e| KlusterError::ParseFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Round-trip the fragment through a file in `dir` and parse it.
fn stage_fragment(dir: &Path, fragment_lines: &[String]) -> Result<Kubeconfig, KlusterError> {
    let path = dir.join("new.config");
    lines::write_lines(&path, fragment_lines).map_err(|e| KlusterError::Io {
        context: format!("staging kubeconfig fragment at {}", path.display()),
        source: e,
    })?;
    let text = fs::read_to_string(&path).map_err(|e| KlusterError::Io {
        context: format!("reading staged fragment {}", path.display()),
        source: e,
    })?;
    parse(&path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::tests::K3S_FRAGMENT;
    use crate::kubeconfig::PLACEHOLDER_NAME;

    fn fragment_lines() -> Vec<String> {
        K3S_FRAGMENT.lines().map(String::from).collect()
    }

    fn cluster(name: &str, ip: &str) -> Cluster {
        Cluster {
            name: name.into(),
            ip_addresses: vec![ip.into()],
            state: "Running".into(),
            ..Default::default()
        }
    }

    fn counts(doc: &Kubeconfig) -> (usize, usize, usize) {
        (doc.clusters.len(), doc.users.len(), doc.contexts.len())
    }

    #[test]
    fn first_merge_creates_file_with_real_identity() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));

        let outcome = file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();

        assert_eq!(outcome, MergeOutcome::Created);
        let doc = file.load().unwrap();
        assert_eq!(doc.cluster_names(), vec!["demo1"]);
        assert_eq!(doc.context_names(), vec!["demo1"]);
        assert_eq!(doc.user_names(), vec!["demo1"]);
        assert_eq!(doc.clusters[0].cluster.server, "https://10.0.0.5:6443");
        assert_eq!(doc.current_context, "demo1");
    }

    #[test]
    fn second_cluster_is_merged_alongside_first() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();

        let outcome = file.merge(&cluster("demo2", "10.0.0.6"), &fragment_lines()).unwrap();

        assert_eq!(outcome, MergeOutcome::Merged);
        let doc = file.load().unwrap();
        assert_eq!(doc.cluster_names(), vec!["demo1", "demo2"]);
        assert_eq!(doc.user_names(), vec!["demo1", "demo2"]);
        assert_eq!(doc.context_names(), vec!["demo1", "demo2"]);
        assert!(!doc.cluster_names().contains(&PLACEHOLDER_NAME));
        assert_eq!(doc.cluster("demo1").unwrap().cluster.server, "https://10.0.0.5:6443");
        assert_eq!(doc.cluster("demo2").unwrap().cluster.server, "https://10.0.0.6:6443");
        assert_eq!(doc.current_context, "demo2");
    }

    #[test]
    fn merge_keeps_existing_default_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let existing = K3S_FRAGMENT.replace("https://127.0.0.1:6443", "https://192.168.1.50:6443");
        fs::write(&path, &existing).unwrap();
        let file = KubeconfigFile::new(&path);

        let outcome = file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();

        assert_eq!(outcome, MergeOutcome::Merged);
        let doc = file.load().unwrap();
        assert_eq!(doc.cluster_names(), vec![PLACEHOLDER_NAME, "demo1"]);
        assert_eq!(doc.user_names(), vec![PLACEHOLDER_NAME, "demo1"]);
        assert_eq!(doc.context_names(), vec![PLACEHOLDER_NAME, "demo1"]);
        assert_eq!(
            doc.cluster(PLACEHOLDER_NAME).unwrap().cluster.server,
            "https://192.168.1.50:6443"
        );
        assert_eq!(doc.cluster("demo1").unwrap().cluster.server, "https://10.0.0.5:6443");
        assert_eq!(doc.contexts[0].context.cluster, PLACEHOLDER_NAME);
        assert_eq!(doc.contexts[1].context.cluster, "demo1");
        assert_eq!(doc.current_context, "demo1");
    }

    #[test]
    fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let file = KubeconfigFile::new(&path);
        let demo1 = cluster("demo1", "10.0.0.5");

        file.merge(&demo1, &fragment_lines()).unwrap();
        let after_first = fs::read(&path).unwrap();
        let outcome = file.merge(&demo1, &fragment_lines()).unwrap();
        let after_second = fs::read(&path).unwrap();

        assert_eq!(outcome, MergeOutcome::AlreadyPresent);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn merge_of_known_cluster_keeps_counts() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();
        file.merge(&cluster("demo2", "10.0.0.6"), &fragment_lines()).unwrap();
        let before = counts(&file.load().unwrap());

        file.merge(&cluster("demo2", "10.0.0.7"), &fragment_lines()).unwrap();

        assert_eq!(counts(&file.load().unwrap()), before);
    }

    #[test]
    fn merge_into_blank_file_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "\n").unwrap();
        let file = KubeconfigFile::new(&path);

        let outcome = file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();

        assert_eq!(outcome, MergeOutcome::Created);
        assert_eq!(file.load().unwrap().cluster_names(), vec!["demo1"]);
    }

    #[test]
    fn missing_address_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let file = KubeconfigFile::new(&path);
        let mut no_ip = cluster("demo1", "10.0.0.5");
        no_ip.ip_addresses.clear();

        let err = file.merge(&no_ip, &fragment_lines()).unwrap_err();

        assert!(matches!(err, KlusterError::MissingClusterAddress { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn malformed_kubeconfig_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let garbage = "clusters: not-a-list\n";
        fs::write(&path, garbage).unwrap();
        let file = KubeconfigFile::new(&path);

        let err = file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap_err();
        assert!(matches!(err, KlusterError::ParseFailed { .. }));
        let err = file.remove("demo1").unwrap_err();
        assert!(matches!(err, KlusterError::ParseFailed { .. }));

        assert_eq!(fs::read_to_string(&path).unwrap(), garbage);
    }

    #[test]
    fn malformed_fragment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let file = KubeconfigFile::new(&path);
        let lines = vec!["clusters: 42".to_string()];

        let err = file.merge(&cluster("demo1", "10.0.0.5"), &lines).unwrap_err();

        assert!(matches!(err, KlusterError::ParseFailed { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn remove_reverses_merge() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();
        file.merge(&cluster("demo2", "10.0.0.6"), &fragment_lines()).unwrap();

        let removed = file.remove("demo1").unwrap();

        assert_eq!(removed.clusters, 1);
        let doc = file.load().unwrap();
        assert!(!doc.cluster_names().contains(&"demo1"));
        assert!(!doc.user_names().contains(&"demo1"));
        assert!(!doc.context_names().contains(&"demo1"));
        assert_eq!(doc.cluster_names(), vec!["demo2"]);
        assert_eq!(doc.current_context, "");
    }

    #[test]
    fn remove_clears_unrelated_current_context() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();
        file.merge(&cluster("demo2", "10.0.0.6"), &fragment_lines()).unwrap();

        file.remove("demo1").unwrap();

        let doc = file.load().unwrap();
        assert_eq!(doc.context_names(), vec!["demo2"]);
        assert_eq!(doc.current_context, "");
    }

    #[test]
    fn remove_without_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        assert!(matches!(
            file.remove("demo1"),
            Err(KlusterError::Io { .. })
        ));
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".kube").join("config");
        let file = KubeconfigFile::open(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(file.path(), path);
    }

    #[test]
    fn replace_leaves_no_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = KubeconfigFile::new(dir.path().join("config"));
        file.merge(&cluster("demo1", "10.0.0.5"), &fragment_lines()).unwrap();
        file.remove("demo1").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
