//! k3s release discovery with an on-disk, time-bounded cache.
//!
//! The cache file holds one tag per line, newest first. Its modification
//! time is the only freshness signal.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::KlusterError;
use crate::lines;

pub const RELEASES_URL: &str = "https://api.github.com/repos/k3s-io/k3s/releases";

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Whether `tag` looks like a k3s release tag, e.g. `v1.21.8+k3s1`.
///
/// Shape: `v` + three dot-separated 1-3 digit numbers, one of `+`, `-` or
/// `|`, then `k3s` and a single digit.
pub fn is_version_tag(tag: &str) -> bool {
    let Some(rest) = tag.strip_prefix('v') else {
        return false;
    };
    let Some((core, suffix)) = rest.split_once(['+', '-', '|']) else {
        return false;
    };

    let is_component = |p: &str| (1..=3).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit());
    let mut parts = core.split('.');
    let core_ok = (0..3).all(|_| parts.next().is_some_and(is_component)) && parts.next().is_none();

    let build_ok = suffix
        .strip_prefix("k3s")
        .is_some_and(|n| n.len() == 1 && n.bytes().all(|b| b.is_ascii_digit()));

    core_ok && build_ok
}

// ── Remote source ────────────────────────────────────────

/// One entry of the GitHub releases listing. Unknown fields are ignored.
#[derive(Debug, Clone, Default, facet::Facet)]
#[facet(default)]
pub struct GithubRelease {
    #[facet(default)]
    pub tag_name: String,
    #[facet(default)]
    pub draft: bool,
    #[facet(default)]
    pub prerelease: bool,
}

impl GithubRelease {
    /// Rejected only when flagged draft *and* pre-release at once.
    fn is_acceptable(&self) -> bool {
        !(self.draft && self.prerelease) && is_version_tag(&self.tag_name)
    }
}

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait ReleaseSource {
    async fn releases(&self) -> Result<Vec<GithubRelease>, KlusterError>;
}

/// The k3s releases listing on the GitHub API.
pub struct GithubReleases {
    url: String,
}

impl GithubReleases {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for GithubReleases {
    fn default() -> Self {
        Self::new(RELEASES_URL)
    }
}

impl ReleaseSource for GithubReleases {
    async fn releases(&self) -> Result<Vec<GithubRelease>, KlusterError> {
        let url = &self.url;
        let client = reqwest::Client::builder()
            .user_agent(concat!("kluster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KlusterError::RemoteFetch {
                message: format!("building HTTP client: {e}"),
                body: String::new(),
            })?;

        tracing::debug!(%url, "querying k3s releases");

        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| KlusterError::RemoteFetch {
                message: format!("request to {url} failed: {e}"),
                body: String::new(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| KlusterError::RemoteFetch {
                message: format!("error reading response body from {url}: {e}"),
                body: String::new(),
            })?;

        if !status.is_success() {
            return Err(KlusterError::RemoteFetch {
                message: format!("HTTP {status} from {url}"),
                body,
            });
        }

        decode_releases(&body)
    }
}

pub fn decode_releases(body: &str) -> Result<Vec<GithubRelease>, KlusterError> {
    facet_json::from_str(body).map_err(|e| KlusterError::ReleaseDecode {
        message: e.to_string(),
    })
}

/// Keep the acceptable tags, ordered lexicographically descending.
///
/// This is plain string ordering, so `v1.9.0+k3s1` sorts above
/// `v1.10.0+k3s1`.
pub fn filter_releases(releases: Vec<GithubRelease>) -> Vec<String> {
    let mut tags: Vec<String> = releases
        .into_iter()
        .filter(GithubRelease::is_acceptable)
        .map(|r| r.tag_name)
        .collect();
    tags.sort();
    tags.reverse();
    tags
}

pub async fn fetch_and_filter<S: ReleaseSource>(source: &S) -> Result<Vec<String>, KlusterError> {
    let releases = source.releases().await?;
    tracing::debug!(count = releases.len(), "received k3s releases");
    Ok(filter_releases(releases))
}

// ── Cache ────────────────────────────────────────────────

/// Where the versions of a [`ReleaseCache`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Fresh,
    FromCache,
}

#[derive(Debug, Clone)]
pub struct ReleaseCache {
    pub cache_path: PathBuf,
    /// Newest first.
    pub versions: Vec<String>,
    pub expiry: Duration,
    pub provenance: Provenance,
}

enum CacheState {
    Missing,
    Expired,
    Current,
}

impl ReleaseCache {
    /// Load the release list from `cache_path`, querying `source` when the
    /// cache is missing, older than `expiry`, or unreadable.
    pub async fn acquire<S: ReleaseSource>(
        cache_path: &Path,
        expiry: Duration,
        source: &S,
    ) -> Result<Self, KlusterError> {
        match cache_state(cache_path, expiry) {
            CacheState::Missing => {
                tracing::info!(path = %cache_path.display(), "k3s releases are not cached, querying the releases API");
                Self::refresh(cache_path, expiry, source).await
            }
            CacheState::Expired => {
                tracing::info!(path = %cache_path.display(), "refreshing expired k3s release cache");
                Self::refresh(cache_path, expiry, source).await
            }
            CacheState::Current => match read_cached(cache_path) {
                Ok(versions) => {
                    tracing::info!(path = %cache_path.display(), count = versions.len(), "loading k3s releases from cache");
                    Ok(Self {
                        cache_path: cache_path.to_path_buf(),
                        versions,
                        expiry,
                        provenance: Provenance::FromCache,
                    })
                }
                Err(reason) => {
                    tracing::warn!(path = %cache_path.display(), %reason, "unusable k3s release cache, querying afresh");
                    Self::refresh(cache_path, expiry, source).await
                }
            },
        }
    }

    /// Query `source` and overwrite the cache regardless of its age.
    ///
    /// A failed query leaves the existing cache file untouched. Missing
    /// parent directories of `cache_path` are created first.
    pub async fn refresh<S: ReleaseSource>(
        cache_path: &Path,
        expiry: Duration,
        source: &S,
    ) -> Result<Self, KlusterError> {
        let versions = fetch_and_filter(source).await?;
        ensure_cache_dir(cache_path);
        persist(cache_path, &versions);
        Ok(Self {
            cache_path: cache_path.to_path_buf(),
            versions,
            expiry,
            provenance: Provenance::Fresh,
        })
    }

    /// The newest known k3s version.
    pub fn latest(&self) -> Option<&str> {
        self.versions.first().map(String::as_str)
    }
}

fn cache_state(cache_path: &Path, expiry: Duration) -> CacheState {
    let Ok(meta) = std::fs::metadata(cache_path) else {
        return CacheState::Missing;
    };
    let Ok(modified) = meta.modified() else {
        return CacheState::Expired;
    };
    match modified.checked_add(expiry) {
        Some(deadline) if SystemTime::now() > deadline => CacheState::Expired,
        _ => CacheState::Current,
    }
}

/// Failure here only costs us persistence; the fetched list is still used.
fn ensure_cache_dir(cache_path: &Path) {
    let Some(dir) = cache_path.parent() else {
        return;
    };
    if let Err(source) = std::fs::create_dir_all(dir) {
        let err = KlusterError::CacheInit {
            path: dir.display().to_string(),
            source,
        };
        tracing::error!(error = %err, "continuing without a persistent release cache");
    }
}

fn read_cached(cache_path: &Path) -> Result<Vec<String>, String> {
    // An empty file is a valid cache: nothing passed the release filter.
    let versions = lines::read_lines(cache_path).map_err(|e| e.to_string())?;
    if let Some(bad) = versions.iter().find(|v| !is_version_tag(v)) {
        return Err(format!("unexpected cache entry '{bad}'"));
    }
    Ok(versions)
}

fn persist(cache_path: &Path, versions: &[String]) {
    match lines::write_lines(cache_path, versions) {
        Ok(()) => {
            tracing::debug!(path = %cache_path.display(), count = versions.len(), "cached k3s releases");
        }
        Err(e) => {
            tracing::warn!(path = %cache_path.display(), error = %e, "failed to write k3s release cache");
            // Never leave a partial cache behind
            let _ = std::fs::remove_file(cache_path);
        }
    }
}
