//! Agent release catalog.
//!
//! Versions come from a locally configured list plus, optionally, the
//! latest GitHub release. The newest version above the agent's current one
//! wins.

use std::cmp::Ordering;

use serde::Deserialize;
use tracing::{debug, warn};

/// Compare dotted version strings numerically, segment by segment.
///
/// Leading `v` is ignored; non-numeric segments compare lexicographically;
/// missing segments count as zero ("1.2" == "1.2.0").
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let normalize = |v: &str| -> Vec<String> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(str::to_string)
            .collect()
    };
    let (a, b) = (normalize(a), normalize(b));
    let len = a.len().max(b.len());

    for i in 0..len {
        let left = a.get(i).map(String::as_str).unwrap_or("0");
        let right = b.get(i).map(String::as_str).unwrap_or("0");
        let ordering = match (left.parse::<u64>(), right.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => left.cmp(right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Catalog configuration.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCatalogConfig {
    /// Locally known release versions.
    pub local_versions: Vec<String>,
    /// Optional `owner/repo` whose latest release is also considered.
    pub github_repo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
}

/// Resolves the newest available agent version.
pub struct ReleaseCatalog {
    config: ReleaseCatalogConfig,
    client: reqwest::Client,
}

impl ReleaseCatalog {
    pub fn new(config: ReleaseCatalogConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// The newest version strictly above `current`, if any.
    pub async fn newest_above(&self, current: &str) -> Option<String> {
        let mut candidates = self.config.local_versions.clone();
        if let Some(latest) = self.fetch_github_latest().await {
            candidates.push(latest);
        }

        candidates
            .into_iter()
            .filter(|v| compare_versions(v, current) == Ordering::Greater)
            .max_by(|a, b| compare_versions(a, b))
    }

    async fn fetch_github_latest(&self) -> Option<String> {
        let repo = self.config.github_repo.as_deref()?;
        let url = format!("https://api.github.com/repos/{}/releases/latest", repo);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "manlab-server")
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<GithubRelease>().await {
                    Ok(release) => {
                        debug!(tag = %release.tag_name, "Fetched latest GitHub release");
                        Some(release.tag_name)
                    }
                    Err(e) => {
                        warn!(error = %e, "Malformed GitHub release response");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!(status = %response.status(), "GitHub release lookup failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "GitHub release lookup failed");
                None
            }
        }
    }
}
