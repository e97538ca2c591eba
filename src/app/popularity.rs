//! Popularity provider
//!
//! A read-only source of ranked `(title, category, path hint)` items, used to
//! order the `popular` category. Hints are resolved against the library:
//! a file becomes one candidate, a directory contributes every media file in
//! it at the same rank, anything else is skipped. When the provider is
//! unconfigured, fails or returns nothing, the caller falls back to the
//! scanner; the two are never blended in one run.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::models::{is_plain_relative, system_time_to_utc, Candidate};
use crate::app::scanner::{ScanFilter, SourceScanner};
use crate::config::PopularityConfig;
use crate::constants::USER_AGENT;
use crate::errors::{PopularityError, PopularityResult};

/// One ranked item
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopularItem {
    /// Human-readable title
    pub title: String,
    /// Provider's own category label, informational
    #[serde(default)]
    pub category: Option<String>,
    /// Absolute path, or a path relative to a library root
    #[serde(alias = "path_hint")]
    pub path: PathBuf,
}

/// Accepts a bare list or an object wrapping one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PopularResponse {
    List(Vec<PopularItem>),
    Wrapped { items: Vec<PopularItem> },
}

impl PopularResponse {
    fn into_items(self) -> Vec<PopularItem> {
        match self {
            PopularResponse::List(items) | PopularResponse::Wrapped { items } => items,
        }
    }
}

/// Source of popularity-ranked items, most popular first
#[async_trait]
pub trait PopularityProvider: Send + Sync {
    /// Up to `limit` items in rank order
    async fn top(&self, limit: usize) -> PopularityResult<Vec<PopularItem>>;
}

/// Provider backed by an HTTP endpoint returning JSON
#[derive(Debug, Clone)]
pub struct HttpPopularity {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HttpPopularity {
    /// Provider for `url` with a per-request timeout
    pub fn new(url: Url, timeout: Duration) -> PopularityResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// Provider from configuration, `None` when no endpoint is configured
    pub fn from_config(config: &PopularityConfig) -> PopularityResult<Option<Self>> {
        config
            .url
            .clone()
            .map(|url| Self::new(url, config.timeout))
            .transpose()
    }
}

#[async_trait]
impl PopularityProvider for HttpPopularity {
    async fn top(&self, limit: usize) -> PopularityResult<Vec<PopularItem>> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                PopularityError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                PopularityError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(PopularityError::ServerError {
                status: response.status().as_u16(),
            });
        }

        let mut items = response.json::<PopularResponse>().await?.into_items();
        items.truncate(limit);
        debug!("Popularity provider returned {} items", items.len());
        Ok(items)
    }
}

/// Provider with a fixed answer
#[derive(Debug, Clone, Default)]
pub struct StaticPopularity {
    items: Vec<PopularItem>,
}

impl StaticPopularity {
    pub fn new(items: Vec<PopularItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl PopularityProvider for StaticPopularity {
    async fn top(&self, limit: usize) -> PopularityResult<Vec<PopularItem>> {
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

/// Ask the provider and resolve the answer, or `None` to fall back
///
/// Errors are logged and treated like an empty answer.
pub async fn ranked_candidates(
    provider: &dyn PopularityProvider,
    limit: usize,
    resolver: &HintResolver<'_>,
) -> Option<Vec<Candidate>> {
    let items = match provider.top(limit).await {
        Ok(items) => items,
        Err(e) => {
            warn!("Popularity provider unavailable, falling back to scan: {}", e);
            return None;
        }
    };

    let candidates = resolver.resolve(&items);
    if candidates.is_empty() {
        info!(
            "Popularity provider returned {} items but none resolved, falling back to scan",
            items.len()
        );
        return None;
    }

    info!(
        "Resolved {} popularity items to {} candidates",
        items.len(),
        candidates.len()
    );
    Some(candidates)
}

/// Maps path hints to candidates on the library
#[derive(Debug, Clone)]
pub struct HintResolver<'a> {
    roots: &'a [PathBuf],
    filter: ScanFilter,
    cache_root: &'a Path,
}

impl<'a> HintResolver<'a> {
    /// Resolve relative hints against `roots`, never into `cache_root`
    pub fn new(roots: &'a [PathBuf], filter: ScanFilter, cache_root: &'a Path) -> Self {
        Self {
            roots,
            filter,
            cache_root,
        }
    }

    /// Candidates for `items`, ranked by position; duplicates keep the best rank
    pub fn resolve(&self, items: &[PopularItem]) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for (rank, item) in items.iter().enumerate() {
            let rank = rank as u32;
            let Some(path) = self.locate(&item.path) else {
                debug!("Skipping unresolvable hint '{}' ({})", item.title, item.path.display());
                continue;
            };

            if path.is_dir() {
                let scanner = SourceScanner::new(&path, self.filter.clone())
                    .excluding([self.cache_root.to_path_buf()]);
                match scanner.files() {
                    Ok(files) => {
                        for file in files {
                            if seen.insert(file.path.clone()) {
                                candidates.extend(self.candidate(file.path, rank));
                            }
                        }
                    }
                    Err(e) => debug!("Skipping hint directory {}: {}", path.display(), e),
                };
            } else if path.is_file() && self.filter.matches_extension(&path) {
                if seen.insert(path.clone()) {
                    candidates.extend(self.candidate(path, rank));
                }
            } else {
                debug!("Skipping hint '{}': not a media file", item.title);
            }
        }

        candidates
    }

    /// Existing library path for `hint`; hints that climb with `..` or
    /// point outside every root are refused
    fn locate(&self, hint: &Path) -> Option<PathBuf> {
        if hint
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            debug!("Refusing hint with relative components: {}", hint.display());
            return None;
        }

        let path = if hint.is_absolute() {
            Some(hint.to_path_buf())
                .filter(|p| self.roots.iter().any(|root| p.starts_with(root)))
                .filter(|p| p.exists())
        } else {
            self.roots.iter().map(|r| r.join(hint)).find(|p| p.exists())
        }?;

        if path.starts_with(self.cache_root) {
            return None;
        }
        Some(path)
    }

    fn candidate(&self, path: PathBuf, rank: u32) -> Option<Candidate> {
        let relative = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .filter(|relative| is_plain_relative(relative))?;

        let metadata = std::fs::metadata(&path).ok();
        let mut candidate = Candidate::new(path, relative, 0).with_rank(rank);
        candidate.size_bytes = metadata.as_ref().map(|m| m.len());
        candidate.modified = metadata.and_then(|m| system_time_to_utc(m.modified()));
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn item(title: &str, path: &str) -> PopularItem {
        PopularItem {
            title: title.to_string(),
            category: None,
            path: PathBuf::from(path),
        }
    }

    fn write(path: &Path, len: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_response_shapes() {
        let list: PopularResponse =
            serde_json::from_str(r#"[{"title":"A","category":"movie","path":"/a.mkv"}]"#).unwrap();
        assert_eq!(list.into_items().len(), 1);

        let wrapped: PopularResponse =
            serde_json::from_str(r#"{"items":[{"title":"B","path_hint":"b"}]}"#).unwrap();
        let items = wrapped.into_items();
        assert_eq!(items[0].path, PathBuf::from("b"));
        assert_eq!(items[0].category, None);
    }

    #[test]
    fn test_resolve_files_dirs_and_misses() {
        let library = TempDir::new().unwrap();
        let root = library.path().to_path_buf();
        write(&root.join("movies/Film.mkv"), 10);
        write(&root.join("tv/Show/e1.mkv"), 20);
        write(&root.join("tv/Show/e2.mkv"), 30);
        write(&root.join("tv/Show/notes.txt"), 5);
        let cache = TempDir::new().unwrap();

        let roots = vec![root.clone()];
        let resolver = HintResolver::new(
            &roots,
            ScanFilter::with_extensions(["mkv"]),
            cache.path(),
        );
        let items = vec![
            item("Show", "tv/Show"),
            item("Missing", "tv/Nope"),
            item("Film", &root.join("movies/Film.mkv").to_string_lossy()),
        ];

        let candidates = resolver.resolve(&items);

        assert_eq!(candidates.len(), 3);
        let show: Vec<_> = candidates.iter().filter(|c| c.rank == Some(0)).collect();
        assert_eq!(show.len(), 2);
        let film = candidates.iter().find(|c| c.rank == Some(2)).unwrap();
        assert_eq!(film.relative_path, PathBuf::from("movies/Film.mkv"));
        assert_eq!(film.size_bytes, Some(10));
    }

    #[test]
    fn test_resolve_refuses_cache_paths() {
        let cache = TempDir::new().unwrap();
        write(&cache.path().join("popular/a.mkv"), 1);
        let roots = vec![cache.path().to_path_buf()];
        let resolver = HintResolver::new(&roots, ScanFilter::default(), cache.path());

        assert!(resolver.resolve(&[item("a", "popular/a.mkv")]).is_empty());
    }

    #[test]
    fn test_resolve_refuses_hints_outside_roots() {
        let library = TempDir::new().unwrap();
        let movies = library.path().join("movies");
        write(&movies.join("Film.mkv"), 10);
        write(&library.path().join("secret.mkv"), 10);
        let outside = TempDir::new().unwrap();
        write(&outside.path().join("other.mkv"), 10);
        let cache = TempDir::new().unwrap();

        let roots = vec![movies.clone()];
        let resolver = HintResolver::new(&roots, ScanFilter::with_extensions(["mkv"]), cache.path());
        let climbing = movies.join("../secret.mkv");
        let items = vec![
            item("climb", "../secret.mkv"),
            item("climb-absolute", &climbing.to_string_lossy()),
            item("elsewhere", &outside.path().join("other.mkv").to_string_lossy()),
            item("film", "Film.mkv"),
        ];

        let candidates = resolver.resolve(&items);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, PathBuf::from("Film.mkv"));
        assert!(candidates.iter().all(|c| is_plain_relative(&c.relative_path)));
    }

    #[tokio::test]
    async fn test_fallback_on_empty_or_unresolved() {
        let library = TempDir::new().unwrap();
        let roots = vec![library.path().to_path_buf()];
        let resolver = HintResolver::new(&roots, ScanFilter::default(), Path::new("/nonexistent"));

        let empty = StaticPopularity::default();
        assert!(ranked_candidates(&empty, 10, &resolver).await.is_none());

        let unresolved = StaticPopularity::new(vec![item("x", "nowhere.mkv")]);
        assert!(ranked_candidates(&unresolved, 10, &resolver).await.is_none());

        write(&library.path().join("here.mkv"), 3);
        let ok = StaticPopularity::new(vec![item("here", "here.mkv")]);
        let candidates = ranked_candidates(&ok, 10, &resolver).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rank, Some(0));
    }

    #[tokio::test]
    async fn test_http_provider_unreachable_is_error() {
        let provider = HttpPopularity::new(
            Url::parse("http://127.0.0.1:9/popular").unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(provider.top(5).await.is_err());
    }
}
