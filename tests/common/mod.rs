//! Shared fixture for integration tests: a temporary library, cache root
//! and state directory wired into one configuration.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use media_cache::app::jobs::JobContext;
use media_cache::config::AppConfig;
use tempfile::TempDir;

pub struct Library {
    pub temp: TempDir,
    pub config: AppConfig,
}

impl Library {
    /// Library with `tv` and `movies` roots and an incoming area; only the
    /// `tv` category has sources, with a budget of 100 bytes
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("library");
        for dir in ["tv", "movies", "incoming"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }

        let mut config = AppConfig::default();
        config.paths.cache_root = temp.path().join("cache");
        config.paths.state_dir = temp.path().join("state");
        config.library.roots = vec![root.join("tv"), root.join("movies")];
        config.categories.tv.sources = vec![root.join("tv")];
        config.categories.tv.max_bytes = 100;
        config.categories.tv.max_file_bytes = 100;
        config.categories.tv.retention_days = 30;
        config.categories.popular.enabled = false;
        config.categories.recent.enabled = false;
        config.categories.downloads.enabled = false;

        Self { temp, config }
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("library")
    }

    pub fn cache_root(&self) -> &Path {
        &self.config.paths.cache_root
    }

    /// Write a file of `size` bytes under the library
    pub fn write(&self, relative: &str, size: usize) -> PathBuf {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    pub fn context(&self) -> JobContext {
        JobContext::new(self.config.clone(), None)
    }

    /// Names of the files linked in a category directory, sorted
    pub fn linked(&self, category: &str) -> Vec<String> {
        let dir = self.cache_root().join(category);
        let mut names: Vec<String> = walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path_is_symlink())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
