//! Configuration management for the media cache
//!
//! Multi-source loading (explicit file, project-local file, user config,
//! system config), environment overrides and zero-config defaults. The
//! values here are used directly at runtime; there is no separate runtime
//! representation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::models::{Budget, Category};
use crate::constants::{budgets, env, external, files, logging, monitor, scan, schedule};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache and state locations
    pub paths: PathsConfig,
    /// Backing library layout
    pub library: LibraryConfig,
    /// Per-category budgets and sources
    pub categories: CategoriesConfig,
    /// Ranked candidate source
    pub popularity: PopularityConfig,
    /// Chat alert channel
    pub notify: NotifyConfig,
    /// Consumer media server mount commands
    pub mount: MountConfig,
    /// Cron fragment management
    pub schedule: ScheduleConfig,
    /// Monitor thresholds
    pub monitor: MonitorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cache root and state directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the symlink tree on fast storage
    pub cache_root: PathBuf,
    /// Manifest, locks and logs
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(files::APP_DIR),
            state_dir: base.join(files::APP_DIR),
        }
    }
}

/// Backing library layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library roots on the NAS
    pub roots: Vec<PathBuf>,
    /// Ingestion ("incoming") area
    pub incoming: Option<PathBuf>,
    /// File that must exist in every root when the NAS is mounted
    pub mount_marker: Option<String>,
    /// Admitted file extensions, case-insensitive
    pub extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            incoming: None,
            mount_marker: None,
            extensions: scan::DEFAULT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Budget and sources for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Whether the category's job touches it at all
    pub enabled: bool,
    /// Maximum aggregate bytes
    pub max_bytes: u64,
    /// Retention window in days
    pub retention_days: u32,
    /// Per-file size cap in bytes
    pub max_file_bytes: u64,
    /// Directories scanned for candidates; empty means the category default
    pub sources: Vec<PathBuf>,
    /// Only files modified within this many days
    pub max_age_days: Option<u32>,
    /// Only files at least this large
    pub min_size_bytes: Option<u64>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: budgets::DEFAULT_MAX_BYTES,
            retention_days: budgets::DEFAULT_RETENTION_DAYS,
            max_file_bytes: budgets::DEFAULT_MAX_FILE_BYTES,
            sources: Vec::new(),
            max_age_days: None,
            min_size_bytes: None,
        }
    }
}

impl CategoryConfig {
    /// Budget derived from this category's limits
    pub fn budget(&self) -> Budget {
        Budget::new(self.max_bytes, self.retention_days, self.max_file_bytes)
    }
}

/// All category sections
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CategoriesConfig {
    pub movies: CategoryConfig,
    pub tv: CategoryConfig,
    pub doc: CategoryConfig,
    pub recent: CategoryConfig,
    pub popular: CategoryConfig,
    pub downloads: CategoryConfig,
}

impl CategoriesConfig {
    /// Section for a category
    pub fn get(&self, category: Category) -> &CategoryConfig {
        match category {
            Category::Movies => &self.movies,
            Category::Tv => &self.tv,
            Category::Doc => &self.doc,
            Category::Recent => &self.recent,
            Category::Popular => &self.popular,
            Category::Downloads => &self.downloads,
        }
    }

    /// Mutable section for a category
    pub fn get_mut(&mut self, category: Category) -> &mut CategoryConfig {
        match category {
            Category::Movies => &mut self.movies,
            Category::Tv => &mut self.tv,
            Category::Doc => &mut self.doc,
            Category::Recent => &mut self.recent,
            Category::Popular => &mut self.popular,
            Category::Downloads => &mut self.downloads,
        }
    }
}

/// Popularity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopularityConfig {
    /// Endpoint returning ranked titles; unset disables the provider
    pub url: Option<Url>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum ranked titles requested
    pub limit: usize,
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: external::POPULARITY_TIMEOUT,
            limit: external::POPULARITY_LIMIT,
        }
    }
}

/// Notification channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Chat webhook; unset disables notifications
    pub webhook_url: Option<Url>,
    /// Delivery attempts
    pub attempts: u32,
    /// Fixed delay between attempts
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            attempts: external::NOTIFY_ATTEMPTS,
            backoff: external::NOTIFY_BACKOFF,
            timeout: external::NOTIFY_TIMEOUT,
        }
    }
}

/// Consumer mount commands, run through `sh -c`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Exits 0 when the cache is attached to the consumer
    pub status_command: Option<String>,
    /// Attaches the cache root to the consumer
    pub attach_command: Option<String>,
    /// Detaches the cache root from the consumer
    pub detach_command: Option<String>,
    /// Per-command timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            status_command: None,
            attach_command: None,
            detach_command: None,
            timeout: external::MOUNT_TIMEOUT,
        }
    }
}

/// Cron fragment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Cron fragment path (e.g. /etc/cron.d/media-cache); unset means scheduling is external
    pub cron_file: Option<PathBuf>,
    /// User column for /etc/cron.d style files
    pub user: Option<String>,
    /// Admission sweep cadence
    pub sweep: String,
    /// Recency sweep cadence
    pub recent: String,
    /// Quick monitor cadence
    pub monitor: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron_file: None,
            user: None,
            sweep: schedule::SWEEP_CRON.to_string(),
            recent: schedule::RECENT_CRON.to_string(),
            monitor: schedule::MONITOR_CRON.to_string(),
        }
    }
}

/// Monitor thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Categories with fewer entries are reported as underused
    pub underused_entry_threshold: usize,
    /// More broken links than this triggers a recommendation
    pub broken_link_threshold: usize,
    /// Window for counting recently accessed entries
    pub recent_access_days: u32,
    /// Budget usage percentage reported as near full
    pub near_budget_percent: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            underused_entry_threshold: monitor::UNDERUSED_ENTRY_THRESHOLD,
            broken_link_threshold: monitor::BROKEN_LINK_THRESHOLD,
            recent_access_days: monitor::RECENT_ACCESS_DAYS,
            near_budget_percent: monitor::NEAR_BUDGET_PERCENT,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Append job logs under `<state_dir>/logs`
    pub file_logging: bool,
    /// Rotate a job log above this size
    pub max_log_bytes: u64,
    /// Rotated generations kept
    pub max_log_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_log_bytes: logging::MAX_LOG_BYTES,
            max_log_files: logging::MAX_LOG_FILES,
        }
    }
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit, or first found in the standard locations)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let config_path = match config_file_override {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound { path }),
            Some(path) => Some(path),
            None => Self::find_config_file(),
        };

        if let Some(path) = config_path {
            debug!("Loading config from: {}", path.display());
            config = Self::load_from_file(&path).await?;
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(value) = std::env::var(env::WEBHOOK_URL) {
            self.notify.webhook_url = Some(parse_url(env::WEBHOOK_URL, &value)?);
        }
        if let Ok(value) = std::env::var(env::POPULARITY_URL) {
            self.popularity.url = Some(parse_url(env::POPULARITY_URL, &value)?);
        }
        Ok(())
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(".").join(files::LOCAL_CONFIG_FILE)];
        if let Ok(path) = Self::default_config_path() {
            search_paths.push(path);
        }
        #[cfg(unix)]
        search_paths.push(
            PathBuf::from("/etc")
                .join(files::APP_DIR)
                .join(files::CONFIG_FILE),
        );

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        debug!("No config file found in standard locations");
        None
    }

    /// Get the default config file path for the current user
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(files::APP_DIR).join(files::CONFIG_FILE))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Write a commented default configuration file
    ///
    /// Returns `Ok(false)` without touching anything if the file exists.
    pub async fn write_default(path: &Path) -> ConfigResult<bool> {
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Created default configuration file: {}", path.display());
        Ok(true)
    }

    /// Sources scanned for a category
    ///
    /// Explicit `sources` win; otherwise `downloads` scans the incoming area
    /// and `recent` / `popular` scan every library root. The library
    /// categories have no implicit sources.
    pub fn category_sources(&self, category: Category) -> Vec<PathBuf> {
        let section = self.categories.get(category);
        if !section.sources.is_empty() {
            return section.sources.clone();
        }

        match category {
            Category::Downloads => self.library.incoming.iter().cloned().collect(),
            Category::Recent | Category::Popular => self.library.roots.clone(),
            Category::Movies | Category::Tv | Category::Doc => Vec::new(),
        }
    }

    /// Age filter for a category, with the recency default for recent/downloads
    pub fn category_max_age(&self, category: Category) -> Option<u32> {
        let section = self.categories.get(category);
        match (section.max_age_days, category) {
            (Some(days), _) => Some(days),
            (None, Category::Recent | Category::Downloads) => {
                Some(budgets::DEFAULT_RECENT_MAX_AGE_DAYS)
            }
            (None, _) => None,
        }
    }

    /// Every directory the scanner may walk
    pub fn all_source_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.library.roots.clone();
        roots.extend(self.library.incoming.iter().cloned());
        for category in Category::ALL {
            roots.extend(self.categories.get(category).sources.iter().cloned());
        }
        roots.sort();
        roots.dedup();
        roots
    }

    /// Path of the manifest document
    pub fn manifest_path(&self) -> PathBuf {
        self.paths.state_dir.join(files::MANIFEST_FILE)
    }

    /// Directory holding job locks
    pub fn lock_dir(&self) -> PathBuf {
        self.paths.state_dir.join(files::LOCK_DIR)
    }

    /// Directory holding job logs
    pub fn log_dir(&self) -> PathBuf {
        self.paths.state_dir.join(files::LOG_DIR)
    }

    /// Validate value ranges, collecting every problem
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.paths.cache_root.as_os_str().is_empty() {
            errors.push("paths.cache_root must be set".to_string());
        } else if !self.paths.cache_root.is_absolute() {
            errors.push(format!(
                "paths.cache_root must be absolute: {}",
                self.paths.cache_root.display()
            ));
        }

        for category in Category::ALL {
            let section = self.categories.get(category);
            if section.max_file_bytes > section.max_bytes {
                errors.push(format!(
                    "categories.{}: max_file_bytes ({}) exceeds max_bytes ({})",
                    category, section.max_file_bytes, section.max_bytes
                ));
            }
            if section.retention_days == 0 {
                errors.push(format!("categories.{}: retention_days must be > 0", category));
            }
        }

        if self.notify.attempts == 0 {
            errors.push("notify.attempts must be > 0".to_string());
        }

        if self.library.extensions.is_empty() {
            errors.push("library.extensions must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        let defaults = PathsConfig::default();
        format!(
            r#"# Media Cache Configuration
# Symlink acceleration cache in front of a NAS media library.

[paths]
# Root of the symlink tree (fast local storage, exposed read-only to the media server)
cache_root = "{cache_root}"
# Manifest, locks and logs
state_dir = "{state_dir}"

[library]
# Library roots on the NAS
roots = []
# Ingestion area scanned by the downloads category
# incoming = "/mnt/nas/incoming"
# File that must exist in every root when the NAS is mounted
# mount_marker = ".nas-mounted"
extensions = [{extensions}]

# Per-category budgets. Sizes are in bytes.
[categories.movies]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}
# sources = ["/mnt/nas/movies"]

[categories.tv]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}
# sources = ["/mnt/nas/tv"]

[categories.doc]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}
# sources = ["/mnt/nas/documentaries"]

[categories.recent]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}
max_age_days = {recent_age}

[categories.popular]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}

[categories.downloads]
max_bytes = {max_bytes}
retention_days = {retention}
max_file_bytes = {max_file}
max_age_days = {recent_age}

[popularity]
# Ranked titles endpoint; leave unset to rank by file size only
# url = "http://localhost:8181/media-cache/popular"
timeout = "15s"
limit = {popularity_limit}

[notify]
# webhook_url = "https://discord.com/api/webhooks/..."
attempts = {notify_attempts}
backoff = "2s"
timeout = "10s"

[mount]
# status_command = "docker exec plex test -d /cache"
# attach_command = "..."
# detach_command = "..."
timeout = "1m"

[schedule]
# cron_file = "/etc/cron.d/media-cache"
# user = "root"
sweep = "{sweep_cron}"
recent = "{recent_cron}"
monitor = "{monitor_cron}"

[monitor]
underused_entry_threshold = {underused}
broken_link_threshold = {broken}
recent_access_days = {recent_access}
near_budget_percent = {near_budget:.1}

[logging]
level = "info"  # error, warn, info, debug, trace
file_logging = true
max_log_bytes = {max_log_bytes}
max_log_files = {max_log_files}
"#,
            cache_root = defaults.cache_root.display(),
            state_dir = defaults.state_dir.display(),
            extensions = scan::DEFAULT_EXTENSIONS
                .iter()
                .map(|e| format!("\"{}\"", e))
                .collect::<Vec<_>>()
                .join(", "),
            max_bytes = budgets::DEFAULT_MAX_BYTES,
            retention = budgets::DEFAULT_RETENTION_DAYS,
            max_file = budgets::DEFAULT_MAX_FILE_BYTES,
            recent_age = budgets::DEFAULT_RECENT_MAX_AGE_DAYS,
            popularity_limit = external::POPULARITY_LIMIT,
            notify_attempts = external::NOTIFY_ATTEMPTS,
            sweep_cron = schedule::SWEEP_CRON,
            recent_cron = schedule::RECENT_CRON,
            monitor_cron = schedule::MONITOR_CRON,
            underused = monitor::UNDERUSED_ENTRY_THRESHOLD,
            broken = monitor::BROKEN_LINK_THRESHOLD,
            recent_access = monitor::RECENT_ACCESS_DAYS,
            near_budget = monitor::NEAR_BUDGET_PERCENT,
            max_log_bytes = logging::MAX_LOG_BYTES,
            max_log_files = logging::MAX_LOG_FILES,
        )
    }
}

fn parse_url(field: &str, value: &str) -> ConfigResult<Url> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
