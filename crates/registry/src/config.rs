use crate::snapshot_lock::lock_path_for_snapshot;
use crate::store::temp_path_for_snapshot;
use crate::{RegistryError, Result};
use docreg_matcher::MatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (under the watched root) holding the snapshot, report and lock file.
pub const STATE_DIR_NAME: &str = ".docreg";
const SNAPSHOT_FILE_NAME: &str = "registry.json";
const REPORT_FILE_NAME: &str = "report.json";

/// Runtime configuration for the registry.
///
/// Every field has a default, so a TOML file only needs to name what it changes:
///
/// ```toml
/// root = "."
/// extensions = ["mdc", "md"]
///
/// [matcher]
/// threshold = 0.8
///
/// [schedule]
/// validate_secs = 600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root of the watched tree
    pub root: PathBuf,

    /// Snapshot location, relative to `root` unless absolute (defaults to
    /// `<root>/.docreg/registry.json`)
    pub snapshot_path: Option<PathBuf>,

    /// Periodic report location, relative to `root` unless absolute (defaults to
    /// `<root>/.docreg/report.json`)
    pub report_path: Option<PathBuf>,

    /// Extension allow-list, without the leading dot
    pub extensions: Vec<String>,

    /// Extra glob patterns excluded from discovery
    pub exclude: Vec<String>,

    /// Files larger than this are never read
    pub max_file_size_bytes: u64,

    /// Fuzzy repair tuning
    pub matcher: MatchConfig,

    /// Number of access log entries retained
    pub access_log_capacity: usize,

    pub schedule: ScheduleConfig,

    pub watch: WatchConfig,

    pub repair: RepairConfig,

    /// Upper bound on how long repair-on-read waits for the mutation lock
    pub read_lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub full_scan_secs: u64,
    pub validate_secs: u64,
    pub report_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_scan_secs: 60 * 60,
            validate_secs: 30 * 60,
            report_secs: 6 * 60 * 60,
        }
    }
}

impl ScheduleConfig {
    pub const fn full_scan_interval(&self) -> Duration {
        Duration::from_secs(self.full_scan_secs)
    }

    pub const fn validate_interval(&self) -> Duration {
        Duration::from_secs(self.validate_secs)
    }

    pub const fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period after the last event before the queue is drained
    pub debounce_ms: u64,
    /// Poll interval for backends that fall back to polling
    pub notify_poll_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            notify_poll_ms: 2_000,
        }
    }
}

impl WatchConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn notify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notify_poll_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Also rewrite repaired link targets in the source files
    pub write_back: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            snapshot_path: None,
            report_path: None,
            extensions: vec!["mdc".to_string(), "md".to_string(), "json".to_string()],
            exclude: Vec::new(),
            max_file_size_bytes: 1_048_576,
            matcher: MatchConfig::default(),
            access_log_capacity: 1_000,
            schedule: ScheduleConfig::default(),
            watch: WatchConfig::default(),
            repair: RepairConfig::default(),
            read_lock_timeout_ms: 2_000,
        }
    }
}

impl RegistryConfig {
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a TOML config file. A relative `root` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = base.join(&config.root);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.matcher.threshold) {
            return Err(RegistryError::Config(format!(
                "matcher.threshold must be within [0, 1], got {}",
                self.matcher.threshold
            )));
        }
        if !unit.contains(&self.matcher.tie_margin) {
            return Err(RegistryError::Config(format!(
                "matcher.tie_margin must be within [0, 1], got {}",
                self.matcher.tie_margin
            )));
        }
        if self.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(RegistryError::Config(
                "extensions must name at least one file type".to_string(),
            ));
        }
        if self.access_log_capacity == 0 {
            return Err(RegistryError::Config(
                "access_log_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .as_ref()
            .map_or_else(|| self.state_dir().join(SNAPSHOT_FILE_NAME), |p| self.root.join(p))
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .as_ref()
            .map_or_else(|| self.state_dir().join(REPORT_FILE_NAME), |p| self.root.join(p))
    }

    pub const fn read_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.read_lock_timeout_ms)
    }

    /// Snapshot, report, or one of their lock and temp siblings.
    pub fn is_state_file(&self, path: &Path) -> bool {
        [self.snapshot_path(), self.report_path()]
            .iter()
            .any(|state| {
                path == state
                    || path == temp_path_for_snapshot(state)
                    || path == lock_path_for_snapshot(state)
            })
    }

    /// Whether `path` carries an allow-listed extension.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|allowed| {
            allowed
                .trim_start_matches('.')
                .eq_ignore_ascii_case(ext)
        })
    }
}
