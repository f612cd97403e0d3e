//! # Doc Registry
//!
//! Persistent metadata and link graph over a documentation tree, kept in sync with the
//! filesystem and repaired when references break.
//!
//! ## Pipeline
//!
//! ```text
//! Filesystem events
//!     │
//!     ├──> Watcher (debounced, ordered update queue)
//!     │      └─> Scanner (hash-skipping, fail-soft)
//!     │             └─> FileRecordStore (single JSON snapshot)
//!     │
//!     ├──> Scheduler (full scan / validate / report, try-lock)
//!     │      └─> LinkValidator ──> PathMatcher (repairs)
//!     │
//!     └──> RegistryService (read with self-healing, search, status)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use docreg_registry::{Registry, RegistryConfig, RegistryService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Registry::open(RegistryConfig::for_root("/path/to/docs")).await?;
//!     registry.scan_all().await?;
//!     registry.validate_all().await?;
//!
//!     let service = RegistryService::new(registry);
//!     let status = service.status().await;
//!     println!("{} files, health {}%", status.total_files, status.health_score);
//!     Ok(())
//! }
//! ```

mod access_log;
mod config;
mod error;
mod extract;
mod model;
mod mutation;
mod registry;
mod report;
mod scanner;
mod scheduler;
mod service;
mod snapshot_lock;
mod stats;
mod store;
mod validator;
mod watcher;

pub use access_log::AccessLog;
pub use config::{RegistryConfig, RepairConfig, ScheduleConfig, WatchConfig, STATE_DIR_NAME};
pub use error::{RegistryError, Result};
pub use extract::{Extracted, MarkdownExtractor, MetadataExtractor};
pub use model::{
    slug_for_path, unix_now_ms, AccessLogEntry, AccessOperation, FileRecord, FileStatus,
    FixEntry, FixLogEntry, FixSource, LinkRecord, LinkStatus, LinkType, ScanHistoryEntry,
};
pub use mutation::{MutationGuard, MutationLock};
pub use registry::{JobOutcome, Registry};
pub use report::{render_file_list, render_link_report, RegistryReport, ReportStatistics};
pub use scanner::{content_hash, ScanOutcome, ScannedFile, Scanner};
pub use scheduler::Scheduler;
pub use service::{ReadResult, RegistryService};
pub use stats::{health_score, RegistryStatus, ScanStats, ValidationStats};
pub use store::{FileRecordStore, Snapshot, SNAPSHOT_SCHEMA_VERSION};
pub use validator::{LinkValidator, Repair};
pub use watcher::{
    drain_queue, enqueue_event, map_event, DrainSummary, PendingUpdate, RegistryWatcher,
    UpdateOp, UpdateQueue, UpdateState, WatchUpdate, WatcherHealth,
};
