use crate::config::RegistryConfig;
use crate::extract::{MarkdownExtractor, MetadataExtractor};
use crate::model::{system_time_ms, unix_now_ms, AccessOperation, FileRecord, ScanHistoryEntry};
use crate::mutation::{MutationGuard, MutationLock};
use crate::report::{RegistryReport, REPORT_RECENT_ACCESS};
use crate::scanner::{content_hash, ScanOutcome, Scanner};
use crate::stats::{ScanStats, ValidationStats};
use crate::store::{write_snapshot, FileRecordStore};
use crate::validator::{LinkValidator, Repair};
use crate::Result;
use docreg_matcher::PathMatcher;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of a periodic job that may be skipped while another writer is active.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Completed(T),
    Deferred,
}

impl<T> JobOutcome<T> {
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }
}

/// Shared core: the record store, the mutation lock and the scan/validate pipeline.
///
/// Every graph mutation happens while the [`MutationLock`] is held. The data lock around the
/// store is only taken for short reads and applies, so queries never wait on scan I/O.
pub struct Registry {
    config: Arc<RegistryConfig>,
    store: RwLock<FileRecordStore>,
    mutation: MutationLock,
    scanner: Scanner,
    validator: LinkValidator,
    matcher: PathMatcher,
}

impl Registry {
    pub async fn open(config: RegistryConfig) -> Result<Arc<Self>> {
        let extractor = Arc::new(MarkdownExtractor::new(&config.extensions));
        Self::open_with_extractor(config, extractor).await
    }

    /// Open with a custom metadata extraction strategy.
    pub async fn open_with_extractor(
        mut config: RegistryConfig,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        // Watch events arrive with canonical paths.
        if let Ok(root) = config.root.canonicalize() {
            for state in [&mut config.snapshot_path, &mut config.report_path]
                .into_iter()
                .flatten()
            {
                if let Ok(relative) = state.strip_prefix(&config.root) {
                    *state = root.join(relative);
                }
            }
            config.root = root;
        }
        let config = Arc::new(config);
        let store =
            FileRecordStore::load(config.snapshot_path(), config.access_log_capacity).await;
        let scanner = Scanner::new(Arc::clone(&config), extractor)?;
        let matcher = PathMatcher::new(config.matcher);
        let validator = LinkValidator::new(matcher.clone(), config.root.clone());

        Ok(Arc::new(Self {
            config,
            store: RwLock::new(store),
            mutation: MutationLock::new(),
            scanner,
            validator,
            matcher,
        }))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub const fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub const fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub const fn mutation_lock(&self) -> &MutationLock {
        &self.mutation
    }

    /// Last applied state. Never blocks on scan I/O.
    pub async fn read_store(&self) -> RwLockReadGuard<'_, FileRecordStore> {
        self.store.read().await
    }

    pub(crate) async fn write_store(&self) -> RwLockWriteGuard<'_, FileRecordStore> {
        self.store.write().await
    }

    pub async fn lock_mutation(&self) -> MutationGuard<'_> {
        self.mutation.lock().await
    }

    pub fn try_lock_mutation(&self) -> Option<MutationGuard<'_>> {
        self.mutation.try_lock()
    }

    pub async fn lock_mutation_timeout(&self, timeout: Duration) -> Option<MutationGuard<'_>> {
        self.mutation.lock_timeout(timeout).await
    }

    pub async fn scan_all(&self) -> Result<ScanStats> {
        let guard = self.lock_mutation().await;
        self.scan_all_locked(&guard).await
    }

    /// Periodic variant: skipped when another writer holds the lock.
    pub async fn try_scan_all(&self) -> Result<JobOutcome<ScanStats>> {
        let Some(guard) = self.try_lock_mutation() else {
            log::info!("Full scan deferred: registry busy");
            return Ok(JobOutcome::Deferred);
        };
        self.scan_all_locked(&guard).await.map(JobOutcome::Completed)
    }

    /// Scan every relevant file, soft-delete records whose file vanished, refresh link
    /// statuses and persist.
    pub async fn scan_all_locked(&self, _guard: &MutationGuard<'_>) -> Result<ScanStats> {
        let start = Instant::now();
        let mut stats = ScanStats::new();
        let known = self.read_store().await.live_hashes();

        let mut seen = HashSet::new();
        for path in self.scanner.discover() {
            let Some(rel) = self.scanner.relative(&path) else {
                continue;
            };
            let outcome = self
                .scanner
                .scan_file(&path, known.get(&rel).map(String::as_str))
                .await;
            match outcome {
                ScanOutcome::Unchanged => {
                    stats.skipped += 1;
                    seen.insert(rel);
                }
                ScanOutcome::Scanned(file) => {
                    if file.parsed.is_err() {
                        stats.add_error(rel.clone());
                    } else {
                        stats.processed += 1;
                    }
                    self.write_store().await.apply_scan(file);
                    seen.insert(rel);
                }
                ScanOutcome::Missing | ScanOutcome::Ignored => {}
            }
        }

        {
            let mut store = self.write_store().await;
            for path in store.live_paths() {
                if !seen.contains(&path) && store.mark_deleted_path(&path) {
                    stats.deleted += 1;
                }
            }
            self.validator.resolve_exact(&mut store);
            stats.time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            store.push_scan_history(ScanHistoryEntry {
                timestamp: unix_now_ms(),
                files_scanned: stats.processed + stats.errors,
                skipped: stats.skipped,
                errors: stats.errors,
                duration_ms: stats.time_ms,
            });
        }

        log::info!(
            "Scan complete: {} processed, {} unchanged, {} errors, {} deleted in {} ms",
            stats.processed,
            stats.skipped,
            stats.errors,
            stats.deleted,
            stats.time_ms
        );
        self.persist_logged().await;
        Ok(stats)
    }

    /// Rescan one file and refresh link statuses. `None` when the path is not tracked.
    pub async fn scan_one(&self, path: &Path) -> Result<Option<FileRecord>> {
        let guard = self.lock_mutation().await;
        let record = self.scan_one_locked(&guard, path).await?;
        self.refresh_links_locked(&guard).await;
        let id = record.map(|r| r.id);
        Ok(match id {
            Some(id) => self.read_store().await.get_by_id(&id).cloned(),
            None => None,
        })
    }

    /// Rescan one file without refreshing link statuses (batched by the caller).
    ///
    /// A file that no longer exists is soft-deleted.
    pub async fn scan_one_locked(
        &self,
        _guard: &MutationGuard<'_>,
        path: &Path,
    ) -> Result<Option<FileRecord>> {
        let Some(rel) = self.scanner.relative(path) else {
            return Ok(None);
        };
        let known = self
            .read_store()
            .await
            .get(&rel)
            .filter(|r| !r.is_deleted())
            .map(|r| r.content_hash.clone());

        match self.scanner.scan_file(path, known.as_deref()).await {
            ScanOutcome::Unchanged => Ok(self.read_store().await.get(&rel).cloned()),
            ScanOutcome::Scanned(file) => Ok(Some(self.write_store().await.apply_scan(file))),
            ScanOutcome::Missing => {
                self.write_store().await.mark_deleted_path(&rel);
                Ok(None)
            }
            ScanOutcome::Ignored => Ok(None),
        }
    }

    /// Soft-delete the record at `path`, or every record below it when `path` is a directory.
    pub async fn delete_path_locked(&self, _guard: &MutationGuard<'_>, path: &Path) -> usize {
        let Some(rel) = self.scanner.relative(path) else {
            return 0;
        };
        let mut store = self.write_store().await;
        if store.get(&rel).is_some() {
            usize::from(store.mark_deleted_path(&rel))
        } else {
            store.mark_deleted_under(&rel).len()
        }
    }

    /// Re-resolve links exactly and rebuild `linksIn`, without repairing.
    pub async fn refresh_links_locked(&self, _guard: &MutationGuard<'_>) {
        let mut store = self.write_store().await;
        self.validator.resolve_exact(&mut store);
    }

    pub async fn validate_all(&self) -> Result<ValidationStats> {
        let guard = self.lock_mutation().await;
        self.validate_all_locked(&guard).await
    }

    pub async fn try_validate_all(&self) -> Result<JobOutcome<ValidationStats>> {
        let Some(guard) = self.try_lock_mutation() else {
            log::info!("Link validation deferred: registry busy");
            return Ok(JobOutcome::Deferred);
        };
        self.validate_all_locked(&guard).await.map(JobOutcome::Completed)
    }

    pub async fn validate_all_locked(&self, _guard: &MutationGuard<'_>) -> Result<ValidationStats> {
        let (stats, repairs) = {
            let mut store = self.write_store().await;
            self.validator.validate_all(&mut store)
        };
        if self.config.repair.write_back && !repairs.is_empty() {
            self.write_back(repairs).await;
        }
        self.persist_logged().await;
        Ok(stats)
    }

    pub async fn write_report(&self) -> Result<RegistryReport> {
        let guard = self.lock_mutation().await;
        self.write_report_locked(&guard).await
    }

    pub async fn try_write_report(&self) -> Result<JobOutcome<RegistryReport>> {
        let Some(guard) = self.try_lock_mutation() else {
            log::info!("Report generation deferred: registry busy");
            return Ok(JobOutcome::Deferred);
        };
        self.write_report_locked(&guard).await.map(JobOutcome::Completed)
    }

    async fn write_report_locked(&self, _guard: &MutationGuard<'_>) -> Result<RegistryReport> {
        let report = RegistryReport::build(&*self.read_store().await, REPORT_RECENT_ACCESS);
        report.write_to(&self.config.report_path()).await?;
        Ok(report)
    }

    /// Append an access log entry for `requested` and bump `lastAccessed` on the file that was
    /// actually read.
    pub async fn record_access(
        &self,
        requested: &str,
        operation: AccessOperation,
        read_path: Option<&str>,
    ) {
        let mut store = self.write_store().await;
        store.access_log_mut().record(requested, operation);
        if let Some(path) = read_path {
            store.touch(path);
        }
    }

    /// Write the whole store to the snapshot file.
    pub async fn persist(&self) -> Result<()> {
        let bytes = self.read_store().await.to_json()?;
        write_snapshot(&self.config.snapshot_path(), &bytes).await
    }

    /// [`persist`](Self::persist), logging instead of returning failures. In-memory state stays
    /// authoritative until the next successful save.
    pub async fn persist_logged(&self) {
        if let Err(err) = self.persist().await {
            log::error!("Failed to persist registry snapshot: {err}");
        }
    }

    /// Final save under the mutation lock.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.lock_mutation().await;
        self.persist().await
    }

    /// Rewrite repaired targets in their source files and record the new content hash so the
    /// resulting change event is a no-op.
    async fn write_back(&self, repairs: Vec<Repair>) {
        let mut by_file: BTreeMap<PathBuf, (String, Vec<Repair>)> = BTreeMap::new();
        for repair in repairs {
            by_file
                .entry(repair.full_path.clone())
                .or_insert_with(|| (repair.file_id.clone(), Vec::new()))
                .1
                .push(repair);
        }

        for (full_path, (file_id, repairs)) in by_file {
            match rewrite_links_in_file(&full_path, &repairs).await {
                Ok(Some((hash, size, modified))) => {
                    let mut store = self.write_store().await;
                    if let Some(record) = store.get_mut(&file_id) {
                        record.content_hash = hash;
                        record.size = size;
                        record.last_modified = modified;
                    }
                    log::info!(
                        "Wrote {} repaired link(s) back to {}",
                        repairs.len(),
                        full_path.display()
                    );
                }
                Ok(None) => log::debug!("No link text to rewrite in {}", full_path.display()),
                Err(err) => log::warn!(
                    "Failed to write repaired links to {}: {err}",
                    full_path.display()
                ),
            }
        }
    }
}

async fn rewrite_links_in_file(
    path: &Path,
    repairs: &[Repair],
) -> Result<Option<(String, u64, u64)>> {
    let original = tokio::fs::read_to_string(path).await?;
    let mut content = original.clone();
    for repair in repairs {
        for (from, to) in [
            (format!("]({})", repair.before), format!("]({})", repair.after)),
            (format!("](<{}>)", repair.before), format!("](<{}>)", repair.after)),
        ] {
            content = content.replace(&from, &to);
        }
    }
    if content == original {
        return Ok(None);
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Hidden name keeps the temp file out of discovery and watch handling.
    let tmp = path.with_file_name(format!(".{file_name}.docreg.tmp"));
    tokio::fs::write(&tmp, content.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;

    let modified = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map_or(0, system_time_ms);
    Ok(Some((
        content_hash(content.as_bytes()),
        content.len() as u64,
        modified,
    )))
}
