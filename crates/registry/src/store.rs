use crate::access_log::AccessLog;
use crate::model::{
    slug_for_path, unix_now_ms, AccessLogEntry, FileRecord, FileStatus, FixLogEntry, LinkRecord,
    LinkStatus, ScanHistoryEntry,
};
use crate::scanner::ScannedFile;
use crate::snapshot_lock::acquire_snapshot_lock;
use crate::stats::RegistryStatus;
use crate::{RegistryError, Result};
use docreg_matcher::basename;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const MAX_SCAN_HISTORY: usize = 100;
const MAX_FIX_LOG: usize = 10_000;

/// On-disk shape of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub files: BTreeMap<String, FileRecord>,
    /// Derived view of every record's `linksOut`; ignored on load.
    #[serde(default)]
    pub links: BTreeMap<String, Vec<LinkRecord>>,
    #[serde(default)]
    pub access_log: Vec<AccessLogEntry>,
    #[serde(default)]
    pub scan_history: Vec<ScanHistoryEntry>,
    #[serde(default)]
    pub fix_history: Vec<FixLogEntry>,
    pub last_updated: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    schema_version: u32,
    files: &'a BTreeMap<String, FileRecord>,
    links: BTreeMap<&'a str, &'a [LinkRecord]>,
    access_log: Vec<&'a AccessLogEntry>,
    scan_history: &'a VecDeque<ScanHistoryEntry>,
    fix_history: &'a [FixLogEntry],
    last_updated: u64,
}

/// In-memory file records and link graph, persisted as one JSON snapshot.
///
/// Not synchronized: callers serialize mutation (see `Registry`).
#[derive(Debug)]
pub struct FileRecordStore {
    snapshot_path: PathBuf,
    files: BTreeMap<String, FileRecord>,
    path_index: HashMap<String, String>,
    access_log: AccessLog,
    scan_history: VecDeque<ScanHistoryEntry>,
    fix_history: Vec<FixLogEntry>,
    last_updated: u64,
}

impl FileRecordStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, access_log_capacity: usize) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            files: BTreeMap::new(),
            path_index: HashMap::new(),
            access_log: AccessLog::new(access_log_capacity),
            scan_history: VecDeque::new(),
            fix_history: Vec::new(),
            last_updated: 0,
        }
    }

    /// Load the last snapshot. A missing or unreadable snapshot yields an empty store.
    pub async fn load(snapshot_path: impl Into<PathBuf>, access_log_capacity: usize) -> Self {
        let snapshot_path = snapshot_path.into();
        let mut store = Self::new(snapshot_path.clone(), access_log_capacity);

        let bytes = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return store,
            Err(err) => {
                log::warn!(
                    "Failed to read snapshot {}: {err}; starting empty",
                    snapshot_path.display()
                );
                return store;
            }
        };
        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "Corrupt snapshot {}: {err}; starting empty",
                    snapshot_path.display()
                );
                return store;
            }
        };
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            log::warn!(
                "Snapshot {} has schema version {} (expected {}); starting empty",
                snapshot_path.display(),
                snapshot.schema_version,
                SNAPSHOT_SCHEMA_VERSION
            );
            return store;
        }

        for (id, mut record) in snapshot.files {
            record.id.clone_from(&id);
            store.path_index.insert(record.path.clone(), id.clone());
            store.files.insert(id, record);
        }
        store.access_log = AccessLog::from_entries(access_log_capacity, snapshot.access_log);
        store.scan_history = snapshot.scan_history.into_iter().collect();
        store.fix_history = snapshot.fix_history;
        store.last_updated = snapshot.last_updated;
        log::info!(
            "Loaded {} file records from {}",
            store.files.len(),
            store.snapshot_path.display()
        );
        store
    }

    /// Serialize the whole store.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let snapshot = SnapshotRef {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            files: &self.files,
            links: self
                .files
                .iter()
                .map(|(id, record)| (id.as_str(), record.links_out.as_slice()))
                .collect(),
            access_log: self.access_log.entries().collect(),
            scan_history: &self.scan_history,
            fix_history: &self.fix_history,
            last_updated: unix_now_ms(),
        };
        Ok(serde_json::to_vec_pretty(&snapshot)?)
    }

    /// Atomically replace the snapshot on disk with the current state.
    pub async fn save(&self) -> Result<()> {
        let bytes = self.to_json()?;
        write_snapshot(&self.snapshot_path, &bytes).await
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.path_index.get(path).and_then(|id| self.files.get(id))
    }

    pub fn get_by_id(&self, id: &str) -> Option<&FileRecord> {
        self.files.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut FileRecord> {
        self.files.get_mut(id)
    }

    pub fn id_for_path(&self, path: &str) -> Option<&str> {
        self.path_index.get(path).map(String::as_str)
    }

    /// Every record, deleted ones included, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn by_status(&self, status: FileStatus) -> Vec<&FileRecord> {
        let mut records: Vec<&FileRecord> =
            self.files.values().filter(|r| r.status == status).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths of records that are not deleted, sorted. These are the repair candidates.
    pub fn live_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .values()
            .filter(|r| !r.is_deleted())
            .map(|r| r.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// `path -> contentHash` for every record that is not deleted.
    pub fn live_hashes(&self) -> HashMap<String, String> {
        self.files
            .values()
            .filter(|r| !r.is_deleted())
            .map(|r| (r.path.clone(), r.content_hash.clone()))
            .collect()
    }

    /// Insert or replace a record, keyed by its id.
    pub fn upsert(&mut self, record: FileRecord) {
        if let Some(previous) = self.files.get(&record.id) {
            if previous.path != record.path {
                self.path_index.remove(&previous.path);
            }
        }
        self.path_index.insert(record.path.clone(), record.id.clone());
        self.files.insert(record.id.clone(), record);
    }

    /// Fold a scanned file into the store, creating, updating or reviving its record.
    pub fn apply_scan(&mut self, scanned: ScannedFile) -> FileRecord {
        let existing = self
            .path_index
            .get(&scanned.rel_path)
            .and_then(|id| self.files.get(id))
            .cloned();
        let now = unix_now_ms();

        let mut record = existing.unwrap_or_else(|| FileRecord {
            id: self.allocate_id(&scanned.rel_path),
            title: basename(&scanned.rel_path).to_string(),
            path: scanned.rel_path.clone(),
            full_path: scanned.full_path.clone(),
            description: String::new(),
            status: FileStatus::Valid,
            size: 0,
            last_modified: 0,
            last_accessed: None,
            links_out: Vec::new(),
            links_in: Default::default(),
            fix_history: Vec::new(),
            content_hash: String::new(),
            error: None,
            first_seen: now,
            deleted_at: None,
        });

        record.full_path = scanned.full_path;
        record.size = scanned.size;
        record.last_modified = scanned.last_modified;
        record.content_hash = scanned.content_hash;
        record.deleted_at = None;
        match scanned.parsed {
            Ok(extracted) => {
                record.status = FileStatus::Valid;
                record.error = None;
                record.title = extracted.title;
                record.description = extracted.description;
                record.links_out = extracted.links;
            }
            Err(message) => {
                log::warn!("Marking {} corrupt: {message}", record.path);
                record.status = FileStatus::Corrupt;
                record.error = Some(message);
                record.links_out.clear();
            }
        }

        self.upsert(record.clone());
        record
    }

    /// Soft-delete: the record stays, with its history, flagged `deleted`.
    ///
    /// Returns `false` if the id is unknown or already deleted.
    pub fn mark_deleted(&mut self, id: &str) -> bool {
        let Some(record) = self.files.get_mut(id) else {
            return false;
        };
        if record.is_deleted() {
            return false;
        }
        record.status = FileStatus::Deleted;
        record.deleted_at = Some(unix_now_ms());
        log::info!("Soft-deleted {}", record.path);
        true
    }

    pub fn mark_deleted_path(&mut self, path: &str) -> bool {
        match self.path_index.get(path).cloned() {
            Some(id) => self.mark_deleted(&id),
            None => false,
        }
    }

    /// Soft-delete every live record at or below `dir`. Returns the affected ids.
    pub fn mark_deleted_under(&mut self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let ids: Vec<String> = self
            .files
            .values()
            .filter(|r| !r.is_deleted() && (r.path == dir || r.path.starts_with(&prefix)))
            .map(|r| r.id.clone())
            .collect();
        ids.into_iter().filter(|id| self.mark_deleted(id)).collect()
    }

    pub fn touch(&mut self, path: &str) {
        if let Some(record) = self
            .path_index
            .get(path)
            .and_then(|id| self.files.get_mut(id))
        {
            record.last_accessed = Some(unix_now_ms());
        }
    }

    /// Recompute every `linksIn` set from the valid `linksOut` of live records.
    pub fn rebuild_links_in(&mut self) {
        for record in self.files.values_mut() {
            record.links_in.clear();
        }
        let edges: Vec<(String, String)> = self
            .files
            .values()
            .filter(|r| !r.is_deleted())
            .flat_map(|r| {
                r.links_out.iter().filter_map(move |link| {
                    (link.status == LinkStatus::Valid)
                        .then(|| link.target_id.clone())
                        .flatten()
                        .map(|target| (target, r.id.clone()))
                })
            })
            .collect();
        for (target, source) in edges {
            if let Some(record) = self.files.get_mut(&target) {
                record.links_in.insert(source);
            }
        }
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    pub fn access_log_mut(&mut self) -> &mut AccessLog {
        &mut self.access_log
    }

    pub fn push_scan_history(&mut self, entry: ScanHistoryEntry) {
        while self.scan_history.len() >= MAX_SCAN_HISTORY {
            self.scan_history.pop_front();
        }
        self.scan_history.push_back(entry);
    }

    pub fn scan_history(&self) -> impl Iterator<Item = &ScanHistoryEntry> {
        self.scan_history.iter()
    }

    pub fn push_fix(&mut self, entry: FixLogEntry) {
        if self.fix_history.len() >= MAX_FIX_LOG {
            let overflow = self.fix_history.len() + 1 - MAX_FIX_LOG;
            self.fix_history.drain(..overflow);
        }
        self.fix_history.push(entry);
    }

    pub fn fix_history(&self) -> &[FixLogEntry] {
        &self.fix_history
    }

    pub const fn last_updated(&self) -> u64 {
        self.last_updated
    }

    pub fn status(&self) -> RegistryStatus {
        let mut valid_files = 0usize;
        let mut corrupt_files = 0usize;
        let mut broken_links = 0usize;
        for record in self.files.values() {
            match record.status {
                FileStatus::Valid => valid_files += 1,
                FileStatus::Corrupt => corrupt_files += 1,
                FileStatus::Deleted => continue,
            }
            broken_links += record.broken_links().count();
        }
        RegistryStatus::new(valid_files + corrupt_files, valid_files, corrupt_files, broken_links)
    }

    /// Lowercase path slug, suffixed `-2`, `-3`, ... until unused (deleted records included).
    fn allocate_id(&self, path: &str) -> String {
        let base = slug_for_path(path);
        if !self.files.contains_key(&base) {
            return base;
        }
        (2u32..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !self.files.contains_key(candidate))
            .unwrap_or(base)
    }
}

pub(crate) fn temp_path_for_snapshot(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Write `bytes` to a temp file beside `path` and rename it over `path`.
pub async fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let _lock = acquire_snapshot_lock(path).await?;

    let tmp = temp_path_for_snapshot(path);
    tokio::fs::write(&tmp, bytes).await.map_err(|err| {
        RegistryError::Persistence(format!("write {}: {err}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|err| {
        RegistryError::Persistence(format!("rename {} over {}: {err}", tmp.display(), path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extracted;
    use crate::model::{FixSource, LinkType};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn scanned(path: &str, hash: &str, links: Vec<LinkRecord>) -> ScannedFile {
        ScannedFile {
            rel_path: path.to_string(),
            full_path: PathBuf::from("/tree").join(path),
            size: 10,
            last_modified: 1,
            content_hash: hash.to_string(),
            parsed: Ok(Extracted {
                title: format!("title of {path}"),
                description: String::new(),
                links,
            }),
        }
    }

    #[test]
    fn apply_scan_creates_then_updates_same_id() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let first = store.apply_scan(scanned("docs/a.md", "h1", Vec::new()));
        assert_eq!(first.id, "docs-a-md");
        let second = store.apply_scan(scanned("docs/a.md", "h2", Vec::new()));
        assert_eq!(second.id, first.id);
        assert_eq!(second.content_hash, "h2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ids_stay_unique_across_case_variants() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let lower = store.apply_scan(scanned("b.mdc", "h", Vec::new()));
        store.mark_deleted(&lower.id);
        let upper = store.apply_scan(scanned("B.mdc", "h", Vec::new()));
        assert_eq!(lower.id, "b-mdc");
        assert_eq!(upper.id, "b-mdc-2");
        assert_eq!(store.get("b.mdc").unwrap().status, FileStatus::Deleted);
    }

    #[test]
    fn soft_delete_keeps_record_and_history() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let record = store.apply_scan(scanned("a.md", "h", Vec::new()));
        store
            .get_mut(&record.id)
            .unwrap()
            .fix_history
            .push(crate::model::FixEntry {
                before: "x.md".into(),
                after: "y.md".into(),
                timestamp: 1,
                confidence: 1.0,
            });

        assert!(store.mark_deleted(&record.id));
        assert!(!store.mark_deleted(&record.id));
        let kept = store.get("a.md").unwrap();
        assert_eq!(kept.status, FileStatus::Deleted);
        assert!(kept.deleted_at.is_some());
        assert_eq!(kept.fix_history.len(), 1);
        assert!(store.live_paths().is_empty());
    }

    #[test]
    fn reappearing_file_revives_its_record() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let record = store.apply_scan(scanned("a.md", "h", Vec::new()));
        store.mark_deleted(&record.id);
        let revived = store.apply_scan(scanned("a.md", "h2", Vec::new()));
        assert_eq!(revived.id, record.id);
        assert_eq!(revived.status, FileStatus::Valid);
        assert_eq!(revived.deleted_at, None);
    }

    #[test]
    fn directory_delete_covers_nested_records() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        store.apply_scan(scanned("rules/a.mdc", "h", Vec::new()));
        store.apply_scan(scanned("rules/sub/b.mdc", "h", Vec::new()));
        store.apply_scan(scanned("rulesets/c.mdc", "h", Vec::new()));
        let deleted = store.mark_deleted_under("rules");
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.live_paths(), vec!["rulesets/c.mdc".to_string()]);
    }

    #[test]
    fn corrupt_scan_clears_links_and_records_error() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        store.apply_scan(scanned(
            "a.json",
            "h",
            vec![LinkRecord::new("b", "b.md", LinkType::Markdown)],
        ));
        let mut bad = scanned("a.json", "h2", Vec::new());
        bad.parsed = Err("expected value".to_string());
        let record = store.apply_scan(bad);
        assert_eq!(record.status, FileStatus::Corrupt);
        assert_eq!(record.error.as_deref(), Some("expected value"));
        assert!(record.links_out.is_empty());
    }

    #[test]
    fn empty_store_status_has_zero_health() {
        let store = FileRecordStore::new("/tmp/unused.json", 10);
        let status = store.status();
        assert_eq!(status, RegistryStatus::new(0, 0, 0, 0));
        assert_eq!(status.health_score, 0);
    }

    #[tokio::test]
    async fn save_then_load_restores_records_and_logs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state").join("registry.json");
        let mut store = FileRecordStore::new(&path, 10);
        store.apply_scan(scanned(
            "a.md",
            "h",
            vec![LinkRecord::new("b", "b.md", LinkType::Markdown)],
        ));
        store
            .access_log_mut()
            .record("a.md", crate::model::AccessOperation::Read);
        store.push_fix(FixLogEntry {
            file_id: Some("a-md".into()),
            before: "b.md".into(),
            after: "B.md".into(),
            confidence: 1.0,
            timestamp: 5,
            source: FixSource::Validate,
        });
        store.save().await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = FileRecordStore::load(&path, 10).await;
        assert_eq!(loaded.get("a.md"), store.get("a.md"));
        assert_eq!(loaded.access_log().len(), 1);
        assert_eq!(loaded.fix_history().len(), 1);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["links"]["a-md"][0]["path"], "b.md");
        assert!(raw["lastUpdated"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("registry.json");
        std::fs::write(&path, b"{ half written").unwrap();
        let store = FileRecordStore::load(&path, 10).await;
        assert!(store.is_empty());
    }
}
