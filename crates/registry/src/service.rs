use crate::model::{
    unix_now_ms, AccessLogEntry, AccessOperation, FileRecord, FileStatus, FixLogEntry, FixSource,
};
use crate::registry::Registry;
use crate::report::{render_file_list, render_link_report, RegistryReport};
use crate::stats::{RegistryStatus, ScanStats, ValidationStats};
use crate::{RegistryError, Result};
use docreg_matcher::{join_relative, PathMatch};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Content returned by [`RegistryService::read`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    /// Root-relative path that was actually read
    pub path: String,
    pub content: String,
    /// Set when the requested path was broken and self-healed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired: Option<PathMatch>,
}

/// Query API over the registry. Reads never wait on an in-progress scan.
#[derive(Clone)]
pub struct RegistryService {
    registry: Arc<Registry>,
}

impl RegistryService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Read a file, repairing the path once through the matcher when the direct read fails.
    ///
    /// Every call appends exactly one access log entry.
    pub async fn read(&self, path: &str) -> Result<ReadResult> {
        let requested = self.normalize_request(path)?;
        let root = &self.registry.config().root;
        if self.is_off_limits(&requested) {
            self.registry
                .record_access(&requested, AccessOperation::ReadFailed, None)
                .await;
            return Err(RegistryError::InvalidPath(format!(
                "{requested} is not a readable document"
            )));
        }

        match tokio::fs::read_to_string(root.join(&requested)).await {
            Ok(content) => {
                self.registry
                    .record_access(&requested, AccessOperation::Read, Some(&requested))
                    .await;
                return Ok(ReadResult {
                    path: requested,
                    content,
                    repaired: None,
                });
            }
            Err(err) => log::debug!("Direct read of {requested} failed: {err}"),
        }

        let candidate = {
            let candidates = self.registry.read_store().await.live_paths();
            self.registry
                .matcher()
                .resolve(&requested, None, &candidates)
                .filter(|found| found.path != requested)
        };
        if let Some(found) = candidate {
            if let Ok(content) = tokio::fs::read_to_string(root.join(&found.path)).await {
                log::info!(
                    "Read repaired: {requested} -> {} (confidence {:.2})",
                    found.path,
                    found.confidence
                );
                self.log_read_repair(&requested, &found).await;
                self.registry
                    .record_access(&requested, AccessOperation::ReadRepaired, Some(&found.path))
                    .await;
                return Ok(ReadResult {
                    path: found.path.clone(),
                    content,
                    repaired: Some(found),
                });
            }
        }

        self.registry
            .record_access(&requested, AccessOperation::ReadFailed, None)
            .await;
        Err(RegistryError::not_found(requested))
    }

    async fn log_read_repair(&self, requested: &str, found: &PathMatch) {
        let timeout = self.registry.config().read_lock_timeout();
        let Some(_guard) = self.registry.lock_mutation_timeout(timeout).await else {
            log::warn!(
                "Registry busy for {} ms; read repair {requested} -> {} not recorded",
                timeout.as_millis(),
                found.path
            );
            return;
        };
        let mut store = self.registry.write_store().await;
        let file_id = store.id_for_path(&found.path).map(str::to_string);
        store.push_fix(FixLogEntry {
            file_id,
            before: requested.to_string(),
            after: found.path.clone(),
            confidence: found.confidence,
            timestamp: unix_now_ms(),
            source: FixSource::Read,
        });
    }

    /// Record for `path`, self-healing the lookup without touching the disk.
    pub async fn info(&self, path: &str) -> Result<FileRecord> {
        let requested = self.normalize_request(path)?;
        let store = self.registry.read_store().await;
        if let Some(record) = store.get(&requested) {
            return Ok(record.clone());
        }
        let candidates = store.live_paths();
        self.registry
            .matcher()
            .resolve(&requested, None, &candidates)
            .and_then(|found| store.get(&found.path).cloned())
            .ok_or_else(|| RegistryError::not_found(requested))
    }

    /// Case-insensitive substring search, title hits first, then path, then description.
    pub async fn search(&self, query: &str) -> Vec<FileRecord> {
        let needle = query.trim().to_lowercase();
        let store = self.registry.read_store().await;
        let mut hits: Vec<(u8, &FileRecord)> = store
            .all()
            .filter(|r| !r.is_deleted())
            .filter_map(|record| {
                if record.title.to_lowercase().contains(&needle) {
                    Some((0, record))
                } else if record.path.to_lowercase().contains(&needle) {
                    Some((1, record))
                } else if record.description.to_lowercase().contains(&needle) {
                    Some((2, record))
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|(rank_a, a), (rank_b, b)| rank_a.cmp(rank_b).then_with(|| a.path.cmp(&b.path)));
        hits.into_iter().map(|(_, record)| record.clone()).collect()
    }

    pub async fn by_status(&self, status: FileStatus) -> Vec<FileRecord> {
        self.registry
            .read_store()
            .await
            .by_status(status)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Newest first.
    pub async fn recent_access(&self, n: usize) -> Vec<AccessLogEntry> {
        self.registry.read_store().await.access_log().recent(n)
    }

    pub async fn status(&self) -> RegistryStatus {
        self.registry.read_store().await.status()
    }

    pub async fn trigger_scan(&self) -> Result<ScanStats> {
        self.registry.scan_all().await
    }

    pub async fn trigger_validation(&self) -> Result<ValidationStats> {
        self.registry.validate_all().await
    }

    /// Generate and write the periodic report now.
    pub async fn report(&self) -> Result<RegistryReport> {
        self.registry.write_report().await
    }

    pub async fn link_report(&self) -> String {
        render_link_report(&*self.registry.read_store().await)
    }

    pub async fn file_list(&self) -> String {
        render_file_list(&*self.registry.read_store().await)
    }

    /// Registry state and ignored scopes (VCS folders, dependencies) are never served.
    fn is_off_limits(&self, requested: &str) -> bool {
        let full = self.registry.config().root.join(requested);
        self.registry.scanner().in_ignored_scope(&full)
            || self.registry.config().is_state_file(&full)
    }

    /// Root-relative form of a caller-supplied path. Paths leaving the root are rejected.
    fn normalize_request(&self, path: &str) -> Result<String> {
        let trimmed = path.trim();
        let as_path = Path::new(trimmed);
        if as_path.is_absolute() {
            return self
                .registry
                .scanner()
                .relative(as_path)
                .ok_or_else(|| RegistryError::InvalidPath(format!("{trimmed} is outside the root")));
        }
        join_relative("", &trimmed.replace('\\', "/"))
            .ok_or_else(|| RegistryError::InvalidPath(format!("{trimmed} is outside the root")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use docreg_matcher::MatchTier;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    async fn service_for(root: &Path) -> RegistryService {
        let registry = Registry::open(RegistryConfig::for_root(root)).await.unwrap();
        registry.scan_all().await.unwrap();
        RegistryService::new(registry)
    }

    #[tokio::test]
    async fn read_self_heals_a_misspelled_path() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("rules")).unwrap();
        fs::write(root.join("rules").join("workflow.mdc"), "# Workflow\n").unwrap();
        let service = service_for(&root).await;

        let result = service.read("rules/workflw.mdc").await.unwrap();
        assert_eq!(result.path, "rules/workflow.mdc");
        assert_eq!(result.content, "# Workflow\n");
        assert_eq!(result.repaired.as_ref().unwrap().tier, MatchTier::Fuzzy);

        let recent = service.recent_access(1).await;
        assert_eq!(recent[0].path, "rules/workflw.mdc");
        assert_eq!(recent[0].operation, AccessOperation::ReadRepaired);

        let store = service.registry().read_store().await;
        assert!(store.get("rules/workflow.mdc").unwrap().last_accessed.is_some());
        assert_eq!(store.fix_history().last().unwrap().source, FixSource::Read);
    }

    #[tokio::test]
    async fn failed_read_is_logged_and_reported() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a.md"), "# A\n").unwrap();
        let service = service_for(&root).await;

        let err = service.read("completely-unrelated.md").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err
            .to_string()
            .contains("no repair candidate met the confidence threshold"));
        assert_eq!(
            service.recent_access(1).await[0].operation,
            AccessOperation::ReadFailed
        );
    }

    #[tokio::test]
    async fn paths_outside_the_root_are_rejected() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let service = service_for(&root).await;
        let err = service.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn registry_state_and_ignored_scopes_are_not_readable() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("config.json"), "{}").unwrap();
        fs::write(root.join("a.md"), "# A\n").unwrap();
        let service = service_for(&root).await;
        assert!(root.join(".docreg").join("registry.json").exists());

        for path in [".docreg/registry.json", ".git/config.json"] {
            let err = service.read(path).await.unwrap_err();
            assert!(matches!(err, RegistryError::InvalidPath(_)), "{path}: {err}");
            let recent = service.recent_access(1).await;
            assert_eq!(recent[0].path, path);
            assert_eq!(recent[0].operation, AccessOperation::ReadFailed);
        }
        assert_eq!(service.read("a.md").await.unwrap().content, "# A\n");
    }

    #[tokio::test]
    async fn snapshot_kept_at_the_root_is_not_readable() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a.md"), "# A\n").unwrap();
        let mut config = RegistryConfig::for_root(&root);
        config.snapshot_path = Some(root.join("registry.json"));
        let registry = Registry::open(config).await.unwrap();
        registry.scan_all().await.unwrap();
        let service = RegistryService::new(registry);

        let err = service.read("registry.json").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn search_ranks_title_before_path_before_description() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("zeta.md"), "# Deploy guide\n").unwrap();
        fs::write(root.join("deploy.md"), "# Shipping\n").unwrap();
        fs::write(
            root.join("alpha.md"),
            "# Alpha\n\nHow we deploy things.\n",
        )
        .unwrap();
        let service = service_for(&root).await;

        let paths: Vec<String> = service
            .search("DEPLOY")
            .await
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["zeta.md", "deploy.md", "alpha.md"]);
    }

    #[tokio::test]
    async fn info_heals_case_mismatch_without_reading() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("Guide.md"), "# Guide\n").unwrap();
        let service = service_for(&root).await;

        let record = service.info("guide.md").await.unwrap();
        assert_eq!(record.path, "Guide.md");
        assert!(service.info("nothing-like-it.json").await.unwrap_err().is_not_found());
        assert!(service.recent_access(10).await.is_empty());
    }
}
