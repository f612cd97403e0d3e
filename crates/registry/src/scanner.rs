use crate::config::{RegistryConfig, STATE_DIR_NAME};
use crate::extract::{Extracted, MetadataExtractor};
use crate::model::system_time_ms;
use crate::{RegistryError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Directory names never descended into.
pub(crate) const IGNORED_SCOPES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    "target",
    STATE_DIR_NAME,
];

/// A relevant file after reading and extraction.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub full_path: PathBuf,
    pub size: u64,
    pub last_modified: u64,
    pub content_hash: String,
    /// Extraction result, or the reason the file is corrupt.
    pub parsed: std::result::Result<Extracted, String>,
}

#[derive(Debug)]
pub enum ScanOutcome {
    /// Content hash matches the stored record.
    Unchanged,
    Scanned(ScannedFile),
    /// The file no longer exists.
    Missing,
    /// Not relevant (extension, scope, size).
    Ignored,
}

/// Discovers relevant files under the root and turns them into [`ScannedFile`]s.
pub struct Scanner {
    root: PathBuf,
    config: Arc<RegistryConfig>,
    exclude: GlobSet,
    extractor: Arc<dyn MetadataExtractor>,
}

impl Scanner {
    pub fn new(config: Arc<RegistryConfig>, extractor: Arc<dyn MetadataExtractor>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude {
            let glob = Glob::new(pattern).map_err(|err| {
                RegistryError::Config(format!("invalid exclude pattern {pattern:?}: {err}"))
            })?;
            builder.add(glob);
        }
        let exclude = builder
            .build()
            .map_err(|err| RegistryError::Config(format!("exclude patterns: {err}")))?;

        Ok(Self {
            root: config.root.clone(),
            config,
            exclude,
            extractor,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root for relevant files (.gitignore aware). Irrelevant files are never read.
    pub fn discover(&self) -> Vec<PathBuf> {
        let files = self.discover_in(&self.root);
        log::info!("Found {} relevant files", files.len());
        files
    }

    /// Relevant files at or below `start`, sorted.
    pub fn discover_in(&self, start: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(start);
        builder
            .hidden(false) // rule trees commonly live under dot-directories
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !Self::is_ignored_scope(entry.path(), &root));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if !self.is_relevant(path) {
                        continue;
                    }
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > self.config.max_file_size_bytes {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                self.config.max_file_size_bytes
                            );
                            continue;
                        }
                    }

                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        files
    }

    /// Extension allow-listed, not hidden, not in an ignored scope, not excluded, and not one of
    /// the registry's own state files.
    pub fn is_relevant(&self, path: &Path) -> bool {
        if !self.config.is_relevant(path) || self.config.is_state_file(path) {
            return false;
        }
        let hidden_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'));
        if hidden_name || Self::is_ignored_scope(path, &self.root) {
            return false;
        }
        match self.relative(path) {
            Some(rel) => !self.exclude.is_match(&rel),
            None => false,
        }
    }

    /// Root-relative, `/`-separated form of `path`.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Read, hash and extract one file. `known_hash` is the stored hash for this path.
    pub async fn scan_file(&self, path: &Path, known_hash: Option<&str>) -> ScanOutcome {
        if !self.is_relevant(path) {
            return ScanOutcome::Ignored;
        }
        let Some(rel_path) = self.relative(path) else {
            return ScanOutcome::Ignored;
        };

        let metadata = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return ScanOutcome::Ignored,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ScanOutcome::Missing,
            Err(err) => {
                return ScanOutcome::Scanned(self.corrupt(rel_path, path, 0, 0, String::new(), err))
            }
        };
        if metadata.len() > self.config.max_file_size_bytes {
            return ScanOutcome::Ignored;
        }
        let last_modified = metadata.modified().map(system_time_ms).unwrap_or(0);

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ScanOutcome::Missing,
            Err(err) => {
                return ScanOutcome::Scanned(self.corrupt(
                    rel_path,
                    path,
                    metadata.len(),
                    last_modified,
                    String::new(),
                    err,
                ))
            }
        };

        let content_hash = content_hash(&bytes);
        if known_hash == Some(content_hash.as_str()) {
            return ScanOutcome::Unchanged;
        }

        let parsed = match std::str::from_utf8(&bytes) {
            Ok(text) => self
                .extractor
                .extract(&rel_path, text)
                .map_err(|err| err.to_string()),
            Err(err) => Err(format!("content is not valid UTF-8: {err}")),
        };

        ScanOutcome::Scanned(ScannedFile {
            rel_path,
            full_path: path.to_path_buf(),
            size: bytes.len() as u64,
            last_modified,
            content_hash,
            parsed,
        })
    }

    fn corrupt(
        &self,
        rel_path: String,
        path: &Path,
        size: u64,
        last_modified: u64,
        content_hash: String,
        err: std::io::Error,
    ) -> ScannedFile {
        ScannedFile {
            rel_path,
            full_path: path.to_path_buf(),
            size,
            last_modified,
            content_hash,
            parsed: Err(format!("read failed: {err}")),
        }
    }

    /// Whether any component of `path` below the root is an ignored scope.
    pub(crate) fn in_ignored_scope(&self, path: &Path) -> bool {
        Self::is_ignored_scope(path, &self.root)
    }

    fn is_ignored_scope(path: &Path, root: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            for component in relative.components() {
                if let Component::Normal(name) = component {
                    let lowered = name.to_string_lossy().to_lowercase();
                    if IGNORED_SCOPES.iter().any(|ignored| *ignored == lowered) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Hex SHA-256 of raw content.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
