use serde::{Deserialize, Serialize};

/// Outcome of a full or single-file scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Files whose record was created or rewritten
    pub processed: usize,

    /// Files skipped because their content hash was unchanged
    pub skipped: usize,

    /// Files that could not be read or parsed (now `corrupt`)
    pub errors: usize,

    /// Records soft-deleted because their file disappeared
    pub deleted: usize,

    /// Time taken in milliseconds
    pub time_ms: u64,

    /// Paths behind `errors`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_paths: Vec<String>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, path: String) {
        self.errors += 1;
        self.error_paths.push(path);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub valid: usize,
    pub broken: usize,
    pub repaired: usize,
    pub external: usize,
    pub time_ms: u64,
}

/// Health summary returned by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub total_files: usize,
    pub valid_files: usize,
    pub corrupt_files: usize,
    pub broken_links: usize,
    pub health_score: u32,
}

impl RegistryStatus {
    pub fn new(
        total_files: usize,
        valid_files: usize,
        corrupt_files: usize,
        broken_links: usize,
    ) -> Self {
        Self {
            total_files,
            valid_files,
            corrupt_files,
            broken_links,
            health_score: health_score(valid_files, total_files),
        }
    }
}

/// `round(valid / total * 100)`, defined as 0 for an empty tree.
pub fn health_score(valid: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let score = (valid as f64 / total as f64 * 100.0).round() as u32;
    score
}
