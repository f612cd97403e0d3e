use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Valid,
    Corrupt,
    Deleted,
}

impl FileStatus {
    pub const ALL: [Self; 3] = [Self::Valid, Self::Corrupt, Self::Deleted];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Corrupt => "corrupt",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(Self::Valid),
            "corrupt" => Ok(Self::Corrupt),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown file status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Markdown,
    Url,
    Anchor,
    Other,
}

impl LinkType {
    /// URLs and in-page anchors never point at tracked files.
    pub const fn is_external(self) -> bool {
        matches!(self, Self::Url | Self::Anchor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Valid,
    Broken,
    External,
}

/// One outbound reference found in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub text: String,
    /// Target as written (rewritten in place when repaired)
    pub path: String,
    #[serde(rename = "type")]
    pub kind: LinkType,
    pub status: LinkStatus,
    /// Id of the tracked file this link resolved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl LinkRecord {
    pub fn new(text: impl Into<String>, path: impl Into<String>, kind: LinkType) -> Self {
        let status = if kind.is_external() {
            LinkStatus::External
        } else {
            LinkStatus::Broken
        };
        Self {
            text: text.into(),
            path: path.into(),
            kind,
            status,
            target_id: None,
        }
    }

    pub const fn is_external(&self) -> bool {
        self.kind.is_external()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixEntry {
    pub before: String,
    pub after: String,
    pub timestamp: u64,
    pub confidence: f64,
}

/// Tracked metadata for one file under the watched root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub title: String,
    pub path: String,
    pub full_path: PathBuf,
    pub description: String,
    pub status: FileStatus,
    pub size: u64,
    pub last_modified: u64,
    #[serde(default)]
    pub last_accessed: Option<u64>,
    #[serde(default)]
    pub links_out: Vec<LinkRecord>,
    #[serde(default)]
    pub links_in: BTreeSet<String>,
    #[serde(default)]
    pub fix_history: Vec<FixEntry>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub first_seen: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
}

impl FileRecord {
    pub const fn is_deleted(&self) -> bool {
        matches!(self.status, FileStatus::Deleted)
    }

    pub fn broken_links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.links_out
            .iter()
            .filter(|link| link.status == LinkStatus::Broken)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    pub timestamp: u64,
    pub files_scanned: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    Validate,
    Read,
}

/// Store-wide audit entry mirroring each per-file [`FixEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub before: String,
    pub after: String,
    pub confidence: f64,
    pub timestamp: u64,
    pub source: FixSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOperation {
    Read,
    ReadRepaired,
    ReadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub path: String,
    pub operation: AccessOperation,
    pub timestamp: u64,
}

/// Slug of a root-relative path: lowercase ASCII alphanumeric runs joined by `-`.
pub fn slug_for_path(path: &str) -> String {
    let mut slug = String::with_capacity(path.len());
    let mut pending_dash = false;
    for c in path.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("file");
    }
    slug
}

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

pub(crate) fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slug_collapses_separators() {
        assert_eq!(slug_for_path("rules/01__AI-RUN/Guide.mdc"), "rules-01-ai-run-guide-mdc");
        assert_eq!(slug_for_path(".cursor/rules/a.mdc"), "cursor-rules-a-mdc");
        assert_eq!(slug_for_path("___"), "file");
    }

    #[test]
    fn external_links_start_external() {
        assert_eq!(
            LinkRecord::new("site", "https://example.com", LinkType::Url).status,
            LinkStatus::External
        );
        assert_eq!(
            LinkRecord::new("b", "b.mdc", LinkType::Markdown).status,
            LinkStatus::Broken
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in FileStatus::ALL {
            assert_eq!(status.as_str().parse::<FileStatus>(), Ok(status));
        }
        assert!("gone".parse::<FileStatus>().is_err());
    }

    #[test]
    fn link_kind_serializes_as_type() {
        let link = LinkRecord::new("b", "b.mdc", LinkType::Markdown);
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["type"], "markdown");
        assert_eq!(json["status"], "broken");
        assert!(json.get("targetId").is_none());
    }
}
