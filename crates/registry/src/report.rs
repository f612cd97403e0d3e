use crate::model::{unix_now_ms, AccessLogEntry, FileStatus, LinkStatus, ScanHistoryEntry};
use crate::stats::RegistryStatus;
use crate::store::{write_snapshot, FileRecordStore};
use crate::Result;
use docreg_matcher::basename;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Entries of the access log carried in each periodic report.
pub const REPORT_RECENT_ACCESS: usize = 50;

/// Periodic summary, overwritten on every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryReport {
    pub timestamp: u64,
    pub statistics: ReportStatistics,
    /// Status name to the sorted paths carrying it
    pub files_by_status: BTreeMap<String, Vec<String>>,
    pub recent_access: Vec<AccessLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatistics {
    #[serde(flatten)]
    pub status: RegistryStatus,
    pub deleted_files: usize,
    pub total_links: usize,
    pub external_links: usize,
    pub fixes_logged: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<ScanHistoryEntry>,
}

impl RegistryReport {
    pub fn build(store: &FileRecordStore, recent: usize) -> Self {
        let mut files_by_status: BTreeMap<String, Vec<String>> = FileStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), Vec::new()))
            .collect();
        let mut total_links = 0;
        let mut external_links = 0;
        for record in store.all() {
            files_by_status
                .entry(record.status.as_str().to_string())
                .or_default()
                .push(record.path.clone());
            if record.is_deleted() {
                continue;
            }
            total_links += record.links_out.len();
            external_links += record
                .links_out
                .iter()
                .filter(|link| link.status == LinkStatus::External)
                .count();
        }
        for paths in files_by_status.values_mut() {
            paths.sort();
        }

        let deleted_files = files_by_status
            .get(FileStatus::Deleted.as_str())
            .map_or(0, Vec::len);

        Self {
            timestamp: unix_now_ms(),
            statistics: ReportStatistics {
                status: store.status(),
                deleted_files,
                total_links,
                external_links,
                fixes_logged: store.fix_history().len(),
                last_scan: store.scan_history().last().cloned(),
            },
            files_by_status,
            recent_access: store.access_log().recent(recent),
        }
    }

    /// Overwrite `path` with this report (temp file + rename).
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_snapshot(path, &bytes).await?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

/// Markdown link validation report: summary counts, broken links and applied fixes per file.
pub fn render_link_report(store: &FileRecordStore) -> String {
    let live: Vec<_> = {
        let mut records: Vec<_> = store.all().filter(|r| !r.is_deleted()).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    };
    let total_links: usize = live.iter().map(|r| r.links_out.len()).sum();
    let broken: usize = live.iter().map(|r| r.broken_links().count()).sum();
    let fixed: usize = live.iter().map(|r| r.fix_history.len()).sum();

    let mut out = String::new();
    let _ = writeln!(out, "# Link Validation Report");
    let _ = writeln!(out, "Generated: {} (unix ms)", unix_now_ms());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "- Files tracked: {}", live.len());
    let _ = writeln!(out, "- Total links found: {total_links}");
    let _ = writeln!(out, "- Links fixed: {fixed}");
    let _ = writeln!(out, "- Broken links: {broken}");

    if broken > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Broken Links");
        for record in live.iter().filter(|r| r.broken_links().next().is_some()) {
            let _ = writeln!(out, "### {}", record.path);
            for link in record.broken_links() {
                let _ = writeln!(out, "- `{}` (text: {})", link.path, link.text);
            }
        }
    }

    if fixed > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Fixed Links");
        for record in live.iter().filter(|r| !r.fix_history.is_empty()) {
            let _ = writeln!(out, "### {}", record.path);
            for fix in &record.fix_history {
                let _ = writeln!(
                    out,
                    "- `{}` → `{}` (confidence {:.2})",
                    fix.before, fix.after, fix.confidence
                );
            }
        }
    }

    out
}

/// `name : [name](path)` for every tracked, non-deleted file, sorted by path.
pub fn render_file_list(store: &FileRecordStore) -> String {
    store
        .live_paths()
        .iter()
        .map(|path| {
            let name = basename(path);
            format!("{name} : [{name}]({path})\n")
        })
        .collect()
}
