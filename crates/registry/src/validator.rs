use crate::model::{unix_now_ms, FixEntry, FixLogEntry, FixSource, LinkStatus, LinkType};
use crate::stats::ValidationStats;
use crate::store::FileRecordStore;
use docreg_matcher::{
    extension, join_relative, normalize_target, parent_dir, relative_path, PathMatcher,
};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// A link rewritten during validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    pub file_id: String,
    pub file_path: String,
    pub full_path: PathBuf,
    pub before: String,
    pub after: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    External,
    Valid(Option<String>),
    Repaired {
        after: String,
        target_id: String,
        confidence: f64,
    },
    Broken,
}

/// Resolves outbound links against the store and repairs the broken ones.
pub struct LinkValidator {
    matcher: PathMatcher,
    root: PathBuf,
}

impl LinkValidator {
    pub fn new(matcher: PathMatcher, root: impl Into<PathBuf>) -> Self {
        Self {
            matcher,
            root: root.into(),
        }
    }

    /// Resolve every link, repairing what the matcher can, then rebuild `linksIn`.
    pub fn validate_all(&self, store: &mut FileRecordStore) -> (ValidationStats, Vec<Repair>) {
        self.run(store, true)
    }

    /// Refresh link statuses without attempting any repair.
    pub fn resolve_exact(&self, store: &mut FileRecordStore) -> ValidationStats {
        self.run(store, false).0
    }

    fn run(&self, store: &mut FileRecordStore, repair: bool) -> (ValidationStats, Vec<Repair>) {
        let start = Instant::now();
        let candidates = if repair { store.live_paths() } else { Vec::new() };

        let mut decisions: Vec<(String, usize, Resolution)> = Vec::new();
        for record in store.all().filter(|r| !r.is_deleted()) {
            for (idx, link) in record.links_out.iter().enumerate() {
                let resolution = if link.is_external() {
                    Resolution::External
                } else {
                    self.resolve_link(store, &record.path, &link.path, link.kind, repair, &candidates)
                };
                decisions.push((record.id.clone(), idx, resolution));
            }
        }

        let mut stats = ValidationStats::default();
        let mut repairs = Vec::new();
        let now = unix_now_ms();
        for (file_id, idx, resolution) in decisions {
            let Some(record) = store.get_mut(&file_id) else {
                continue;
            };
            let file_path = record.path.clone();
            let full_path = record.full_path.clone();
            let Some(link) = record.links_out.get_mut(idx) else {
                continue;
            };

            match resolution {
                Resolution::External => {
                    link.status = LinkStatus::External;
                    link.target_id = None;
                    stats.external += 1;
                }
                Resolution::Valid(target_id) => {
                    link.status = LinkStatus::Valid;
                    link.target_id = target_id;
                    stats.valid += 1;
                }
                Resolution::Broken => {
                    link.status = LinkStatus::Broken;
                    link.target_id = None;
                    stats.broken += 1;
                }
                Resolution::Repaired {
                    after,
                    target_id,
                    confidence,
                } => {
                    let before = std::mem::replace(&mut link.path, after.clone());
                    link.status = LinkStatus::Valid;
                    link.target_id = Some(target_id);
                    record.fix_history.push(FixEntry {
                        before: before.clone(),
                        after: after.clone(),
                        timestamp: now,
                        confidence,
                    });
                    log::info!(
                        "Repaired link in {file_path}: {before} -> {after} (confidence {confidence:.2})"
                    );
                    stats.repaired += 1;
                    store.push_fix(FixLogEntry {
                        file_id: Some(file_id.clone()),
                        before: before.clone(),
                        after: after.clone(),
                        confidence,
                        timestamp: now,
                        source: FixSource::Validate,
                    });
                    repairs.push(Repair {
                        file_id,
                        file_path,
                        full_path,
                        before,
                        after,
                        confidence,
                    });
                }
            }
        }

        store.rebuild_links_in();
        stats.time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if repair {
            log::info!(
                "Validated links: {} valid, {} repaired, {} broken, {} external",
                stats.valid,
                stats.repaired,
                stats.broken,
                stats.external
            );
        }
        (stats, repairs)
    }

    fn resolve_link(
        &self,
        store: &FileRecordStore,
        referrer: &str,
        raw: &str,
        kind: LinkType,
        repair: bool,
        candidates: &[String],
    ) -> Resolution {
        let target = normalize_target(raw);
        if target.is_empty() {
            return Resolution::Valid(None);
        }

        let referrer_dir = parent_dir(referrer);
        let attempts = [join_relative(referrer_dir, &target), join_relative("", &target)];
        for path in attempts.iter().flatten() {
            if let Some(record) = store.get(path).filter(|r| !r.is_deleted()) {
                return Resolution::Valid(Some(record.id.clone()));
            }
        }
        // Untracked assets (images, scripts) only need to exist.
        if kind == LinkType::Other
            && attempts
                .iter()
                .flatten()
                .any(|path| self.root.join(Path::new(path)).exists())
        {
            return Resolution::Valid(None);
        }

        if !repair {
            return Resolution::Broken;
        }
        let found = if kind == LinkType::Other {
            // Asset links only repair to a file of the same type.
            let wanted = extension(&target).map(str::to_ascii_lowercase);
            let same_type: Vec<&String> = candidates
                .iter()
                .filter(|c| extension(c).map(str::to_ascii_lowercase) == wanted)
                .collect();
            self.matcher.resolve(raw, Some(referrer), &same_type)
        } else {
            self.matcher.resolve(raw, Some(referrer), candidates)
        };
        let Some(found) = found else {
            return Resolution::Broken;
        };
        let Some(target_id) = store.id_for_path(&found.path).map(str::to_string) else {
            return Resolution::Broken;
        };
        Resolution::Repaired {
            after: rewrite_target(raw, &relative_path(referrer_dir, &found.path)),
            target_id,
            confidence: found.confidence,
        }
    }
}

/// Keep the raw target's `mdc:`/`file:` prefix and `#fragment` around a new path.
fn rewrite_target(raw: &str, new_path: &str) -> String {
    let trimmed = raw.trim();
    let prefix = ["mdc:", "file:"]
        .into_iter()
        .find(|p| trimmed.starts_with(p))
        .unwrap_or("");
    let suffix = trimmed.find('#').map_or("", |idx| &trimmed[idx..]);
    format!("{prefix}{new_path}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extracted;
    use crate::model::{FileStatus, LinkRecord};
    use crate::scanner::ScannedFile;
    use docreg_matcher::MatchConfig;
    use pretty_assertions::assert_eq;

    fn add(store: &mut FileRecordStore, path: &str, links: &[(&str, LinkType)]) -> String {
        let links = links
            .iter()
            .map(|(target, kind)| LinkRecord::new("link", *target, *kind))
            .collect();
        store
            .apply_scan(ScannedFile {
                rel_path: path.to_string(),
                full_path: PathBuf::from("/nonexistent-root").join(path),
                size: 1,
                last_modified: 1,
                content_hash: format!("hash-{path}"),
                parsed: Ok(Extracted {
                    title: path.to_string(),
                    description: String::new(),
                    links,
                }),
            })
            .id
    }

    fn validator() -> LinkValidator {
        LinkValidator::new(PathMatcher::new(MatchConfig::default()), "/nonexistent-root")
    }

    #[test]
    fn case_renamed_target_is_repaired_with_full_confidence() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let a = add(&mut store, "a.mdc", &[("b.mdc", LinkType::Markdown)]);
        let b = add(&mut store, "B.mdc", &[]);

        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.repaired, 1);
        assert_eq!(stats.broken, 0);
        assert_eq!(repairs.len(), 1);

        let record = store.get("a.mdc").unwrap();
        assert_eq!(record.links_out[0].path, "B.mdc");
        assert_eq!(record.links_out[0].status, LinkStatus::Valid);
        assert_eq!(record.fix_history.len(), 1);
        assert_eq!(record.fix_history[0].before, "b.mdc");
        assert_eq!(record.fix_history[0].after, "B.mdc");
        assert_eq!(record.fix_history[0].confidence, 1.0);
        assert!(store.get_by_id(&b).unwrap().links_in.contains(&a));
        assert_eq!(store.fix_history().len(), 1);
    }

    #[test]
    fn unresolvable_link_stays_broken_without_history() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(&mut store, "c.mdc", &[("nonexistent.mdc", LinkType::Markdown)]);

        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.broken, 1);
        assert!(repairs.is_empty());
        let record = store.get("c.mdc").unwrap();
        assert_eq!(record.links_out[0].path, "nonexistent.mdc");
        assert_eq!(record.links_out[0].status, LinkStatus::Broken);
        assert!(record.fix_history.is_empty());
        assert!(store.status().broken_links >= 1);
    }

    #[test]
    fn asset_link_is_not_repaired_to_a_document_with_the_same_stem() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(&mut store, "a.md", &[("assets/logo.png", LinkType::Other)]);
        add(&mut store, "assets/logo.md", &[]);

        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.repaired, 0);
        assert_eq!(stats.broken, 1);
        assert!(repairs.is_empty());
        let record = store.get("a.md").unwrap();
        assert_eq!(record.links_out[0].path, "assets/logo.png");
        assert_eq!(record.links_out[0].status, LinkStatus::Broken);
        assert!(record.fix_history.is_empty());
        assert!(store.fix_history().is_empty());
    }

    #[test]
    fn asset_link_repairs_to_a_tracked_file_of_the_same_type() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(&mut store, "a.md", &[("schema/Config.JSON", LinkType::Other)]);
        add(&mut store, "schema/config.json", &[]);
        add(&mut store, "schema/config.md", &[]);

        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.repaired, 1);
        assert_eq!(repairs[0].after, "schema/config.json");
    }

    #[test]
    fn external_links_are_never_repaired() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(
            &mut store,
            "a.md",
            &[
                ("https://example.com/b.md", LinkType::Url),
                ("#b-md", LinkType::Anchor),
            ],
        );
        add(&mut store, "b.md", &[]);

        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.external, 2);
        assert!(repairs.is_empty());
    }

    #[test]
    fn repaired_paths_are_relative_to_the_referrer() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(
            &mut store,
            "rules/core/a.mdc",
            &[("mdc:guide.mdc#setup", LinkType::Markdown)],
        );
        add(&mut store, "rules/Guide.mdc", &[]);

        let (_, repairs) = validator().validate_all(&mut store);
        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].after, "mdc:../Guide.mdc#setup");

        // A second pass resolves the rewritten target directly.
        let (stats, repairs) = validator().validate_all(&mut store);
        assert_eq!(stats.valid, 1);
        assert!(repairs.is_empty());
    }

    #[test]
    fn links_in_matches_valid_links_out() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        let a = add(
            &mut store,
            "a.md",
            &[("b.md", LinkType::Markdown), ("docs/c.md", LinkType::Markdown)],
        );
        let b = add(&mut store, "b.md", &[("docs/c.md", LinkType::Markdown)]);
        let c = add(&mut store, "docs/c.md", &[("../a.md", LinkType::Markdown)]);

        validator().validate_all(&mut store);

        for record in store.all() {
            for link in &record.links_out {
                if let Some(target) = &link.target_id {
                    assert!(store.get_by_id(target).unwrap().links_in.contains(&record.id));
                }
            }
        }
        let c_in: Vec<&String> = store.get_by_id(&c).unwrap().links_in.iter().collect();
        assert_eq!(c_in, vec![&a, &b]);
        assert!(store.get_by_id(&a).unwrap().links_in.contains(&c));
    }

    #[test]
    fn deleted_targets_do_not_count_as_valid() {
        let mut store = FileRecordStore::new("/tmp/unused.json", 10);
        add(&mut store, "a.md", &[("b.md", LinkType::Markdown)]);
        let b = add(&mut store, "b.md", &[]);
        store.mark_deleted(&b);

        let stats = validator().resolve_exact(&mut store);
        assert_eq!(stats.broken, 1);
        assert_eq!(store.get_by_id(&b).unwrap().status, FileStatus::Deleted);
        assert!(store.get_by_id(&b).unwrap().links_in.is_empty());
    }

    #[test]
    fn rewrite_keeps_prefix_and_fragment() {
        assert_eq!(rewrite_target("file:a.md", "b.md"), "file:b.md");
        assert_eq!(rewrite_target("a.md#top", "b.md"), "b.md#top");
        assert_eq!(rewrite_target("a.md", "b.md"), "b.md");
    }
}
