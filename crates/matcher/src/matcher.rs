use crate::distance::similarity;
use crate::paths::{basename, join_relative, normalize_target, parent_dir, split_extension};
use serde::{Deserialize, Serialize};

/// Tuning for fuzzy and proximity resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum normalized similarity for a tier-2 match.
    pub threshold: f64,
    /// A tier-2 winner must beat every other candidate by more than this.
    pub tie_margin: f64,
    /// Confidence of a tier-3 hit inside the referrer's own directory.
    pub proximity_base_confidence: f64,
    /// Confidence lost for every directory level walked outward in tier 3.
    pub proximity_step: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            tie_margin: 0.05,
            proximity_base_confidence: 0.9,
            proximity_step: 0.1,
        }
    }
}

/// Penalty applied when a fuzzy candidate's extension differs from the target's.
const EXTENSION_MISMATCH_FACTOR: f64 = 0.9;
const PROXIMITY_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Fuzzy,
    Proximity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatch {
    pub path: String,
    pub confidence: f64,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    config: MatchConfig,
}

impl PathMatcher {
    pub const fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Find the tracked path a broken link most plausibly meant.
    ///
    /// `target` is the raw link target, `referrer` the root-relative path of the file that
    /// contains the link. Returns `None` whenever the choice would be a guess between
    /// near-equal candidates.
    pub fn resolve<S: AsRef<str>>(
        &self,
        target: &str,
        referrer: Option<&str>,
        candidates: &[S],
    ) -> Option<PathMatch> {
        let target = normalize_target(target);
        if target.is_empty() || candidates.is_empty() {
            return None;
        }
        let referrer_dir = referrer.map(parent_dir);

        let mut wanted: Vec<String> = Vec::with_capacity(2);
        if let Some(joined) = referrer_dir.and_then(|dir| join_relative(dir, &target)) {
            wanted.push(joined.to_lowercase());
        }
        if let Some(rooted) = join_relative("", &target) {
            let rooted = rooted.to_lowercase();
            if !wanted.contains(&rooted) {
                wanted.push(rooted);
            }
        }
        if wanted.is_empty() {
            return None;
        }
        let target_base = basename(&target).to_lowercase();

        if let Some(found) = self.exact(&wanted, &target_base, candidates) {
            return Some(found);
        }

        match self.fuzzy(&wanted, candidates) {
            FuzzyOutcome::Match(found) => return Some(found),
            FuzzyOutcome::Ambiguous => {
                log::debug!("ambiguous repair for {target}: several candidates within margin");
                return None;
            }
            FuzzyOutcome::NoMatch => {}
        }

        referrer_dir.and_then(|dir| self.proximity(dir, &target_base, candidates))
    }

    fn exact<S: AsRef<str>>(
        &self,
        wanted: &[String],
        target_base: &str,
        candidates: &[S],
    ) -> Option<PathMatch> {
        let by_path = unique(candidates.iter().map(AsRef::<str>::as_ref).filter(|candidate| {
            let lowered = candidate.to_lowercase();
            wanted.iter().any(|w| *w == lowered)
        }));
        if let Some(path) = by_path {
            return Some(PathMatch {
                path: path.to_string(),
                confidence: 1.0,
                tier: MatchTier::Exact,
            });
        }

        unique(
            candidates
                .iter()
                .map(AsRef::<str>::as_ref)
                .filter(|candidate| basename(candidate).to_lowercase() == target_base),
        )
        .map(|path| PathMatch {
            path: path.to_string(),
            confidence: 1.0,
            tier: MatchTier::Exact,
        })
    }

    fn fuzzy<S: AsRef<str>>(&self, wanted: &[String], candidates: &[S]) -> FuzzyOutcome {
        let keys: Vec<(String, Option<String>)> = wanted.iter().map(|w| fuzzy_key(w)).collect();

        let mut scored: Vec<(f64, &str)> = candidates
            .iter()
            .map(AsRef::<str>::as_ref)
            .map(|candidate| {
                let (cand_key, cand_ext) = fuzzy_key(&candidate.to_lowercase());
                let score = keys
                    .iter()
                    .map(|(key, ext)| {
                        let raw = similarity(key, &cand_key);
                        if *ext == cand_ext {
                            raw
                        } else {
                            raw * EXTENSION_MISMATCH_FACTOR
                        }
                    })
                    .fold(0.0_f64, f64::max);
                (score, candidate)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let Some(&(best_score, best_path)) = scored.first() else {
            return FuzzyOutcome::NoMatch;
        };
        if best_score < self.config.threshold {
            return FuzzyOutcome::NoMatch;
        }
        let contested = scored
            .iter()
            .skip(1)
            .any(|(score, path)| *path != best_path && best_score - score <= self.config.tie_margin);
        if contested {
            return FuzzyOutcome::Ambiguous;
        }

        FuzzyOutcome::Match(PathMatch {
            path: best_path.to_string(),
            confidence: best_score,
            tier: MatchTier::Fuzzy,
        })
    }

    fn proximity<S: AsRef<str>>(
        &self,
        referrer_dir: &str,
        target_base: &str,
        candidates: &[S],
    ) -> Option<PathMatch> {
        let (target_stem, _) = split_extension(target_base);
        let hits: Vec<&str> = candidates
            .iter()
            .map(AsRef::<str>::as_ref)
            .filter(|candidate| {
                let base = basename(candidate).to_lowercase();
                base == target_base || split_extension(&base).0 == target_stem
            })
            .collect();
        if hits.is_empty() {
            return None;
        }

        let mut level = Some(referrer_dir);
        let mut steps = 0u32;
        while let Some(dir) = level {
            let inside: Vec<&str> = hits
                .iter()
                .copied()
                .filter(|hit| dir.is_empty() || hit.starts_with(&format!("{dir}/")))
                .collect();
            match inside.as_slice() {
                [] => {}
                [only] => {
                    let confidence = (self.config.proximity_base_confidence
                        - f64::from(steps) * self.config.proximity_step)
                        .max(PROXIMITY_FLOOR);
                    return Some(PathMatch {
                        path: (*only).to_string(),
                        confidence,
                        tier: MatchTier::Proximity,
                    });
                }
                _ => {
                    log::debug!("ambiguous proximity match for {target_base} under {dir:?}");
                    return None;
                }
            }
            level = (!dir.is_empty()).then(|| parent_dir(dir));
            steps += 1;
        }
        None
    }
}

enum FuzzyOutcome {
    Match(PathMatch),
    Ambiguous,
    NoMatch,
}

/// Lowercased path with the final extension split off.
fn fuzzy_key(lowered: &str) -> (String, Option<String>) {
    let dir = parent_dir(lowered);
    let (stem, ext) = split_extension(basename(lowered));
    let key = if dir.is_empty() {
        stem.to_string()
    } else {
        format!("{dir}/{stem}")
    };
    (key, ext.map(str::to_string))
}

fn unique<'a>(mut iter: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let first = iter.next()?;
    if iter.any(|other| other != first) {
        return None;
    }
    Some(first)
}
