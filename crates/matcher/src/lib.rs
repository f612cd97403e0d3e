//! # Doc Registry Matcher
//!
//! Pure path resolution used to repair broken intra-repository links.
//!
//! ```text
//! broken target
//!     │
//!     ├──> Tier 1: case-insensitive path / basename      (confidence 1.0)
//!     ├──> Tier 2: normalized Levenshtein, unique best   (confidence = similarity)
//!     └──> Tier 3: basename search outward from referrer (confidence decays per level)
//! ```
//!
//! Nothing here touches the filesystem; callers hand in the candidate set.
//!
//! ```
//! use docreg_matcher::{MatchConfig, MatchTier, PathMatcher};
//!
//! let matcher = PathMatcher::new(MatchConfig::default());
//! let found = matcher
//!     .resolve("b.mdc", Some("a.mdc"), &["a.mdc", "B.mdc"])
//!     .expect("case-insensitive hit");
//! assert_eq!(found.path, "B.mdc");
//! assert_eq!(found.tier, MatchTier::Exact);
//! ```

mod distance;
mod matcher;
mod paths;

pub use distance::{levenshtein, similarity};
pub use matcher::{MatchConfig, MatchTier, PathMatch, PathMatcher};
pub use paths::{
    basename, extension, join_relative, normalize_target, parent_dir, relative_path,
};
