//! Slash-separated, root-relative path helpers.
//!
//! Registry paths are always stored with `/` separators and without a leading `./`,
//! independent of the host platform.

const LINK_PREFIXES: &[&str] = &["mdc:", "file:"];

/// Strip decoration from a raw link target so it can be compared against tracked paths.
///
/// Removes `<...>` wrapping, `mdc:`/`file:` prefixes, `#fragment` and `?query` suffixes,
/// leading `./` segments, and converts backslashes to slashes.
pub fn normalize_target(raw: &str) -> String {
    let mut target = raw.trim();
    if let Some(inner) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        target = inner.trim();
    }
    for prefix in LINK_PREFIXES {
        if let Some(rest) = target.strip_prefix(prefix) {
            target = rest;
            break;
        }
    }
    if let Some(idx) = target.find(['#', '?']) {
        target = &target[..idx];
    }

    let mut normalized = target.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Resolve `rel` against `base_dir`, collapsing `.` and `..`.
///
/// A leading `/` makes `rel` root-relative. Returns `None` when the result would escape the
/// root.
pub fn join_relative(base_dir: &str, rel: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    let (start, rel) = match rel.strip_prefix('/') {
        Some(rooted) => ("", rooted),
        None => (base_dir, rel),
    };
    for part in start.split('/').chain(rel.split('/')) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Directory part of a root-relative path; `""` for files at the root.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Final path segment.
pub fn basename(path: &str) -> &str {
    path.rfind('/').map_or(path, |idx| &path[idx + 1..])
}

/// Path to `to` as written from a file located in `from_dir`.
pub fn relative_path(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let target: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let shared = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    // Never consume the file name itself as a shared directory.
    let shared = shared.min(target.len().saturating_sub(1));

    let mut parts: Vec<&str> = Vec::with_capacity(from.len() - shared + target.len() - shared);
    parts.extend(std::iter::repeat("..").take(from.len() - shared));
    parts.extend(&target[shared..]);
    parts.join("/")
}

/// Extension of the final path segment, without the dot. Dotfiles have none.
pub fn extension(path: &str) -> Option<&str> {
    split_extension(basename(path)).1
}

pub(crate) fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}
