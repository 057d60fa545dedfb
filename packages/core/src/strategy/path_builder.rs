//! Path Builder
//!
//! Pure functions over materialized path strings. Nothing here touches a node
//! or an object manager, which keeps the formatting rules testable in
//! isolation and reusable by the repository helpers.
//!
//! # Level
//!
//! The level of a node is the number of segments in its path, so a root is
//! always level 1 whatever the separator policy:
//!
//! | starts | ends | path        | level |
//! |--------|------|-------------|-------|
//! | no     | yes  | `A-1/B-2/`  | 2     |
//! | no     | no   | `A-1/B-2`   | 2     |
//! | yes    | yes  | `/A-1/B-2/` | 2     |
//! | yes    | no   | `/A-1/B-2`  | 2     |
//!
//! The same function feeds inserts, updates and the deeper-than filter used
//! when deleting a subtree.

use crate::error::{Result, TreeError};
use crate::mapping::TreeConfig;

/// Separator rules applied to every path of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPolicy {
    pub separator: char,
    pub starts_with_separator: bool,
    pub ends_with_separator: bool,
}

impl PathPolicy {
    pub fn new(separator: char) -> Self {
        Self {
            separator,
            starts_with_separator: false,
            ends_with_separator: true,
        }
    }
}

impl From<&TreeConfig> for PathPolicy {
    fn from(config: &TreeConfig) -> Self {
        Self {
            separator: config.path_separator,
            starts_with_separator: config.path_starts_with_separator,
            ends_with_separator: config.path_ends_with_separator,
        }
    }
}

/// Fail if a raw path source embeds the separator
pub fn validate_segment(source: &str, separator: char) -> Result<()> {
    if source.contains(separator) {
        return Err(TreeError::invalid_path_source(separator, source));
    }
    Ok(())
}

/// Compute a node path from its own source value and its parent's path
///
/// `identifier` is appended as `-<identifier>` when present. An empty parent
/// path is treated like no parent.
pub fn build_path(
    source: &str,
    identifier: Option<&str>,
    parent_path: Option<&str>,
    policy: &PathPolicy,
) -> Result<String> {
    let sep = policy.separator;
    validate_segment(source, sep)?;

    let mut segment = source.to_string();
    if let Some(id) = identifier {
        segment.push('-');
        segment.push_str(id);
    }

    let mut path = match parent_path.filter(|p| !p.is_empty()) {
        Some(parent) if parent.ends_with(sep) => format!("{}{}", parent, segment),
        Some(parent) => format!("{}{}{}", parent, sep, segment),
        None => segment,
    };

    if policy.starts_with_separator && !path.starts_with(sep) {
        path.insert(0, sep);
    }
    if policy.ends_with_separator && !path.ends_with(sep) {
        path.push(sep);
    }

    Ok(path)
}

/// First segment of `path`, skipping the leading separator the policy adds
pub fn root_segment(path: &str, policy: &PathPolicy) -> Option<String> {
    let index = usize::from(policy.starts_with_separator);
    path.split(policy.separator)
        .nth(index)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Number of segments in `path`; 0 for an empty path
pub fn level_of(path: &str, policy: &PathPolicy) -> i64 {
    if path.is_empty() {
        return 0;
    }
    let separators = path.matches(policy.separator).count() as i64;
    let leading = i64::from(policy.starts_with_separator && path.starts_with(policy.separator));
    let trailing = i64::from(path.ends_with(policy.separator));
    separators - leading - trailing + 1
}

/// Lowercase hex MD5 of a path
pub fn path_hash(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

/// Prefix shared by every descendant of `path`, always ending with the
/// separator so `A-1/B-2` never matches `A-1/B-20`
pub fn descendant_prefix(path: &str, policy: &PathPolicy) -> String {
    if path.ends_with(policy.separator) {
        path.to_string()
    } else {
        format!("{}{}", path, policy.separator)
    }
}
