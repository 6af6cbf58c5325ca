//! Exclusion Policy (spec §4.2): a pure function deciding whether a
//! path or basename is ignored. Stateless and safe to call concurrently
//! from the Reader thread and the caller's scheduler alike.

use std::path::{Path, PathBuf};

use glob::Pattern;

/// One configured excluded subtree, with an independent on/off flag
/// (spec §6: `set_excluded_paths(Monitor, list of (path, enabled))`).
#[derive(Debug, Clone)]
pub struct ExcludedPath {
    pub path: PathBuf,
    pub enabled: bool,
}

/// Everything the Exclusion Policy needs to decide inclusion.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    exclude_hidden: bool,
    patterns: Vec<Pattern>,
    excluded_paths: Vec<ExcludedPath>,
}

impl ExclusionPolicy {
    pub fn new() -> Self {
        Self {
            exclude_hidden: true,
            patterns: Vec::new(),
            excluded_paths: Vec::new(),
        }
    }

    pub fn set_exclude_hidden(&mut self, exclude: bool) {
        self.exclude_hidden = exclude;
    }

    /// Invalid glob strings are logged and dropped rather than rejected
    /// wholesale — one bad pattern in a list shouldn't disable the rest.
    pub fn set_patterns<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns = patterns
            .into_iter()
            .filter_map(|p| match Pattern::new(p.as_ref()) {
                Ok(pat) => Some(pat),
                Err(err) => {
                    tracing::warn!(pattern = p.as_ref(), %err, "invalid exclude pattern, ignoring");
                    None
                }
            })
            .collect();
    }

    pub fn set_excluded_paths(&mut self, paths: Vec<ExcludedPath>) {
        self.excluded_paths = paths;
    }

    /// Excluded if hidden (and hidden exclusion is on), if any pattern
    /// matches the basename, or if `full_path` exactly matches an
    /// enabled excluded subtree (spec §4.2).
    pub fn is_excluded(&self, name: &str, full_path: &Path) -> bool {
        if self.is_name_excluded(name) {
            return true;
        }

        if self
            .excluded_paths
            .iter()
            .any(|ex| ex.enabled && ex.path == full_path)
        {
            return true;
        }

        false
    }

    /// Basename-only check: hidden prefix and glob patterns, with no
    /// notion of a full path. Used where only a bare name is available
    /// yet (e.g. filtering a raw kernel event before its full path has
    /// been resolved).
    pub fn is_name_excluded(&self, name: &str) -> bool {
        (self.exclude_hidden && name.starts_with('.'))
            || self.patterns.iter().any(|p| p.matches(name))
    }

    /// Convenience for callers that only have a full path and want the
    /// basename-derived checks applied too (used by the Applier, which
    /// deals in full paths rather than `(dir, name)` pairs).
    pub fn is_path_excluded(&self, full_path: &Path) -> bool {
        let name = match full_path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return true,
        };
        self.is_excluded(name, full_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_files_excluded_by_default() {
        let policy = ExclusionPolicy::new();
        assert!(policy.is_excluded(".git", Path::new("/repo/.git")));
        assert!(!policy.is_excluded("main.rs", Path::new("/repo/main.rs")));
    }

    #[test]
    fn hidden_exclusion_can_be_disabled() {
        let mut policy = ExclusionPolicy::new();
        policy.set_exclude_hidden(false);
        assert!(!policy.is_excluded(".git", Path::new("/repo/.git")));
    }

    #[test]
    fn glob_patterns_match_basename() {
        let mut policy = ExclusionPolicy::new();
        policy.set_exclude_hidden(false);
        policy.set_patterns(["*.tmp", "node_modules"]);
        assert!(policy.is_excluded("scratch.tmp", Path::new("/repo/scratch.tmp")));
        assert!(policy.is_excluded("node_modules", Path::new("/repo/node_modules")));
        assert!(!policy.is_excluded("main.rs", Path::new("/repo/main.rs")));
    }

    #[test]
    fn invalid_pattern_is_dropped_not_fatal() {
        let mut policy = ExclusionPolicy::new();
        policy.set_exclude_hidden(false);
        policy.set_patterns(["[", "*.log"]);
        assert!(policy.is_excluded("daemon.log", Path::new("/repo/daemon.log")));
    }

    #[test]
    fn excluded_subtree_must_be_enabled() {
        let mut policy = ExclusionPolicy::new();
        policy.set_exclude_hidden(false);
        policy.set_excluded_paths(vec![ExcludedPath {
            path: PathBuf::from("/repo/build"),
            enabled: false,
        }]);
        assert!(!policy.is_excluded("build", Path::new("/repo/build")));

        policy.set_excluded_paths(vec![ExcludedPath {
            path: PathBuf::from("/repo/build"),
            enabled: true,
        }]);
        assert!(policy.is_excluded("build", Path::new("/repo/build")));
    }
}
