//! Worktree links: a declared anchor `{link, ref, pathspecs[]}` and the
//! on-disk directory naming scheme for its checked-out commits.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// One declared worktree anchor. `link` is as given by the user (relative
/// or absolute); `pathspecs` is kept sorted ascending so that two links
/// differing only in pathspec order compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeLink {
    pub link: String,
    pub git_ref: String,
    pub pathspecs: Vec<String>,
}

impl WorktreeLink {
    pub fn new(link: impl Into<String>, git_ref: Option<String>, mut pathspecs: Vec<String>) -> Self {
        pathspecs.sort();
        Self {
            link: link.into(),
            git_ref: git_ref.unwrap_or_else(|| "HEAD".to_string()),
            pathspecs,
        }
    }

    /// Equivalence used during reconfiguration: same `link`, same `ref`,
    /// same sorted pathspecs. `PartialEq` already implements this since
    /// `pathspecs` is kept sorted at construction.
    pub fn same_as(&self, other: &WorktreeLink) -> bool {
        self == other
    }

    /// Absolute path of the published link, given the repository's
    /// `link_root`.
    pub fn link_abs(&self, link_root: &Path) -> PathBuf {
        crate::fs::join_possibly_relative(link_root, Path::new(&self.link))
    }
}

/// On-disk worktree directory name for a link resolved at commit `commit`:
/// `basename(linkAbs) + "_" + sha256(linkAbs)[:7] + "-" + commit[:7]`.
///
/// Two links with the same basename but different absolute paths hash to
/// distinct directories; re-ensuring a worktree at the same commit reuses
/// the same directory name.
pub fn directory_name(link_abs: &Path, commit: &str) -> String {
    let basename = link_abs
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(link_abs.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let link_hash_prefix = &hex::encode(digest)[..7];

    let commit_prefix = &commit[..commit.len().min(7)];

    format!("{basename}_{link_hash_prefix}-{commit_prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalence_ignores_pathspec_order() {
        let a = WorktreeLink::new(
            "app",
            Some("main".to_string()),
            vec!["b".to_string(), "a".to_string()],
        );
        let b = WorktreeLink::new(
            "app",
            Some("main".to_string()),
            vec!["a".to_string(), "b".to_string()],
        );
        assert!(a.same_as(&b));
    }

    #[test]
    fn default_ref_is_head() {
        let link = WorktreeLink::new("app", None, vec![]);
        assert_eq!(link.git_ref, "HEAD");
    }

    #[test]
    fn distinct_paths_same_basename_yield_distinct_directories() {
        let commit = "abcdef0123456789";
        let a = directory_name(Path::new("/srv/one/app"), commit);
        let b = directory_name(Path::new("/srv/two/app"), commit);
        assert_ne!(a, b);
        assert!(a.starts_with("app_"));
        assert!(b.starts_with("app_"));
    }

    #[test]
    fn same_path_same_commit_reuses_directory_name() {
        let commit = "abcdef0123456789";
        let a = directory_name(Path::new("/srv/one/app"), commit);
        let b = directory_name(Path::new("/srv/one/app"), commit);
        assert_eq!(a, b);
    }

    #[test]
    fn directory_name_uses_seven_char_prefixes() {
        let name = directory_name(Path::new("/srv/one/app"), "0123456789abcdef");
        let (stem, rest) = name.split_once('-').unwrap();
        assert_eq!(rest, "0123456");
        assert!(stem.starts_with("app_"));
        assert_eq!(stem.len(), "app_".len() + 7);
    }
}
