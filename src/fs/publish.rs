//! Atomic symlink publication.

use std::path::Path;

use rand::Rng;

use crate::error::MirrorError;

/// Publish `link -> target` atomically. Both paths must be absolute.
///
/// 1. Ensure `dirname(link)` exists.
/// 2. Compute `target` relative to `dirname(link)`, so the tree stays
///    relocatable.
/// 3. Create a symlink at a temporary name `<basename>-<random>` inside
///    `dirname(link)` pointing at the relative target.
/// 4. Rename the temporary name over `link` (atomic on POSIX).
///
/// Failure at any step surfaces; a leftover temporary name is harmless and
/// is cleaned up by a later cycle (or ignored as clutter).
pub fn publish_symlink(link: &Path, target: &Path) -> Result<(), MirrorError> {
    debug_assert!(link.is_absolute(), "publish_symlink requires an absolute link");
    debug_assert!(target.is_absolute(), "publish_symlink requires an absolute target");

    let parent = link
        .parent()
        .ok_or_else(|| MirrorError::Parse(format!("link {} has no parent directory", link.display())))?;

    std::fs::create_dir_all(parent).map_err(|source| MirrorError::fs(parent, source))?;

    let relative_target = pathdiff::diff_paths(target, parent).ok_or_else(|| {
        MirrorError::Parse(format!(
            "cannot express {} relative to {}",
            target.display(),
            parent.display()
        ))
    })?;

    let basename = link
        .file_name()
        .ok_or_else(|| MirrorError::Parse(format!("link {} has no file name", link.display())))?;

    let suffix: u64 = rand::thread_rng().gen();
    let temp_name = format!("{}-{:016x}", basename.to_string_lossy(), suffix);
    let temp_path = parent.join(temp_name);

    symlink(&relative_target, &temp_path).map_err(|source| MirrorError::fs(&temp_path, source))?;

    std::fs::rename(&temp_path, link).map_err(|source| MirrorError::fs(link, source))?;

    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_relative_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let target_dir = tmp.path().join("worktrees").join("w1");
        std::fs::create_dir_all(&target_dir).unwrap();
        let link = tmp.path().join("published").join("link");

        publish_symlink(&link, &target_dir).unwrap();

        let resolved = crate::fs::read_link_absolute(&link).unwrap();
        assert_eq!(resolved, target_dir.canonicalize().unwrap());
    }

    #[test]
    fn republish_replaces_existing_link() {
        let tmp = tempfile::tempdir().unwrap();
        let target_a = tmp.path().join("a");
        let target_b = tmp.path().join("b");
        std::fs::create_dir_all(&target_a).unwrap();
        std::fs::create_dir_all(&target_b).unwrap();
        let link = tmp.path().join("published").join("link");

        publish_symlink(&link, &target_a).unwrap();
        publish_symlink(&link, &target_b).unwrap();

        let resolved = crate::fs::read_link_absolute(&link).unwrap();
        assert_eq!(resolved, target_b.canonicalize().unwrap());
    }
}
