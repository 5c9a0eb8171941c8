//! Small filesystem helpers used by the mirror engine.

use std::path::{Path, PathBuf};

use normalize_path::NormalizePath;

use crate::error::MirrorError;

/// `true` if `path` exists, is a directory, and has no entries.
///
/// A missing directory is also considered empty: both are "nothing to
/// preserve here" from the caller's point of view.
pub fn is_empty_dir(path: &Path) -> Result<bool, MirrorError> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(source) => Err(MirrorError::fs(path, source)),
    }
}

/// Remove every entry under `dir`, but only if `dir` itself is non-empty;
/// a missing directory is a no-op.
pub fn remove_dir_contents(dir: &Path) -> Result<(), MirrorError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(MirrorError::fs(dir, source)),
    };

    for entry in entries {
        let entry = entry.map_err(|source| MirrorError::fs(dir, source))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| MirrorError::fs(&path, source))?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|source| MirrorError::fs(&path, source))?;
        } else {
            std::fs::remove_file(&path).map_err(|source| MirrorError::fs(&path, source))?;
        }
    }

    Ok(())
}

/// Resolve a symlink at `link` to an absolute path. Returns `None` if
/// `link` does not exist or is not a symlink.
pub fn read_link_absolute(link: &Path) -> Option<PathBuf> {
    let target = std::fs::read_link(link).ok()?;
    let joined = if target.is_absolute() {
        target
    } else {
        link.parent()?.join(target)
    };
    dunce::canonicalize(&joined).ok()
}

/// Join a possibly-relative `link` onto `root`, leaving an already-absolute
/// `link` untouched. The result is lexically normalized (`.`/`..`
/// components collapsed) without touching the filesystem, since the
/// target may not exist yet — unlike `canonicalize`, this works before the
/// worktree directory it names has been created.
pub fn join_possibly_relative(root: &Path, link: &Path) -> PathBuf {
    let joined = if link.is_absolute() { link.to_path_buf() } else { root.join(link) };
    joined.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dir_true_for_missing_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(is_empty_dir(&tmp.path().join("missing")).unwrap());

        let empty = tmp.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(is_empty_dir(&empty).unwrap());

        std::fs::write(empty.join("file"), b"x").unwrap();
        assert!(!is_empty_dir(&empty).unwrap());
    }

    #[test]
    fn join_possibly_relative_preserves_absolute() {
        let root = Path::new("/var/lib/git-mirror");
        assert_eq!(
            join_possibly_relative(root, Path::new("/abs/link")),
            PathBuf::from("/abs/link")
        );
        assert_eq!(
            join_possibly_relative(root, Path::new("rel/link")),
            PathBuf::from("/var/lib/git-mirror/rel/link")
        );
    }

    #[test]
    fn remove_dir_contents_clears_but_keeps_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("worktrees");
        std::fs::create_dir_all(dir.join("a")).unwrap();
        std::fs::write(dir.join("b.txt"), b"x").unwrap();

        remove_dir_contents(&dir).unwrap();

        assert!(is_empty_dir(&dir).unwrap());
    }
}
