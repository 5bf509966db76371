//! Filesystem helpers: size accounting, tree copy/removal, atomic writes.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global counter for unique temp file names within a process
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns the current Unix timestamp in seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Recursively measure the on-disk size of a file or directory in bytes.
///
/// Symlinks are counted by their own metadata, never followed.
pub fn dir_size(path: impl AsRef<Path>) -> u64 {
    let path = path.as_ref();
    let mut total = 0u64;
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.is_file() {
            return meta.len();
        }
    }
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(meta) = fs::symlink_metadata(&path) {
                if meta.is_file() {
                    total = total.saturating_add(meta.len());
                } else if meta.is_dir() {
                    total = total.saturating_add(dir_size(path));
                }
            }
        }
    }
    total
}

/// Recursively copy a directory tree, checking the deadline between files.
///
/// Returns `ErrorKind::TimedOut` once the deadline has passed; the partially
/// copied destination is left for the caller to clean up.
pub fn copy_tree(src: &Path, dst: &Path, deadline: Instant) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("copy deadline exceeded while copying {}", src.display()),
            ));
        }
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target, deadline)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link_target = fs::read_link(entry.path())?;
                std::os::unix::fs::symlink(link_target, &target)?;
            }
            #[cfg(not(unix))]
            {
                fs::copy(entry.path(), &target)?;
            }
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove a directory tree (or a single file left where a tree was expected).
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            // A plain file at the path also counts as removable.
            if path.is_file() || path.is_symlink() {
                fs::remove_file(path)
            } else {
                Err(e)
            }
        }
    }
}

/// Atomically replace the contents of a file.
///
/// Writes to a unique temp path in the same directory, then renames over the
/// target. The rename is atomic on POSIX, so readers never observe a partial
/// write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let counter = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let unique_id = format!("{}.{}", std::process::id(), counter);
    let temp_path = path.with_extension(format!("tmp.{}", unique_id));

    fs::write(&temp_path, bytes)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn dir_size_counts_nested_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"12345").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"1234567890").unwrap();

        assert_eq!(dir_size(dir.path()), 15);
    }

    #[test]
    fn dir_size_of_missing_path_is_zero() {
        assert_eq!(dir_size(Path::new("/nonexistent/path")), 0);
    }

    #[test]
    fn copy_tree_copies_nested_structure() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::write(src.join("sub").join("b.txt"), b"world").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        copy_tree(&src, &dst, deadline).unwrap();

        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dst.join("sub").join("b.txt")).unwrap(), b"world");
    }

    #[test]
    fn copy_tree_respects_expired_deadline() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();

        let deadline = Instant::now() - Duration::from_secs(1);
        let err = copy_tree(&src, &dst, deadline).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn remove_tree_is_idempotent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("gone");
        remove_tree(&target).unwrap();

        fs::create_dir_all(target.join("sub")).unwrap();
        fs::write(target.join("sub").join("f"), b"x").unwrap();
        remove_tree(&target).unwrap();
        assert!(!target.exists());
        remove_tree(&target).unwrap();
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str() != Some("state.json"))
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
    }
}
