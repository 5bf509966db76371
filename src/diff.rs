//! Difference engine: read-only comparison of mirror state against origins.
//!
//! Two comparison modes, both pure functions of two state snapshots:
//!
//! - Git entries: commit-range walks and tree diffs between the mirror's
//!   HEAD and the origin's HEAD (both commits must already be present in the
//!   mirror's object database; the manager fetches before summarizing).
//! - Local entries: per-file sha256 fingerprint maps of a directory tree,
//!   compared against the fingerprint recorded at last cache time.

use git2::{Delta, Oid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::git::{GitError, open_repository};

/// Structured summary of the changes between two observed states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Number of commits the origin is ahead of the mirror. `None` for local
    /// entries, which have no commit graph.
    #[serde(default)]
    pub commits: Option<u64>,
    pub files_added: u64,
    pub files_modified: u64,
    pub files_removed: u64,
}

impl ChangeSummary {
    /// True when the summary records no file- or commit-level changes.
    pub fn is_empty(&self) -> bool {
        self.commits.unwrap_or(0) == 0
            && self.files_added == 0
            && self.files_modified == 0
            && self.files_removed == 0
    }
}

/// Summarize the commit range `local..remote` in the repository at
/// `repo_path`: commit count plus file-level add/modify/delete tallies
/// between the two tree states.
///
/// Read-only; never mutates the repository.
pub fn commit_range_summary(
    repo_path: &Path,
    local: &str,
    remote: &str,
) -> Result<ChangeSummary, GitError> {
    let repo = open_repository(repo_path)?;
    let local_oid = Oid::from_str(local)?;
    let remote_oid = Oid::from_str(remote)?;

    let mut walk = repo.revwalk()?;
    walk.push(remote_oid)?;
    walk.hide(local_oid)?;
    let mut commits = 0u64;
    for oid in walk {
        oid?;
        commits += 1;
    }

    let local_tree = repo.find_commit(local_oid)?.tree()?;
    let remote_tree = repo.find_commit(remote_oid)?.tree()?;
    let diff = repo.diff_tree_to_tree(Some(&local_tree), Some(&remote_tree), None)?;

    let mut summary = ChangeSummary {
        commits: Some(commits),
        ..ChangeSummary::default()
    };
    for delta in diff.deltas() {
        match delta.status() {
            Delta::Added => summary.files_added += 1,
            Delta::Deleted => summary.files_removed += 1,
            _ => summary.files_modified += 1,
        }
    }

    Ok(summary)
}

/// Per-file content fingerprints of a directory tree.
///
/// Keys are relative paths, values are hex sha256 digests of file contents.
/// Any `.git` directory is skipped; symlinks are ignored.
pub fn fingerprint_tree(root: &Path) -> io::Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    walk_tree(root, root, &mut map)?;
    Ok(map)
}

fn walk_tree(root: &Path, dir: &Path, map: &mut BTreeMap<String, String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_str() == Some(".git") {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_tree(root, &path, map)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            let bytes = fs::read(&path)?;
            map.insert(rel, hex::encode(Sha256::digest(&bytes)));
        }
    }
    Ok(())
}

/// Collapse a fingerprint map into one aggregate digest.
///
/// BTreeMap iteration order makes the digest deterministic for a given tree
/// state.
pub fn aggregate_fingerprint(map: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (path, digest) in map {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}

/// Compare two fingerprint maps, treating `before` as the mirror state and
/// `after` as the source state.
pub fn compare_fingerprints(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> ChangeSummary {
    let mut summary = ChangeSummary::default();
    for (path, digest) in after {
        match before.get(path) {
            None => summary.files_added += 1,
            Some(old) if old != digest => summary.files_modified += 1,
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            summary.files_removed += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn run_git(args: &[&str], cwd: &Path) {
        let output = Command::new("git")
            .args([
                "-c",
                "user.email=cache@test",
                "-c",
                "user.name=cache-test",
                "-c",
                "init.defaultBranch=main",
            ])
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn head_of(dir: &Path) -> String {
        let repo = open_repository(dir).unwrap();
        repo.head().unwrap().peel_to_commit().unwrap().id().to_string()
    }

    #[test]
    fn commit_range_summary_counts_commits_and_files() {
        let dir = tempdir().unwrap();
        let repo = dir.path();
        run_git(&["init"], repo);
        fs::write(repo.join("a.txt"), "one\n").unwrap();
        fs::write(repo.join("b.txt"), "two\n").unwrap();
        run_git(&["add", "-A"], repo);
        run_git(&["commit", "-m", "initial"], repo);
        let first = head_of(repo);

        fs::write(repo.join("a.txt"), "one changed\n").unwrap();
        fs::write(repo.join("c.txt"), "three\n").unwrap();
        fs::remove_file(repo.join("b.txt")).unwrap();
        run_git(&["add", "-A"], repo);
        run_git(&["commit", "-m", "second"], repo);
        let second = head_of(repo);

        let summary = commit_range_summary(repo, &first, &second).unwrap();
        assert_eq!(summary.commits, Some(1));
        assert_eq!(summary.files_added, 1);
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.files_removed, 1);
        assert!(!summary.is_empty());
    }

    #[test]
    fn commit_range_summary_of_identical_commits_is_empty() {
        let dir = tempdir().unwrap();
        let repo = dir.path();
        run_git(&["init"], repo);
        fs::write(repo.join("a.txt"), "one\n").unwrap();
        run_git(&["add", "-A"], repo);
        run_git(&["commit", "-m", "initial"], repo);
        let head = head_of(repo);

        let summary = commit_range_summary(repo, &head, &head).unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.commits, Some(0));
    }

    #[test]
    fn fingerprint_tree_skips_git_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();

        let map = fingerprint_tree(dir.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a.txt"));
    }

    #[test]
    fn aggregate_fingerprint_is_stable_and_content_sensitive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        fs::write(dir.path().join("b.txt"), "two").unwrap();

        let first = aggregate_fingerprint(&fingerprint_tree(dir.path()).unwrap());
        let second = aggregate_fingerprint(&fingerprint_tree(dir.path()).unwrap());
        assert_eq!(first, second);

        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let third = aggregate_fingerprint(&fingerprint_tree(dir.path()).unwrap());
        assert_ne!(first, third);
    }

    #[test]
    fn compare_fingerprints_tallies_all_kinds() {
        let mut before = BTreeMap::new();
        before.insert("kept.txt".to_string(), "aaa".to_string());
        before.insert("changed.txt".to_string(), "bbb".to_string());
        before.insert("gone.txt".to_string(), "ccc".to_string());

        let mut after = BTreeMap::new();
        after.insert("kept.txt".to_string(), "aaa".to_string());
        after.insert("changed.txt".to_string(), "ddd".to_string());
        after.insert("new.txt".to_string(), "eee".to_string());

        let summary = compare_fingerprints(&before, &after);
        assert_eq!(summary.files_added, 1);
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.files_removed, 1);
        assert_eq!(summary.commits, None);
    }

    #[test]
    fn compare_identical_fingerprints_is_empty() {
        let mut map = BTreeMap::new();
        map.insert("a.txt".to_string(), "aaa".to_string());
        let summary = compare_fingerprints(&map, &map.clone());
        assert!(summary.is_empty());
    }
}
