//! abstracts over the version control backend a build configuration's
//! `path` is resolved against. the change collector is written entirely
//! against [`RepositoryAdapter`] so it never has to know whether the
//! history it is walking came from an on-disk git checkout or an
//! in-memory fixture.

use anyhow::Context;
use std::path::Path;
use std::sync::Mutex;

/// one commit touching a configuration's watched path, newest-first order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub rev: String,
    /// unix timestamp of the commit
    pub rev_time: i64,
    /// true once the node stops existing at this path (copy/move boundary);
    /// the collector stops walking when it sees this
    pub path_changed: bool,
    /// true when the tree at this revision is empty
    pub tree_empty: bool,
}

pub trait RepositoryAdapter: Send + Sync {
    /// true when `path` exists in the tree at `HEAD` (or at `max_rev` if
    /// given)
    fn path_exists(&self, path: &str, max_rev: Option<&str>) -> anyhow::Result<bool>;

    /// history of `path`, newest revision first; adapters are expected to
    /// return the full available history, the collector does its own
    /// bounding against `min_rev`/`max_rev`
    fn history(&self, path: &str) -> anyhow::Result<Vec<Revision>>;
}

/// walks a local git checkout via `git2`. `git2::Repository` is `Send`
/// but not `Sync`, so it sits behind a mutex to satisfy the trait's
/// concurrency bound; accesses are brief (a tree walk or a single lookup)
/// so contention between callers is not a concern.
pub struct GitRepositoryAdapter {
    repo: Mutex<git2::Repository>,
}

impl GitRepositoryAdapter {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let repo = git2::Repository::open(path.as_ref())
            .with_context(|| format!("failed to open git repository at {:?}", path.as_ref()))?;
        Ok(Self { repo: Mutex::new(repo) })
    }

    fn head_commit<'repo>(repo: &'repo git2::Repository) -> anyhow::Result<git2::Commit<'repo>> {
        let head = repo.head().context("repository has no HEAD")?;
        head.peel_to_commit().context("HEAD does not resolve to a commit")
    }

    fn tree_entry_exists(tree: &git2::Tree, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        tree.get_path(Path::new(path)).is_ok()
    }
}

impl RepositoryAdapter for GitRepositoryAdapter {
    fn path_exists(&self, path: &str, max_rev: Option<&str>) -> anyhow::Result<bool> {
        let repo = self.repo.lock().unwrap();

        let commit = match max_rev {
            Some(rev) => {
                let oid = git2::Oid::from_str(rev).context("invalid revision")?;
                repo.find_commit(oid).context("revision not found")?
            }
            None => Self::head_commit(&repo)?,
        };

        let tree = commit.tree().context("commit has no tree")?;
        Ok(Self::tree_entry_exists(&tree, path))
    }

    fn history(&self, path: &str) -> anyhow::Result<Vec<Revision>> {
        let repo = self.repo.lock().unwrap();

        let mut walker = repo.revwalk().context("failed to create revwalk")?;
        walker.push_head().context("repository has no HEAD to walk from")?;
        walker.set_sorting(git2::Sort::TIME)?;

        let mut revisions = Vec::new();
        let mut last_existed = true;

        for oid in walker {
            let oid = oid.context("failed to read commit id during history walk")?;
            let commit = repo.find_commit(oid).context("failed to resolve commit")?;
            let tree = commit.tree().context("commit has no tree")?;

            let exists = Self::tree_entry_exists(&tree, path);
            let path_changed = last_existed && !exists;
            last_existed = exists;

            if !exists && !path_changed {
                continue;
            }

            let tree_empty = tree.len() == 0
                || (!path.is_empty()
                    && tree
                        .get_path(Path::new(path))
                        .ok()
                        .and_then(|entry| entry.to_object(&repo).ok())
                        .and_then(|obj| obj.into_tree().ok())
                        .map(|t| t.len() == 0)
                        .unwrap_or(false));

            revisions.push(Revision {
                rev: oid.to_string(),
                rev_time: commit.time().seconds(),
                path_changed,
                tree_empty,
            });

            if path_changed {
                break;
            }
        }

        Ok(revisions)
    }
}

/// in-memory fixture used by tests and by operators smoke-testing a
/// configuration before pointing it at a real repository
#[derive(Debug, Default, Clone)]
pub struct MockRepositoryAdapter {
    pub paths: std::collections::HashSet<String>,
    pub histories: std::collections::HashMap<String, Vec<Revision>>,
}

impl MockRepositoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, path: &str, revisions: Vec<Revision>) -> Self {
        self.paths.insert(path.to_string());
        self.histories.insert(path.to_string(), revisions);
        self
    }
}

impl RepositoryAdapter for MockRepositoryAdapter {
    fn path_exists(&self, path: &str, _max_rev: Option<&str>) -> anyhow::Result<bool> {
        Ok(self.paths.contains(path))
    }

    fn history(&self, path: &str) -> anyhow::Result<Vec<Revision>> {
        Ok(self.histories.get(path).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reports_missing_path() {
        let adapter = MockRepositoryAdapter::new();
        assert!(!adapter.path_exists("trunk", None).unwrap());
    }

    #[test]
    fn mock_returns_configured_history() {
        let adapter = MockRepositoryAdapter::new().with_history(
            "trunk",
            vec![Revision { rev: "2".into(), rev_time: 200, path_changed: false, tree_empty: false }],
        );

        let history = adapter.history("trunk").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rev, "2");
    }
}
