//! walks a build configuration's watched path and yields candidate
//! revisions in range, newest first. this is a pure producer: it never
//! touches the store, and the platform/existing-build fan-out described
//! for the change collector happens one level up, in [`crate::queue`],
//! which is its only consumer.

use log::warn;

use crate::repo::RepositoryAdapter;
use crate::store::BuildConfigRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionCandidate {
    pub rev: String,
    pub rev_time: i64,
}

/// yields revisions of `config.path`, newest first, bounded by
/// `config.min_rev`/`config.max_rev`
pub fn collect(config: &BuildConfigRecord, repo: &dyn RepositoryAdapter) -> Vec<RevisionCandidate> {
    if !repo.path_exists(&config.path, config.max_rev.as_deref()).unwrap_or(false) {
        warn!("path '{}' of build config '{}' does not exist, skipping collection", config.path, config.name);
        return Vec::new();
    }

    let history = match repo.history(&config.path) {
        Ok(history) => history,
        Err(e) => {
            warn!("failed to walk history for build config '{}': {e:#}", config.name);
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();

    for revision in &history {
        if revision.path_changed {
            break;
        }

        if let Some(min_rev) = &config.min_rev {
            if is_older(&revision.rev, min_rev, &history) {
                break;
            }
        }

        if let Some(max_rev) = &config.max_rev {
            if is_newer(&revision.rev, max_rev, &history) {
                continue;
            }
        }

        if revision.tree_empty {
            continue;
        }

        candidates.push(RevisionCandidate { rev: revision.rev.clone(), rev_time: revision.rev_time });
    }

    candidates
}

/// revisions arrive newest-first, so "older than" reduces to "appears
/// later in (or not at all in) the walked slice than the bound"
fn is_older(rev: &str, bound: &str, history: &[crate::repo::Revision]) -> bool {
    let Some(rev_time) = history.iter().find(|r| r.rev == rev).map(|r| r.rev_time) else {
        return false;
    };
    let Some(bound_time) = history.iter().find(|r| r.rev == bound).map(|r| r.rev_time) else {
        return false;
    };
    rev_time < bound_time
}

fn is_newer(rev: &str, bound: &str, history: &[crate::repo::Revision]) -> bool {
    let Some(rev_time) = history.iter().find(|r| r.rev == rev).map(|r| r.rev_time) else {
        return false;
    };
    let Some(bound_time) = history.iter().find(|r| r.rev == bound).map(|r| r.rev_time) else {
        return false;
    };
    rev_time > bound_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{MockRepositoryAdapter, Revision};

    fn config(path: &str, min_rev: Option<&str>, max_rev: Option<&str>) -> BuildConfigRecord {
        BuildConfigRecord {
            name: "demo".into(),
            label: "Demo".into(),
            path: path.into(),
            min_rev: min_rev.map(String::from),
            max_rev: max_rev.map(String::from),
            recipe: "<build/>".into(),
            active: true,
            description: String::new(),
        }
    }

    fn rev(id: &str, time: i64) -> Revision {
        Revision { rev: id.into(), rev_time: time, path_changed: false, tree_empty: false }
    }

    #[test]
    fn missing_path_yields_nothing() {
        let adapter = MockRepositoryAdapter::new();
        let config = config("trunk", None, None);
        assert!(collect(&config, &adapter).is_empty());
    }

    #[test]
    fn collects_full_history_within_bounds() {
        let adapter = MockRepositoryAdapter::new()
            .with_history("trunk", vec![rev("3", 300), rev("2", 200), rev("1", 100)]);
        let config = config("trunk", None, None);

        let revisions = collect(&config, &adapter);
        assert_eq!(revisions.len(), 3);
        assert_eq!(revisions[0].rev, "3");
    }

    #[test]
    fn stops_at_path_change_boundary() {
        let mut history = vec![rev("2", 200), rev("1", 100)];
        history[1].path_changed = true;

        let adapter = MockRepositoryAdapter::new().with_history("trunk", history);
        let config = config("trunk", None, None);

        let revisions = collect(&config, &adapter);
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].rev, "2");
    }

    #[test]
    fn skips_empty_trees() {
        let mut history = vec![rev("2", 200), rev("1", 100)];
        history[0].tree_empty = true;

        let adapter = MockRepositoryAdapter::new().with_history("trunk", history);
        let config = config("trunk", None, None);

        let revisions = collect(&config, &adapter);
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].rev, "1");
    }
}
