//! the build queue: turns collector output into PENDING builds
//! ([`populate`]), hands PENDING builds to registering slaves
//! ([`get_build_for_slave`]), and reclaims builds whose slave went quiet
//! ([`reset_orphaned_builds`]).

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use log::{debug, info, warn};

use crate::collector;
use crate::matcher::{self, PlatformCandidate};
use crate::repo::RepositoryAdapter;
use crate::store::{BuildConfigRecord, BuildRecord, Database, PlatformRecord};

pub struct QueueConfig {
    pub build_all: bool,
    pub stabilize_wait: u32,
    pub timeout: u32,
}

/// enqueues PENDING builds for every active configuration, against the
/// given repository adapter
pub async fn populate(
    db: &Database,
    repo: &dyn RepositoryAdapter,
    config: &QueueConfig,
    now: i64,
) -> Result<()> {
    for build_config in BuildConfigRecord::find_active(db).await? {
        populate_config(db, repo, config, &build_config, now).await?;
    }

    Ok(())
}

async fn populate_config(
    db: &Database,
    repo: &dyn RepositoryAdapter,
    config: &QueueConfig,
    build_config: &BuildConfigRecord,
    now: i64,
) -> Result<()> {
    let platforms = PlatformRecord::find_for_config(&build_config.name, db).await?;
    if platforms.is_empty() {
        return Ok(());
    }

    let revisions = collector::collect(build_config, repo);
    let mut seen_platforms: HashSet<i64> = HashSet::new();

    for revision in &revisions {
        let age = now - revision.rev_time;
        if config.stabilize_wait > 0 && age < config.stabilize_wait as i64 {
            continue;
        }

        for platform in &platforms {
            if !config.build_all && seen_platforms.contains(&platform.id) {
                continue;
            }

            let existing =
                BuildRecord::find_for_config_rev_platform(&build_config.name, &revision.rev, platform.id, db)
                    .await?;

            if existing.is_some() {
                if !config.build_all {
                    seen_platforms.insert(platform.id);
                }
                continue;
            }

            match BuildRecord::insert(&build_config.name, &revision.rev, revision.rev_time, platform.id, db).await {
                Ok(id) => {
                    info!(
                        "queued build #{id} for '{}' platform '{}' at {}",
                        build_config.name, platform.name, revision.rev
                    );
                }
                Err(e) => {
                    // another populator raced us for this (config, rev, platform); fine
                    debug!("build insert for '{}' at {} skipped: {e:#}", build_config.name, revision.rev);
                }
            }

            if !config.build_all {
                seen_platforms.insert(platform.id);
            }
        }

        if !config.build_all && seen_platforms.len() == platforms.len() {
            break;
        }
    }

    Ok(())
}

/// hands the next eligible PENDING build to a registering slave, or `None`
/// if nothing matches
pub async fn get_build_for_slave(
    db: &Database,
    config: &QueueConfig,
    now: i64,
    name: &str,
    properties: &BTreeMap<String, String>,
) -> Result<Option<BuildRecord>> {
    reset_orphaned_builds(db, config, now).await?;

    let mut candidate_platforms = Vec::new();
    for build_config in BuildConfigRecord::find_active(db).await? {
        for platform in PlatformRecord::find_for_config(&build_config.name, db).await? {
            candidate_platforms.push((build_config.name.clone(), platform.id, platform.rules.clone()));
        }
    }

    let candidates = candidate_platforms
        .iter()
        .map(|(config, platform, rules)| PlatformCandidate { config, platform: *platform, rules });
    let matched = matcher::matching_platforms(properties, candidates);
    let matched_platforms: HashSet<i64> = matched.iter().map(|m| m.platform).collect();

    let pending = BuildRecord::find_pending(db).await?;
    let mut to_delete = Vec::new();
    let mut selected = None;

    for build in pending {
        if should_delete_build(db, config, &build).await? {
            to_delete.push(build.id);
            continue;
        }

        if selected.is_none() && matched_platforms.contains(&build.platform) {
            selected = Some(build);
        }
    }

    for id in to_delete {
        BuildRecord::delete(id, db).await?;
    }

    let Some(build) = selected else {
        return Ok(None);
    };

    let mut slave_info = build.slave_info.clone();
    slave_info.extend(properties.clone());

    BuildRecord::assign_slave(build.id, name, &slave_info, now, db).await?;

    BuildRecord::find(build.id, db).await
}

/// resets IN_PROGRESS builds whose slave has been quiet for longer than
/// `timeout` back to PENDING
pub async fn reset_orphaned_builds(db: &Database, config: &QueueConfig, now: i64) -> Result<()> {
    if config.timeout == 0 {
        return Ok(());
    }

    for build in BuildRecord::find_in_progress(db).await? {
        if now - build.last_activity >= config.timeout as i64 {
            warn!("build #{} orphaned (no activity for {}s), resetting to pending", build.id, config.timeout);
            crate::session::wipe_steps(db, build.id).await?;
            BuildRecord::reset_to_pending(build.id, db).await?;
        }
    }

    Ok(())
}

/// whether a PENDING build is stale and should be dropped instead of
/// dispatched
pub async fn should_delete_build(db: &Database, config: &QueueConfig, build: &BuildRecord) -> Result<bool> {
    let Some(platform) = PlatformRecord::find(build.platform, db).await? else {
        return Ok(true);
    };

    let Some(build_config) = BuildConfigRecord::find(&build.config, db).await? else {
        return Ok(true);
    };

    if !build_config.active {
        return Ok(true);
    }

    if platform.config != build_config.name {
        return Ok(true);
    }

    if let Some(min_rev) = &build_config.min_rev {
        if min_rev.as_str() != build.rev && rev_is_older(db, &build_config.name, &build.rev, min_rev).await? {
            return Ok(true);
        }
    }

    if let Some(max_rev) = &build_config.max_rev {
        if max_rev.as_str() != build.rev && rev_is_newer(db, &build_config.name, &build.rev, max_rev).await? {
            return Ok(true);
        }
    }

    if !config.build_all {
        if let Some(newest) = BuildRecord::newest_for_config_platform(&build_config.name, build.platform, db).await? {
            if newest.id != build.id && newest.rev_time > build.rev_time {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// the queue only has revision timestamps recorded on builds already in
/// the store to compare against; a bound that was never itself queued is
/// treated as satisfied rather than blocking dispatch indefinitely
async fn rev_is_older(db: &Database, config: &str, rev: &str, bound: &str) -> Result<bool> {
    let Some(rev_build) = find_any_for_rev(db, config, rev).await? else { return Ok(false) };
    let Some(bound_build) = find_any_for_rev(db, config, bound).await? else { return Ok(false) };
    Ok(rev_build.rev_time < bound_build.rev_time)
}

async fn rev_is_newer(db: &Database, config: &str, rev: &str, bound: &str) -> Result<bool> {
    let Some(rev_build) = find_any_for_rev(db, config, rev).await? else { return Ok(false) };
    let Some(bound_build) = find_any_for_rev(db, config, bound).await? else { return Ok(false) };
    Ok(rev_build.rev_time > bound_build.rev_time)
}

async fn find_any_for_rev(db: &Database, config: &str, rev: &str) -> Result<Option<BuildRecord>> {
    Ok(BuildRecord::find_for_config(config, db).await?.into_iter().find(|b| b.rev == rev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MockRepositoryAdapter;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:").unwrap().foreign_keys(true))
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn populate_enqueues_one_build_per_platform() {
        let db = test_db().await;

        BuildConfigRecord {
            name: "demo".into(),
            label: "Demo".into(),
            path: "trunk".into(),
            min_rev: None,
            max_rev: None,
            recipe: "<build/>".into(),
            active: true,
            description: String::new(),
        }
        .save(&db)
        .await
        .unwrap();

        PlatformRecord::insert("demo", "linux", &[], &db).await.unwrap();

        let repo = MockRepositoryAdapter::new().with_history(
            "trunk",
            vec![
                crate::repo::Revision { rev: "2".into(), rev_time: 200, path_changed: false, tree_empty: false },
                crate::repo::Revision { rev: "1".into(), rev_time: 100, path_changed: false, tree_empty: false },
            ],
        );

        let config = QueueConfig { build_all: false, stabilize_wait: 0, timeout: 0 };
        populate(&db, &repo, &config, 1000).await.unwrap();

        let builds = BuildRecord::find_pending(&db).await.unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].rev, "2");
    }

    #[tokio::test]
    async fn stabilize_wait_defers_fresh_revisions() {
        let db = test_db().await;

        BuildConfigRecord {
            name: "demo".into(),
            label: "Demo".into(),
            path: "trunk".into(),
            min_rev: None,
            max_rev: None,
            recipe: "<build/>".into(),
            active: true,
            description: String::new(),
        }
        .save(&db)
        .await
        .unwrap();

        PlatformRecord::insert("demo", "linux", &[], &db).await.unwrap();

        let repo = MockRepositoryAdapter::new().with_history(
            "trunk",
            vec![crate::repo::Revision { rev: "1".into(), rev_time: 990, path_changed: false, tree_empty: false }],
        );

        let config = QueueConfig { build_all: false, stabilize_wait: 60, timeout: 0 };
        populate(&db, &repo, &config, 1000).await.unwrap();

        assert!(BuildRecord::find_pending(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_build_for_slave_matches_platform_rules() {
        let db = test_db().await;

        BuildConfigRecord {
            name: "demo".into(),
            label: "Demo".into(),
            path: "trunk".into(),
            min_rev: None,
            max_rev: None,
            recipe: "<build/>".into(),
            active: true,
            description: String::new(),
        }
        .save(&db)
        .await
        .unwrap();

        let platform_id = PlatformRecord::insert(
            "demo",
            "linux",
            &[forgeci_data::config::PlatformRule { propname: "os".into(), pattern: "linux".into() }],
            &db,
        )
        .await
        .unwrap();

        BuildRecord::insert("demo", "1", 100, platform_id, &db).await.unwrap();

        let config = QueueConfig { build_all: false, stabilize_wait: 0, timeout: 0 };
        let mut properties = BTreeMap::new();
        properties.insert("os".to_string(), "linux".to_string());

        let build = get_build_for_slave(&db, &config, 1000, "slave1", &properties).await.unwrap();
        let build = build.expect("expected a matching build");
        assert_eq!(build.slave.as_deref(), Some("slave1"));
    }

    #[tokio::test]
    async fn orphaned_build_resets_to_pending() {
        let db = test_db().await;

        BuildConfigRecord {
            name: "demo".into(),
            label: "Demo".into(),
            path: "trunk".into(),
            min_rev: None,
            max_rev: None,
            recipe: "<build/>".into(),
            active: true,
            description: String::new(),
        }
        .save(&db)
        .await
        .unwrap();

        let platform_id = PlatformRecord::insert("demo", "linux", &[], &db).await.unwrap();
        let id = BuildRecord::insert("demo", "1", 100, platform_id, &db).await.unwrap();
        BuildRecord::assign_slave(id, "slave1", &BTreeMap::new(), 0, &db).await.unwrap();

        let config = QueueConfig { build_all: false, stabilize_wait: 0, timeout: 60 };
        reset_orphaned_builds(&db, &config, 1000).await.unwrap();

        let build = BuildRecord::find(id, &db).await.unwrap().unwrap();
        assert_eq!(build.status, forgeci_data::build::BuildStatus::Pending);
        assert!(build.slave.is_none());
    }
}
