use super::{from_json, to_json, Database, DatabaseConversion};
use anyhow::{anyhow, Context, Result};
use forgeci_data::build::BuildStatus;
use sqlx::{query, query_as};
use std::collections::BTreeMap;

const STATUS_PENDING: &str = "pending";
const STATUS_IN_PROGRESS: &str = "inprogress";
const STATUS_SUCCESS: &str = "success";
const STATUS_FAILURE: &str = "failure";

#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub id: i64,
    pub config: String,
    pub rev: String,
    pub rev_time: i64,
    pub platform: i64,

    pub slave: Option<String>,
    pub slave_info: BTreeMap<String, String>,

    pub status: BuildStatus,

    pub started: i64,
    pub stopped: i64,
    pub last_activity: i64,
    /// `now - check_interval - rev_time`, fixed once when the build enters
    /// BUILDING; `None` before allocation or after a reset to PENDING
    pub timestamp_delta: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: i64,
    config: String,
    rev: String,
    rev_time: i64,
    platform: i64,
    slave: Option<String>,
    slave_info: String,
    status: String,
    started: i64,
    stopped: i64,
    last_activity: i64,
    timestamp_delta: Option<i64>,
}

fn status_to_str(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Pending => STATUS_PENDING,
        BuildStatus::InProgress => STATUS_IN_PROGRESS,
        BuildStatus::Success => STATUS_SUCCESS,
        BuildStatus::Failure => STATUS_FAILURE,
    }
}

fn status_from_str(status: &str) -> Result<BuildStatus> {
    Ok(match status {
        STATUS_PENDING => BuildStatus::Pending,
        STATUS_IN_PROGRESS => BuildStatus::InProgress,
        STATUS_SUCCESS => BuildStatus::Success,
        STATUS_FAILURE => BuildStatus::Failure,
        other => return Err(anyhow!("unknown build status '{other}' in database")),
    })
}

impl DatabaseConversion<BuildRow> for BuildRecord {
    fn create_record(&self) -> Result<BuildRow> {
        Ok(BuildRow {
            id: self.id,
            config: self.config.clone(),
            rev: self.rev.clone(),
            rev_time: self.rev_time,
            platform: self.platform,
            slave: self.slave.clone(),
            slave_info: to_json(&self.slave_info)?,
            status: status_to_str(self.status).to_string(),
            started: self.started,
            stopped: self.stopped,
            last_activity: self.last_activity,
            timestamp_delta: self.timestamp_delta,
        })
    }

    fn from_record(row: BuildRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            config: row.config,
            rev: row.rev,
            rev_time: row.rev_time,
            platform: row.platform,
            slave: row.slave,
            slave_info: from_json(&row.slave_info)?,
            status: status_from_str(&row.status)?,
            started: row.started,
            stopped: row.stopped,
            last_activity: row.last_activity,
            timestamp_delta: row.timestamp_delta,
        })
    }
}

impl BuildRecord {
    pub async fn find(id: i64, db: &Database) -> Result<Option<Self>> {
        let row = query_as::<_, BuildRow>("SELECT * FROM build WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
            .context("failed to query build")?;

        row.map(Self::from_record).transpose()
    }

    pub async fn find_for_config_rev_platform(
        config: &str,
        rev: &str,
        platform: i64,
        db: &Database,
    ) -> Result<Option<Self>> {
        let row = query_as::<_, BuildRow>(
            "SELECT * FROM build WHERE config = ? AND rev = ? AND platform = ?",
        )
        .bind(config)
        .bind(rev)
        .bind(platform)
        .fetch_optional(db)
        .await
        .context("failed to query build by config/rev/platform")?;

        row.map(Self::from_record).transpose()
    }

    pub async fn newest_for_config_platform(config: &str, platform: i64, db: &Database) -> Result<Option<Self>> {
        let row = query_as::<_, BuildRow>(
            "SELECT * FROM build WHERE config = ? AND platform = ? ORDER BY rev_time DESC LIMIT 1",
        )
        .bind(config)
        .bind(platform)
        .fetch_optional(db)
        .await
        .context("failed to query newest build for config/platform")?;

        row.map(Self::from_record).transpose()
    }

    pub async fn find_pending(db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, BuildRow>("SELECT * FROM build WHERE status = ? ORDER BY id ASC")
            .bind(STATUS_PENDING)
            .fetch_all(db)
            .await
            .context("failed to query pending builds")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn find_in_progress(db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, BuildRow>("SELECT * FROM build WHERE status = ? ORDER BY id ASC")
            .bind(STATUS_IN_PROGRESS)
            .fetch_all(db)
            .await
            .context("failed to query in-progress builds")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn find_for_config(config: &str, db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, BuildRow>("SELECT * FROM build WHERE config = ? ORDER BY id DESC")
            .bind(config)
            .fetch_all(db)
            .await
            .context("failed to query builds for config")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    /// inserts a new pending build, returning its id
    pub async fn insert(config: &str, rev: &str, rev_time: i64, platform: i64, db: &Database) -> Result<i64> {
        let id = query(
            "INSERT INTO build (config, rev, rev_time, platform, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(config)
        .bind(rev)
        .bind(rev_time)
        .bind(platform)
        .bind(STATUS_PENDING)
        .execute(db)
        .await
        .context("failed to insert build")?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn assign_slave(id: i64, slave: &str, slave_info: &BTreeMap<String, String>, now: i64, db: &Database) -> Result<()> {
        query(
            "UPDATE build SET status = ?, slave = ?, slave_info = ?, started = ?, last_activity = ? WHERE id = ?",
        )
        .bind(STATUS_IN_PROGRESS)
        .bind(slave)
        .bind(to_json(slave_info)?)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(db)
        .await
        .context("failed to assign slave to build")?;

        Ok(())
    }

    /// fixes the timestamp adjustment delta for a build once, when it
    /// enters BUILDING; every subsequent step report reuses this value
    /// instead of recomputing it against a later `now`
    pub async fn set_timestamp_delta(id: i64, delta: i64, db: &Database) -> Result<()> {
        query("UPDATE build SET timestamp_delta = ? WHERE id = ?")
            .bind(delta)
            .bind(id)
            .execute(db)
            .await
            .context("failed to set build timestamp delta")?;

        Ok(())
    }

    pub async fn touch(id: i64, now: i64, db: &Database) -> Result<()> {
        query("UPDATE build SET last_activity = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(db)
            .await
            .context("failed to touch build activity")?;

        Ok(())
    }

    pub async fn finish(id: i64, status: BuildStatus, stopped: i64, db: &Database) -> Result<()> {
        query("UPDATE build SET status = ?, stopped = ?, last_activity = ? WHERE id = ?")
            .bind(status_to_str(status))
            .bind(stopped)
            .bind(stopped)
            .bind(id)
            .execute(db)
            .await
            .context("failed to finish build")?;

        Ok(())
    }

    /// resets an orphaned in-progress build back to pending, clearing its
    /// slave assignment
    pub async fn reset_to_pending(id: i64, db: &Database) -> Result<()> {
        query(
            "UPDATE build SET status = ?, slave = NULL, slave_info = '{}', started = 0, stopped = 0, \
             last_activity = 0, timestamp_delta = NULL WHERE id = ?",
        )
        .bind(STATUS_PENDING)
        .bind(id)
        .execute(db)
        .await
        .context("failed to reset orphaned build")?;

        Ok(())
    }

    pub async fn delete(id: i64, db: &Database) -> Result<()> {
        query("DELETE FROM build WHERE id = ?")
            .bind(id)
            .execute(db)
            .await
            .context("failed to delete build")?;

        Ok(())
    }
}
