//! the per-slave orchestration session: the state machine of §4.4, driven
//! by whichever transport (long-lived binding or HTTP polling) received a
//! message. the session itself holds no I/O; it only turns messages into
//! store writes and tells the transport what happened.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use log::warn;

use forgeci_data::build::{BuildStatus, ReportItem};
use forgeci_data::message::{CompletedMessage, RegisterMessage, StepMessage};

use crate::matcher::{self, PlatformCandidate};
use crate::queue::{self, QueueConfig};
use crate::store::{BuildConfigRecord, BuildRecord, Database, LogRecord, PlatformRecord, ReportRecord, StepRecord};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    AwaitingProceed,
    Building,
    Done,
    Aborted,
    Orphan,
}

/// per-slave session state, owned by the transport for the life of one
/// connection (long-lived binding) or reconstructed per request from the
/// registry (HTTP binding)
#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub state: SessionState,
    pub build_id: Option<i64>,
    /// `now - check_interval - rev_time`, fixed when the session enters
    /// BUILDING; only meaningful when timestamp adjustment is enabled
    pub timestamp_delta: Option<i64>,
}

impl Session {
    fn connected(name: &str) -> Self {
        Self { name: name.to_string(), properties: BTreeMap::new(), state: SessionState::Connected, build_id: None, timestamp_delta: None }
    }
}

/// registers a slave; returns the new session, or an error carrying the
/// "nothing to build" condition when no platform matches
pub async fn register(db: &Database, message: &RegisterMessage) -> Result<Session> {
    let properties = message.property_map();

    let mut candidates = Vec::new();
    for build_config in BuildConfigRecord::find_active(db).await? {
        for platform in PlatformRecord::find_for_config(&build_config.name, db).await? {
            candidates.push((build_config.name.clone(), platform.id, platform.rules.clone()));
        }
    }

    let matches = matcher::matching_platforms(
        &properties,
        candidates.iter().map(|(config, platform, rules)| PlatformCandidate { config, platform: *platform, rules }),
    );

    if matches.is_empty() {
        bail!("nothing to build");
    }

    let mut session = Session::connected(&message.name);
    session.properties = properties;
    session.state = SessionState::Registered;

    Ok(session)
}

/// attempts to allocate a PENDING build to a registered slave, advancing
/// it to AWAITING_PROCEED on success
pub async fn allocate(
    db: &Database,
    queue_config: &QueueConfig,
    now: i64,
    check_interval: u32,
    session: &mut Session,
) -> Result<Option<BuildRecord>> {
    let Some(mut build) = queue::get_build_for_slave(db, queue_config, now, &session.name, &session.properties).await? else {
        return Ok(None);
    };

    let delta = now - check_interval as i64 - build.rev_time;
    BuildRecord::set_timestamp_delta(build.id, delta, db).await?;
    build.timestamp_delta = Some(delta);

    session.build_id = Some(build.id);
    session.timestamp_delta = Some(delta);
    session.state = SessionState::AwaitingProceed;

    Ok(Some(build))
}

/// moves a session from AWAITING_PROCEED to BUILDING once the slave has
/// acknowledged the recipe
pub fn mark_proceeding(session: &mut Session) {
    session.state = SessionState::Building;
}

fn parse_time(time: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
        .with_context(|| format!("invalid timestamp '{time}' in slave message"))?;
    Ok(naive.and_utc().timestamp())
}

/// ingests one `step` message: persists the step, its logs and reports,
/// and bumps the build's last-activity clock
pub async fn ingest_step(db: &Database, now: i64, adjust_timestamps: bool, session: &Session, message: &StepMessage) -> Result<()> {
    let Some(build_id) = session.build_id else {
        bail!("step message received outside of a build");
    };
    if session.state != SessionState::Building {
        bail!("step message received in state {:?}", session.state);
    }

    let mut started = parse_time(&message.time)?;
    let mut stopped = started + message.duration.round() as i64;

    if adjust_timestamps {
        if let Some(delta) = session.timestamp_delta {
            started -= delta;
            stopped -= delta;
        }
    }

    let status = message.result.into();
    let errors: Vec<String> = message.errors.iter().map(|e| e.message.clone()).collect();

    let step_id = StepRecord::insert(build_id, &message.id, &message.description, status, started, stopped, &errors, db).await?;

    for log in &message.logs {
        let lines: Vec<String> = log.messages.iter().map(|m| m.text.clone()).collect();
        LogRecord::insert(build_id, step_id, &log.generator, &lines, db).await?;
    }

    for report in &message.reports {
        let items: Vec<ReportItem> = report
            .items
            .iter()
            .map(|item| ReportItem { fields: item.fields.iter().map(|f| (f.name.clone(), f.value.clone())).collect() })
            .collect();
        ReportRecord::insert(build_id, step_id, &report.category, &items, db).await?;
    }

    BuildRecord::touch(build_id, now, db).await?;

    Ok(())
}

/// ingests `completed`: closes out the build with the reported result
pub async fn complete(db: &Database, session: &mut Session, message: &CompletedMessage) -> Result<()> {
    let Some(build_id) = session.build_id else {
        bail!("completed message received outside of a build");
    };

    let stopped = parse_time(&message.time)?;
    let status: BuildStatus = match message.result {
        forgeci_data::build::StepResult::Success => BuildStatus::Success,
        forgeci_data::build::StepResult::Failure => BuildStatus::Failure,
    };

    BuildRecord::finish(build_id, status, stopped, db).await?;

    session.state = SessionState::Done;
    session.build_id = None;
    session.timestamp_delta = None;

    Ok(())
}

/// ingests `aborted`: wipes whatever steps were recorded and returns the
/// build to the pool
pub async fn abort(db: &Database, session: &mut Session) -> Result<()> {
    let Some(build_id) = session.build_id else {
        bail!("aborted message received outside of a build");
    };

    wipe_steps(db, build_id).await?;
    BuildRecord::reset_to_pending(build_id, db).await?;

    session.state = SessionState::Aborted;
    session.build_id = None;
    session.timestamp_delta = None;

    Ok(())
}

/// treats a disconnect or timeout as an orphan; the build is left
/// IN_PROGRESS and recovered later by [`queue::reset_orphaned_builds`]
pub fn orphan(session: &mut Session) {
    if session.build_id.is_some() {
        warn!("session for slave '{}' orphaned mid-build", session.name);
    }
    session.state = SessionState::Orphan;
}

/// removes every persisted step (and, via cascade, its logs and reports)
/// for a build
pub async fn wipe_steps(db: &Database, build_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM build_step WHERE build = ?").bind(build_id).execute(db).await.context("failed to wipe build steps")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn register_rejects_when_nothing_matches() {
        let db = test_db().await;

        let message = RegisterMessage {
            name: "slave1".into(),
            machine: "x86_64".into(),
            processor: "amd64".into(),
            os_name: "linux".into(),
            os_family: "posix".into(),
            os_version: "6.1".into(),
            properties: vec![],
        };

        assert!(register(&db, &message).await.is_err());
    }

    #[tokio::test]
    async fn register_succeeds_when_a_platform_matches() {
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

        let message = RegisterMessage {
            name: "slave1".into(),
            machine: "x86_64".into(),
            processor: "amd64".into(),
            os_name: "linux".into(),
            os_family: "posix".into(),
            os_version: "6.1".into(),
            properties: vec![],
        };

        let session = register(&db, &message).await.unwrap();
        assert_eq!(session.state, SessionState::Registered);
    }

    #[tokio::test]
    async fn step_ingestion_persists_logs_and_reports() {
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
        let build_id = BuildRecord::insert("demo", "1", 100, platform_id, &db).await.unwrap();

        let session = Session {
            name: "slave1".into(),
            properties: BTreeMap::new(),
            state: SessionState::Building,
            build_id: Some(build_id),
            timestamp_delta: Some(0),
        };

        let message = forgeci_data::message::StepMessage {
            id: "compile".into(),
            description: "compile sources".into(),
            time: "2024-01-01T00:00:00".into(),
            duration: 1.0,
            result: forgeci_data::build::StepResult::Success,
            logs: vec![forgeci_data::message::LogElement {
                generator: "shell".into(),
                messages: vec![forgeci_data::message::MessageElement { text: "ok".into() }],
            }],
            reports: vec![],
            errors: vec![],
        };

        ingest_step(&db, 1000, false, &session, &message).await.unwrap();

        let logs = LogRecord::find_for_build(build_id, &db).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].lines, vec!["ok".to_string()]);
    }
}
