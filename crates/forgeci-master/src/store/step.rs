use super::{from_json, to_json, Database, DatabaseConversion};
use anyhow::{anyhow, Context, Result};
use forgeci_data::build::{ReportItem, StepStatus};
use sqlx::{query, query_as};

const STATUS_IN_PROGRESS: &str = "inprogress";
const STATUS_SUCCESS: &str = "success";
const STATUS_FAILURE: &str = "failure";

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub id: i64,
    pub build: i64,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub started: i64,
    pub stopped: i64,
    pub errors: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: i64,
    build: i64,
    name: String,
    description: String,
    status: String,
    started: i64,
    stopped: i64,
    errors: String,
}

fn status_to_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::InProgress => STATUS_IN_PROGRESS,
        StepStatus::Success => STATUS_SUCCESS,
        StepStatus::Failure => STATUS_FAILURE,
    }
}

fn status_from_str(status: &str) -> Result<StepStatus> {
    Ok(match status {
        STATUS_IN_PROGRESS => StepStatus::InProgress,
        STATUS_SUCCESS => StepStatus::Success,
        STATUS_FAILURE => StepStatus::Failure,
        other => return Err(anyhow!("unknown step status '{other}' in database")),
    })
}

impl DatabaseConversion<StepRow> for StepRecord {
    fn create_record(&self) -> Result<StepRow> {
        Ok(StepRow {
            id: self.id,
            build: self.build,
            name: self.name.clone(),
            description: self.description.clone(),
            status: status_to_str(self.status).to_string(),
            started: self.started,
            stopped: self.stopped,
            errors: to_json(&self.errors)?,
        })
    }

    fn from_record(row: StepRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            build: row.build,
            name: row.name,
            description: row.description,
            status: status_from_str(&row.status)?,
            started: row.started,
            stopped: row.stopped,
            errors: from_json(&row.errors)?,
        })
    }
}

impl StepRecord {
    pub async fn find_for_build(build: i64, db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, StepRow>("SELECT * FROM build_step WHERE build = ? ORDER BY id ASC")
            .bind(build)
            .fetch_all(db)
            .await
            .context("failed to query steps for build")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn insert(
        build: i64,
        name: &str,
        description: &str,
        status: StepStatus,
        started: i64,
        stopped: i64,
        errors: &[String],
        db: &Database,
    ) -> Result<i64> {
        let id = query(
            "INSERT INTO build_step (build, name, description, status, started, stopped, errors) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(build)
        .bind(name)
        .bind(description)
        .bind(status_to_str(status))
        .bind(started)
        .bind(stopped)
        .bind(to_json(&errors.to_vec())?)
        .execute(db)
        .await
        .context("failed to insert step")?
        .last_insert_rowid();

        Ok(id)
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub id: i64,
    pub build: i64,
    pub step: i64,
    pub generator: String,
    pub lines: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    build: i64,
    step: i64,
    generator: String,
    lines: String,
}

impl DatabaseConversion<LogRow> for LogRecord {
    fn create_record(&self) -> Result<LogRow> {
        Ok(LogRow {
            id: self.id,
            build: self.build,
            step: self.step,
            generator: self.generator.clone(),
            lines: to_json(&self.lines)?,
        })
    }

    fn from_record(row: LogRow) -> Result<Self> {
        Ok(Self { id: row.id, build: row.build, step: row.step, generator: row.generator, lines: from_json(&row.lines)? })
    }
}

impl LogRecord {
    pub async fn find_for_build(build: i64, db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, LogRow>("SELECT * FROM build_log WHERE build = ? ORDER BY id ASC")
            .bind(build)
            .fetch_all(db)
            .await
            .context("failed to query logs for build")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn insert(build: i64, step: i64, generator: &str, lines: &[String], db: &Database) -> Result<i64> {
        let id = query("INSERT INTO build_log (build, step, generator, lines) VALUES (?, ?, ?, ?)")
            .bind(build)
            .bind(step)
            .bind(generator)
            .bind(to_json(&lines.to_vec())?)
            .execute(db)
            .await
            .context("failed to insert log")?
            .last_insert_rowid();

        Ok(id)
    }
}

#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub id: i64,
    pub build: i64,
    pub step: i64,
    pub category: String,
    pub items: Vec<ReportItem>,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i64,
    build: i64,
    step: i64,
    category: String,
    items: String,
}

impl DatabaseConversion<ReportRow> for ReportRecord {
    fn create_record(&self) -> Result<ReportRow> {
        Ok(ReportRow {
            id: self.id,
            build: self.build,
            step: self.step,
            category: self.category.clone(),
            items: to_json(&self.items)?,
        })
    }

    fn from_record(row: ReportRow) -> Result<Self> {
        Ok(Self { id: row.id, build: row.build, step: row.step, category: row.category, items: from_json(&row.items)? })
    }
}

impl ReportRecord {
    pub async fn find_for_build(build: i64, db: &Database) -> Result<Vec<Self>> {
        let rows = query_as::<_, ReportRow>("SELECT * FROM report WHERE build = ? ORDER BY id ASC")
            .bind(build)
            .fetch_all(db)
            .await
            .context("failed to query reports for build")?;

        rows.into_iter().map(Self::from_record).collect()
    }

    pub async fn insert(build: i64, step: i64, category: &str, items: &[ReportItem], db: &Database) -> Result<i64> {
        let id = query("INSERT INTO report (build, step, category, items) VALUES (?, ?, ?, ?)")
            .bind(build)
            .bind(step)
            .bind(category)
            .bind(to_json(&items.to_vec())?)
            .execute(db)
            .await
            .context("failed to insert report")?
            .last_insert_rowid();

        Ok(id)
    }
}
