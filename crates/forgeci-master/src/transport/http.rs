//! the polling HTTP binding of the slave protocol (§6). a slave drives
//! the whole session through ordinary requests; the master never pushes
//! to it, so the dispatcher described in §4.5 collapses into the POST
//! handler below.

use actix_web::error::{ErrorBadRequest, ErrorInternalServerError, ErrorNotFound};
use actix_web::http::StatusCode;
use actix_web::web::{Bytes, Data, Path};
use actix_web::{get, post, put, HttpResponse, Responder};
use log::{info, warn};

use forgeci_data::message::{parse_slave_message, SlaveMessage};

use crate::config::CONFIG;
use crate::queue::QueueConfig;
use crate::session::{Session, SessionState};
use crate::store::{BuildConfigRecord, BuildRecord, Database};
use crate::transport::{annotate_recipe, CONTENT_TYPE};

trait InternalError<T> {
    fn internal(self) -> actix_web::Result<T>;
}

impl<T> InternalError<T> for anyhow::Result<T> {
    fn internal(self) -> actix_web::Result<T> {
        self.map_err(|e| ErrorInternalServerError(format!("{e:#}")))
    }
}

fn queue_config() -> QueueConfig {
    QueueConfig { build_all: CONFIG.build_all, stabilize_wait: CONFIG.stabilize_wait, timeout: CONFIG.slave_timeout }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

const NOTHING_TO_BUILD: u16 = 550;

/// `POST /builds`: a slave registers and, in the same request, is offered
/// whatever PENDING build matches its platform
#[post("/builds")]
pub async fn register_and_allocate(db: Data<Database>, body: Bytes) -> actix_web::Result<impl Responder> {
    let xml = String::from_utf8(body.to_vec()).map_err(|_| ErrorBadRequest("body is not valid utf-8"))?;

    let register = match parse_slave_message(&xml).map_err(|e| ErrorBadRequest(format!("{e:#}")))? {
        SlaveMessage::Register(m) => m,
        _ => return Err(ErrorBadRequest("expected a register document")),
    };

    let mut session = match crate::session::register(&db, &register).await {
        Ok(session) => session,
        Err(_) => {
            let status = StatusCode::from_u16(NOTHING_TO_BUILD).unwrap();
            return Ok(HttpResponse::build(status).body("nothing to build"));
        }
    };

    let config = queue_config();
    let allocated = crate::session::allocate(&db, &config, now(), CONFIG.check_interval, &mut session).await.internal()?;

    match allocated {
        Some(build) => {
            info!("slave '{}' allocated build #{}", session.name, build.id);
            Ok(HttpResponse::Created().append_header(("Location", format!("/builds/{}", build.id))).body("Build pending"))
        }
        None => Ok(HttpResponse::NoContent().body("No pending builds")),
    }
}

/// `GET /builds/{id}`: returns the annotated recipe for a build a slave
/// has already been allocated
#[get("/builds/{id}")]
pub async fn get_recipe(id: Path<i64>, db: Data<Database>) -> actix_web::Result<impl Responder> {
    let build = BuildRecord::find(*id, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build #{id} does not exist")))?;

    let config = BuildConfigRecord::find(&build.config, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build config '{}' does not exist", build.config)))?;

    let recipe = annotate_recipe(&config.recipe, &config.name, &config.path, &build.rev).internal()?;

    Ok(HttpResponse::Ok().content_type(CONTENT_TYPE).body(recipe))
}

/// `PUT /builds/{id}/steps/{name}`: a slave reports one completed step
#[put("/builds/{id}/steps/{name}")]
pub async fn put_step(path: Path<(i64, String)>, db: Data<Database>, body: Bytes) -> actix_web::Result<impl Responder> {
    let (id, _name) = path.into_inner();

    let build = BuildRecord::find(id, &db).await.internal()?.ok_or_else(|| ErrorNotFound(format!("build #{id} does not exist")))?;

    let xml = String::from_utf8(body.to_vec()).map_err(|_| ErrorBadRequest("body is not valid utf-8"))?;
    let step = match parse_slave_message(&xml).map_err(|e| ErrorBadRequest(format!("{e:#}")))? {
        SlaveMessage::Step(step) => *step,
        _ => return Err(ErrorBadRequest("expected a step document")),
    };

    let session = session_for_build(&build);
    crate::session::ingest_step(&db, now(), CONFIG.adjust_timestamps, &session, &step).await.internal()?;

    Ok(HttpResponse::Created().finish())
}

/// `PUT /builds/{id}`: a slave reports the terminal outcome of a build
/// (`completed` or `aborted`); the original protocol folds this into the
/// same endpoint family as step reporting
#[put("/builds/{id}")]
pub async fn put_result(id: Path<i64>, db: Data<Database>, body: Bytes) -> actix_web::Result<impl Responder> {
    let build = BuildRecord::find(*id, &db).await.internal()?.ok_or_else(|| ErrorNotFound(format!("build #{id} does not exist")))?;

    let xml = String::from_utf8(body.to_vec()).map_err(|_| ErrorBadRequest("body is not valid utf-8"))?;
    let message = parse_slave_message(&xml).map_err(|e| ErrorBadRequest(format!("{e:#}")))?;

    let mut session = session_for_build(&build);

    match message {
        SlaveMessage::Completed(m) => {
            crate::session::complete(&db, &mut session, &m).await.internal()?;
        }
        SlaveMessage::Aborted(_) => {
            crate::session::abort(&db, &mut session).await.internal()?;
        }
        SlaveMessage::Error(m) => {
            warn!("slave '{}' reported a session error on build #{id}: {}", session.name, m.message);
            crate::session::abort(&db, &mut session).await.internal()?;
        }
        _ => return Err(ErrorBadRequest("expected a completed, aborted or error document")),
    }

    Ok(HttpResponse::Ok().finish())
}

/// artifact upload is out of core scope
#[post("/builds/{id}/files/{tail:.*}")]
pub async fn put_artifact() -> impl Responder {
    HttpResponse::NotImplemented().finish()
}

/// the HTTP binding is request-driven and stateless between requests; a
/// build already IN_PROGRESS carries everything a [`Session`] needs to
/// process one more message. `timestamp_delta` is read back from the
/// build row rather than recomputed: it was fixed once when the build
/// entered BUILDING, and recomputing it against a later `now()` on every
/// request would make it drift.
fn session_for_build(build: &BuildRecord) -> Session {
    Session {
        name: build.slave.clone().unwrap_or_default(),
        properties: build.slave_info.clone(),
        state: SessionState::Building,
        build_id: Some(build.id),
        timestamp_delta: build.timestamp_delta,
    }
}
