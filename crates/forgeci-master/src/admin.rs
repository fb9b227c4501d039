//! the minimal JSON admin API of §4.6: CRUD on build configurations and
//! their target platforms, distinct from (and much smaller than) the
//! out-of-scope web administration UI.

use actix_web::error::{ErrorBadRequest, ErrorInternalServerError, ErrorNotFound};
use actix_web::web::{Data, Json, Path};
use actix_web::{delete, get, post, Responder};

use forgeci_data::config::{
    BuildConfigInfo, BuildConfigRequest, BuildConfigSettingsRequest, PlatformRequest, TargetPlatformInfo,
};

use crate::auth::{AuthRead, AuthWrite};
use crate::store::{BuildConfigRecord, Database, PlatformRecord};

trait InternalError<T> {
    fn internal(self) -> actix_web::Result<T>;
}

impl<T> InternalError<T> for anyhow::Result<T> {
    fn internal(self) -> actix_web::Result<T> {
        self.map_err(|e| ErrorInternalServerError(format!("{e:#}")))
    }
}

async fn to_info(record: BuildConfigRecord, db: &Database) -> anyhow::Result<BuildConfigInfo> {
    let platforms = PlatformRecord::find_for_config(&record.name, db)
        .await?
        .into_iter()
        .map(|p| TargetPlatformInfo { id: p.id, name: p.name, rules: p.rules })
        .collect();

    Ok(BuildConfigInfo {
        name: record.name,
        label: record.label,
        path: record.path,
        min_rev: record.min_rev,
        max_rev: record.max_rev,
        active: record.active,
        description: record.description,
        platforms,
    })
}

#[get("/configs")]
pub async fn list(_: AuthRead, db: Data<Database>) -> actix_web::Result<impl Responder> {
    let configs = BuildConfigRecord::find_all(&db).await.internal()?;

    let mut infos = Vec::with_capacity(configs.len());
    for config in configs {
        infos.push(to_info(config, &db).await.internal()?);
    }

    Ok(Json(infos))
}

#[get("/configs/{name}")]
pub async fn get(_: AuthRead, name: Path<String>, db: Data<Database>) -> actix_web::Result<impl Responder> {
    let config = BuildConfigRecord::find(&name, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build config '{name}' does not exist")))?;

    Ok(Json(to_info(config, &db).await.internal()?))
}

#[post("/configs")]
pub async fn create(_: AuthWrite, body: Json<BuildConfigRequest>, db: Data<Database>) -> actix_web::Result<impl Responder> {
    let request = body.into_inner();

    if BuildConfigRecord::find(&request.name, &db).await.internal()?.is_some() {
        return Err(ErrorBadRequest(format!("build config '{}' already exists", request.name)));
    }

    let record = BuildConfigRecord {
        name: request.name,
        label: request.label,
        path: request.path,
        min_rev: request.min_rev,
        max_rev: request.max_rev,
        recipe: request.recipe,
        active: true,
        description: request.description,
    };

    record.save(&db).await.internal()?;

    Ok(Json(to_info(record, &db).await.internal()?))
}

#[post("/configs/{name}/set")]
pub async fn set(
    _: AuthWrite,
    name: Path<String>,
    body: Json<BuildConfigSettingsRequest>,
    db: Data<Database>,
) -> actix_web::Result<impl Responder> {
    let config = BuildConfigRecord::find(&name, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build config '{name}' does not exist")))?;

    match body.into_inner() {
        BuildConfigSettingsRequest::Active(active) => {
            BuildConfigRecord::set_active(&config.name, active, &db).await.internal()?;
        }
        BuildConfigSettingsRequest::Description(description) => {
            BuildConfigRecord::set_description(&config.name, &description, &db).await.internal()?;
        }
    }

    let config = BuildConfigRecord::find(&name, &db).await.internal()?.expect("config vanished under us");
    Ok(Json(to_info(config, &db).await.internal()?))
}

#[delete("/configs/{name}")]
pub async fn remove(_: AuthWrite, name: Path<String>, db: Data<Database>) -> actix_web::Result<impl Responder> {
    BuildConfigRecord::find(&name, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build config '{name}' does not exist")))?;

    BuildConfigRecord::delete(&name, &db).await.internal()?;

    Ok(actix_web::HttpResponse::NoContent().finish())
}

#[post("/configs/{name}/platforms")]
pub async fn add_platform(
    _: AuthWrite,
    name: Path<String>,
    body: Json<PlatformRequest>,
    db: Data<Database>,
) -> actix_web::Result<impl Responder> {
    let config = BuildConfigRecord::find(&name, &db)
        .await
        .internal()?
        .ok_or_else(|| ErrorNotFound(format!("build config '{name}' does not exist")))?;

    let request = body.into_inner();
    let id = PlatformRecord::insert(&config.name, &request.name, &request.rules, &db).await.internal()?;

    Ok(Json(TargetPlatformInfo { id, name: request.name, rules: request.rules }))
}
