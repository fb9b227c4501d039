mod admin;
mod auth;
mod cli;
mod collector;
mod config;
mod matcher;
mod queue;
mod registry;
mod repo;
mod scheduler;
mod session;
mod store;
mod transport;

use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::info;

use crate::cli::Args;
use crate::config::CONFIG;
use crate::repo::{GitRepositoryAdapter, RepositoryAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    info!("starting forgeci-master, database at {}", CONFIG.database_path);
    let db = store::connect().await.context("failed to initialize store")?;

    let registry = registry::Registry::new();

    let mut environments: Vec<Box<dyn RepositoryAdapter>> = Vec::new();
    for path in &args.environments {
        match GitRepositoryAdapter::open(path) {
            Ok(adapter) => environments.push(Box::new(adapter)),
            Err(e) => log::warn!("skipping environment {path:?}: {e:#}"),
        }
    }

    {
        let db = db.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            scheduler::run(db, registry, environments).await;
        });
    }

    {
        let db = db.clone();
        let registry = registry.clone();
        let bind = args.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::framed::serve(&bind, db, registry).await {
                log::error!("long-lived binding stopped: {e:#}");
            }
        });
    }

    info!("forgeci-master listening on port {}", CONFIG.port);
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(db.clone()))
            .service(transport::http::register_and_allocate)
            .service(transport::http::get_recipe)
            .service(transport::http::put_step)
            .service(transport::http::put_result)
            .service(transport::http::put_artifact)
            .service(admin::list)
            .service(admin::get)
            .service(admin::create)
            .service(admin::set)
            .service(admin::remove)
            .service(admin::add_platform)
    })
    .bind(("0.0.0.0", CONFIG.port))?
    .run()
    .await?;

    Ok(())
}
