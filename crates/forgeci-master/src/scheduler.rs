//! the master loop of §4.5: a populator that rotates through the
//! configured environments, and a dispatcher that offers newly queued
//! builds to any already-connected, idle long-lived slave.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::config::CONFIG;
use crate::queue::{self, QueueConfig};
use crate::registry::Registry;
use crate::repo::RepositoryAdapter;
use crate::session::{self, SessionState};
use crate::store::{BuildConfigRecord, Database};
use crate::transport::annotate_recipe;

fn queue_config() -> QueueConfig {
    QueueConfig { build_all: CONFIG.build_all, stabilize_wait: CONFIG.stabilize_wait, timeout: CONFIG.slave_timeout }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// runs forever, alternating populate passes across environments and
/// dispatch passes against connected slaves
pub async fn run(db: Database, registry: Arc<Registry>, environments: Vec<Box<dyn RepositoryAdapter>>) {
    if environments.is_empty() {
        warn!("master loop started with no environments configured, only slave-initiated HTTP allocation will work");
    }

    let mut tick = tokio::time::interval(Duration::from_secs(CONFIG.check_interval as u64));
    let dispatch_delay = Duration::from_millis((CONFIG.check_interval as f64 * 0.2 * 1000.0) as u64);

    let mut next_environment = 0usize;

    loop {
        tick.tick().await;

        if let Some(repo) = environments.get(next_environment) {
            if let Err(e) = queue::populate(&db, repo.as_ref(), &queue_config(), now()).await {
                warn!("populate pass failed: {e:#}");
            }
            next_environment = (next_environment + 1) % environments.len().max(1);
        }

        tokio::time::sleep(dispatch_delay).await;

        if let Err(e) = dispatch(&db, &registry).await {
            warn!("dispatch pass failed: {e:#}");
        }
    }
}

/// offers a PENDING build to every connected slave that isn't currently
/// building; HTTP slaves are excluded, they get offered a build directly
/// in their next poll
async fn dispatch(db: &Database, registry: &Arc<Registry>) -> anyhow::Result<()> {
    for name in registry.idle_sessions().await {
        let Some(mut slave_session) = registry.get(&name).await else { continue };
        if !matches!(slave_session.state, SessionState::Registered | SessionState::Done | SessionState::Aborted) {
            continue;
        }

        let Some(outbox) = registry.outbox(&name).await else { continue };

        let allocated = session::allocate(db, &queue_config(), now(), CONFIG.check_interval, &mut slave_session).await?;

        let Some(build) = allocated else { continue };

        let build_config = match BuildConfigRecord::find(&build.config, db).await? {
            Some(config) => config,
            None => {
                debug!("build #{} references a vanished config, skipping dispatch", build.id);
                continue;
            }
        };

        let recipe = annotate_recipe(&build_config.recipe, &build_config.name, &build_config.path, &build.rev)?;

        if outbox.send(recipe).await.is_err() {
            warn!("failed to dispatch build #{} to slave '{name}', connection likely gone", build.id);
            continue;
        }

        registry.update(slave_session).await;
    }

    Ok(())
}
