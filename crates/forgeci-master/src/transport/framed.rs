//! the long-lived binding of the slave protocol (§6): a bidirectional
//! length-delimited framed channel over TCP, one frame per XML document.
//! the master only speaks after it has received `register`.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use forgeci_data::message::{parse_slave_message, SlaveMessage};

use crate::config::CONFIG;
use crate::queue::QueueConfig;
use crate::registry::Registry;
use crate::session;
use crate::store::Database;
use crate::transport::annotate_recipe;

fn queue_config() -> QueueConfig {
    QueueConfig { build_all: CONFIG.build_all, stabilize_wait: CONFIG.stabilize_wait, timeout: CONFIG.slave_timeout }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// accepts slave connections and spawns one task per connection, matching
/// the accept-loop model of §4.5
pub async fn serve(addr: &str, db: Database, registry: Arc<Registry>) -> Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind long-lived binding on {addr}"))?;
    info!("long-lived binding listening on {addr}");

    loop {
        let (stream, peer) = listener.accept().await.context("failed to accept slave connection")?;
        let db = db.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, db, registry).await {
                warn!("slave connection from {peer} terminated: {e:#}");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, db: Database, registry: Arc<Registry>) -> Result<()> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::channel::<String>(16);

    let mut name: Option<String> = None;

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else { break };
                let frame = frame.context("failed to read frame")?;

                let xml = String::from_utf8(frame.to_vec()).context("frame was not valid utf-8")?;
                let message = parse_slave_message(&xml)?;

                match handle_message(&db, &registry, &mut name, message, &outbox_tx).await {
                    Ok(Some(reply)) => framed.send(Bytes::from(reply)).await.context("failed to send reply frame")?,
                    Ok(None) => {}
                    Err(e) => {
                        warn!("protocol error on session '{:?}': {e:#}", name);
                        send_error(&mut framed, &e.to_string()).await?;
                        break;
                    }
                }
            }
            Some(outbound) = outbox_rx.recv() => {
                framed.send(Bytes::from(outbound)).await.context("failed to send queued frame")?;
            }
        }
    }

    if let Some(name) = name {
        if let Some(mut session) = registry.remove(&name).await {
            session::orphan(&mut session);
        }
    }

    Ok(())
}

async fn send_error(framed: &mut Framed<TcpStream, LengthDelimitedCodec>, message: &str) -> Result<()> {
    let document = format!(r#"<error message="{}"/>"#, message.replace('"', "'"));
    framed.send(Bytes::from(document)).await.context("failed to send protocol error frame")?;
    Ok(())
}

async fn handle_message(
    db: &Database,
    registry: &Arc<Registry>,
    name: &mut Option<String>,
    message: SlaveMessage,
    outbox: &tokio::sync::mpsc::Sender<String>,
) -> Result<Option<String>> {
    match message {
        SlaveMessage::Register(register) => {
            let mut session = session::register(db, &register).await?;
            *name = Some(session.name.clone());

            let config = queue_config();
            let allocated = session::allocate(db, &config, now(), CONFIG.check_interval, &mut session).await?;

            registry.insert(session.clone(), Some(outbox.clone())).await;

            match allocated {
                Some(build) => {
                    let build_config = crate::store::BuildConfigRecord::find(&build.config, db)
                        .await?
                        .context("build config vanished between allocation and dispatch")?;
                    let recipe = annotate_recipe(&build_config.recipe, &build_config.name, &build_config.path, &build.rev)?;
                    Ok(Some(recipe))
                }
                None => Ok(None),
            }
        }
        SlaveMessage::Started(_) => {
            let Some(name) = name.as_ref() else { anyhow::bail!("started received before register") };
            let mut session = registry.get(name).await.context("unknown session")?;
            session::mark_proceeding(&mut session);
            registry.update(session).await;
            Ok(None)
        }
        SlaveMessage::Step(step) => {
            let Some(name) = name.as_ref() else { anyhow::bail!("step received before register") };
            let session = registry.get(name).await.context("unknown session")?;
            session::ingest_step(db, now(), CONFIG.adjust_timestamps, &session, &step).await?;
            Ok(None)
        }
        SlaveMessage::Completed(completed) => {
            let Some(name) = name.as_ref() else { anyhow::bail!("completed received before register") };
            let mut session = registry.get(name).await.context("unknown session")?;
            session::complete(db, &mut session, &completed).await?;
            registry.update(session).await;
            Ok(None)
        }
        SlaveMessage::Aborted(_) => {
            let Some(name) = name.as_ref() else { anyhow::bail!("aborted received before register") };
            let mut session = registry.get(name).await.context("unknown session")?;
            session::abort(db, &mut session).await?;
            registry.update(session).await;
            Ok(None)
        }
        SlaveMessage::Error(m) => {
            anyhow::bail!("slave reported session error: {}", m.message);
        }
    }
}
