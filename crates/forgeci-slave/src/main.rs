mod cli;
mod client;
mod config;
mod executor;
mod recipe;

use std::thread;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use log::{error, info, warn};

use forgeci_data::build::StepResult;
use forgeci_data::message::{Property, RegisterMessage};

use crate::cli::Args;
use crate::client::MasterClient;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let name = config::resolve_name(args.name.as_deref(), args.config.as_deref())?;
    info!("slave '{}' connecting to {}", name, args.host);

    let client = MasterClient::new(args.master_url());

    loop {
        match run_once(&client, &name, &args) {
            Ok(true) => {
                if args.single {
                    info!("{}", "exiting after single build completion".dimmed());
                    return Ok(());
                }
            }
            Ok(false) => {}
            Err(e) => error!("build cycle failed: {e:#}"),
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// one register/poll cycle; returns whether a build was actually run
fn run_once(client: &MasterClient, name: &str, args: &Args) -> anyhow::Result<bool> {
    let register = RegisterMessage {
        name: name.to_string(),
        machine: std::env::consts::ARCH.to_string(),
        processor: std::env::consts::ARCH.to_string(),
        os_name: std::env::consts::OS.to_string(),
        os_family: std::env::consts::FAMILY.to_string(),
        os_version: whoami::distro(),
        properties: vec![Property { name: "keep_files".to_string(), value: args.keep_files.to_string() }],
    };

    let Some(allocation) = client.register(name, register)? else {
        return Ok(false);
    };

    info!("build #{} allocated, project {}", allocation.build_id, allocation.recipe.project.bold());

    let work_dir = match &args.work_dir {
        Some(dir) => dir.clone(),
        None => tempfile::Builder::new().prefix("forgeci-slave-").tempdir()?.into_path(),
    };

    let mut overall = StepResult::Success;

    for step in &allocation.recipe.steps {
        info!("running step '{}'", step.id);
        let message = executor::run_step(step, &work_dir);

        if message.result == StepResult::Failure {
            overall = StepResult::Failure;
        }

        if !args.dry_run {
            let xml = quick_xml::se::to_string(&message)?;
            client.report_step(&allocation.build_id, &step.id, xml)?;
        }

        if message.result == StepResult::Failure {
            warn!("step '{}' failed, aborting remaining steps", step.id);
            break;
        }
    }

    if !args.dry_run {
        client.report_completed(&allocation.build_id, overall)?;
    }

    if !args.keep_files && args.work_dir.is_none() {
        let _ = std::fs::remove_dir_all(&work_dir);
    }

    Ok(true)
}
