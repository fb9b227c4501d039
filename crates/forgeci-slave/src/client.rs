//! the slave side of the polling HTTP binding (§6): register, poll for an
//! allocated build, fetch its recipe, run it, and report steps and the
//! final outcome back — all plain request/response, no persistent
//! connection.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::StatusCode;

use forgeci_data::build::StepResult;
use forgeci_data::message::{AbortedMessage, CompletedMessage, RegisterMessage};

use crate::recipe::{self, Recipe};

const CONTENT_TYPE: &str = "application/x-forgeci+xml";
const NOTHING_TO_BUILD: u16 = 550;

pub struct MasterClient {
    http: Client,
    base_url: String,
}

/// a build the master handed this slave, with its recipe already fetched
pub struct Allocation {
    pub build_id: String,
    pub recipe: Recipe,
}

impl MasterClient {
    pub fn new(base_url: String) -> Self {
        Self { http: Client::new(), base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post_xml(&self, path: &str, body: String) -> Result<reqwest::blocking::Response> {
        self.http
            .post(self.url(path))
            .header("Content-Type", CONTENT_TYPE)
            .body(body)
            .send()
            .with_context(|| format!("request to {path} failed"))
    }

    fn put_xml(&self, path: &str, body: String) -> Result<reqwest::blocking::Response> {
        self.http
            .put(self.url(path))
            .header("Content-Type", CONTENT_TYPE)
            .body(body)
            .send()
            .with_context(|| format!("request to {path} failed"))
    }

    /// registers under `name` and, if the master has something pending,
    /// fetches its recipe in the same round trip
    pub fn register(&self, name: &str, properties: RegisterMessage) -> Result<Option<Allocation>> {
        let xml = quick_xml::se::to_string(&properties).context("failed to serialize register message")?;
        let response = self.post_xml("/builds", xml)?;

        match response.status() {
            StatusCode::CREATED => {
                let location = response
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .context("master accepted a build but sent no Location header")?
                    .to_string();
                let build_id = location.rsplit('/').next().unwrap_or(&location).to_string();

                let recipe_xml = self
                    .http
                    .get(self.url(&location))
                    .send()
                    .context("failed to fetch recipe")?
                    .error_for_status()
                    .context("master rejected the recipe request")?
                    .text()
                    .context("failed to read recipe body")?;

                let recipe = recipe::parse(&recipe_xml)?;
                Ok(Some(Allocation { build_id, recipe }))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status if status.as_u16() == NOTHING_TO_BUILD => {
                log::debug!("slave '{name}' has nothing matching queued");
                Ok(None)
            }
            status => anyhow::bail!("registration rejected with status {status}"),
        }
    }

    pub fn report_step(&self, build_id: &str, step_id: &str, step_xml: String) -> Result<()> {
        self.put_xml(&format!("/builds/{build_id}/steps/{step_id}"), step_xml)?.error_for_status().context("master rejected step report")?;
        Ok(())
    }

    pub fn report_completed(&self, build_id: &str, result: StepResult) -> Result<()> {
        let message = CompletedMessage { time: now(), result };
        let xml = quick_xml::se::to_string(&message).context("failed to serialize completed message")?;
        self.put_xml(&format!("/builds/{build_id}"), xml)?.error_for_status().context("master rejected completion report")?;
        Ok(())
    }

    pub fn report_aborted(&self, build_id: &str) -> Result<()> {
        let message = AbortedMessage { time: now() };
        let xml = quick_xml::se::to_string(&message).context("failed to serialize aborted message")?;
        self.put_xml(&format!("/builds/{build_id}"), xml)?.error_for_status().context("master rejected abort report")?;
        Ok(())
    }
}

fn now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_id_is_taken_from_the_location_tail() {
        let location = "/builds/42";
        assert_eq!(location.rsplit('/').next().unwrap(), "42");
    }
}
