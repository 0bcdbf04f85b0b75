/// REST backend client built on `ureq`
///
/// Endpoints (relative to `base_url`):
/// - `POST /pruebas/iniciar` registers a session
/// - `PUT /pruebas/finalizar/{id}` closes it with the final counters
/// - `POST /pusher/send-command` relays a command to a device channel
use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::{
    traits::{CommandSink, SessionBackend},
    types::{
        ApiResponse, DeviceCommand, FinalizeSessionBody, RegisterSessionBody, RegisteredSession,
        TestMode,
    },
};
use crate::core::stats::StatsSnapshot;

#[derive(Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<ApiResponse<T>> {
        let url = self.url(path);
        log::debug!("POST {url}");
        let mut resp = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| anyhow!("POST {url} failed: {e}"))?;
        resp.body_mut()
            .read_json::<ApiResponse<T>>()
            .with_context(|| format!("Invalid response body from {url}"))
    }

    fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<ApiResponse<T>> {
        let url = self.url(path);
        log::debug!("PUT {url}");
        let mut resp = self
            .agent
            .put(&url)
            .send_json(body)
            .map_err(|e| anyhow!("PUT {url} failed: {e}"))?;
        resp.body_mut()
            .read_json::<ApiResponse<T>>()
            .with_context(|| format!("Invalid response body from {url}"))
    }
}

fn ensure_success<T>(resp: &ApiResponse<T>, what: &str) -> Result<()> {
    if resp.success {
        return Ok(());
    }
    let message = resp.message.as_deref().unwrap_or("no message");
    bail!("{what} rejected by backend: {message}")
}

impl SessionBackend for HttpBackend {
    fn register_session(&self, mode: TestMode, subject_id: &str) -> Result<String> {
        let body = RegisterSessionBody {
            tipo: mode.backend_name(),
            cuenta_id: subject_id,
        };
        let resp: ApiResponse<RegisteredSession> = self.post("pruebas/iniciar", &body)?;
        ensure_success(&resp, "Session registration")?;
        resp.data
            .as_ref()
            .and_then(RegisteredSession::id_string)
            .ok_or_else(|| anyhow!("Session registration returned no id"))
    }

    fn finalize_session(&self, session_id: &str, stats: &StatsSnapshot) -> Result<()> {
        let body = FinalizeSessionBody::from(*stats);
        let resp: ApiResponse<serde_json::Value> =
            self.put(&format!("pruebas/finalizar/{session_id}"), &body)?;
        ensure_success(&resp, "Session finalization")
    }
}

impl CommandSink for HttpBackend {
    fn send_command(&self, command: &DeviceCommand) -> Result<()> {
        let resp: ApiResponse<serde_json::Value> = self.post("pusher/send-command", command)?;
        ensure_success(&resp, "Command delivery")
    }
}
