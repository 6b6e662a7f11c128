use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRemoteSession {
    pub id: String,
    pub remaining_time: u64,
    pub total_duration: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSessionStatus {
    #[serde(alias = "RUNNING", alias = "active", alias = "ACTIVE")]
    Running,
    #[serde(alias = "PAUSED")]
    Paused,
    #[serde(alias = "COMPLETED")]
    Completed,
    #[serde(alias = "QUIT", alias = "quitted", alias = "QUITTED")]
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRemoteSession {
    pub id: String,
    pub status: RemoteSessionStatus,
    pub current_remaining_time: u64,
    pub total_duration: u64,
    #[serde(default)]
    pub finishes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingUpdate {
    pub current_remaining_time: u64,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

/// Backend focus-session lifecycle. Every call may fail on its own; callers
/// treat failures as "keep the local state".
#[async_trait]
pub trait RemoteSessionGateway: Send + Sync {
    async fn start_session(
        &self,
        task_id: &str,
        duration_seconds: u64,
    ) -> Result<StartedRemoteSession, InfraError>;

    async fn get_active_session(
        &self,
        task_id: &str,
    ) -> Result<Option<ActiveRemoteSession>, InfraError>;

    async fn pause_session(&self, session_id: &str) -> Result<(), InfraError>;

    async fn resume_session(&self, session_id: &str) -> Result<RemainingUpdate, InfraError>;

    async fn add_time(&self, session_id: &str, seconds: u64)
        -> Result<RemainingUpdate, InfraError>;

    async fn complete_session(&self, session_id: &str) -> Result<(), InfraError>;

    async fn quit_session(&self, session_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ReqwestSessionGateway {
    client: Client,
    base_url: Option<Url>,
    api_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest<'a> {
    task_id: &'a str,
    duration_seconds: u64,
}

#[derive(Debug, Serialize)]
struct AddTimeRequest {
    seconds: u64,
}

impl ReqwestSessionGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, InfraError> {
        let base_url = match settings
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(raw) => Some(parse_base_url(raw)?),
            None => None,
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| InfraError::Remote(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            base_url,
            api_token: settings
                .api_token
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Remote(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("focus session api error: http {}", status.as_u16())
        } else {
            format!("focus session api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Remote(message)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone().ok_or_else(|| {
            InfraError::Remote("focus session api base url is not configured".to_string())
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::Remote("focus session api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.push("focus-sessions");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<(StatusCode, String), InfraError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading {action} response: {error}")))?;
        Ok((status, body))
    }

    async fn post_action(&self, session_id: &str, action: &str) -> Result<String, InfraError> {
        Self::ensure_non_empty(session_id, "session id")?;
        let endpoint = self.endpoint(&[session_id, action])?;
        let (status, body) = self
            .send(self.client.post(endpoint), &format!("sending {action}"))
            .await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(body)
    }

    fn parse_payload<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, InfraError> {
        serde_json::from_str(body).map_err(|error| {
            InfraError::Remote(format!("invalid {what} payload: {error}; body={body}"))
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let url = Url::parse(raw)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{raw}': {error}")))?;
    if url.cannot_be_a_base() {
        return Err(InfraError::InvalidConfig(format!(
            "api base url cannot be a base: {raw}"
        )));
    }
    Ok(url)
}

#[async_trait]
impl RemoteSessionGateway for ReqwestSessionGateway {
    async fn start_session(
        &self,
        task_id: &str,
        duration_seconds: u64,
    ) -> Result<StartedRemoteSession, InfraError> {
        Self::ensure_non_empty(task_id, "task id")?;
        let endpoint = self.endpoint(&[])?;
        let request = self.client.post(endpoint).json(&StartSessionRequest {
            task_id: task_id.trim(),
            duration_seconds,
        });
        let (status, body) = self.send(request, "starting session").await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let started: StartedRemoteSession = Self::parse_payload(&body, "start session")?;
        Self::ensure_non_empty(&started.id, "started session id")?;
        Ok(started)
    }

    async fn get_active_session(
        &self,
        task_id: &str,
    ) -> Result<Option<ActiveRemoteSession>, InfraError> {
        Self::ensure_non_empty(task_id, "task id")?;
        let endpoint = self.endpoint(&["active"])?;
        let request = self
            .client
            .get(endpoint)
            .query(&[("taskId", task_id.trim())]);
        let (status, body) = self.send(request, "loading active session").await?;
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }

        let active: ActiveRemoteSession = Self::parse_payload(&body, "active session")?;
        Ok(Some(active))
    }

    async fn pause_session(&self, session_id: &str) -> Result<(), InfraError> {
        self.post_action(session_id, "pause").await.map(|_| ())
    }

    async fn resume_session(&self, session_id: &str) -> Result<RemainingUpdate, InfraError> {
        let body = self.post_action(session_id, "resume").await?;
        Self::parse_payload(&body, "resume session")
    }

    async fn add_time(
        &self,
        session_id: &str,
        seconds: u64,
    ) -> Result<RemainingUpdate, InfraError> {
        Self::ensure_non_empty(session_id, "session id")?;
        let endpoint = self.endpoint(&[session_id, "add-time"])?;
        let request = self.client.post(endpoint).json(&AddTimeRequest { seconds });
        let (status, body) = self.send(request, "adding time").await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Self::parse_payload(&body, "add time")
    }

    async fn complete_session(&self, session_id: &str) -> Result<(), InfraError> {
        self.post_action(session_id, "complete").await.map(|_| ())
    }

    async fn quit_session(&self, session_id: &str) -> Result<(), InfraError> {
        self.post_action(session_id, "quit").await.map(|_| ())
    }
}
