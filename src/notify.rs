//! Delivery channel: the `Notifier` seam and its ntfy implementation.
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Priority, TaskInfo};
use crate::render;

pub const TITLE_HEADER: &str = "X-Title";
pub const PRIORITY_HEADER: &str = "X-Priority";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid ntfy endpoint: {0}")]
    Endpoint(String),
    #[error("failed to reach ntfy: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ntfy error {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        message: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError>;
}

/// Headers for one notification, in merge order: configured templates, then
/// title, then priority.
pub fn build_headers(
    info: &TaskInfo,
    configured: &BTreeMap<String, String>,
    priority: Option<Priority>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for (name, template) in configured {
        let value = match render::render(info, template) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, header = %name, uuid = %info.uuid, "header template failed, sending raw value");
                template.clone()
            }
        };
        headers.insert(name.clone(), value);
    }
    if !info.project.is_empty() {
        headers.insert(TITLE_HEADER.to_string(), info.project.clone());
    }
    headers.insert(
        PRIORITY_HEADER.to_string(),
        Priority::ntfy_level(priority).to_string(),
    );
    headers
}

#[derive(Clone)]
pub struct NtfyClient {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

impl fmt::Debug for NtfyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtfyClient")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl NtfyClient {
    pub fn new(
        base_url: &str,
        topic: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let raw = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            topic.trim_start_matches('/')
        );
        let endpoint = Url::parse(&raw).map_err(|err| DeliveryError::Endpoint(format!("{raw}: {err}")))?;
        let http = Client::builder()
            .user_agent(concat!("task-herald/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn build_request(
        &self,
        message: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<reqwest::Request, DeliveryError> {
        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header("Content-Type", "text/plain")
            .body(message.to_string());
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl Notifier for NtfyClient {
    async fn send(
        &self,
        message: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        let request = self.build_request(message, headers)?;
        debug!(url = %request.url(), ?headers, "sending ntfy notification");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if status.as_u16() >= 300 {
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
