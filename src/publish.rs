use crate::error::{Result, SwarmError};
use crate::identity::Credentials;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Request/response side of the chat service: create one message on a topic.
///
/// Collaborator boundary — sessions only see this trait, so tests swap in
/// a scripted implementation.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// `Ok(())` means the API reported the message as created; any other
    /// status is a publish failure carrying status, body and url.
    async fn create_message(
        &self,
        topic: &str,
        token: &str,
        credentials: &Credentials,
    ) -> Result<()>;
}

/// HTTP implementation against `POST /topics/{topic}/messages`
pub struct HttpPublishClient {
    http: reqwest::Client,
    api_host: String,
}

impl HttpPublishClient {
    pub fn new(api_host: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SwarmError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            api_host: api_host.into(),
        })
    }

    fn message_url(&self, topic: &str) -> String {
        format!("http://{}/topics/{}/messages", self.api_host, topic)
    }
}

#[async_trait]
impl PublishClient for HttpPublishClient {
    async fn create_message(
        &self,
        topic: &str,
        token: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        let url = self.message_url(topic);

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::COOKIE, credentials.cookie())
            .json(&serde_json::json!({ "message": token }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CREATED {
            debug!(topic, token, "message created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SwarmError::Publish {
            status: status.as_u16(),
            url,
            body,
        })
    }
}
