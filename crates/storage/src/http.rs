use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};

use lesson_core::model::{LessonId, ProgressRecord};

use crate::gateway::{GatewayError, PersistenceGateway, RemoteProgress};

/// How long a single gateway request may take before it counts as a network
/// failure. The remote service enforces no timeout of its own.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Bearer token for the progress API. Issued by an outer layer; the
    /// gateway only attaches it.
    pub bearer_token: Option<String>,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// HTTP implementation of the persistence gateway.
#[derive(Clone)]
pub struct HttpProgressGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpProgressGateway {
    /// Build a gateway with a request timeout baked into the client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn lesson_url(&self, lesson_id: &LessonId, suffix: &str) -> String {
        format!(
            "{}/progress/lesson/{}{}",
            self.config.base_url.trim_end_matches('/'),
            lesson_id,
            suffix
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn map_transport_error(error: &reqwest::Error) -> GatewayError {
    GatewayError::Network(error.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Auth),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Validation(body))
        }
        _ => Err(GatewayError::Network(format!(
            "unexpected status {status}"
        ))),
    }
}

#[async_trait]
impl PersistenceGateway for HttpProgressGateway {
    async fn read_progress(
        &self,
        lesson_id: &LessonId,
    ) -> Result<Option<RemoteProgress>, GatewayError> {
        let request = self.authorize(self.client.get(self.lesson_url(lesson_id, "")));
        let response = request.send().await.map_err(|e| map_transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        let remote: RemoteProgress = response
            .json()
            .await
            .map_err(|e| map_transport_error(&e))?;
        Ok(Some(remote))
    }

    async fn write_progress(&self, record: &ProgressRecord) -> Result<(), GatewayError> {
        let payload = RemoteProgress::from_record(record);
        let request = self
            .authorize(self.client.post(self.lesson_url(record.lesson_id(), "")))
            .json(&payload);
        let response = request.send().await.map_err(|e| map_transport_error(&e))?;
        check_status(response).await?;
        Ok(())
    }

    async fn complete_progress(&self, lesson_id: &LessonId) -> Result<(), GatewayError> {
        let request = self.authorize(self.client.post(self.lesson_url(lesson_id, "/complete")));
        let response = request.send().await.map_err(|e| map_transport_error(&e))?;
        check_status(response).await?;
        Ok(())
    }
}
