//! `HttpChatTransport`: `ChatTransport` over a JSON HTTP channel API,
//! grounded on `fc-router::mediator::HttpMediator`'s response-code
//! classification (retained here as the status-code match arms) without its
//! circuit breaker or webhook signing, which have no counterpart in this
//! transport's surface.

use std::time::Duration;

use async_trait::async_trait;
use bc_common::capability::{ChatTransport, ExistsResult, SendOutcome, TransportError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpChatTransportConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl HttpChatTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), auth_token: None, timeout: Duration::from_secs(30) }
    }
}

pub struct HttpChatTransport {
    client: Client,
    config: HttpChatTransportConfig,
}

impl HttpChatTransport {
    pub fn new(config: HttpChatTransportConfig) -> Self {
        let client = Client::builder().timeout(config.timeout).pool_max_idle_per_host(10).build().expect("failed to build HTTP client");
        Self { client, config }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{}", self.config.base_url, path));
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn classify_error(err: &reqwest::Error) -> TransportError {
        if err.is_timeout() || err.is_connect() {
            TransportError::TransientNetwork(err.to_string())
        } else {
            TransportError::Unknown(err.to_string())
        }
    }

    fn classify_status(status_code: u16, body: &str) -> TransportError {
        match status_code {
            401 | 403 => TransportError::PermissionRevoked(format!("HTTP {status_code}: {body}")),
            404 | 410 | 422 => TransportError::RecipientInvalid(format!("HTTP {status_code}: {body}")),
            429 => TransportError::RateLimit(format!("HTTP {status_code}: {body}")),
            500..=599 => TransportError::TransientNetwork(format!("HTTP {status_code}: {body}")),
            _ => TransportError::Unknown(format!("HTTP {status_code}: {body}")),
        }
    }
}

#[derive(Serialize)]
struct ExistsRequest<'a> {
    address: &'a str,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
    handle: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    address: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn exists_on_platform(&self, address: &str) -> Result<ExistsResult, TransportError> {
        let response = self
            .request(reqwest::Method::POST, "/v1/exists")
            .json(&ExistsRequest { address })
            .send()
            .await
            .map_err(|e| Self::classify_error(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_status(status.as_u16(), &body));
        }

        let parsed: ExistsResponse = serde_json::from_str(&body).map_err(|e| TransportError::Unknown(format!("malformed exists response: {e}")))?;
        debug!(address, exists = parsed.exists, "platform existence checked");
        Ok(ExistsResult { exists: parsed.exists, handle: parsed.handle })
    }

    async fn send(&self, channel_id: &str, address: &str, body_text: &str, headers: &[(String, String)]) -> Result<SendOutcome, TransportError> {
        let mut request = self.request(reqwest::Method::POST, &format!("/v1/channels/{channel_id}/messages")).json(&SendRequest { address, body: body_text });
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| Self::classify_error(&e))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(channel_id, status = status.as_u16(), "send rejected by channel");
            return Err(Self::classify_status(status.as_u16(), &body));
        }

        let parsed: SendResponse = serde_json::from_str(&body).map_err(|e| TransportError::Unknown(format!("malformed send response: {e}")))?;
        Ok(SendOutcome { provider_message_id: parsed.message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn exists_on_platform_parses_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/exists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"exists": true, "handle": "abc"})))
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(HttpChatTransportConfig::new(server.uri()));
        let result = transport.exists_on_platform("+15550001").await.unwrap();
        assert!(result.exists);
        assert_eq!(result.handle.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn rate_limited_response_maps_to_rate_limit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/exists")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

        let transport = HttpChatTransport::new(HttpChatTransportConfig::new(server.uri()));
        let err = transport.exists_on_platform("+15550001").await.unwrap_err();
        assert!(matches!(err, TransportError::RateLimit(_)));
    }

    #[tokio::test]
    async fn forbidden_response_maps_to_permission_revoked() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/channels/c1/messages")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

        let transport = HttpChatTransport::new(HttpChatTransportConfig::new(server.uri()));
        let err = transport.send("c1", "+15550001", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::PermissionRevoked(_)));
    }

    #[tokio::test]
    async fn successful_send_returns_provider_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageId": "m-1"})))
            .mount(&server)
            .await;

        let transport = HttpChatTransport::new(HttpChatTransportConfig::new(server.uri()));
        let outcome = transport.send("c1", "+15550001", "hello", &[]).await.unwrap();
        assert_eq!(outcome.provider_message_id, "m-1");
    }
}
