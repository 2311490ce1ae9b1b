//! Discord REST delivery transport
//!
//! Endpoints are channel webhooks. Proxied posts execute the webhook with
//! `wait=true` so the created message id comes back, and never ping anyone.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result, TransportError};
use crate::ids::{ChannelId, EndpointId, MessageId};
use crate::version;

use super::transport::{
    DeliveredMessage, DeliveryTransport, EndpointHandle, EndpointInfo, OutboundMessage,
    TransportResult,
};

/// API error codes meaning the channel or guild hit its webhook limit
const MAX_WEBHOOK_CODES: [u64; 2] = [30007, 30058];

// ─────────────────────────────────────────────────────────────────
// API types (request/response)
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    id: EndpointId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    channel_id: Option<ChannelId>,
}

impl WebhookPayload {
    fn into_info(self, channel: ChannelId) -> EndpointInfo {
        EndpointInfo {
            id: self.id,
            name: self.name,
            token: self.token,
            channel: self.channel_id.unwrap_or(channel),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: MessageId,
    channel_id: ChannelId,
}

#[derive(Debug, Serialize)]
struct ExecuteWebhook<'a> {
    content: &'a str,
    username: &'a str,
    avatar_url: &'a str,
    allowed_mentions: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────
// Discord Transport
// ─────────────────────────────────────────────────────────────────

pub struct DiscordTransport {
    client: Client,
    api_base: String,
    token: String,
    timeout: Duration,
}

impl DiscordTransport {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(version::build_info().user_agent())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let api_base = api_base.into().trim_end_matches('/').to_string();
        info!(api_base = %api_base, "Discord delivery transport created");

        Ok(Self {
            client,
            api_base,
            token: token.into(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Authenticated request against the bot API.
    fn bot_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn execute(&self, operation: &str, request: RequestBuilder) -> TransportResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                TransportError::transient(format!("{}: {}", operation, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_failure(status, &body);
        debug!(operation, status = %status, error = %error, "Discord API call failed");
        Err(error)
    }

    async fn json<T: for<'de> Deserialize<'de>>(operation: &str, response: Response) -> TransportResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::transient(format!("{}: unreadable response: {}", operation, e)))
    }
}

/// Map a failed response onto the transport error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> TransportError {
    let api: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = if api.message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} (code {})", api.message, api.code)
    };

    if MAX_WEBHOOK_CODES.contains(&api.code) {
        return TransportError::quota_exceeded(detail);
    }
    match status {
        StatusCode::NOT_FOUND => TransportError::not_found(detail),
        StatusCode::FORBIDDEN => TransportError::forbidden(detail),
        _ => TransportError::transient(detail),
    }
}

#[async_trait]
impl DeliveryTransport for DiscordTransport {
    async fn list_endpoints(&self, channel: ChannelId) -> TransportResult<Vec<EndpointInfo>> {
        let request = self.bot_request(Method::GET, &format!("/channels/{}/webhooks", channel));
        let response = self.execute("list_endpoints", request).await?;
        let hooks: Vec<WebhookPayload> = Self::json("list_endpoints", response).await?;
        Ok(hooks.into_iter().map(|h| h.into_info(channel)).collect())
    }

    async fn create_endpoint(&self, channel: ChannelId, name: &str) -> TransportResult<EndpointHandle> {
        let request = self
            .bot_request(Method::POST, &format!("/channels/{}/webhooks", channel))
            .json(&json!({ "name": name }));
        let response = self.execute("create_endpoint", request).await?;
        let hook: WebhookPayload = Self::json("create_endpoint", response).await?;
        hook.into_info(channel)
            .into_handle()
            .ok_or_else(|| TransportError::transient("created webhook carries no token"))
    }

    async fn fetch_endpoint(&self, handle: &EndpointHandle) -> TransportResult<()> {
        // Token-authenticated, so it works without channel permissions
        let request = self
            .client
            .get(self.url(&format!("/webhooks/{}/{}", handle.id, handle.token)));
        self.execute("fetch_endpoint", request).await.map(|_| ())
    }

    async fn delete_endpoint(&self, endpoint: EndpointId) -> TransportResult<()> {
        let request = self
            .bot_request(Method::DELETE, &format!("/webhooks/{}", endpoint))
            .header("X-Audit-Log-Reason", "Making room for persona delivery");
        self.execute("delete_endpoint", request).await.map(|_| ())
    }

    async fn send(
        &self,
        handle: &EndpointHandle,
        message: &OutboundMessage,
        thread: Option<ChannelId>,
    ) -> TransportResult<DeliveredMessage> {
        let mut query = vec![("wait", "true".to_string())];
        if let Some(thread) = thread {
            query.push(("thread_id", thread.to_string()));
        }
        let body = ExecuteWebhook {
            content: &message.content,
            username: &message.username,
            avatar_url: &message.avatar_url,
            allowed_mentions: json!({ "parse": [] }),
        };
        let request = self
            .client
            .post(self.url(&format!("/webhooks/{}/{}", handle.id, handle.token)))
            .query(&query)
            .json(&body);
        let response = self.execute("send", request).await?;
        let sent: MessagePayload = Self::json("send", response).await?;
        Ok(DeliveredMessage {
            id: sent.id,
            channel: sent.channel_id,
        })
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> TransportResult<()> {
        let request = self.bot_request(
            Method::DELETE,
            &format!("/channels/{}/messages/{}", channel, message),
        );
        self.execute("delete_message", request).await.map(|_| ())
    }

    async fn post_message(&self, channel: ChannelId, content: &str) -> TransportResult<DeliveredMessage> {
        let request = self
            .bot_request(Method::POST, &format!("/channels/{}/messages", channel))
            .json(&json!({
                "content": content,
                "allowed_mentions": { "parse": ["users"] },
            }));
        let response = self.execute("post_message", request).await?;
        let sent: MessagePayload = Self::json("post_message", response).await?;
        Ok(DeliveredMessage {
            id: sent.id,
            channel: sent.channel_id,
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{DELETE, GET, POST};
    use httpmock::MockServer;

    fn transport(server: &MockServer) -> DiscordTransport {
        DiscordTransport::new(server.base_url(), "bot-token", Duration::from_secs(5)).unwrap()
    }

    fn handle() -> EndpointHandle {
        EndpointHandle {
            id: EndpointId::new(55),
            token: "hook-token".into(),
            name: "Persona Relay".into(),
            channel: ChannelId::new(10),
        }
    }

    #[test]
    fn test_classify_failure() {
        let quota = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"code": 30007, "message": "Maximum number of webhooks reached (15)"}"#,
        );
        assert!(quota.is_quota_exceeded());
        assert!(classify_failure(StatusCode::NOT_FOUND, r#"{"code": 10015, "message": "Unknown Webhook"}"#).is_not_found());
        assert!(classify_failure(StatusCode::FORBIDDEN, "").is_forbidden());
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            TransportError::Transient { .. }
        ));
    }

    #[tokio::test]
    async fn test_list_endpoints() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET)
                .path("/channels/10/webhooks")
                .header("authorization", "Bot bot-token");
            then.status(200).json_body(json!([
                {"id": "1", "name": "Persona Relay", "token": "t1", "channel_id": "10"},
                {"id": "2", "name": "Other Bot", "channel_id": "10"}
            ]));
        });

        let endpoints = transport(&server).list_endpoints(ChannelId::new(10)).await.unwrap();
        list.assert_calls(1);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].token.as_deref(), Some("t1"));
        assert_eq!(endpoints[1].token, None);
    }

    #[tokio::test]
    async fn test_create_endpoint_quota() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/channels/10/webhooks")
                .body_includes("\"name\":\"Persona Relay\"");
            then.status(400)
                .json_body(json!({"code": 30007, "message": "Maximum number of webhooks reached (15)"}));
        });

        let err = transport(&server)
            .create_endpoint(ChannelId::new(10), "Persona Relay")
            .await
            .unwrap_err();
        create.assert_calls(1);
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn test_send_to_thread() {
        let server = MockServer::start();
        let execute = server.mock(|when, then| {
            when.method(POST)
                .path("/webhooks/55/hook-token")
                .query_param("wait", "true")
                .query_param("thread_id", "77")
                .body_includes("\"username\":\"Mira\"")
                .body_includes("\"parse\":[]");
            then.status(200)
                .json_body(json!({"id": "900", "channel_id": "77"}));
        });

        let message = OutboundMessage {
            username: "Mira".into(),
            avatar_url: "https://example.com/m.png".into(),
            content: "hello <@123>".into(),
        };
        let delivered = transport(&server)
            .send(&handle(), &message, Some(ChannelId::new(77)))
            .await
            .unwrap();
        execute.assert_calls(1);
        assert_eq!(delivered.id, MessageId::new(900));
        assert_eq!(delivered.channel, ChannelId::new(77));
    }

    #[tokio::test]
    async fn test_fetch_missing_endpoint() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/webhooks/55/hook-token");
            then.status(404)
                .json_body(json!({"code": 10015, "message": "Unknown Webhook"}));
        });

        let err = transport(&server).fetch_endpoint(&handle()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_message_forbidden() {
        let server = MockServer::start();
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/channels/10/messages/42");
            then.status(403)
                .json_body(json!({"code": 50013, "message": "Missing Permissions"}));
        });

        let err = transport(&server)
            .delete_message(ChannelId::new(10), MessageId::new(42))
            .await
            .unwrap_err();
        delete.assert_calls(1);
        assert!(err.is_forbidden());
    }

    #[tokio::test]
    async fn test_post_notice() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/channels/10/messages")
                .body_includes("Failed to post");
            then.status(200)
                .json_body(json!({"id": "901", "channel_id": "10"}));
        });

        let delivered = transport(&server)
            .post_message(ChannelId::new(10), "Failed to post as Mira")
            .await
            .unwrap();
        post.assert_calls(1);
        assert_eq!(delivered.id, MessageId::new(901));
    }
}
