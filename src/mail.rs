//! Mailbox access.
//!
//! [`MailSource`] is the seam the poll loop reads through; [`GmailClient`]
//! implements it over the Gmail REST API using the shared OAuth session.

use crate::auth::SharedSession;
use crate::error::{truncate_body, Error, Result};
use crate::parser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// One message, reduced to what OTP extraction needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailMessage {
    /// Mailbox-assigned id.
    pub id: String,
    /// Raw `From` header.
    pub from: String,
    /// `Subject` header.
    pub subject: String,
    /// Provider-generated preview.
    pub snippet: String,
    /// Decoded text body.
    pub body: String,
}

impl MailMessage {
    /// `subject snippet body`, the text OTP rules run against.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        format!("{} {} {}", self.subject, self.snippet, self.body)
    }
}

/// Authenticated mailbox queries.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Ids of unread messages received after `after`, newest first, at most `max`.
    async fn list_unread(&self, after: DateTime<Utc>, max: u32) -> Result<Vec<String>>;

    /// Fetches and decodes one message.
    async fn fetch_message(&self, id: &str) -> Result<MailMessage>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    #[serde(default)]
    snippet: String,
    raw: String,
}

/// Gmail REST client.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    session: SharedSession,
}

impl GmailClient {
    /// Creates a client for the API rooted at `base_url`
    /// (e.g. [`crate::config::DEFAULT_API_BASE_URL`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP client cannot be built.
    pub fn new(session: SharedSession, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Transport {
                context: "http client",
                source,
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    /// Sends an authorized GET and decodes the JSON body.
    ///
    /// A 401 triggers one forced token refresh and a retry.
    async fn get_json<T>(&self, url: &str, query: &[(&str, String)], context: &'static str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.session.lock().await.access_token().await?;
        let mut response = self.send(url, query, token.expose_secret(), context).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!(context, "Access token rejected, refreshing");
            let token = self.session.lock().await.force_refresh().await?;
            response = self.send(url, query, token.expose_secret(), context).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode {
                what: context,
                message: e.to_string(),
            })
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
        context: &'static str,
    ) -> Result<reqwest::Response> {
        self.http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| Error::Transport { context, source })
    }
}

#[async_trait]
impl MailSource for GmailClient {
    #[instrument(name = "GmailClient::list_unread", skip(self, after), fields(after = %after))]
    async fn list_unread(&self, after: DateTime<Utc>, max: u32) -> Result<Vec<String>> {
        let url = format!("{}/messages", self.base_url);
        let query = [
            ("q", format!("is:unread after:{}", after.timestamp())),
            ("maxResults", max.to_string()),
        ];
        let list: MessageList = self.get_json(&url, &query, "message list").await?;
        debug!(count = list.messages.len(), "Listed unread messages");
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    #[instrument(name = "GmailClient::fetch_message", skip(self))]
    async fn fetch_message(&self, id: &str) -> Result<MailMessage> {
        let url = format!("{}/messages/{id}", self.base_url);
        let query = [("format", "raw".to_string())];
        let message: RawMessage = self.get_json(&url, &query, "message").await?;
        if message.id != id {
            warn!(requested = id, received = %message.id, "Message id mismatch");
        }
        let raw = parser::decode_base64url(&message.raw)?;
        parser::parse_message(id, &message.snippet, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::session_for;
    use crate::secrets::MemoryStore;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer, access: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access,
                "expires_in": 3600
            })))
            .mount(server)
            .await;
    }

    async fn client_for(server: &MockServer) -> GmailClient {
        let store = Arc::new(MemoryStore::with_refresh_token("refresh"));
        let mut session = session_for(&server.uri(), store);
        session.restore().await;
        GmailClient::new(
            session.shared(),
            format!("{}/gmail/v1/users/me/", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_searchable_text() {
        let message = MailMessage {
            subject: "Sign in".into(),
            snippet: "Use".into(),
            body: "Code: 1234".into(),
            ..MailMessage::default()
        };
        assert_eq!(message.searchable_text(), "Sign in Use Code: 1234");
    }

    #[tokio::test]
    async fn test_list_unread() {
        let server = MockServer::start().await;
        mount_token(&server, "access").await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("q", "is:unread after:1700000000"))
            .and(query_param("maxResults", "10"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m2", "threadId": "t2"}, {"id": "m1", "threadId": "t1"}],
                "resultSizeEstimate": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let after = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ids = client.list_unread(after, 10).await.unwrap();
        assert_eq!(ids, vec!["m2".to_string(), "m1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_unread_empty_mailbox() {
        let server = MockServer::start().await;
        mount_token(&server, "access").await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"resultSizeEstimate": 0})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.list_unread(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_message_decodes_raw() {
        let server = MockServer::start().await;
        mount_token(&server, "access").await;
        let raw = "From: GitHub <noreply@github.com>\r\nSubject: Your code\r\n\r\nYour verification code is 482913\r\n";
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "raw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "snippet": "Your verification code",
                "raw": URL_SAFE.encode(raw),
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let message = client.fetch_message("m1").await.unwrap();
        assert_eq!(message.from, "GitHub <noreply@github.com>");
        assert_eq!(message.subject, "Your code");
        assert_eq!(message.snippet, "Your verification code");
        assert!(message.body.contains("482913"));
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let server = MockServer::start().await;
        mount_token(&server, "access").await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.list_unread(Utc::now(), 10).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_token(&server, "access").await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.list_unread(Utc::now(), 10).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_not_authenticated() {
        let server = MockServer::start().await;
        let session = session_for(&server.uri(), Arc::new(MemoryStore::new()));
        let client = GmailClient::new(session.shared(), server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.fetch_message("m1").await,
            Err(Error::NotAuthenticated)
        ));
    }
}
