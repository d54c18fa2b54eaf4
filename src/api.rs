use crate::error::ClientError;
use crate::session::Session;
use crate::tree::Message;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateTurnRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTurnResponse {
    pub conversation_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeTurnRequest {
    pub conversation_id: String,
    pub thread_id: String,
    pub message_id: String,
    pub approved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeTurnResponse {
    pub stream_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin wrapper over the backend's REST endpoints. Every request carries the
/// session's bearer token; any 401 invalidates the session.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    session: Session,
}

impl ApiClient {
    pub fn new(base_url: &str, session: Session) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            session,
        }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolve a possibly relative stream URL against the base URL.
    pub fn resolve_url(&self, path: &str) -> Result<String, ClientError> {
        let base = url::Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| ClientError::InvalidResponse(format!("bad base url: {e}")))?;
        base.join(path)
            .map(|u| u.to_string())
            .map_err(|e| ClientError::InvalidResponse(format!("bad stream url {path}: {e}")))
    }

    pub async fn create_turn(
        &self,
        request: &CreateTurnRequest,
    ) -> Result<CreateTurnResponse, ClientError> {
        let req = self
            .client
            .post(format!("{}/api/turns", self.base_url))
            .json(request);
        self.send_json(req).await
    }

    pub async fn resume_turn(
        &self,
        request: &ResumeTurnRequest,
    ) -> Result<ResumeTurnResponse, ClientError> {
        let req = self
            .client
            .post(format!("{}/api/turns/resume", self.base_url))
            .json(request);
        self.send_json(req).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let req = self.client.get(format!("{}/api/conversations", self.base_url));
        self.send_json(req).await
    }

    pub async fn fetch_conversation(&self, id: &str) -> Result<Conversation, ClientError> {
        let req = self.client.get(format!(
            "{}/api/conversations/{}",
            self.base_url,
            urlencoding::encode(id)
        ));
        self.send_json(req).await
    }

    pub async fn list_artifacts(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ArtifactSummary>, ClientError> {
        let req = self.client.get(format!(
            "{}/api/conversations/{}/artifacts",
            self.base_url,
            urlencoding::encode(conversation_id)
        ));
        self.send_json(req).await
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let Some(token) = self.session.token() else {
            return Err(ClientError::SessionExpired);
        };
        let resp = req.bearer_auth(token).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("API request unauthorized, invalidating session");
            self.session.invalidate();
            return Err(ClientError::SessionExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_resolve_relative_and_absolute_urls() {
        let api = ApiClient::new("http://localhost:8000/", Session::in_memory(None));
        assert_eq!(
            api.resolve_url("/api/stream/abc").unwrap(),
            "http://localhost:8000/api/stream/abc"
        );
        assert_eq!(
            api.resolve_url("https://other.example/s").unwrap(),
            "https://other.example/s"
        );
    }

    #[tokio::test]
    async fn test_create_turn_sends_body() {
        let router = Router::new().route(
            "/api/turns",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["content"], "hi");
                assert!(body.get("conversation_id").is_none());
                Json(json!({
                    "conversation_id": "c1",
                    "message_id": "m1",
                    "thread_id": "t1",
                    "stream_url": "/api/stream/t1"
                }))
            }),
        );
        let base = serve(router).await;
        let api = ApiClient::new(&base, Session::in_memory(Some("tok".into())));
        let resp = api
            .create_turn(&CreateTurnRequest {
                content: "hi".into(),
                conversation_id: None,
                parent_message_id: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.thread_id, "t1");
        assert_eq!(resp.stream_url, "/api/stream/t1");
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_session() {
        let router = Router::new().route(
            "/api/conversations",
            get(|| async { AxumStatus::UNAUTHORIZED.into_response() }),
        );
        let base = serve(router).await;
        let session = Session::in_memory(Some("old".into()));
        let api = ApiClient::new(&base, session.clone());
        let err = api.list_conversations().await.unwrap_err();
        assert!(err.is_session_expired());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits() {
        let api = ApiClient::new("http://127.0.0.1:9", Session::in_memory(None));
        let err = api.fetch_conversation("c1").await.unwrap_err();
        assert!(err.is_session_expired());
    }
}
