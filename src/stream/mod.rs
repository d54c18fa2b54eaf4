pub mod decoder;
pub mod event;

use crate::error::ClientError;
use crate::session::Session;
use decoder::SseDecoder;
use event::ServerEvent;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the transport hands to the timeline, one item at a time.
#[derive(Debug)]
pub enum TransportItem {
    Event(ServerEvent),
    /// Normal end of the connection. `aborted` is true when the caller
    /// cancelled it, which is not an error.
    Closed { aborted: bool },
    Error(ClientError),
}

/// A single, non-restartable event connection for one turn.
pub struct EventStream {
    body: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    decoder: SseDecoder,
    queue: VecDeque<ServerEvent>,
    cancel: CancellationToken,
    pending_end: Option<TransportItem>,
    done: bool,
}

/// Connect to a turn's event endpoint.
///
/// The credential goes in the `Authorization` header. A 401 invalidates the
/// session and returns `SessionExpired` without reading the body.
pub async fn open_stream(
    http: &Client,
    url: &str,
    session: &Session,
    cancel: CancellationToken,
) -> Result<EventStream, ClientError> {
    let Some(token) = session.token() else {
        session.invalidate();
        return Err(ClientError::SessionExpired);
    };

    let request = http
        .get(url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send();

    let resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Stream to {} cancelled before connecting", url);
            return Ok(EventStream::aborted(cancel));
        }
        resp = request => resp?,
    };

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        warn!("Stream request unauthorized, invalidating session");
        session.invalidate();
        return Err(ClientError::SessionExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }

    info!("Stream connected: {}", url);
    let body = resp.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
    Ok(EventStream::from_body(body, cancel))
}

impl EventStream {
    /// Build a stream over an arbitrary byte source.
    pub fn from_body(
        body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            body: Some(body),
            decoder: SseDecoder::new(),
            queue: VecDeque::new(),
            cancel,
            pending_end: None,
            done: false,
        }
    }

    fn aborted(cancel: CancellationToken) -> Self {
        Self {
            body: None,
            decoder: SseDecoder::new(),
            queue: VecDeque::new(),
            cancel,
            pending_end: Some(TransportItem::Closed { aborted: true }),
            done: false,
        }
    }

    /// Next item in arrival order. Returns `None` once `Closed` or `Error`
    /// has been yielded.
    pub async fn next(&mut self) -> Option<TransportItem> {
        loop {
            if self.done {
                return None;
            }
            if let Some(event) = self.queue.pop_front() {
                if event.is_terminal() {
                    // Nothing after a terminal event belongs to this turn.
                    self.queue.clear();
                    self.end(TransportItem::Closed { aborted: false });
                }
                return Some(TransportItem::Event(event));
            }
            if let Some(item) = self.pending_end.take() {
                self.done = true;
                self.body = None;
                return Some(item);
            }
            let Some(body) = self.body.as_mut() else {
                self.end(TransportItem::Closed { aborted: false });
                continue;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Stream aborted by caller");
                    self.queue.clear();
                    self.end(TransportItem::Closed { aborted: true });
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let events = self.decoder.push(&bytes);
                        self.queue.extend(events);
                    }
                    Some(Err(e)) => {
                        warn!("Stream read failed: {}", e);
                        self.end(TransportItem::Error(ClientError::Transport(e.to_string())));
                    }
                    None => {
                        self.decoder.finish();
                        self.end(TransportItem::Closed { aborted: false });
                    }
                },
            }
        }
    }

    fn end(&mut self, item: TransportItem) {
        self.body = None;
        if self.pending_end.is_none() {
            self.pending_end = Some(item);
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use futures_util::stream;

    fn body_from(chunks: Vec<&'static str>) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    async fn collect(mut stream: EventStream) -> Vec<TransportItem> {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_events_then_normal_close() {
        let body = body_from(vec![
            "data: {\"type\":\"agent_start\",\"agent_name\":\"A\"}\n",
            "\ndata: {bad\n\ndata: {\"type\":\"agent_complete\"}\n\n",
        ]);
        let items = collect(EventStream::from_body(body, CancellationToken::new())).await;
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], TransportItem::Event(e) if e.event_type == "agent_start"));
        assert!(matches!(&items[1], TransportItem::Event(e) if e.event_type == "agent_complete"));
        assert!(matches!(items[2], TransportItem::Closed { aborted: false }));
    }

    #[tokio::test]
    async fn test_terminal_event_ends_stream() {
        let body = body_from(vec![
            "data: {\"type\":\"complete\",\"message_id\":\"m1\"}\n\ndata: {\"type\":\"agent_start\"}\n\n",
        ]);
        let items = collect(EventStream::from_body(body, CancellationToken::new())).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], TransportItem::Closed { aborted: false }));
    }

    #[tokio::test]
    async fn test_cancel_reports_aborted_close() {
        let cancel = CancellationToken::new();
        let body = stream::pending::<reqwest::Result<Vec<u8>>>().boxed();
        let mut stream = EventStream::from_body(body, cancel.clone());
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(TransportItem::Closed { aborted: true })));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_connect_yields_aborted_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = Session::in_memory(Some("tok".to_string()));
        let mut stream = open_stream(
            &Client::new(),
            "http://127.0.0.1:9/stream",
            &session,
            cancel,
        )
        .await
        .unwrap();
        assert!(matches!(stream.next().await, Some(TransportItem::Closed { aborted: true })));
        assert!(stream.next().await.is_none());
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_session() {
        let router = Router::new().route(
            "/stream",
            get(|| async { (AxumStatus::UNAUTHORIZED, "nope").into_response() }),
        );
        let base = serve(router).await;
        let session = Session::in_memory(Some("stale".to_string()));
        let result = open_stream(
            &Client::new(),
            &format!("{base}/stream"),
            &session,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_bearer_header_and_stream_body() {
        let router = Router::new().route(
            "/stream",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer tok" {
                    return (AxumStatus::FORBIDDEN, String::new()).into_response();
                }
                (
                    [("content-type", "text/event-stream")],
                    "event: agent_start\ndata: {\"agent_name\":\"A\"}\n\n".to_string(),
                )
                    .into_response()
            }),
        );
        let base = serve(router).await;
        let session = Session::in_memory(Some("tok".to_string()));
        let stream = open_stream(
            &Client::new(),
            &format!("{base}/stream"),
            &session,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let items = collect(stream).await;
        assert!(matches!(&items[0], TransportItem::Event(e) if e.event_type == "agent_start"));
        assert!(matches!(items.last(), Some(TransportItem::Closed { aborted: false })));
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let router = Router::new().route(
            "/stream",
            get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        );
        let base = serve(router).await;
        let session = Session::in_memory(Some("tok".to_string()));
        let result = open_stream(
            &Client::new(),
            &format!("{base}/stream"),
            &session,
            CancellationToken::new(),
        )
        .await;
        match result {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            _ => panic!("expected status error"),
        }
        assert!(session.is_authenticated());
    }
}
