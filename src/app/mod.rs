mod permission;
mod turn;

use crate::api::ApiClient;
use crate::conversation::ConversationState;
use crate::error::ClientError;
use crate::session::Session;
use crate::stream::{open_stream, EventStream};
use crate::timeline::scheduler::FrameScheduler;
use crate::timeline::Timeline;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use turn::TurnUpdate;

/// Process-wide client state. Owns the session, the open conversation, the
/// execution timeline and at most one live event connection.
pub struct App {
    api: ApiClient,
    session: Session,
    conversation: ConversationState,
    timeline: Timeline,
    stream: Option<EventStream>,
    cancel: Option<CancellationToken>,
}

impl App {
    pub fn new(api: ApiClient, scheduler: FrameScheduler) -> Self {
        let session = api.session().clone();
        Self {
            api,
            session,
            conversation: ConversationState::new(),
            timeline: Timeline::with_scheduler(scheduler),
            stream: None,
            cancel: None,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut ConversationState {
        &mut self.conversation
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn has_live_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// True once the server rejected our credential.
    pub fn session_expired(&self) -> bool {
        !self.session.is_authenticated()
    }

    /// Apply coalesced content whose frame is due.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.timeline.flush_pending(now)
    }

    /// Load a conversation (and its artifacts) from the server.
    pub async fn open_conversation(&mut self, conversation_id: &str) -> Result<(), ClientError> {
        if let Err(e) = self.conversation.refresh(&self.api, conversation_id).await {
            self.note_error(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Single teardown path: stop the connection, then reset the timeline,
    /// the conversation and the session, in that order.
    pub fn logout(&mut self) {
        self.abort_stream();
        self.timeline.reset();
        self.conversation.reset();
        self.session.invalidate();
        info!("Logged out");
    }

    fn abort_stream(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.stream = None;
    }

    /// Open a connection for the current turn. Any previous connection is
    /// aborted first so at most one reader mutates the timeline.
    async fn connect(&mut self, stream_url: &str) -> Result<(), ClientError> {
        self.abort_stream();
        let url = self.api.resolve_url(stream_url)?;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let stream = open_stream(self.api.http(), &url, &self.session, cancel).await?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Record a transport or session failure on the timeline.
    fn note_error(&mut self, err: &ClientError) {
        if err.is_session_expired() {
            warn!("Session expired");
            self.abort_stream();
            self.session.invalidate();
        }
        if self.timeline.is_active() {
            self.abort_stream();
            self.timeline.fail(err.to_string());
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.abort_stream();
    }
}
