use super::App;
use crate::api::CreateTurnRequest;
use crate::error::ClientError;
use crate::stream::TransportItem;
use crate::timeline::{TimelinePhase, TurnContext, TurnSignal};
use tracing::{debug, info, warn};

/// What changed after one transport item was folded in.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// The timeline changed; redraw.
    Event,
    /// Execution is suspended until `resume_permission` is called.
    PermissionRequired,
    Completed { message_id: Option<String> },
    Failed { error: String },
    /// The user stopped the turn.
    Stopped,
    /// The connection closed without ending the turn (permission pause).
    Closed,
}

impl TurnUpdate {
    pub fn is_final(&self) -> bool {
        !matches!(self, TurnUpdate::Event | TurnUpdate::PermissionRequired)
    }
}

impl App {
    /// Start a new turn. `parent` overrides where the message attaches (edit
    /// or rerun); by default it continues the active branch.
    pub async fn send_message(
        &mut self,
        content: &str,
        parent: Option<String>,
    ) -> Result<(), ClientError> {
        self.abort_stream();
        let conversation_id = self.conversation.conversation_id().map(String::from);
        let parent_message_id = parent.or_else(|| self.conversation.parent_for_new_turn());

        self.timeline.start_turn(
            TurnContext {
                conversation_id: conversation_id.clone(),
                message_id: None,
                thread_id: None,
                parent_message_id: parent_message_id.clone(),
            },
            content,
        );

        let request = CreateTurnRequest {
            content: content.to_string(),
            conversation_id,
            parent_message_id,
        };
        let created = match self.api.create_turn(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                self.note_error(&e);
                return Err(e);
            }
        };
        info!(
            "Turn created: conversation={} message={} thread={}",
            created.conversation_id, created.message_id, created.thread_id
        );
        self.timeline.update_context(TurnContext {
            conversation_id: Some(created.conversation_id),
            message_id: Some(created.message_id),
            thread_id: Some(created.thread_id),
            parent_message_id: None,
        });

        if let Err(e) = self.connect(&created.stream_url).await {
            self.note_error(&e);
            return Err(e);
        }
        Ok(())
    }

    /// User stop: abort the connection and end the turn right away.
    pub fn stop(&mut self) {
        self.abort_stream();
        self.timeline.stop();
    }

    /// Fold the next transport item into the timeline. Returns `None` when
    /// there is no live connection.
    pub async fn pump(&mut self) -> Option<TurnUpdate> {
        let item = self.stream.as_mut()?.next().await;
        let Some(item) = item else {
            self.stream = None;
            return None;
        };

        match item {
            TransportItem::Event(event) => match self.timeline.apply(&event) {
                None => Some(TurnUpdate::Event),
                Some(TurnSignal::PermissionRequired) => Some(TurnUpdate::PermissionRequired),
                Some(TurnSignal::Failed) => {
                    self.abort_stream();
                    Some(TurnUpdate::Failed {
                        error: self.timeline.error().unwrap_or_default().to_string(),
                    })
                }
                Some(TurnSignal::Completed { message_id }) => {
                    self.abort_stream();
                    self.complete_turn(message_id.as_deref()).await;
                    Some(TurnUpdate::Completed { message_id })
                }
            },
            TransportItem::Closed { aborted: true } => {
                self.stream = None;
                self.timeline.stop();
                Some(TurnUpdate::Stopped)
            }
            TransportItem::Closed { aborted: false } => {
                self.stream = None;
                match self.timeline.phase() {
                    TimelinePhase::Streaming => {
                        self.timeline.fail("Connection closed before the turn completed");
                        Some(TurnUpdate::Failed {
                            error: self.timeline.error().unwrap_or_default().to_string(),
                        })
                    }
                    _ => {
                        debug!("Stream closed while {:?}", self.timeline.phase());
                        Some(TurnUpdate::Closed)
                    }
                }
            }
            TransportItem::Error(e) => {
                self.note_error(&e);
                Some(TurnUpdate::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Reconcile with the server copy, then return the timeline to idle.
    async fn complete_turn(&mut self, message_id: Option<&str>) {
        let conversation_id = self.timeline.context().conversation_id.clone();
        if let Some(conversation_id) = conversation_id {
            match self.conversation.refresh(&self.api, &conversation_id).await {
                Ok(()) => {
                    let leaf = message_id.map(String::from);
                    if !self.conversation.set_active_leaf(leaf) {
                        self.conversation.set_active_leaf(None);
                    }
                }
                Err(e) => warn!("Failed to refresh conversation after turn: {}", e),
            }
        }
        self.timeline.finish();
    }
}
