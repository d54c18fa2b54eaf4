use super::App;
use crate::api::ResumeTurnRequest;
use crate::error::ClientError;
use crate::timeline::TimelinePhase;
use tracing::{debug, info};

impl App {
    /// Answer the pending permission request and continue the same turn on a
    /// new connection. The request is read here, at point of use, and only
    /// cleared once the replacement stream is connected. If a
    /// `permission_result` already cleared the request while the turn is
    /// still paused, the turn context supplies the ids.
    pub async fn resume_permission(&mut self, approved: bool) -> Result<(), ClientError> {
        if self.timeline.phase() != TimelinePhase::AwaitingPermission {
            return Err(ClientError::InvalidResponse(
                "no turn is waiting for a permission decision".to_string(),
            ));
        }
        let request = self.timeline.permission_request().cloned();
        if request.is_none() {
            debug!("Permission request already cleared, resuming from turn context");
        }
        let context = self.timeline.context().clone();
        let tool_name = request
            .as_ref()
            .map(|r| r.tool_name.clone())
            .unwrap_or_else(|| "tool".to_string());
        let (req_conversation, req_thread, req_message) = match request {
            Some(r) => (r.conversation_id, r.thread_id, r.message_id),
            None => (None, None, None),
        };

        let ids = (
            req_conversation.or(context.conversation_id),
            req_thread.or(context.thread_id),
            req_message.or(context.message_id),
        );
        let (Some(conversation_id), Some(thread_id), Some(message_id)) = ids else {
            let err = ClientError::InvalidResponse(
                "permission request is missing conversation, thread or message id".to_string(),
            );
            self.note_error(&err);
            return Err(err);
        };

        info!(
            "Resuming thread {} ({} {})",
            thread_id,
            if approved { "approved" } else { "denied" },
            tool_name
        );
        let resumed = match self
            .api
            .resume_turn(&ResumeTurnRequest {
                conversation_id,
                thread_id,
                message_id,
                approved,
            })
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                self.note_error(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.connect(&resumed.stream_url).await {
            self.note_error(&e);
            return Err(e);
        }
        self.timeline.clear_permission_request();
        self.timeline.resume_streaming();
        Ok(())
    }
}
