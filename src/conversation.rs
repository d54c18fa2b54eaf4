use crate::api::{ApiClient, ArtifactSummary, Conversation, ConversationSummary};
use crate::error::ClientError;
use crate::tree::{build_tree, extract_active_path, latest_leaf_under, MessageNode, MessageTree};
use tracing::{debug, info};

/// The server's copy of the open conversation plus the derived tree.
///
/// Only ever replaced wholesale from a fetch; stream events never patch it.
#[derive(Debug, Default)]
pub struct ConversationState {
    conversation: Option<Conversation>,
    tree: MessageTree,
    active_leaf: Option<String>,
    artifacts: Vec<ArtifactSummary>,
    conversations: Vec<ConversationSummary>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.conversation.as_ref().and_then(|c| c.title.as_deref())
    }

    pub fn active_leaf(&self) -> Option<&str> {
        self.active_leaf.as_deref()
    }

    pub fn artifacts(&self) -> &[ArtifactSummary] {
        &self.artifacts
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// Replace the conversation and rebuild the tree. The active leaf is kept
    /// only if it still exists in the new copy.
    pub fn load(&mut self, conversation: Conversation) {
        let switched = self.conversation_id() != Some(conversation.id.as_str());
        self.tree = build_tree(&conversation.messages);
        if switched {
            self.artifacts.clear();
        }
        if switched || self.active_leaf.as_deref().is_some_and(|id| self.tree.get(id).is_none()) {
            self.active_leaf = None;
        }
        debug!(
            "Loaded conversation {} ({} messages)",
            conversation.id,
            self.tree.len()
        );
        self.conversation = Some(conversation);
    }

    pub fn set_artifacts(&mut self, artifacts: Vec<ArtifactSummary>) {
        self.artifacts = artifacts;
    }

    /// Select the branch ending at `leaf`. `None` selects the newest branch.
    /// Returns false (and changes nothing) for an unknown id.
    pub fn set_active_leaf(&mut self, leaf: Option<String>) -> bool {
        if let Some(id) = &leaf {
            if self.tree.get(id).is_none() {
                return false;
            }
        }
        self.active_leaf = leaf;
        true
    }

    pub fn active_path(&self) -> Vec<MessageNode> {
        extract_active_path(&self.tree, self.active_leaf.as_deref())
    }

    /// Where a new turn attaches: the last message on the active path.
    pub fn parent_for_new_turn(&self) -> Option<String> {
        self.active_path().last().map(|n| n.message.id.clone())
    }

    /// Path shown while a turn is live. For an edit or rerun the new message
    /// attaches to `parent`, so everything below it is hidden.
    pub fn visible_path(&self, parent: Option<&str>) -> Vec<MessageNode> {
        match parent {
            Some(id) => extract_active_path(&self.tree, Some(id)),
            None => Vec::new(),
        }
    }

    /// Move to the sibling `offset` positions away from `message_id` and
    /// follow it down to its newest leaf. Returns the new active leaf.
    pub fn switch_branch(&mut self, message_id: &str, offset: isize) -> Option<String> {
        let siblings = self.tree.siblings(message_id);
        let index = siblings.iter().position(|s| s == message_id)?;
        let target = index
            .checked_add_signed(offset)
            .filter(|i| *i < siblings.len())?;
        let leaf = latest_leaf_under(&self.tree, &siblings[target])?;
        self.active_leaf = Some(leaf.clone());
        Some(leaf)
    }

    /// Full re-fetch of the open conversation and its artifact list.
    pub async fn refresh(&mut self, api: &ApiClient, conversation_id: &str) -> Result<(), ClientError> {
        let conversation = api.fetch_conversation(conversation_id).await?;
        let artifacts = api.list_artifacts(conversation_id).await?;
        self.load(conversation);
        self.set_artifacts(artifacts);
        info!(
            "Refreshed conversation {} ({} artifacts)",
            conversation_id,
            self.artifacts.len()
        );
        Ok(())
    }

    pub async fn refresh_list(&mut self, api: &ApiClient) -> Result<(), ClientError> {
        self.conversations = api.list_conversations().await?;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
