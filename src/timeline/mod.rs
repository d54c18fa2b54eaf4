//! Execution timeline: folds stream events into per-activation segments.
//!
//! Only [`Timeline::apply`] and the explicit turn operations (start, stop,
//! fail, finish) mutate the segment list. The last segment is the only one
//! chunk/tool-start events can touch; earlier segments are frozen except for
//! a late `tool_complete` that still has to find its running record.

pub mod scheduler;

use crate::stream::event::{AgentEvent, ChunkKind, ServerEvent};
use scheduler::FrameScheduler;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePhase {
    Idle,
    Streaming,
    AwaitingPermission,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Running,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub agent_name: String,
    pub params: Value,
    pub status: ToolStatus,
    pub result: Option<Value>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSegment {
    pub id: String,
    pub agent_name: String,
    pub status: SegmentStatus,
    pub thinking: String,
    pub thinking_active: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub content: String,
}

impl ExecutionSegment {
    fn new(agent_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_name,
            status: SegmentStatus::Running,
            thinking: String::new(),
            thinking_active: false,
            tool_calls: Vec::new(),
            content: String::new(),
        }
    }

    /// Worth keeping for later "what did the agent do" display.
    pub fn has_activity(&self) -> bool {
        !self.tool_calls.is_empty() || !self.thinking.is_empty()
    }
}

/// Identifiers that correlate the in-flight turn with the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnContext {
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub parent_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub params: Value,
    pub conversation_id: Option<String>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

/// Returned by [`Timeline::apply`] when the caller has follow-up work.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSignal {
    PermissionRequired,
    /// Refresh conversation and artifacts, then call [`Timeline::finish`].
    Completed { message_id: Option<String> },
    Failed,
}

#[derive(Debug)]
pub struct Timeline {
    phase: TimelinePhase,
    context: TurnContext,
    segments: Vec<ExecutionSegment>,
    permission: Option<PermissionRequest>,
    error: Option<String>,
    pending_text: Option<String>,
    snapshots: HashMap<String, Vec<ExecutionSegment>>,
    scheduler: FrameScheduler,
    tool_seq: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::with_scheduler(FrameScheduler::default())
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(scheduler: FrameScheduler) -> Self {
        Self {
            phase: TimelinePhase::Idle,
            context: TurnContext::default(),
            segments: Vec::new(),
            permission: None,
            error: None,
            pending_text: None,
            snapshots: HashMap::new(),
            scheduler,
            tool_seq: 0,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn phase(&self) -> TimelinePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            TimelinePhase::Streaming | TimelinePhase::AwaitingPermission
        )
    }

    pub fn context(&self) -> &TurnContext {
        &self.context
    }

    pub fn segments(&self) -> &[ExecutionSegment] {
        &self.segments
    }

    pub fn current_segment(&self) -> Option<&ExecutionSegment> {
        self.segments.last()
    }

    pub fn permission_request(&self) -> Option<&PermissionRequest> {
        self.permission.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn pending_text(&self) -> Option<&str> {
        self.pending_text.as_deref()
    }

    pub fn snapshot(&self, message_id: &str) -> Option<&[ExecutionSegment]> {
        self.snapshots.get(message_id).map(|s| s.as_slice())
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn time_until_flush(&self, now: Instant) -> Option<Duration> {
        self.scheduler.time_until_due(now)
    }

    // ------------------------------------------------------------------
    // Turn lifecycle
    // ------------------------------------------------------------------

    /// Begin a turn. `pending_text` is shown until the server copy arrives.
    pub fn start_turn(&mut self, context: TurnContext, pending_text: impl Into<String>) {
        self.phase = TimelinePhase::Streaming;
        self.context = context;
        self.segments.clear();
        self.permission = None;
        self.error = None;
        self.scheduler.discard();
        self.pending_text = Some(pending_text.into());
    }

    /// Fill in identifiers learned after the turn started.
    pub fn update_context(&mut self, context: TurnContext) {
        let merge = |slot: &mut Option<String>, value: Option<String>| {
            if value.is_some() {
                *slot = value;
            }
        };
        merge(&mut self.context.conversation_id, context.conversation_id);
        merge(&mut self.context.message_id, context.message_id);
        merge(&mut self.context.thread_id, context.thread_id);
        merge(&mut self.context.parent_message_id, context.parent_message_id);
    }

    /// User stop. Ends the turn without snapshotting.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.flush_now();
        self.permission = None;
        self.phase = TimelinePhase::Ended;
        info!("Turn stopped by user");
    }

    /// Transport or session failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("Turn failed: {}", message);
        self.scheduler.discard();
        self.permission = None;
        self.error = Some(message);
        self.phase = TimelinePhase::Ended;
    }

    /// Cleanup after an ended turn. Snapshots and the last error survive.
    pub fn finish(&mut self) {
        self.scheduler.discard();
        self.phase = TimelinePhase::Idle;
        self.context = TurnContext::default();
        self.segments.clear();
        self.permission = None;
        self.pending_text = None;
    }

    /// Drop everything, including the snapshot cache.
    pub fn reset(&mut self) {
        self.finish();
        self.error = None;
        self.snapshots.clear();
        self.tool_seq = 0;
    }

    pub fn clear_permission_request(&mut self) {
        self.permission = None;
    }

    /// Back to streaming once the resumed connection is live.
    pub fn resume_streaming(&mut self) {
        if self.phase == TimelinePhase::AwaitingPermission {
            self.phase = TimelinePhase::Streaming;
        }
    }

    // ------------------------------------------------------------------
    // Coalesced content
    // ------------------------------------------------------------------

    /// Apply coalesced content whose frame is due.
    pub fn flush_pending(&mut self, now: Instant) -> bool {
        match self.scheduler.flush_due(now) {
            Some(content) => self.set_current_content(content),
            None => false,
        }
    }

    pub fn flush_now(&mut self) -> bool {
        match self.scheduler.flush_now() {
            Some(content) => self.set_current_content(content),
            None => false,
        }
    }

    fn set_current_content(&mut self, content: String) -> bool {
        match self.segments.last_mut() {
            Some(segment) => {
                segment.content = content;
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Event fold
    // ------------------------------------------------------------------

    pub fn apply(&mut self, event: &ServerEvent) -> Option<TurnSignal> {
        if !self.is_active() {
            debug!(
                "Ignoring {} event while {:?}",
                event.event_type, self.phase
            );
            return None;
        }

        match event.parse() {
            AgentEvent::Metadata {
                conversation_id,
                message_id,
                thread_id,
            } => {
                self.update_context(TurnContext {
                    conversation_id,
                    message_id,
                    thread_id,
                    parent_message_id: None,
                });
                None
            }
            AgentEvent::AgentStart { agent } => {
                self.flush_now();
                debug!("Agent {} started", agent);
                self.segments.push(ExecutionSegment::new(agent));
                None
            }
            AgentEvent::LlmChunk(ChunkKind::Reasoning(text)) => {
                if let Some(segment) = self.segments.last_mut() {
                    segment.thinking = text;
                    segment.thinking_active = true;
                }
                None
            }
            AgentEvent::LlmChunk(ChunkKind::Content(text)) => {
                let Some(segment) = self.segments.last_mut() else {
                    return None;
                };
                segment.thinking_active = false;
                if let Some(content) = self.scheduler.schedule(text, Instant::now()) {
                    self.set_current_content(content);
                }
                None
            }
            AgentEvent::LlmChunk(ChunkKind::Empty) => {
                debug!("Ignoring llm_chunk without text");
                None
            }
            AgentEvent::LlmComplete { content } => {
                self.scheduler.discard();
                if let Some(segment) = self.segments.last_mut() {
                    segment.content = content;
                    segment.thinking_active = false;
                }
                None
            }
            AgentEvent::AgentComplete { .. } => {
                self.flush_now();
                if let Some(segment) = self.segments.last_mut() {
                    segment.status = SegmentStatus::Complete;
                    segment.thinking_active = false;
                }
                None
            }
            AgentEvent::ToolStart {
                tool,
                agent,
                params,
            } => {
                self.scheduler.discard();
                self.tool_seq += 1;
                let id = format!(
                    "{}-{}-{}",
                    tool,
                    chrono::Utc::now().timestamp_millis(),
                    self.tool_seq
                );
                if let Some(segment) = self.segments.last_mut() {
                    let agent_name = agent.unwrap_or_else(|| segment.agent_name.clone());
                    segment.tool_calls.push(ToolCallRecord {
                        id,
                        tool_name: tool,
                        agent_name,
                        params,
                        status: ToolStatus::Running,
                        result: None,
                        duration_ms: None,
                    });
                    segment.content.clear();
                }
                None
            }
            AgentEvent::ToolComplete {
                tool,
                success,
                result,
                duration_ms,
            } => {
                match self.find_running_tool(&tool) {
                    Some(record) => {
                        record.status = if success {
                            ToolStatus::Success
                        } else {
                            ToolStatus::Error
                        };
                        record.result = result;
                        record.duration_ms = duration_ms;
                    }
                    None => debug!("Dropping tool_complete for {} with no running call", tool),
                }
                None
            }
            AgentEvent::PermissionRequest {
                tool,
                params,
                thread_id,
                message_id,
            } => {
                self.flush_now();
                info!("Permission requested for tool {}", tool);
                self.permission = Some(PermissionRequest {
                    tool_name: tool,
                    params,
                    conversation_id: self.context.conversation_id.clone(),
                    thread_id: thread_id.or_else(|| self.context.thread_id.clone()),
                    message_id: message_id.or_else(|| self.context.message_id.clone()),
                });
                self.phase = TimelinePhase::AwaitingPermission;
                Some(TurnSignal::PermissionRequired)
            }
            AgentEvent::PermissionResult { approved } => {
                debug!("Permission result received: {:?}", approved);
                self.permission = None;
                None
            }
            AgentEvent::Complete { message_id } => {
                self.flush_now();
                let message_id = message_id.or_else(|| self.context.message_id.clone());
                self.snapshot_segments(message_id.as_deref());
                self.permission = None;
                self.phase = TimelinePhase::Ended;
                info!("Turn complete ({} segments)", self.segments.len());
                Some(TurnSignal::Completed { message_id })
            }
            AgentEvent::Error { message } => {
                self.fail(message);
                Some(TurnSignal::Failed)
            }
            AgentEvent::Unrecognized(kind) => {
                warn!("Ignoring unrecognized stream event type: {}", kind);
                None
            }
        }
    }

    /// Current segment first, then older segments newest-first.
    fn find_running_tool(&mut self, tool: &str) -> Option<&mut ToolCallRecord> {
        let is_match = |r: &ToolCallRecord| r.tool_name == tool && r.status == ToolStatus::Running;
        let segment_idx = self
            .segments
            .iter()
            .rposition(|s| s.tool_calls.iter().any(is_match))?;
        self.segments[segment_idx]
            .tool_calls
            .iter_mut()
            .find(|r| is_match(r))
    }

    fn snapshot_segments(&mut self, message_id: Option<&str>) {
        let kept: Vec<ExecutionSegment> = self
            .segments
            .iter()
            .filter(|s| s.has_activity())
            .cloned()
            .collect();
        if kept.is_empty() {
            return;
        }
        match message_id {
            Some(id) => {
                self.snapshots.insert(id.to_string(), kept);
            }
            None => warn!("Turn completed without a message id, skipping snapshot"),
        }
    }
}
