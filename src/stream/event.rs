use serde_json::Value;

// ---------------------------------------------------------------------------
// Wire event type tags
// ---------------------------------------------------------------------------

pub const EVENT_METADATA: &str = "metadata";
pub const EVENT_COMPLETE: &str = "complete";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_AGENT_START: &str = "agent_start";
pub const EVENT_LLM_CHUNK: &str = "llm_chunk";
pub const EVENT_LLM_COMPLETE: &str = "llm_complete";
pub const EVENT_AGENT_COMPLETE: &str = "agent_complete";
pub const EVENT_TOOL_START: &str = "tool_start";
pub const EVENT_TOOL_COMPLETE: &str = "tool_complete";
pub const EVENT_PERMISSION_REQUEST: &str = "permission_request";
pub const EVENT_PERMISSION_RESULT: &str = "permission_result";

/// One decoded event as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub event_type: String,
    pub timestamp: Option<String>,
    pub agent_name: Option<String>,
    pub tool_name: Option<String>,
    pub data: Value,
}

/// Whether an `llm_chunk` carries reasoning or answer text.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkKind {
    Reasoning(String),
    Content(String),
    /// Neither `reasoning` nor `content` was present (usage-only chunks).
    Empty,
}

/// Typed view of a [`ServerEvent`]. Matching on this is exhaustive, so a new
/// variant has to be handled by every consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Metadata {
        conversation_id: Option<String>,
        message_id: Option<String>,
        thread_id: Option<String>,
    },
    AgentStart {
        agent: String,
    },
    LlmChunk(ChunkKind),
    LlmComplete {
        content: String,
    },
    AgentComplete {
        agent: Option<String>,
    },
    ToolStart {
        tool: String,
        agent: Option<String>,
        params: Value,
    },
    ToolComplete {
        tool: String,
        success: bool,
        result: Option<Value>,
        duration_ms: Option<u64>,
    },
    PermissionRequest {
        tool: String,
        params: Value,
        thread_id: Option<String>,
        message_id: Option<String>,
    },
    PermissionResult {
        approved: Option<bool>,
    },
    Complete {
        message_id: Option<String>,
    },
    Error {
        message: String,
    },
    Unrecognized(String),
}

impl ServerEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: None,
            agent_name: None,
            tool_name: None,
            data,
        }
    }

    /// `complete` and `error` end the turn on this connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type.as_str(), EVENT_COMPLETE | EVENT_ERROR)
    }

    fn str_field(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    fn agent(&self) -> Option<String> {
        self.str_field("agent_name")
            .or_else(|| self.str_field("agent"))
            .or_else(|| self.agent_name.clone())
    }

    fn tool(&self) -> String {
        self.str_field("tool_name")
            .or_else(|| self.str_field("tool"))
            .or_else(|| self.tool_name.clone())
            .unwrap_or_default()
    }

    fn params(&self) -> Value {
        self.data
            .get("params")
            .or_else(|| self.data.get("input"))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn parse(&self) -> AgentEvent {
        match self.event_type.as_str() {
            EVENT_METADATA => AgentEvent::Metadata {
                conversation_id: self.str_field("conversation_id"),
                message_id: self.str_field("message_id"),
                thread_id: self.str_field("thread_id"),
            },
            EVENT_AGENT_START => AgentEvent::AgentStart {
                agent: self.agent().unwrap_or_else(|| "agent".to_string()),
            },
            EVENT_LLM_CHUNK => {
                let is_reasoning_type = self.str_field("chunk_type").as_deref() == Some("reasoning");
                match (self.str_field("reasoning"), self.str_field("content")) {
                    (Some(reasoning), _) => AgentEvent::LlmChunk(ChunkKind::Reasoning(reasoning)),
                    (None, Some(content)) if is_reasoning_type => {
                        AgentEvent::LlmChunk(ChunkKind::Reasoning(content))
                    }
                    (None, Some(content)) => AgentEvent::LlmChunk(ChunkKind::Content(content)),
                    (None, None) => AgentEvent::LlmChunk(ChunkKind::Empty),
                }
            }
            EVENT_LLM_COMPLETE => AgentEvent::LlmComplete {
                content: self.str_field("content").unwrap_or_default(),
            },
            EVENT_AGENT_COMPLETE => AgentEvent::AgentComplete {
                agent: self.agent(),
            },
            EVENT_TOOL_START => AgentEvent::ToolStart {
                tool: self.tool(),
                agent: self.agent(),
                params: self.params(),
            },
            EVENT_TOOL_COMPLETE => AgentEvent::ToolComplete {
                tool: self.tool(),
                success: self
                    .data
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                result: self.data.get("result").cloned(),
                duration_ms: self.data.get("duration_ms").and_then(|v| v.as_u64()),
            },
            EVENT_PERMISSION_REQUEST => AgentEvent::PermissionRequest {
                tool: self.tool(),
                params: self.params(),
                thread_id: self.str_field("thread_id"),
                message_id: self.str_field("message_id"),
            },
            EVENT_PERMISSION_RESULT => AgentEvent::PermissionResult {
                approved: self.data.get("approved").and_then(|v| v.as_bool()),
            },
            EVENT_COMPLETE => AgentEvent::Complete {
                message_id: self.str_field("message_id"),
            },
            EVENT_ERROR => AgentEvent::Error {
                message: self
                    .str_field("message")
                    .or_else(|| self.str_field("error"))
                    .unwrap_or_else(|| "Unknown stream error".to_string()),
            },
            other => AgentEvent::Unrecognized(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_variants() {
        let reasoning = ServerEvent::new(EVENT_LLM_CHUNK, json!({"reasoning": "hmm"}));
        assert_eq!(
            reasoning.parse(),
            AgentEvent::LlmChunk(ChunkKind::Reasoning("hmm".into()))
        );

        let typed = ServerEvent::new(
            EVENT_LLM_CHUNK,
            json!({"chunk_type": "reasoning", "content": "deep"}),
        );
        assert_eq!(typed.parse(), AgentEvent::LlmChunk(ChunkKind::Reasoning("deep".into())));

        let content = ServerEvent::new(EVENT_LLM_CHUNK, json!({"content": "Sum"}));
        assert_eq!(content.parse(), AgentEvent::LlmChunk(ChunkKind::Content("Sum".into())));

        let usage = ServerEvent::new(EVENT_LLM_CHUNK, json!({"usage": {"tokens": 3}}));
        assert_eq!(usage.parse(), AgentEvent::LlmChunk(ChunkKind::Empty));
    }

    #[test]
    fn test_name_hints_fall_back_to_envelope() {
        let mut event = ServerEvent::new(EVENT_TOOL_START, json!({"input": {"q": "x"}}));
        event.tool_name = Some("search".into());
        event.agent_name = Some("Researcher".into());
        assert_eq!(
            event.parse(),
            AgentEvent::ToolStart {
                tool: "search".into(),
                agent: Some("Researcher".into()),
                params: json!({"q": "x"}),
            }
        );
    }

    #[test]
    fn test_tool_complete_defaults_to_success() {
        let event = ServerEvent::new(EVENT_TOOL_COMPLETE, json!({"tool_name": "read"}));
        match event.parse() {
            AgentEvent::ToolComplete { success, result, duration_ms, .. } => {
                assert!(success);
                assert!(result.is_none());
                assert!(duration_ms.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let event = ServerEvent::new("heartbeat_v2", json!({}));
        assert_eq!(event.parse(), AgentEvent::Unrecognized("heartbeat_v2".into()));
        assert!(!event.is_terminal());
        assert!(ServerEvent::new(EVENT_ERROR, json!({})).is_terminal());
    }
}
