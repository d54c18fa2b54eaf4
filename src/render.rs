//! Text rendering of conversation paths and live timelines.
//!
//! Everything here is a pure function of the state passed in, except
//! [`LiveView`], which only tracks how many lines it drew last time so the
//! live block can be redrawn in place.

use crate::api::{ArtifactSummary, ConversationSummary};
use crate::timeline::{ExecutionSegment, SegmentStatus, Timeline, TimelinePhase, ToolStatus};
use crate::tree::MessageNode;
use std::io::Write;

const THINKING_PREVIEW_CHARS: usize = 160;

/// One visual section of the output.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayBlock {
    UserMessage {
        text: String,
        /// `(index, count)` when the message has sibling branches.
        branch: Option<(usize, usize)>,
    },
    AgentMessage {
        agent: Option<String>,
        text: String,
    },
    Thinking {
        agent: String,
        text: String,
        active: bool,
    },
    ToolCall {
        agent: String,
        tool: String,
        status: ToolStatus,
        duration_ms: Option<u64>,
    },
    Permission {
        tool: String,
        params: String,
    },
    Error {
        text: String,
    },
}

pub fn path_blocks(path: &[MessageNode]) -> Vec<DisplayBlock> {
    let mut blocks = Vec::with_capacity(path.len() * 2);
    for node in path {
        blocks.push(DisplayBlock::UserMessage {
            text: node.message.content.clone(),
            branch: node
                .has_siblings()
                .then_some((node.sibling_index, node.sibling_count)),
        });
        if let Some(response) = node.message.response.as_ref().filter(|r| !r.is_empty()) {
            blocks.push(DisplayBlock::AgentMessage {
                agent: None,
                text: response.clone(),
            });
        }
    }
    blocks
}

pub fn segment_blocks(segment: &ExecutionSegment) -> Vec<DisplayBlock> {
    let mut blocks = Vec::new();
    if !segment.thinking.is_empty() {
        blocks.push(DisplayBlock::Thinking {
            agent: segment.agent_name.clone(),
            text: segment.thinking.clone(),
            active: segment.thinking_active,
        });
    }
    for call in &segment.tool_calls {
        blocks.push(DisplayBlock::ToolCall {
            agent: call.agent_name.clone(),
            tool: call.tool_name.clone(),
            status: call.status,
            duration_ms: call.duration_ms,
        });
    }
    if !segment.content.is_empty() {
        blocks.push(DisplayBlock::AgentMessage {
            agent: Some(segment.agent_name.clone()),
            text: segment.content.clone(),
        });
    }
    blocks
}

pub fn timeline_blocks(timeline: &Timeline) -> Vec<DisplayBlock> {
    let mut blocks = Vec::new();
    if let Some(text) = timeline.pending_text() {
        blocks.push(DisplayBlock::UserMessage {
            text: text.to_string(),
            branch: None,
        });
    }
    for segment in timeline.segments() {
        blocks.extend(segment_blocks(segment));
    }
    if let Some(req) = timeline.permission_request() {
        blocks.push(DisplayBlock::Permission {
            tool: req.tool_name.clone(),
            params: req.params.to_string(),
        });
    }
    if timeline.phase() != TimelinePhase::Idle || timeline.segments().is_empty() {
        if let Some(err) = timeline.error() {
            blocks.push(DisplayBlock::Error {
                text: err.to_string(),
            });
        }
    }
    blocks
}

pub fn block_lines(block: &DisplayBlock, verbose: bool) -> Vec<String> {
    match block {
        DisplayBlock::UserMessage { text, branch } => {
            let marker = match branch {
                Some((index, count)) => format!(" ({}/{})", index + 1, count),
                None => String::new(),
            };
            prefixed(&format!("you{marker}> "), text)
        }
        DisplayBlock::AgentMessage { agent, text } => {
            let name = agent.as_deref().unwrap_or("assistant");
            prefixed(&format!("{name}> "), text)
        }
        DisplayBlock::Thinking {
            agent,
            text,
            active,
        } => {
            let label = if *active { "thinking" } else { "thought" };
            if verbose {
                prefixed(&format!("  [{agent} {label}] "), text)
            } else {
                vec![format!("  [{agent} {label}] {}", preview(text))]
            }
        }
        DisplayBlock::ToolCall {
            agent,
            tool,
            status,
            duration_ms,
        } => {
            let icon = match status {
                ToolStatus::Running => "…",
                ToolStatus::Success => "✓",
                ToolStatus::Error => "✗",
            };
            let timing = duration_ms
                .map(|ms| format!(" ({ms}ms)"))
                .unwrap_or_default();
            vec![format!("  {icon} {tool} [{agent}]{timing}")]
        }
        DisplayBlock::Permission { tool, params } => vec![
            format!("  ? {tool} needs permission"),
            format!("    {}", preview(params)),
        ],
        DisplayBlock::Error { text } => vec![format!("error: {text}")],
    }
}

pub fn render_blocks(blocks: &[DisplayBlock], verbose: bool) -> Vec<String> {
    blocks.iter().flat_map(|b| block_lines(b, verbose)).collect()
}

/// Read-only replay of a finished turn from the snapshot cache.
pub fn render_snapshot(segments: &[ExecutionSegment]) -> Vec<String> {
    let mut lines = Vec::new();
    for segment in segments {
        let state = match segment.status {
            SegmentStatus::Running => "running",
            SegmentStatus::Complete => "done",
        };
        lines.push(format!("── {} ({state})", segment.agent_name));
        lines.extend(render_blocks(&segment_blocks(segment), true));
    }
    lines
}

pub fn render_conversations(conversations: &[ConversationSummary]) -> Vec<String> {
    conversations
        .iter()
        .map(|c| {
            let updated = c
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            format!(
                "{:<38} {:<16} {}",
                c.id,
                updated,
                c.title.as_deref().unwrap_or("(untitled)")
            )
        })
        .collect()
}

pub fn render_artifacts(artifacts: &[ArtifactSummary]) -> Vec<String> {
    artifacts
        .iter()
        .map(|a| {
            format!(
                "{:<38} v{:<4} {:<10} {}",
                a.id,
                a.version,
                a.kind.as_deref().unwrap_or("-"),
                a.title
            )
        })
        .collect()
}

fn prefixed(prefix: &str, text: &str) -> Vec<String> {
    let indent = " ".repeat(prefix.chars().count());
    let mut lines = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if i == 0 {
            lines.push(format!("{prefix}{line}"));
        } else {
            lines.push(format!("{indent}{line}"));
        }
    }
    if lines.is_empty() {
        lines.push(prefix.trim_end().to_string());
    }
    lines
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= THINKING_PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(THINKING_PREVIEW_CHARS).collect();
    format!("{cut}…")
}

/// Redraws the live block in place using cursor-up + clear.
#[derive(Debug, Default)]
pub struct LiveView {
    drawn: usize,
}

impl LiveView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redraw(&mut self, out: &mut impl Write, lines: &[String]) -> std::io::Result<()> {
        if self.drawn > 0 {
            write!(out, "\x1b[{}A\x1b[J", self.drawn)?;
        }
        for line in lines {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        self.drawn = lines.len();
        Ok(())
    }

    /// Keep what is on screen and start a fresh block below it.
    pub fn commit(&mut self) {
        self.drawn = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::event::{ServerEvent, EVENT_AGENT_START, EVENT_LLM_CHUNK, EVENT_TOOL_START};
    use crate::timeline::scheduler::FrameScheduler;
    use crate::timeline::TurnContext;
    use serde_json::json;

    #[test]
    fn test_timeline_blocks_order() {
        let mut t = Timeline::with_scheduler(FrameScheduler::immediate());
        t.start_turn(TurnContext::default(), "Find X");
        t.apply(&ServerEvent::new(EVENT_AGENT_START, json!({"agent_name": "R"})));
        t.apply(&ServerEvent::new(EVENT_LLM_CHUNK, json!({"reasoning": "plan"})));
        t.apply(&ServerEvent::new(EVENT_TOOL_START, json!({"tool_name": "search"})));
        t.apply(&ServerEvent::new(EVENT_LLM_CHUNK, json!({"content": "Found"})));

        let lines = render_blocks(&timeline_blocks(&t), false);
        assert_eq!(
            lines,
            vec![
                "you> Find X".to_string(),
                "  [R thought] plan".to_string(),
                "  … search [R]".to_string(),
                "R> Found".to_string(),
            ]
        );
    }

    #[test]
    fn test_multiline_messages_are_indented() {
        let lines = block_lines(
            &DisplayBlock::UserMessage {
                text: "one\ntwo".into(),
                branch: Some((1, 3)),
            },
            false,
        );
        assert_eq!(lines, vec!["you (2/3)> one", "           two"]);
    }

    #[test]
    fn test_preview_truncates_long_reasoning() {
        let long = "word ".repeat(100);
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert_eq!(p.chars().count(), THINKING_PREVIEW_CHARS + 1);
    }

    #[test]
    fn test_live_view_redraws_in_place() {
        let mut view = LiveView::new();
        let mut out = Vec::new();
        view.redraw(&mut out, &["a".to_string(), "b".to_string()]).unwrap();
        view.redraw(&mut out, &["c".to_string()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "a\nb\n\x1b[2A\x1b[Jc\n");
    }
}
