//! Typed entries produced by the transcript parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cumulative token usage reported on a single assistant turn.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchPhase {
    Query,
    Results,
}

/// One parsed transcript entry, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntry {
    /// Position in the parsed sequence (not the raw line number — skipped
    /// lines do not consume an index).
    pub index: usize,
    /// Epoch milliseconds; zero when the line carried no timestamp.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    UserMessage {
        text: String,
        is_meta: bool,
        is_sidechain: bool,
    },
    AssistantMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    ToolCall {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        input: Value,
    },
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Thinking {
        text: String,
    },
    AgentProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    BashProgress {
        output: String,
    },
    McpProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    WebSearch {
        phase: WebSearchPhase,
        query: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        urls: Vec<String>,
    },
    HookProgress {
        hook_name: String,
    },
    TurnDuration {
        duration_ms: u64,
    },
    SystemEvent {
        subtype: String,
        content: String,
    },
    Summary {
        summary: String,
    },
}

impl ParsedEntry {
    /// Text of a user message that came from a human (not meta, not a
    /// sidechain echo).
    pub fn user_question(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::UserMessage {
                text,
                is_meta: false,
                is_sidechain: false,
            } if !text.is_empty() => Some(text),
            _ => None,
        }
    }

    pub fn assistant_text(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::AssistantMessage { text, .. } if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}
