//! Per-transcript statistics derived from the parsed entry stream.

use crate::entry::{EntryKind, ParsedEntry};
use serde::{Deserialize, Serialize};

/// Aggregates over a parsed transcript.
///
/// The assistant reports `input_tokens` cumulatively per turn, so the total
/// keeps the *last* observation; output and cache counters accumulate.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptStats {
    /// Last input-token observation.
    pub input_tokens: u64,
    /// Summed output tokens.
    pub output_tokens: u64,
    /// Summed cache-creation tokens.
    pub cache_creation_tokens: u64,
    /// Summed cache-read tokens.
    pub cache_read_tokens: u64,
    pub tool_calls: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub last_model: Option<String>,
}

impl TranscriptStats {
    pub fn from_entries(entries: &[ParsedEntry]) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            if entry.timestamp > 0 {
                if stats.first_timestamp.is_none() {
                    stats.first_timestamp = Some(entry.timestamp);
                }
                stats.last_timestamp = Some(entry.timestamp);
            }
            match &entry.kind {
                EntryKind::UserMessage { .. } => stats.user_messages += 1,
                EntryKind::AssistantMessage { model, usage, .. } => {
                    stats.assistant_messages += 1;
                    if let Some(model) = model {
                        stats.last_model = Some(model.clone());
                    }
                    if let Some(usage) = usage {
                        stats.input_tokens = usage.input_tokens;
                        stats.output_tokens += usage.output_tokens;
                        stats.cache_creation_tokens += usage.cache_creation_tokens;
                        stats.cache_read_tokens += usage.cache_read_tokens;
                    }
                }
                EntryKind::ToolCall { .. } => stats.tool_calls += 1,
                _ => {}
            }
        }
        stats
    }

    /// Total input: the last cumulative observation plus everything served
    /// from cache.
    pub fn total_input_tokens(&self) -> u64 {
        self.input_tokens + self.cache_read_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TokenUsage;

    fn assistant(index: usize, ts: i64, input: u64, output: u64, cache_read: u64) -> ParsedEntry {
        ParsedEntry {
            index,
            timestamp: ts,
            kind: EntryKind::AssistantMessage {
                text: "ok".into(),
                model: Some("claude-opus-4".into()),
                usage: Some(TokenUsage {
                    input_tokens: input,
                    output_tokens: output,
                    cache_creation_tokens: 0,
                    cache_read_tokens: cache_read,
                }),
            },
        }
    }

    fn user(index: usize, ts: i64) -> ParsedEntry {
        ParsedEntry {
            index,
            timestamp: ts,
            kind: EntryKind::UserMessage {
                text: "do it".into(),
                is_meta: false,
                is_sidechain: false,
            },
        }
    }

    #[test]
    fn input_is_last_observation_output_is_summed() {
        let entries = vec![
            user(0, 1000),
            assistant(1, 2000, 1_000, 50, 400),
            user(2, 3000),
            assistant(3, 4000, 5_000, 70, 600),
        ];
        let stats = TranscriptStats::from_entries(&entries);
        assert_eq!(stats.input_tokens, 5_000, "keeps last observation");
        assert_eq!(stats.output_tokens, 120, "sums output");
        assert_eq!(stats.cache_read_tokens, 1_000, "sums cache reads");
        assert_eq!(stats.total_input_tokens(), 6_000);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 2);
        assert_eq!(stats.first_timestamp, Some(1000));
        assert_eq!(stats.last_timestamp, Some(4000));
        assert_eq!(stats.last_model.as_deref(), Some("claude-opus-4"));
    }

    #[test]
    fn empty_transcript_yields_zeroes() {
        let stats = TranscriptStats::from_entries(&[]);
        assert_eq!(stats, TranscriptStats::default());
        assert_eq!(stats.total_input_tokens(), 0);
    }

    #[test]
    fn tool_calls_are_counted() {
        let entries = vec![ParsedEntry {
            index: 0,
            timestamp: 0,
            kind: EntryKind::ToolCall {
                name: "Bash".into(),
                id: None,
                input: serde_json::json!({"command": "ls"}),
            },
        }];
        let stats = TranscriptStats::from_entries(&entries);
        assert_eq!(stats.tool_calls, 1);
    }
}
