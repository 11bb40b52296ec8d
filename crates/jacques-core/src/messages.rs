//! Websocket message vocabulary.
//!
//! Tagged unions keyed by a `type` discriminator, both directions. Unknown
//! inbound tags are dropped with a warning by the websocket server; outbound
//! messages are the only contract the UI depends on.

use crate::types::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Server → client ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub timestamp: i64,
    pub operation: String,
    pub phase: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot sent once per websocket connection, sessions in
    /// descending `last_activity` order.
    InitialState {
        sessions: Vec<Session>,
        focused_session_id: Option<String>,
    },
    SessionUpdate {
        session: Session,
    },
    SessionRemoved {
        session_id: String,
    },
    /// Always carries the registry's *current* focus, which may be null.
    FocusChanged {
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<Session>,
    },
    ServerStatus {
        status: String,
        session_count: usize,
    },
    ServerLog {
        level: String,
        message: String,
        timestamp: i64,
        source: String,
    },
    ApiLog {
        method: String,
        path: String,
        status: u16,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        timestamp: i64,
    },
    AutocompactToggled {
        enabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    HandoffReady {
        session_id: String,
        path: String,
    },
    HandoffProgress {
        session_id: String,
        stage: String,
        extractors_done: u32,
        extractors_total: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_extractor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_file: Option<String>,
    },
    HandoffContext {
        session_id: String,
        context: String,
        token_estimate: u64,
        data: Value,
    },
    HandoffContextError {
        session_id: String,
        error: String,
    },
    ClaudeOperation {
        operation: OperationRecord,
    },
    FocusTerminalResult {
        session_id: String,
        success: bool,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TileWindowsResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NotificationSettings {
        settings: Value,
    },
    NotificationFired {
        notification: Value,
    },
    CatalogUpdated {
        #[serde(rename = "projectPath")]
        project_path: String,
        action: String,
        #[serde(rename = "itemId", default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },
    ChatDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        delta: String,
    },
    ChatToolEvent {
        event: Value,
    },
    ChatComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
    },
    ChatError {
        error: String,
    },
}

// ─── Client → server ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SelectSession {
        session_id: String,
    },
    TriggerAction {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    ToggleAutocompact {
        enabled: bool,
    },
    GetHandoffContext {
        session_id: String,
    },
    FocusTerminal {
        session_id: String,
    },
    TileWindows {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layout: Option<String>,
    },
    UpdateNotificationSettings {
        settings: Value,
    },
    ChatSend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
    ChatAbort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionSource, SessionStatus, TerminalIdentity};

    fn sample_session(id: &str, last_activity: i64) -> Session {
        Session {
            session_id: id.into(),
            source: SessionSource::ClaudeCode,
            status: SessionStatus::Active,
            title: format!("session {id}"),
            transcript_path: None,
            cwd: "/u/p".into(),
            project: "p".into(),
            model: None,
            terminal: TerminalIdentity::default(),
            terminal_key: format!("TTY:/dev/ttys{id}"),
            last_activity,
            registered_at: last_activity,
            context_metrics: None,
            autocompact: None,
            git: Default::default(),
            hook_source: None,
        }
    }

    #[test]
    fn server_messages_carry_type_tag() {
        let msg = ServerMessage::SessionRemoved {
            session_id: "A".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"session_removed\""));

        let msg = ServerMessage::FocusChanged {
            session_id: None,
            session: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"focus_changed\""));
        assert!(json.contains("\"session_id\":null"));
        assert!(!json.contains("\"session\":"));
    }

    #[test]
    fn initial_state_round_trips() {
        let msg = ServerMessage::InitialState {
            sessions: vec![sample_session("B", 200), sample_session("A", 100)],
            focused_session_id: Some("B".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn api_log_uses_camel_case_duration() {
        let msg = ServerMessage::ApiLog {
            method: "GET".into(),
            path: "/api/sessions".into(),
            status: 200,
            duration_ms: 12,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"durationMs\":12"));
    }

    #[test]
    fn operation_record_is_camel_case() {
        let op = OperationRecord {
            id: "op-1".into(),
            timestamp: 1,
            operation: "handoff".into(),
            phase: "complete".into(),
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
            duration_ms: 400,
            success: true,
            error_message: None,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"inputTokens\":10"));
        assert!(json.contains("\"durationMs\":400"));
        assert!(!json.contains("errorMessage"));
    }

    #[test]
    fn catalog_updated_field_names() {
        let msg = ServerMessage::CatalogUpdated {
            project_path: "/u/p".into(),
            action: "extracted".into(),
            item_id: Some("sess-1".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"projectPath\""));
        assert!(json.contains("\"itemId\""));
    }

    #[test]
    fn client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"select_session","session_id":"A"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SelectSession {
                session_id: "A".into()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"toggle_autocompact","enabled":false}"#).unwrap();
        assert_eq!(msg, ClientMessage::ToggleAutocompact { enabled: false });

        // Unknown tag is a decode error the server logs and drops.
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch_rocket"}"#).is_err());
    }
}
