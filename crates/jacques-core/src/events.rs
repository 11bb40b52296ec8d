//! Ingress event schema.
//!
//! Assistant hooks emit one newline-delimited JSON event per write. Every
//! event carries an `event` discriminator and a `session_id`; timestamps are
//! epoch milliseconds. Unknown fields on the richer events are preserved so
//! that decode(serialize(e)) round-trips.

use crate::types::{AutocompactStatus, ContextMetrics, TerminalIdentity, project_from_cwd};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ─── Flexible scalars ─────────────────────────────────────────────

/// A numeric field that some emitters send as a JSON string.
///
/// A parseable string decodes like a number. A non-parseable value decodes
/// to zero with `coerced` set, which forces `is_estimate` on the resulting
/// context metrics.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FlexScalar {
    pub value: f64,
    pub coerced: bool,
}

impl FlexScalar {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            coerced: false,
        }
    }

    pub fn as_u64(self) -> u64 {
        if self.value.is_finite() && self.value > 0.0 {
            self.value as u64
        } else {
            0
        }
    }

    fn from_value(v: &Value) -> Self {
        match v {
            Value::Number(n) => Self::new(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(value) => Self::new(value),
                Err(_) => Self {
                    value: 0.0,
                    coerced: true,
                },
            },
            _ => Self {
                value: 0.0,
                coerced: true,
            },
        }
    }
}

impl Serialize for FlexScalar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value)
    }
}

impl<'de> Deserialize<'de> for FlexScalar {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&v))
    }
}

// ─── Event payloads ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartEvent {
    #[serde(default)]
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub project: String,
    /// Raw source tag; start-of-session values (`startup`/`resume`/…)
    /// normalize to `claude_code` at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_source: Option<String>,
    #[serde(default)]
    pub terminal: TerminalIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocompact: Option<AutocompactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo_root: Option<String>,
    /// Fields unknown to this schema version, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(default)]
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_metrics: Option<ContextMetrics>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdateEvent {
    #[serde(default)]
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default)]
    pub used_percentage: FlexScalar,
    #[serde(default)]
    pub remaining_percentage: FlexScalar,
    #[serde(default)]
    pub context_window_size: FlexScalar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<FlexScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<FlexScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_estimate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocompact: Option<AutocompactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repo_root: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextUpdateEvent {
    /// Project name for this event: prefer `project_dir`, else the last
    /// component of `cwd`.
    pub fn project(&self) -> Option<String> {
        self.project_dir
            .as_deref()
            .or(self.cwd.as_deref())
            .map(project_from_cwd)
    }

    /// Build context metrics from the event.
    ///
    /// `is_estimate` is true unless the emitter explicitly claimed ground
    /// truth, and any coerced numeric field forces it back to true.
    pub fn metrics(&self) -> ContextMetrics {
        let coerced = self.used_percentage.coerced
            || self.remaining_percentage.coerced
            || self.context_window_size.coerced
            || self.total_input_tokens.is_some_and(|t| t.coerced)
            || self.total_output_tokens.is_some_and(|t| t.coerced);
        ContextMetrics {
            used_percentage: self.used_percentage.value,
            remaining_percentage: self.remaining_percentage.value,
            window_size: self.context_window_size.as_u64(),
            total_input_tokens: self.total_input_tokens.unwrap_or_default().as_u64(),
            total_output_tokens: self.total_output_tokens.unwrap_or_default().as_u64(),
            is_estimate: self.is_estimate.unwrap_or(true) || coerced,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleEvent {
    #[serde(default)]
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndEvent {
    #[serde(default)]
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
}

// ─── Event union ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngressEvent {
    SessionStart(SessionStartEvent),
    Activity(ActivityEvent),
    ContextUpdate(ContextUpdateEvent),
    Idle(IdleEvent),
    SessionEnd(SessionEndEvent),
}

impl IngressEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStart(e) => &e.session_id,
            Self::Activity(e) => &e.session_id,
            Self::ContextUpdate(e) => &e.session_id,
            Self::Idle(e) => &e.session_id,
            Self::SessionEnd(e) => &e.session_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::SessionStart(e) => e.timestamp,
            Self::Activity(e) => e.timestamp,
            Self::ContextUpdate(e) => e.timestamp,
            Self::Idle(e) => e.timestamp,
            Self::SessionEnd(e) => e.timestamp,
        }
    }
}

const KNOWN_EVENTS: [&str; 5] = [
    "session_start",
    "activity",
    "context_update",
    "idle",
    "session_end",
];

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("missing `event` discriminator")]
    MissingEvent,
    #[error("event {event:?} is missing `session_id`")]
    MissingSessionId { event: String },
    #[error("unknown event type {event:?}")]
    UnknownEvent { event: String },
    #[error("malformed {event} event: {message}")]
    Malformed { event: String, message: String },
}

/// Decode a single ingress line.
///
/// Distinguishes the dispositions of §7: garbage JSON, a missing
/// `session_id`, and an unknown `event` tag each get their own error so the
/// pipeline can log them differently. All of them drop the event only.
pub fn decode_event(line: &str) -> Result<IngressEvent, EventDecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| EventDecodeError::InvalidJson(e.to_string()))?;
    let obj = value.as_object().ok_or(EventDecodeError::NotAnObject)?;
    let event = obj
        .get("event")
        .and_then(Value::as_str)
        .ok_or(EventDecodeError::MissingEvent)?
        .to_string();
    let has_session_id = obj
        .get("session_id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if !has_session_id {
        return Err(EventDecodeError::MissingSessionId { event });
    }
    if !KNOWN_EVENTS.contains(&event.as_str()) {
        return Err(EventDecodeError::UnknownEvent { event });
    }
    serde_json::from_value(value).map_err(|e| EventDecodeError::Malformed {
        event,
        message: e.to_string(),
    })
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_session_start() {
        let line = r#"{"event":"session_start","timestamp":1000,"session_id":"A",
            "cwd":"/u/x/proj","project":"proj","source":"startup",
            "terminal":{"tty":"/dev/ttys1","terminal_pid":42},
            "terminal_key":"TTY:/dev/ttys1","git_branch":"main"}"#;
        let ev = decode_event(line).expect("decode");
        match ev {
            IngressEvent::SessionStart(e) => {
                assert_eq!(e.session_id, "A");
                assert_eq!(e.timestamp, 1000);
                assert_eq!(e.terminal_key.as_deref(), Some("TTY:/dev/ttys1"));
                assert_eq!(e.terminal.terminal_pid, Some(42));
                assert_eq!(e.source.as_deref(), Some("startup"));
                assert_eq!(e.git_branch.as_deref(), Some("main"));
            }
            other => panic!("expected session_start, got {other:?}"),
        }
    }

    #[test]
    fn decode_errors_are_distinct() {
        assert!(matches!(
            decode_event("not json"),
            Err(EventDecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_event(r#"{"session_id":"A"}"#),
            Err(EventDecodeError::MissingEvent)
        ));
        assert!(matches!(
            decode_event(r#"{"event":"activity","timestamp":1}"#),
            Err(EventDecodeError::MissingSessionId { .. })
        ));
        assert!(matches!(
            decode_event(r#"{"event":"teleport","session_id":"A"}"#),
            Err(EventDecodeError::UnknownEvent { .. })
        ));
        assert!(matches!(
            decode_event(r#"[1,2,3]"#),
            Err(EventDecodeError::NotAnObject)
        ));
    }

    #[test]
    fn unknown_fields_round_trip() {
        let line = r#"{"event":"session_start","timestamp":1,"session_id":"A","cwd":"/p","project":"p","future_field":{"x":1}}"#;
        let ev = decode_event(line).expect("decode");
        let json = serde_json::to_string(&ev).expect("serialize");
        assert!(json.contains("future_field"), "extra field preserved: {json}");
        let back = decode_event(&json).expect("re-decode");
        assert_eq!(ev, back);
    }

    #[test]
    fn flex_scalar_accepts_number_and_string() {
        let line = r#"{"event":"context_update","timestamp":1,"session_id":"C",
            "used_percentage":"42.5","remaining_percentage":57.5,
            "context_window_size":200000}"#;
        let ev = decode_event(line).expect("decode");
        let IngressEvent::ContextUpdate(e) = ev else {
            panic!("expected context_update");
        };
        assert_eq!(e.used_percentage.value, 42.5);
        assert!(!e.used_percentage.coerced);
        assert_eq!(e.context_window_size.as_u64(), 200_000);
    }

    #[test]
    fn unparseable_numeric_forces_estimate() {
        let line = r#"{"event":"context_update","timestamp":1,"session_id":"C",
            "used_percentage":"lots","remaining_percentage":58,
            "context_window_size":200000,"is_estimate":false}"#;
        let ev = decode_event(line).expect("decode");
        let IngressEvent::ContextUpdate(e) = ev else {
            panic!("expected context_update");
        };
        let m = e.metrics();
        assert_eq!(m.used_percentage, 0.0, "unparseable becomes zero");
        assert!(m.is_estimate, "coercion overrides the emitter's claim");
    }

    #[test]
    fn ground_truth_estimate_flag_survives_clean_decode() {
        let line = r#"{"event":"context_update","timestamp":1,"session_id":"C",
            "used_percentage":42,"remaining_percentage":58,
            "context_window_size":200000,"is_estimate":false}"#;
        let IngressEvent::ContextUpdate(e) = decode_event(line).unwrap() else {
            panic!("expected context_update");
        };
        assert!(!e.metrics().is_estimate);
    }

    #[test]
    fn context_update_project_prefers_project_dir() {
        let e = ContextUpdateEvent {
            session_id: "C".into(),
            cwd: Some("/u/elsewhere".into()),
            project_dir: Some("/u/x/proj".into()),
            ..Default::default()
        };
        assert_eq!(e.project().as_deref(), Some("proj"));

        let e = ContextUpdateEvent {
            session_id: "C".into(),
            cwd: Some("/u/x/other".into()),
            ..Default::default()
        };
        assert_eq!(e.project().as_deref(), Some("other"));
    }

    #[test]
    fn serialize_then_decode_round_trips() {
        let ev = IngressEvent::Activity(ActivityEvent {
            timestamp: 1100,
            session_id: "A".into(),
            session_title: None,
            tool_name: "Read".into(),
            terminal_pid: Some(7),
            context_metrics: None,
        });
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"activity\""));
        let back = decode_event(&json).unwrap();
        assert_eq!(ev, back);
    }
}
