//! Prefix-tagged terminal keys.
//!
//! A terminal key is a single canonical string identifying the terminal
//! window/tab a session runs in, with an explicit prefix naming the
//! identifier type (`ITERM:…`, `TTY:…`, `PID:…`, …). The prefix decides
//! which platform activation strategy applies.

use crate::types::TerminalIdentity;
use std::fmt;

// ─── Kind ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalKeyKind {
    Iterm,
    Kitty,
    Wezterm,
    Term,
    Tty,
    Pid,
    Auto,
    Unknown,
    Discovered,
    /// No colon, or an unrecognized prefix.
    Malformed,
}

impl TerminalKeyKind {
    /// Classify a key by the prefix before its first colon.
    pub fn of(key: &str) -> Self {
        let Some((prefix, _)) = key.split_once(':') else {
            return Self::Malformed;
        };
        match prefix {
            "ITERM" => Self::Iterm,
            "KITTY" => Self::Kitty,
            "WEZTERM" => Self::Wezterm,
            "TERM" => Self::Term,
            "TTY" => Self::Tty,
            "PID" => Self::Pid,
            "AUTO" => Self::Auto,
            "UNKNOWN" => Self::Unknown,
            "DISCOVERED" => Self::Discovered,
            _ => Self::Malformed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iterm => "ITERM",
            Self::Kitty => "KITTY",
            Self::Wezterm => "WEZTERM",
            Self::Term => "TERM",
            Self::Tty => "TTY",
            Self::Pid => "PID",
            Self::Auto => "AUTO",
            Self::Unknown => "UNKNOWN",
            Self::Discovered => "DISCOVERED",
            Self::Malformed => "MALFORMED",
        }
    }
}

impl fmt::Display for TerminalKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Derivation ───────────────────────────────────────────────────

/// A key is *partial* while it still carries a provisional prefix: the
/// session was auto-registered or discovered by the scanner and has not yet
/// received a concrete hook event.
pub fn is_partial(key: &str) -> bool {
    matches!(
        TerminalKeyKind::of(key),
        TerminalKeyKind::Auto | TerminalKeyKind::Discovered
    )
}

/// Derive the canonical key from a terminal identity bag.
///
/// Priority: iTerm session id, kitty window id, wezterm pane, generic
/// terminal session id, tty path, terminal pid. Emulator-specific ids win
/// because they survive tty reuse.
pub fn derive_terminal_key(t: &TerminalIdentity) -> String {
    if let Some(id) = &t.iterm_session_id {
        return format!("ITERM:{id}");
    }
    if let Some(id) = &t.kitty_window_id {
        return format!("KITTY:{id}");
    }
    if let Some(pane) = &t.wezterm_pane {
        return format!("WEZTERM:{pane}");
    }
    if let Some(id) = &t.term_session_id {
        return format!("TERM:{id}");
    }
    if let Some(tty) = &t.tty {
        return format!("TTY:{tty}");
    }
    if let Some(pid) = t.terminal_pid {
        return format!("PID:{pid}");
    }
    "UNKNOWN:".to_string()
}

/// Provisional key for a session auto-registered from a context event.
pub fn auto_key(session_id: &str) -> String {
    format!("AUTO:{session_id}")
}

/// Wrap an inner identifier recovered by the startup scanner.
pub fn discovered_key(inner: &str) -> String {
    format!("DISCOVERED:{inner}")
}

/// The body of a key after its prefix; empty for malformed keys.
pub fn key_body(key: &str) -> &str {
    key.split_once(':').map(|(_, body)| body).unwrap_or("")
}

// ─── Matching ─────────────────────────────────────────────────────

/// Whether two keys refer to the same terminal.
///
/// Exact match, plus the iTerm rule: iTerm keys also match on the UUID
/// suffix after the last colon, so an emitter-side `w0t0p0:UUID` matches a
/// registry-side `ITERM:UUID` and `ITERM:w0t0p0:UUID` matches `ITERM:UUID`.
pub fn keys_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a_iterm = TerminalKeyKind::of(a) == TerminalKeyKind::Iterm;
    let b_iterm = TerminalKeyKind::of(b) == TerminalKeyKind::Iterm;
    if a_iterm || b_iterm {
        let sa = uuid_suffix(a);
        let sb = uuid_suffix(b);
        return !sa.is_empty() && sa == sb;
    }
    false
}

fn uuid_suffix(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or("")
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        let cases = [
            ("ITERM:w0t0p0:ABCD", TerminalKeyKind::Iterm),
            ("KITTY:7", TerminalKeyKind::Kitty),
            ("WEZTERM:3", TerminalKeyKind::Wezterm),
            ("TERM:abc", TerminalKeyKind::Term),
            ("TTY:/dev/ttys001", TerminalKeyKind::Tty),
            ("PID:1234", TerminalKeyKind::Pid),
            ("AUTO:sess-1", TerminalKeyKind::Auto),
            ("UNKNOWN:", TerminalKeyKind::Unknown),
            ("DISCOVERED:PID:1234", TerminalKeyKind::Discovered),
            ("nocolon", TerminalKeyKind::Malformed),
            ("FOO:bar", TerminalKeyKind::Malformed),
            ("", TerminalKeyKind::Malformed),
        ];
        for (key, expected) in cases {
            assert_eq!(TerminalKeyKind::of(key), expected, "key = {key:?}");
        }
    }

    #[test]
    fn partial_keys() {
        assert!(is_partial("AUTO:sess"));
        assert!(is_partial("DISCOVERED:TTY:/dev/ttys3:1"));
        assert!(!is_partial("ITERM:uuid"));
        assert!(!is_partial("garbage"));
    }

    #[test]
    fn derivation_priority() {
        let mut t = TerminalIdentity {
            tty: Some("/dev/ttys001".into()),
            terminal_pid: Some(99),
            iterm_session_id: Some("w0t0p0:AAAA".into()),
            kitty_window_id: Some("7".into()),
            ..Default::default()
        };
        assert_eq!(derive_terminal_key(&t), "ITERM:w0t0p0:AAAA");

        t.iterm_session_id = None;
        assert_eq!(derive_terminal_key(&t), "KITTY:7");

        t.kitty_window_id = None;
        assert_eq!(derive_terminal_key(&t), "TTY:/dev/ttys001");

        t.tty = None;
        assert_eq!(derive_terminal_key(&t), "PID:99");

        t.terminal_pid = None;
        assert_eq!(derive_terminal_key(&t), "UNKNOWN:");
    }

    #[test]
    fn iterm_suffix_matching() {
        assert!(keys_match("ITERM:w0t0p0:U", "ITERM:U"));
        assert!(keys_match("ITERM:U", "ITERM:w0t0p0:U"));
        assert!(keys_match("ITERM:U", "w0t0p0:U"));
        assert!(!keys_match("ITERM:U", "ITERM:V"));
        assert!(!keys_match("TTY:/dev/a", "TTY:/dev/b"));
        assert!(keys_match("TTY:/dev/a", "TTY:/dev/a"));
    }

    #[test]
    fn key_body_extraction() {
        assert_eq!(key_body("DISCOVERED:TTY:/dev/ttys3:54321"), "TTY:/dev/ttys3:54321");
        assert_eq!(key_body("PID:42"), "42");
        assert_eq!(key_body("nocolon"), "");
    }
}
