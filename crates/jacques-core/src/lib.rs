//! Core data model for the jacques session-observability daemon.
//!
//! Pure types and state machines only: the session record, terminal keys,
//! the ingress event schema, the websocket message vocabulary, and the
//! session registry. No IO and no async — the daemon crate owns those.

pub mod events;
pub mod messages;
pub mod registry;
pub mod terminal_key;
pub mod types;

pub use registry::SessionRegistry;
pub use types::{Session, SessionSource, SessionStatus};
