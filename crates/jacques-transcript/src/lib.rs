//! Decoder for the assistant's on-disk JSONL transcripts.
//!
//! One raw entry per line, append-only. Decoding is lossy-tolerant: a
//! malformed line is skipped with a warning, a partially-decodable line
//! keeps its recognized fields. Output order matches source order and
//! reparsing the same file yields the same sequence.

pub mod entry;
pub mod parser;
mod schema;
pub mod stats;

pub use entry::{EntryKind, ParsedEntry, TokenUsage, WebSearchPhase};
pub use parser::{ParsedTranscript, TranscriptError, parse_file, parse_str};
pub use stats::TranscriptStats;
