//! Shared wire primitives: the pieces every request and reply is built from.
//!
//! The tag names here are the protocol vocabulary. Peers on the other side
//! of the channel match on them, so renaming a case is a breaking change.
//!
//! Every `oneof`-style union is modelled as a Rust enum carried in an
//! `Option`: `None` is the unset case and must be rejected by whoever reads
//! the message.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Payload chunks ────────────────────────────────────────────────────────────

/// One fragment of a payload on the agent side of the protocol.
///
/// Exactly one `DataComplete` closes a payload. Anything after it is a
/// protocol violation, caught by the state machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DataChunk {
    Data(Bytes),
    DataComplete,
}

impl DataChunk {
    pub fn case_name(&self) -> &'static str {
        match self {
            Self::Data(_) => "Data",
            Self::DataComplete => "DataComplete",
        }
    }
}

/// One fragment of a payload on the worker side of the protocol.
///
/// Unlike [`DataChunk`], the completion marker rides on the last data
/// fragment instead of being a separate message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub data: Bytes,
    pub data_complete: bool,
}

impl ChunkFrame {
    pub fn new(data: impl Into<Bytes>, data_complete: bool) -> Self {
        Self {
            data: data.into(),
            data_complete,
        }
    }
}

// ── Task description ──────────────────────────────────────────────────────────

/// Scheduling options attached to a batch of created tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub max_duration_ms: u64,
    pub max_retries: u32,
    pub priority: u32,
    pub partition_id: String,
    pub options: HashMap<String, String>,
}

/// Header announcing one task in a creation stream. Its payload follows
/// as a run of data chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskRequestHeader {
    pub id: String,
    pub expected_output_keys: Vec<String>,
    pub data_dependencies: Vec<String>,
}

// ── Reply tags ────────────────────────────────────────────────────────────────

/// Top-level case of a worker reply. Used to recognise where one logical
/// request ends and the next begins on a shared reply stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyTag {
    Output,
    Result,
    CreateLargeTask,
    Resource,
    CommonData,
    DirectData,
    CreateSmallTask,
}

impl ReplyTag {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Output => "Output",
            Self::Result => "Result",
            Self::CreateLargeTask => "CreateLargeTask",
            Self::Resource => "Resource",
            Self::CommonData => "CommonData",
            Self::DirectData => "DirectData",
            Self::CreateSmallTask => "CreateSmallTask",
        }
    }

    /// Groups of these kinds are a single message long.
    pub fn is_single_message(&self) -> bool {
        matches!(
            self,
            Self::Resource | Self::CommonData | Self::DirectData | Self::CreateSmallTask
        )
    }
}

impl std::fmt::Display for ReplyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
