//! Worker-facing messages: the replies a worker streams back while it
//! processes a task, and the keyed data replies it receives.
//!
//! A single reply stream carries many logical requests back to back. Their
//! boundaries are only visible in the tags and completion flags below.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::wire::{ChunkFrame, ReplyTag, TaskOptions, TaskRequestHeader};

// ── ProcessReply ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReply {
    pub request_id: String,
    pub communication_token: String,
    pub kind: Option<ProcessReplyKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProcessReplyKind {
    Output(Option<Output>),
    Result(Option<ResultPart>),
    CreateLargeTask(Option<CreateLargeTask>),
    Resource(String),
    CommonData(String),
    DirectData(String),
    CreateSmallTask(SmallTaskBatch),
}

/// Task output: either an error or the output payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Output {
    Init(Option<OutputInit>),
    Data(ChunkFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputInit {
    Error(String),
    OutputChunk(ChunkFrame),
}

/// One piece of a keyed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResultPart {
    Init { key: String, result_chunk: ChunkFrame },
    Data(ChunkFrame),
}

/// Multi-phase creation of tasks whose payloads span several messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreateLargeTask {
    InitRequest { task_options: Option<TaskOptions> },
    InitTask(LargeInitTask),
    TaskPayload(TaskPayloadFrame),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LargeInitTask {
    pub header: TaskRequestHeader,
    pub payload: Bytes,
    /// The whole payload fit in this message.
    pub payload_complete: bool,
    /// No task header follows this one.
    pub last_task: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskPayloadFrame {
    pub data: Bytes,
    pub payload_complete: bool,
}

/// Tasks small enough to travel in one message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SmallTaskBatch {
    pub task_options: Option<TaskOptions>,
    pub tasks: Vec<SmallTask>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SmallTask {
    pub header: TaskRequestHeader,
    pub payload: Bytes,
}

impl ProcessReply {
    pub fn new(request_id: impl Into<String>, kind: ProcessReplyKind) -> Self {
        Self {
            request_id: request_id.into(),
            communication_token: String::new(),
            kind: Some(kind),
        }
    }

    /// Top-level case, `None` when the union is unset.
    pub fn tag(&self) -> Option<ReplyTag> {
        self.kind.as_ref().map(|kind| match kind {
            ProcessReplyKind::Output(_) => ReplyTag::Output,
            ProcessReplyKind::Result(_) => ReplyTag::Result,
            ProcessReplyKind::CreateLargeTask(_) => ReplyTag::CreateLargeTask,
            ProcessReplyKind::Resource(_) => ReplyTag::Resource,
            ProcessReplyKind::CommonData(_) => ReplyTag::CommonData,
            ProcessReplyKind::DirectData(_) => ReplyTag::DirectData,
            ProcessReplyKind::CreateSmallTask(_) => ReplyTag::CreateSmallTask,
        })
    }
}

// ── WorkerDataReply ───────────────────────────────────────────────────────────

/// Keyed data streamed to a worker in answer to one of its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDataReply {
    pub reply_id: String,
    pub kind: WorkerDataReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkerDataReplyKind {
    Init { key: String, chunk: ChunkFrame },
    Data(ChunkFrame),
}

impl WorkerDataReply {
    pub fn chunk(&self) -> &ChunkFrame {
        match &self.kind {
            WorkerDataReplyKind::Init { chunk, .. } => chunk,
            WorkerDataReplyKind::Data(chunk) => chunk,
        }
    }

    pub fn is_init(&self) -> bool {
        matches!(self.kind, WorkerDataReplyKind::Init { .. })
    }
}
