//! Agent-facing messages: what a worker sends to the agent and what it
//! gets back.
//!
//! Streaming calls (task creation, result submission) carry the
//! communication token on every message. Unary calls carry it once.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::wire::{DataChunk, TaskOptions, TaskRequestHeader};

/// In-band error strings. Workers match on these, keep them stable.
pub mod reply_errors {
    pub const MISSING_TOKEN: &str = "Missing communication token";
    pub const WRONG_TOKEN: &str = "Wrong communication token";
    pub const KEY_NOT_FOUND: &str = "Key not found";
    pub const COMMON_DATA_UNSUPPORTED: &str = "Common data are not supported yet";
    pub const DIRECT_DATA_UNSUPPORTED: &str = "Direct data are not supported yet";
    pub const RESULT_FAILED: &str = "Error while receiving results";
}

// ── CreateTask ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub communication_token: String,
    pub kind: Option<CreateTaskKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreateTaskKind {
    /// Opens the stream. Carries options for every task that follows.
    InitRequest { task_options: Option<TaskOptions> },
    InitTask(Option<InitTask>),
    TaskPayload(Option<DataChunk>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InitTask {
    Header(TaskRequestHeader),
    LastTask,
}

impl CreateTaskRequest {
    pub fn init(token: impl Into<String>, task_options: Option<TaskOptions>) -> Self {
        Self::with_kind(token, CreateTaskKind::InitRequest { task_options })
    }

    pub fn header(token: impl Into<String>, header: TaskRequestHeader) -> Self {
        Self::with_kind(token, CreateTaskKind::InitTask(Some(InitTask::Header(header))))
    }

    pub fn last_task(token: impl Into<String>) -> Self {
        Self::with_kind(token, CreateTaskKind::InitTask(Some(InitTask::LastTask)))
    }

    pub fn data(token: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::with_kind(
            token,
            CreateTaskKind::TaskPayload(Some(DataChunk::Data(data.into()))),
        )
    }

    pub fn data_complete(token: impl Into<String>) -> Self {
        Self::with_kind(token, CreateTaskKind::TaskPayload(Some(DataChunk::DataComplete)))
    }

    fn with_kind(token: impl Into<String>, kind: CreateTaskKind) -> Self {
        Self {
            communication_token: token.into(),
            kind: Some(kind),
        }
    }

    /// Name of the innermost case, for logs and protocol errors.
    pub fn case_name(&self) -> &'static str {
        match &self.kind {
            None => "None",
            Some(CreateTaskKind::InitRequest { .. }) => "InitRequest",
            Some(CreateTaskKind::InitTask(None)) => "InitTask.None",
            Some(CreateTaskKind::InitTask(Some(InitTask::Header(_)))) => "Header",
            Some(CreateTaskKind::InitTask(Some(InitTask::LastTask))) => "LastTask",
            Some(CreateTaskKind::TaskPayload(None)) => "TaskPayload.None",
            Some(CreateTaskKind::TaskPayload(Some(chunk))) => chunk.case_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskReply {
    pub communication_token: String,
    pub kind: CreateTaskReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreateTaskReplyKind {
    Successful,
    /// Submission failed. Lists the ids of the tasks that were not created.
    NonSuccessfulIds(Vec<String>),
    Error(String),
}

impl CreateTaskReply {
    pub fn successful() -> Self {
        Self {
            communication_token: String::new(),
            kind: CreateTaskReplyKind::Successful,
        }
    }

    pub fn non_successful(ids: Vec<String>) -> Self {
        Self {
            communication_token: String::new(),
            kind: CreateTaskReplyKind::NonSuccessfulIds(ids),
        }
    }

    pub fn error(token: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            communication_token: token.into(),
            kind: CreateTaskReplyKind::Error(error.into()),
        }
    }
}

// ── SendResult ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRequest {
    pub communication_token: String,
    pub kind: Option<ResultKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResultKind {
    Init(Option<InitKeyedDataStream>),
    Data(Option<DataChunk>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InitKeyedDataStream {
    Key(String),
    LastResult,
}

impl ResultRequest {
    pub fn key(token: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_kind(
            token,
            ResultKind::Init(Some(InitKeyedDataStream::Key(key.into()))),
        )
    }

    pub fn last_result(token: impl Into<String>) -> Self {
        Self::with_kind(token, ResultKind::Init(Some(InitKeyedDataStream::LastResult)))
    }

    pub fn data(token: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::with_kind(token, ResultKind::Data(Some(DataChunk::Data(data.into()))))
    }

    pub fn data_complete(token: impl Into<String>) -> Self {
        Self::with_kind(token, ResultKind::Data(Some(DataChunk::DataComplete)))
    }

    fn with_kind(token: impl Into<String>, kind: ResultKind) -> Self {
        Self {
            communication_token: token.into(),
            kind: Some(kind),
        }
    }

    pub fn case_name(&self) -> &'static str {
        match &self.kind {
            None => "None",
            Some(ResultKind::Init(None)) => "Init.None",
            Some(ResultKind::Init(Some(InitKeyedDataStream::Key(_)))) => "InitKey",
            Some(ResultKind::Init(Some(InitKeyedDataStream::LastResult))) => "LastResult",
            Some(ResultKind::Data(None)) => "Data.None",
            Some(ResultKind::Data(Some(chunk))) => chunk.case_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReply {
    pub communication_token: String,
    pub kind: ResultReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResultReplyKind {
    Ok,
    Error(String),
}

impl ResultReply {
    pub fn ok() -> Self {
        Self {
            communication_token: String::new(),
            kind: ResultReplyKind::Ok,
        }
    }

    pub fn error(token: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            communication_token: token.into(),
            kind: ResultReplyKind::Error(error.into()),
        }
    }
}

// ── Data fetch ────────────────────────────────────────────────────────────────

/// Unary request for keyed data (resources, common data, direct data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub communication_token: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReply {
    pub communication_token: String,
    pub kind: DataReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DataReplyKind {
    /// First reply of a keyed stream.
    Init(DataInit),
    /// Continuation, and finally the bare completion marker.
    Data(DataChunk),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInit {
    pub key: String,
    pub payload: DataInitPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DataInitPayload {
    Data(DataChunk),
    Error(String),
}

impl DataReply {
    pub fn error(token: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            communication_token: token.into(),
            kind: DataReplyKind::Error(error.into()),
        }
    }

    pub fn init_data(key: impl Into<String>, data: Bytes) -> Self {
        Self::bare(DataReplyKind::Init(DataInit {
            key: key.into(),
            payload: DataInitPayload::Data(DataChunk::Data(data)),
        }))
    }

    pub fn init_error(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self::bare(DataReplyKind::Init(DataInit {
            key: key.into(),
            payload: DataInitPayload::Error(error.into()),
        }))
    }

    pub fn data(data: Bytes) -> Self {
        Self::bare(DataReplyKind::Data(DataChunk::Data(data)))
    }

    pub fn complete() -> Self {
        Self::bare(DataReplyKind::Data(DataChunk::DataComplete))
    }

    fn bare(kind: DataReplyKind) -> Self {
        Self {
            communication_token: String::new(),
            kind,
        }
    }
}

// ── FinalizeTaskCreation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub communication_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReply {
    pub communication_token: String,
    pub kind: FinalizeReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FinalizeReplyKind {
    /// Number of created tasks handed over for scheduling.
    Finalized(usize),
    Error(String),
}
