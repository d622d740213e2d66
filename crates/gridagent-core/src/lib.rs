//! gridagent-core — wire vocabulary, messages, token and configuration.
//! All other gridagent crates depend on this one.

pub mod config;
pub mod message;
pub mod process;
pub mod token;
pub mod wire;

pub use message::{CreateTaskReply, CreateTaskRequest, DataReply, DataRequest, ResultReply, ResultRequest};
pub use process::{ProcessReply, ProcessReplyKind, WorkerDataReply};
pub use token::{CommunicationToken, TokenError};
pub use wire::{ChunkFrame, DataChunk, ReplyTag, TaskOptions, TaskRequestHeader};
