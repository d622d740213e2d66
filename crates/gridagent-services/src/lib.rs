//! gridagent-services — the chunked streaming protocol engine.
//!
//! Leaves first: [`chunk_queue`] moves payload between the stream reader
//! and a background consumer, [`state_machine`] validates message order,
//! [`encoder`] frames outbound chunks, [`agent`] runs the streaming calls
//! and [`demux`] splits a worker's reply stream into per-request groups.

pub mod agent;
pub mod chunk_queue;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod pending;
pub mod resource_store;
pub mod state_machine;
pub mod submitter;

pub use agent::Agent;
pub use chunk_queue::{QueueError, QueueReader, QueueWriter};
pub use demux::{separate, GroupTracker, ReplyGroup, ReplyGroups};
pub use encoder::encode_chunks;
pub use error::{AgentError, ProtocolError, StorageError};
pub use resource_store::{FsResourceStore, MemoryResourceStore, ResourceStore};
pub use submitter::{CreatedTask, MemorySubmitter, TaskRequest, TaskSubmitter};
