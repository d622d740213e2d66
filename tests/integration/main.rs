//! gridagent integration test harness.
//!
//! Tests drive a real [`Agent`] wired to the in-memory submitter and to
//! either resource store, through the same request streams a worker
//! connection would produce.
//!
//!   cargo test --test integration
//!
//! Every test builds its own agent; nothing is shared between tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, Stream};
use gridagent_core::config::AgentSettings;
use gridagent_core::CommunicationToken;
use gridagent_services::{Agent, MemoryResourceStore, MemorySubmitter, ResourceStore};

mod creation;
mod results;
mod streams;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TOKEN: &str = "integration-token";
pub const SESSION: &str = "session-1";
pub const PARENT: &str = "parent-task";

/// An agent plus handles on its collaborators.
pub struct Node {
    pub agent: Agent,
    pub submitter: MemorySubmitter,
    pub resources: MemoryResourceStore,
}

pub fn settings() -> AgentSettings {
    AgentSettings {
        session_id: SESSION.into(),
        task_id: PARENT.into(),
        partition_id: "default".into(),
        communication_token: TOKEN.into(),
    }
}

/// Agent backed by memory stores, with no payload limit.
pub fn node() -> Node {
    node_with(MemorySubmitter::new(0))
}

pub fn node_with(submitter: MemorySubmitter) -> Node {
    let resources = MemoryResourceStore::new();
    let agent = Agent::new(
        &settings(),
        CommunicationToken::new(TOKEN),
        Arc::new(submitter.clone()),
        Arc::new(resources.clone()),
    );
    Node {
        agent,
        submitter,
        resources,
    }
}

/// Agent reading resources from `store`.
pub fn node_with_resources(store: Arc<dyn ResourceStore>) -> (Agent, MemorySubmitter) {
    let submitter = MemorySubmitter::new(0);
    let agent = Agent::new(
        &settings(),
        CommunicationToken::new(TOKEN),
        Arc::new(submitter.clone()),
        store,
    );
    (agent, submitter)
}

/// A request stream that yields `messages` and then ends.
pub fn messages<T: Send>(messages: Vec<T>) -> impl Stream<Item = anyhow::Result<T>> + Send {
    stream::iter(messages.into_iter().map(Ok))
}

/// A request stream that yields `messages` and then fails, as a dropped
/// connection would.
pub fn broken<T: Send>(messages: Vec<T>) -> impl Stream<Item = anyhow::Result<T>> + Send {
    stream::iter(
        messages
            .into_iter()
            .map(Ok)
            .chain(std::iter::once(Err(anyhow::anyhow!("connection reset")))),
    )
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh directory under the system temp dir, removed on drop.
pub struct TempDir(pub PathBuf);

impl TempDir {
    pub fn new(tag: &str) -> Self {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "gridagent-it-{tag}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
