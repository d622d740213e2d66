//! Task submission collaborator, and an in-memory implementation of it.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use gridagent_core::{TaskOptions, TaskRequestHeader};
use serde::{Deserialize, Serialize};

use crate::chunk_queue::QueueReader;

/// One task announced on a creation stream. Its payload is still arriving
/// when the submitter receives it.
pub struct TaskRequest {
    pub header: TaskRequestHeader,
    pub payload: QueueReader<Bytes>,
}

/// Descriptor of a task the submitter accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub task_id: String,
    pub expected_output_keys: Vec<String>,
    pub data_dependencies: Vec<String>,
}

/// Where created tasks and results go.
///
/// Implementations read the queues they are handed to the end; an `Err`
/// is reported to the worker in-band by the agent.
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn create_tasks(
        &self,
        session_id: &str,
        parent_task_id: &str,
        options: Option<TaskOptions>,
        requests: QueueReader<TaskRequest>,
    ) -> Result<Vec<CreatedTask>>;

    async fn set_result(
        &self,
        session_id: &str,
        task_id: &str,
        key: &str,
        payload: QueueReader<Bytes>,
    ) -> Result<()>;

    /// Hand created tasks over for scheduling. Returns how many were
    /// released.
    async fn finalize_task_creation(
        &self,
        session_id: &str,
        parent_task_id: &str,
        created: &[CreatedTask],
    ) -> Result<usize>;
}

// ── In-memory submitter ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoredTask {
    pub session_id: String,
    pub parent_task_id: String,
    pub options: Option<TaskOptions>,
    pub header: TaskRequestHeader,
    pub payload: Bytes,
    pub finalized: bool,
}

#[derive(Debug, Clone)]
pub struct StoredResult {
    pub session_id: String,
    pub task_id: String,
    pub payload: Bytes,
}

/// Keeps created tasks and results in memory.
#[derive(Clone, Default)]
pub struct MemorySubmitter {
    /// task_id → StoredTask
    tasks: Arc<DashMap<String, StoredTask>>,
    /// result key → StoredResult
    results: Arc<DashMap<String, StoredResult>>,
    /// 0 = unlimited
    max_payload_bytes: u64,
}

impl MemorySubmitter {
    pub fn new(max_payload_bytes: u64) -> Self {
        Self {
            max_payload_bytes,
            ..Self::default()
        }
    }

    pub fn task(&self, task_id: &str) -> Option<StoredTask> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn result(&self, key: &str) -> Option<Bytes> {
        self.results.get(key).map(|r| r.payload.clone())
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Read one payload to the end, refusing it once it grows past the limit.
    async fn drain(&self, what: &str, mut payload: QueueReader<Bytes>) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = payload.recv().await {
            let chunk = chunk.with_context(|| format!("payload of {what} did not complete"))?;
            buf.extend_from_slice(&chunk);
            if self.max_payload_bytes > 0 && buf.len() as u64 > self.max_payload_bytes {
                bail!(
                    "payload of {what} exceeds {} bytes",
                    self.max_payload_bytes
                );
            }
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl TaskSubmitter for MemorySubmitter {
    async fn create_tasks(
        &self,
        session_id: &str,
        parent_task_id: &str,
        options: Option<TaskOptions>,
        mut requests: QueueReader<TaskRequest>,
    ) -> Result<Vec<CreatedTask>> {
        // Nothing is committed until the whole batch was read cleanly.
        let mut staged: Vec<StoredTask> = Vec::new();

        while let Some(request) = requests.recv().await {
            let TaskRequest { header, payload } =
                request.context("task request stream did not complete")?;

            if self.tasks.contains_key(&header.id) || staged.iter().any(|t| t.header.id == header.id)
            {
                bail!("task {} already exists", header.id);
            }

            let payload = self.drain(&format!("task {}", header.id), payload).await?;
            tracing::debug!(task_id = %header.id, bytes = payload.len(), "task staged");

            staged.push(StoredTask {
                session_id: session_id.to_string(),
                parent_task_id: parent_task_id.to_string(),
                options: options.clone(),
                header,
                payload,
                finalized: false,
            });
        }

        let created: Vec<CreatedTask> = staged
            .iter()
            .map(|t| CreatedTask {
                task_id: t.header.id.clone(),
                expected_output_keys: t.header.expected_output_keys.clone(),
                data_dependencies: t.header.data_dependencies.clone(),
            })
            .collect();

        for task in staged {
            self.tasks.insert(task.header.id.clone(), task);
        }

        tracing::info!(
            session_id,
            parent_task_id,
            count = created.len(),
            "tasks created"
        );
        Ok(created)
    }

    async fn set_result(
        &self,
        session_id: &str,
        task_id: &str,
        key: &str,
        payload: QueueReader<Bytes>,
    ) -> Result<()> {
        let payload = self.drain(&format!("result {key}"), payload).await?;
        tracing::info!(session_id, task_id, key, bytes = payload.len(), "result stored");

        self.results.insert(
            key.to_string(),
            StoredResult {
                session_id: session_id.to_string(),
                task_id: task_id.to_string(),
                payload,
            },
        );
        Ok(())
    }

    async fn finalize_task_creation(
        &self,
        session_id: &str,
        parent_task_id: &str,
        created: &[CreatedTask],
    ) -> Result<usize> {
        if let Some(missing) = created.iter().find(|c| !self.tasks.contains_key(&c.task_id)) {
            bail!("unknown task {}", missing.task_id);
        }

        for c in created {
            if let Some(mut task) = self.tasks.get_mut(&c.task_id) {
                task.finalized = true;
            }
        }

        tracing::info!(session_id, parent_task_id, count = created.len(), "tasks finalized");
        Ok(created.len())
    }
}
