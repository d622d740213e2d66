//! StreamDemultiplexer: splits one worker reply stream into per-request
//! groups.
//!
//! A worker sends the replies of many logical requests back to back on one
//! stream. Nothing marks a boundary except each message's tag and its
//! completion flags, so the split is driven by [`GroupTracker`], a pure
//! per-message decision, and [`separate`] runs it against a live stream:
//!
//! ```text
//!   replies ──► tracker ──► group 1: first, [first, m2, m3]
//!                      └──► group 2: first, [first]
//! ```
//!
//! A group is handed out as soon as its first message arrives. Its
//! messages keep flowing into the group's queue while the caller works.
//! Interleaved groups are not supported: a message whose tag differs from
//! the open group fails both that group and the outer sequence.

use futures::{Stream, StreamExt};
use gridagent_core::process::{CreateLargeTask, Output, OutputInit, ResultPart};
use gridagent_core::{ProcessReply, ProcessReplyKind, ReplyTag};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chunk_queue::{self, QueueError, QueueReader, QueueWriter};
use crate::error::ProtocolError;

// ── Boundary tracking ─────────────────────────────────────────────────────────

/// What one message does to the open group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// The message opens a new group.
    pub starts: bool,
    /// The message is the last of its group.
    pub completes: bool,
}

#[derive(Debug, Default)]
pub struct GroupTracker {
    open: Option<ReplyTag>,
    /// A large-task creation announced its final task.
    last_task_armed: bool,
}

impl GroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag of the group currently open, if any.
    pub fn open_group(&self) -> Option<ReplyTag> {
        self.open
    }

    pub fn observe(&mut self, reply: &ProcessReply) -> Result<Step, ProtocolError> {
        let kind = reply
            .kind
            .as_ref()
            .ok_or_else(|| ProtocolError::UnknownCase("None".into()))?;
        let tag = reply
            .tag()
            .ok_or_else(|| ProtocolError::UnknownCase("None".into()))?;

        let starts = match self.open {
            None => true,
            Some(open) if open == tag => false,
            Some(open) => return Err(ProtocolError::Interleaved { open, got: tag }),
        };
        if starts {
            self.last_task_armed = false;
        }

        let completes = tag.is_single_message() || self.completes(kind)?;
        self.open = if completes { None } else { Some(tag) };
        if completes {
            self.last_task_armed = false;
        }

        Ok(Step { starts, completes })
    }

    fn completes(&mut self, kind: &ProcessReplyKind) -> Result<bool, ProtocolError> {
        let unknown = |case: &str| -> Result<bool, ProtocolError> {
            Err(ProtocolError::UnknownCase(case.to_string()))
        };

        match kind {
            ProcessReplyKind::Output(output) => match output {
                None => unknown("Output.None"),
                Some(Output::Init(None)) => unknown("Output.Init.None"),
                Some(Output::Init(Some(OutputInit::Error(_)))) => Ok(true),
                Some(Output::Init(Some(OutputInit::OutputChunk(chunk)))) => Ok(chunk.data_complete),
                Some(Output::Data(chunk)) => Ok(chunk.data_complete),
            },
            ProcessReplyKind::Result(result) => match result {
                None => unknown("Result.None"),
                Some(ResultPart::Init { result_chunk, .. }) => Ok(result_chunk.data_complete),
                Some(ResultPart::Data(chunk)) => Ok(chunk.data_complete),
            },
            ProcessReplyKind::CreateLargeTask(create) => match create {
                None => unknown("CreateLargeTask.None"),
                Some(CreateLargeTask::InitRequest { .. }) => Ok(false),
                Some(CreateLargeTask::InitTask(task)) => {
                    if task.last_task && task.payload_complete {
                        Ok(true)
                    } else {
                        self.last_task_armed |= task.last_task;
                        Ok(false)
                    }
                }
                Some(CreateLargeTask::TaskPayload(payload)) => {
                    Ok(payload.payload_complete && self.last_task_armed)
                }
            },
            // Single-message kinds never reach here.
            _ => Ok(true),
        }
    }
}

// ── Live demultiplexing ───────────────────────────────────────────────────────

/// One logical request. `messages` starts with `first` and ends when the
/// group completes.
pub struct ReplyGroup {
    pub first: ProcessReply,
    pub messages: QueueReader<ProcessReply>,
}

/// Groups produced by [`separate`], in stream order. Dropping it stops the
/// background reader.
pub struct ReplyGroups {
    groups: QueueReader<ReplyGroup>,
    producer: JoinHandle<()>,
}

impl ReplyGroups {
    /// Next group, `None` once the input ended cleanly, or the error that
    /// stopped the split.
    pub async fn next_group(&mut self) -> Option<Result<ReplyGroup, QueueError>> {
        self.groups.recv().await
    }
}

impl Drop for ReplyGroups {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// Split `replies` into groups. Reading happens on a spawned task so each
/// group's queue keeps filling while the caller handles earlier ones.
pub fn separate<S>(replies: S, cancel: CancellationToken) -> ReplyGroups
where
    S: Stream<Item = anyhow::Result<ProcessReply>> + Send + 'static,
{
    let (groups_tx, groups_rx) = chunk_queue::bounded(1, cancel.clone());
    let producer = tokio::spawn(demultiplex(replies, groups_tx, cancel));
    ReplyGroups {
        groups: groups_rx,
        producer,
    }
}

async fn demultiplex<S>(replies: S, mut groups: QueueWriter<ReplyGroup>, cancel: CancellationToken)
where
    S: Stream<Item = anyhow::Result<ProcessReply>> + Send + 'static,
{
    let mut replies = std::pin::pin!(replies);
    let mut tracker = GroupTracker::new();
    let mut open: Option<QueueWriter<ProcessReply>> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = replies.next() => next,
        };

        let reply = match next {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                let error = QueueError::Failed(format!("reply stream failed: {e:#}"));
                fail_both(open, groups, error).await;
                return;
            }
            None => break,
        };

        let step = match tracker.observe(&reply) {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(request_id = %reply.request_id, error = %e, "reply stream rejected");
                fail_both(open, groups, e.into()).await;
                return;
            }
        };

        if step.starts {
            let (tx, rx) = chunk_queue::unbounded(cancel.clone());
            tracing::debug!(
                request_id = %reply.request_id,
                tag = ?reply.tag(),
                "reply group opened"
            );
            let group = ReplyGroup {
                first: reply.clone(),
                messages: rx,
            };
            if groups.push(group).await.is_err() {
                // Nobody reads the groups anymore.
                return;
            }
            open = Some(tx);
        }

        if let Some(writer) = open.as_mut() {
            // The caller may have dropped this group's queue; keep tracking
            // boundaries regardless.
            let _ = writer.push(reply).await;
        }

        if step.completes {
            if let Some(writer) = open.take() {
                let _ = writer.close().await;
            }
        }
    }

    match tracker.open_group() {
        Some(tag) => {
            let error = ProtocolError::UnexpectedEnd(tag.name().to_string());
            tracing::warn!(error = %error, "reply stream ended mid-group");
            fail_both(open, groups, error.into()).await;
        }
        None => {
            let _ = groups.close().await;
        }
    }
}

async fn fail_both(
    open: Option<QueueWriter<ProcessReply>>,
    groups: QueueWriter<ReplyGroup>,
    error: QueueError,
) {
    if let Some(writer) = open {
        let _ = writer.fail(error.clone()).await;
    }
    let _ = groups.fail(error).await;
}
