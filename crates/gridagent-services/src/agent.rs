//! Agent: serves one task's worker over the streaming protocol.
//!
//! Streaming calls (`create_task`, `send_result`) read one message at a
//! time, check its token, validate its tag against the call's state
//! machine, and move its payload into a queue that a background
//! submission drains concurrently. The reply is produced once that
//! submission finished.
//!
//! Reply shapes:
//!   - token refused: in-band error reply, the rest of the stream is left
//!     unread
//!   - submission failed: in-band failure reply
//!   - malformed tag order, transport failure, cancellation: `Err`
//!
//! Everything a call creates (queues, background task, cancellation token)
//! dies with the call.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use gridagent_core::config::AgentSettings;
use gridagent_core::message::{
    reply_errors, CreateTaskKind, FinalizeReply, FinalizeReplyKind, FinalizeRequest,
    InitKeyedDataStream, InitTask, ResultKind,
};
use gridagent_core::{
    CommunicationToken, CreateTaskReply, CreateTaskRequest, DataChunk, DataReply, DataRequest,
    ResultReply, ResultRequest, TaskOptions, TaskRequestHeader,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::chunk_queue::{self, QueueError, QueueWriter};
use crate::error::{AgentError, ProtocolError, StorageError};
use crate::pending::PendingOperation;
use crate::resource_store::{ByteStream, ResourceStore};
use crate::state_machine::{
    ResultIngestionEvent, ResultIngestionMachine, TaskCreationEvent, TaskCreationMachine,
};
use crate::submitter::{CreatedTask, TaskRequest, TaskSubmitter};

/// Task headers buffered ahead of the submitter.
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 10;

pub struct Agent {
    session_id: String,
    task_id: String,
    token: CommunicationToken,
    submitter: Arc<dyn TaskSubmitter>,
    resources: Arc<dyn ResourceStore>,
    task_queue_capacity: usize,
    /// Batches created by successful `create_task` calls, awaiting
    /// finalization.
    created: Mutex<Vec<CreatedTask>>,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(
        settings: &AgentSettings,
        token: CommunicationToken,
        submitter: Arc<dyn TaskSubmitter>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            session_id: settings.session_id.clone(),
            task_id: settings.task_id.clone(),
            token,
            submitter,
            resources,
            task_queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
            created: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_task_queue_capacity(mut self, capacity: usize) -> Self {
        self.task_queue_capacity = capacity.max(1);
        self
    }

    /// Cancelling this token stops every call in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Tasks created so far and not yet finalized.
    pub async fn created_tasks(&self) -> Vec<CreatedTask> {
        self.created.lock().await.clone()
    }

    // ── CreateTask ────────────────────────────────────────────────────────────

    pub async fn create_task<S>(&self, requests: S) -> Result<CreateTaskReply, AgentError>
    where
        S: Stream<Item = anyhow::Result<CreateTaskRequest>> + Send,
    {
        let span = tracing::info_span!(
            "create_task",
            session_id = %self.session_id,
            task_id = %self.task_id
        );
        self.run_create_task(requests).instrument(span).await
    }

    async fn run_create_task<S>(&self, requests: S) -> Result<CreateTaskReply, AgentError>
    where
        S: Stream<Item = anyhow::Result<CreateTaskRequest>> + Send,
    {
        let cancel = self.shutdown.child_token();
        let _call = cancel.clone().drop_guard();
        let mut requests = std::pin::pin!(requests);

        let mut machine = TaskCreationMachine::new();
        let mut tasks: Option<QueueWriter<TaskRequest>> = None;
        let mut payload: Option<QueueWriter<Bytes>> = None;
        let mut pending: Option<PendingOperation<Vec<CreatedTask>>> = None;
        let mut ids: Vec<String> = Vec::new();

        loop {
            let request = next_message(&mut requests, &cancel, "CreateTask").await?;
            if let Err(e) = self.token.verify(&request.communication_token) {
                tracing::warn!(error = %e, "task creation message refused");
                return Ok(CreateTaskReply::error(
                    request.communication_token,
                    e.reply_text(),
                ));
            }

            let case = request.case_name();
            let step = TaskStep::parse(request.kind)
                .ok_or_else(|| ProtocolError::UnknownCase(case.to_string()))?;
            if let Err(e) = machine.fire(step.event()) {
                tracing::warn!(error = %e, "task creation stream rejected");
                return Err(e.into());
            }

            match step {
                TaskStep::Init(options) => {
                    let (tx, rx) = chunk_queue::bounded(self.task_queue_capacity, cancel.clone());
                    let submitter = self.submitter.clone();
                    let session_id = self.session_id.clone();
                    let parent_id = self.task_id.clone();
                    pending = Some(PendingOperation::spawn(cancel.clone(), async move {
                        submitter
                            .create_tasks(&session_id, &parent_id, options, rx)
                            .await
                    }));
                    tasks = Some(tx);
                }
                TaskStep::Header(header) => {
                    tracing::debug!(id = %header.id, "task announced");
                    let (tx, rx) = chunk_queue::unbounded(cancel.clone());
                    ids.push(header.id.clone());
                    feed(&mut tasks, TaskRequest { header, payload: rx }).await?;
                    payload = Some(tx);
                }
                TaskStep::Data(data) => feed(&mut payload, data).await?,
                TaskStep::DataComplete => finish(&mut payload).await?,
                TaskStep::LastTask => {
                    finish(&mut tasks).await?;
                    let outcome = match pending.take() {
                        Some(op) => op.wait().await?,
                        None => Ok(Vec::new()),
                    };
                    return Ok(match outcome {
                        Ok(created) => {
                            tracing::info!(count = created.len(), "task creation succeeded");
                            self.created.lock().await.extend(created);
                            CreateTaskReply::successful()
                        }
                        Err(e) => {
                            tracing::warn!(error = %format!("{e:#}"), "task creation failed");
                            CreateTaskReply::non_successful(ids)
                        }
                    });
                }
            }
        }
    }

    // ── SendResult ────────────────────────────────────────────────────────────

    pub async fn send_result<S>(&self, requests: S) -> Result<ResultReply, AgentError>
    where
        S: Stream<Item = anyhow::Result<ResultRequest>> + Send,
    {
        let span = tracing::info_span!(
            "send_result",
            session_id = %self.session_id,
            task_id = %self.task_id
        );
        self.run_send_result(requests).instrument(span).await
    }

    async fn run_send_result<S>(&self, requests: S) -> Result<ResultReply, AgentError>
    where
        S: Stream<Item = anyhow::Result<ResultRequest>> + Send,
    {
        let cancel = self.shutdown.child_token();
        let _call = cancel.clone().drop_guard();
        let mut requests = std::pin::pin!(requests);

        let mut machine = ResultIngestionMachine::new();
        let mut payload: Option<QueueWriter<Bytes>> = None;
        // Closed only once LastResult arrived, so nothing is committed for
        // a stream that breaks off after DataComplete.
        let mut sealed: Option<QueueWriter<Bytes>> = None;
        let mut pending: Option<PendingOperation<()>> = None;

        loop {
            let request = next_message(&mut requests, &cancel, "SendResult").await?;
            if let Err(e) = self.token.verify(&request.communication_token) {
                tracing::warn!(error = %e, "result message refused");
                return Ok(ResultReply::error(request.communication_token, e.reply_text()));
            }

            let case = request.case_name();
            let token = request.communication_token;
            let step = ResultStep::parse(request.kind)
                .ok_or_else(|| ProtocolError::UnknownCase(case.to_string()))?;
            if let Err(e) = machine.fire(step.event()) {
                tracing::warn!(error = %e, "result stream rejected");
                return Err(e.into());
            }

            match step {
                ResultStep::Key(key) => {
                    tracing::debug!(key = %key, "result announced");
                    let (tx, rx) = chunk_queue::unbounded(cancel.clone());
                    let submitter = self.submitter.clone();
                    let session_id = self.session_id.clone();
                    let task_id = self.task_id.clone();
                    pending = Some(PendingOperation::spawn(cancel.clone(), async move {
                        submitter.set_result(&session_id, &task_id, &key, rx).await
                    }));
                    payload = Some(tx);
                }
                ResultStep::Data(data) => feed(&mut payload, data).await?,
                ResultStep::DataComplete => sealed = payload.take(),
                ResultStep::LastResult => {
                    finish(&mut sealed).await?;
                    let outcome = match pending.take() {
                        Some(op) => op.wait().await?,
                        None => Ok(()),
                    };
                    return Ok(match outcome {
                        Ok(()) => ResultReply::ok(),
                        Err(e) => {
                            tracing::warn!(error = %format!("{e:#}"), "result submission failed");
                            ResultReply::error(token, reply_errors::RESULT_FAILED)
                        }
                    });
                }
            }
        }
    }

    // ── Data fetch ────────────────────────────────────────────────────────────

    /// Stream a resource: `Init` with the key and first buffer, then the
    /// remaining buffers, then a bare completion marker.
    pub async fn get_resource_data(&self, request: DataRequest) -> BoxStream<'static, DataReply> {
        let span = tracing::info_span!(
            "get_resource_data",
            session_id = %self.session_id,
            task_id = %self.task_id,
            key = %request.key
        );
        self.run_get_resource_data(request).instrument(span).await
    }

    async fn run_get_resource_data(&self, request: DataRequest) -> BoxStream<'static, DataReply> {
        if let Err(e) = self.token.verify(&request.communication_token) {
            tracing::warn!(error = %e, "resource request refused");
            return single(DataReply::error(request.communication_token, e.reply_text()));
        }

        let key = request.key;
        match self.resources.get_values(&key).await {
            Ok(values) => {
                tracing::debug!("streaming resource");
                resource_replies(key, values)
                    .take_until(self.shutdown.clone().cancelled_owned())
                    .boxed()
            }
            Err(StorageError::NotFound(_)) => {
                tracing::info!("resource not found");
                single(DataReply::init_error(key, reply_errors::KEY_NOT_FOUND))
            }
            Err(e) => {
                tracing::warn!(error = %e, "resource lookup failed");
                single(DataReply::init_error(key, e.to_string()))
            }
        }
    }

    pub async fn get_common_data(&self, request: DataRequest) -> BoxStream<'static, DataReply> {
        self.unsupported("get_common_data", request, reply_errors::COMMON_DATA_UNSUPPORTED)
    }

    pub async fn get_direct_data(&self, request: DataRequest) -> BoxStream<'static, DataReply> {
        self.unsupported("get_direct_data", request, reply_errors::DIRECT_DATA_UNSUPPORTED)
    }

    fn unsupported(
        &self,
        operation: &'static str,
        request: DataRequest,
        message: &'static str,
    ) -> BoxStream<'static, DataReply> {
        let text = match self.token.verify(&request.communication_token) {
            Ok(()) => message,
            Err(e) => e.reply_text(),
        };
        tracing::info!(operation, key = %request.key, reply = text, "data request answered");
        single(DataReply::error(request.communication_token, text))
    }

    // ── FinalizeTaskCreation ──────────────────────────────────────────────────

    /// Release every task created so far to the submitter.
    pub async fn finalize_task_creation(&self, request: FinalizeRequest) -> FinalizeReply {
        let span = tracing::info_span!(
            "finalize_task_creation",
            session_id = %self.session_id,
            task_id = %self.task_id
        );
        async move {
            if let Err(e) = self.token.verify(&request.communication_token) {
                tracing::warn!(error = %e, "finalize refused");
                return FinalizeReply {
                    communication_token: request.communication_token,
                    kind: FinalizeReplyKind::Error(e.reply_text().to_string()),
                };
            }

            let mut created = self.created.lock().await;
            match self
                .submitter
                .finalize_task_creation(&self.session_id, &self.task_id, &created)
                .await
            {
                Ok(count) => {
                    created.clear();
                    tracing::info!(count, "task creation finalized");
                    FinalizeReply {
                        communication_token: String::new(),
                        kind: FinalizeReplyKind::Finalized(count),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "finalize failed");
                    FinalizeReply {
                        communication_token: request.communication_token,
                        kind: FinalizeReplyKind::Error(e.to_string()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

// ── Message decoding ──────────────────────────────────────────────────────────

enum TaskStep {
    Init(Option<TaskOptions>),
    Header(TaskRequestHeader),
    Data(Bytes),
    DataComplete,
    LastTask,
}

impl TaskStep {
    /// `None` for any unset union.
    fn parse(kind: Option<CreateTaskKind>) -> Option<Self> {
        Some(match kind? {
            CreateTaskKind::InitRequest { task_options } => Self::Init(task_options),
            CreateTaskKind::InitTask(task) => match task? {
                InitTask::Header(header) => Self::Header(header),
                InitTask::LastTask => Self::LastTask,
            },
            CreateTaskKind::TaskPayload(chunk) => match chunk? {
                DataChunk::Data(data) => Self::Data(data),
                DataChunk::DataComplete => Self::DataComplete,
            },
        })
    }

    fn event(&self) -> TaskCreationEvent {
        match self {
            Self::Init(_) => TaskCreationEvent::InitRequest,
            Self::Header(_) => TaskCreationEvent::Header,
            Self::Data(_) => TaskCreationEvent::Data,
            Self::DataComplete => TaskCreationEvent::DataComplete,
            Self::LastTask => TaskCreationEvent::LastTask,
        }
    }
}

enum ResultStep {
    Key(String),
    Data(Bytes),
    DataComplete,
    LastResult,
}

impl ResultStep {
    fn parse(kind: Option<ResultKind>) -> Option<Self> {
        Some(match kind? {
            ResultKind::Init(init) => match init? {
                InitKeyedDataStream::Key(key) => Self::Key(key),
                InitKeyedDataStream::LastResult => Self::LastResult,
            },
            ResultKind::Data(chunk) => match chunk? {
                DataChunk::Data(data) => Self::Data(data),
                DataChunk::DataComplete => Self::DataComplete,
            },
        })
    }

    fn event(&self) -> ResultIngestionEvent {
        match self {
            Self::Key(_) => ResultIngestionEvent::InitKey,
            Self::Data(_) => ResultIngestionEvent::Data,
            Self::DataComplete => ResultIngestionEvent::DataComplete,
            Self::LastResult => ResultIngestionEvent::LastResult,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn next_message<S, T>(
    requests: &mut Pin<&mut S>,
    cancel: &CancellationToken,
    call: &str,
) -> Result<T, AgentError>
where
    S: Stream<Item = anyhow::Result<T>>,
{
    let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
        next = requests.next() => next,
    };
    match next {
        Some(Ok(message)) => Ok(message),
        Some(Err(e)) => Err(AgentError::Transport(e)),
        None => {
            tracing::warn!(call, "request stream ended early");
            Err(ProtocolError::UnexpectedEnd(call.to_string()).into())
        }
    }
}

/// Push into a call queue. A consumer that stopped reading is not an
/// error here: its own failure is reported when the call ends, and the
/// rest of its input is dropped.
async fn feed<T>(queue: &mut Option<QueueWriter<T>>, item: T) -> Result<(), AgentError> {
    let Some(writer) = queue.as_mut() else {
        return Ok(());
    };
    match writer.push(item).await {
        Ok(()) => Ok(()),
        Err(QueueError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => {
            tracing::debug!(error = %e, "consumer stopped reading");
            *queue = None;
            Ok(())
        }
    }
}

async fn finish<T>(queue: &mut Option<QueueWriter<T>>) -> Result<(), AgentError> {
    let Some(writer) = queue.take() else {
        return Ok(());
    };
    match writer.close().await {
        Err(QueueError::Cancelled) => Err(AgentError::Cancelled),
        _ => Ok(()),
    }
}

fn single(reply: DataReply) -> BoxStream<'static, DataReply> {
    stream::once(async move { reply }).boxed()
}

enum Phase {
    First,
    Rest,
    Done,
}

fn resource_replies(key: String, values: ByteStream) -> impl Stream<Item = DataReply> + Send {
    stream::unfold((values, Phase::First), move |(mut values, phase)| {
        let key = key.clone();
        async move {
            let (reply, next) = match phase {
                Phase::Done => return None,
                Phase::First => match values.next().await {
                    Some(Ok(data)) => (DataReply::init_data(key, data), Phase::Rest),
                    None => (
                        DataReply::init_error(key, ProtocolError::NoData.to_string()),
                        Phase::Done,
                    ),
                    Some(Err(e)) => (DataReply::init_error(key, e.to_string()), Phase::Done),
                },
                Phase::Rest => match values.next().await {
                    Some(Ok(data)) => (DataReply::data(data), Phase::Rest),
                    None => (DataReply::complete(), Phase::Done),
                    Some(Err(e)) => (DataReply::error(String::new(), e.to_string()), Phase::Done),
                },
            };
            Some((reply, (values, next)))
        }
    })
}
