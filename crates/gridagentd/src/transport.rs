//! Framed TCP transport for the agent.
//!
//! One connection carries one call. Every frame is length-delimited JSON:
//!
//!   client: CallHeader, then the call's request messages (streaming calls)
//!   server: one reply frame, or a run of data frames, then EOF
//!
//! Unary calls carry their request inside the header.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use gridagent_core::message::{FinalizeReply, FinalizeRequest};
use gridagent_core::{
    CreateTaskReply, CreateTaskRequest, DataReply, DataRequest, ResultReply, ResultRequest,
};
use gridagent_services::{Agent, AgentError};

/// First frame of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CallHeader {
    CreateTask,
    SendResult,
    GetResourceData(DataRequest),
    GetCommonData(DataRequest),
    GetDirectData(DataRequest),
    FinalizeTaskCreation(FinalizeRequest),
}

impl CallHeader {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTask => "CreateTask",
            Self::SendResult => "SendResult",
            Self::GetResourceData(_) => "GetResourceData",
            Self::GetCommonData(_) => "GetCommonData",
            Self::GetDirectData(_) => "GetDirectData",
            Self::FinalizeTaskCreation(_) => "FinalizeTaskCreation",
        }
    }
}

/// Frames the server writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    CreateTask(CreateTaskReply),
    SendResult(ResultReply),
    Data(DataReply),
    Finalize(FinalizeReply),
    /// The call was aborted: protocol violation, broken stream or shutdown.
    Failed(String),
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Accept connections until shutdown. Each connection is served on its own
/// task.
pub async fn serve(
    listener: TcpListener,
    agent: Arc<Agent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                agent.shutdown_token().cancel();
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("failed to accept connection")?;
                let agent = agent.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(agent, stream).await {
                        tracing::warn!(peer = %peer, error = %format!("{e:#}"), "connection failed");
                    }
                });
            }
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

pub async fn serve_connection<IO>(agent: Arc<Agent>, io: IO) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(io);
    let mut frames = FramedRead::new(read, LengthDelimitedCodec::new());
    let mut sink = FramedWrite::new(write, LengthDelimitedCodec::new());

    let Some(first) = frames.next().await else {
        return Ok(());
    };
    let header: CallHeader = decode(first).context("bad call header")?;
    tracing::debug!(call = header.name(), "call started");

    match header {
        CallHeader::CreateTask => {
            let requests = (&mut frames).map(decode::<CreateTaskRequest>);
            let reply = agent.create_task(requests).await;
            send(&mut sink, &call_outcome(reply, ServerFrame::CreateTask)).await?;
        }
        CallHeader::SendResult => {
            let requests = (&mut frames).map(decode::<ResultRequest>);
            let reply = agent.send_result(requests).await;
            send(&mut sink, &call_outcome(reply, ServerFrame::SendResult)).await?;
        }
        CallHeader::GetResourceData(request) => {
            let mut replies = agent.get_resource_data(request).await;
            while let Some(reply) = replies.next().await {
                send(&mut sink, &ServerFrame::Data(reply)).await?;
            }
        }
        CallHeader::GetCommonData(request) => {
            let mut replies = agent.get_common_data(request).await;
            while let Some(reply) = replies.next().await {
                send(&mut sink, &ServerFrame::Data(reply)).await?;
            }
        }
        CallHeader::GetDirectData(request) => {
            let mut replies = agent.get_direct_data(request).await;
            while let Some(reply) = replies.next().await {
                send(&mut sink, &ServerFrame::Data(reply)).await?;
            }
        }
        CallHeader::FinalizeTaskCreation(request) => {
            let reply = agent.finalize_task_creation(request).await;
            send(&mut sink, &ServerFrame::Finalize(reply)).await?;
        }
    }

    sink.get_mut().shutdown().await.context("failed to close connection")?;
    Ok(())
}

fn call_outcome<T>(reply: Result<T, AgentError>, frame: fn(T) -> ServerFrame) -> ServerFrame {
    match reply {
        Ok(reply) => frame(reply),
        Err(e) => {
            tracing::warn!(error = %e, "call aborted");
            ServerFrame::Failed(e.to_string())
        }
    }
}

fn decode<T: DeserializeOwned>(frame: std::io::Result<BytesMut>) -> Result<T> {
    let frame = frame.context("failed to read frame")?;
    serde_json::from_slice(&frame).context("malformed frame")
}

async fn send<W>(sink: &mut FramedWrite<W, LengthDelimitedCodec>, frame: &ServerFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(frame).context("failed to encode frame")?;
    sink.send(Bytes::from(bytes))
        .await
        .context("failed to write frame")
}
