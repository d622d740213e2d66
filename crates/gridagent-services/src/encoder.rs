//! ChunkEncoder: frames a lazy run of buffers as worker data replies.
//!
//! The first reply carries the key, the last one carries
//! `data_complete = true`. A single buffer is both. One buffer of lookahead
//! is enough to know which reply is last, so nothing is materialized.

use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{BoxStream, Peekable};
use futures::{Stream, StreamExt};
use gridagent_core::process::WorkerDataReplyKind;
use gridagent_core::{ChunkFrame, WorkerDataReply};

use crate::error::ProtocolError;

struct EncoderState<S: Stream> {
    buffers: Pin<Box<Peekable<S>>>,
    reply_id: String,
    /// Present until the first reply is emitted.
    key: Option<String>,
    done: bool,
}

/// Encode `buffers` as replies to request `reply_id` under `key`.
///
/// An empty input yields a single [`ProtocolError::NoData`].
pub fn encode_chunks<S>(
    buffers: S,
    reply_id: impl Into<String>,
    key: impl Into<String>,
) -> BoxStream<'static, Result<WorkerDataReply, ProtocolError>>
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let state = EncoderState {
        buffers: Box::pin(buffers.peekable()),
        reply_id: reply_id.into(),
        key: Some(key.into()),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        let Some(data) = st.buffers.next().await else {
            st.done = true;
            return st.key.is_some().then(|| (Err(ProtocolError::NoData), st));
        };

        let last = st.buffers.as_mut().peek().await.is_none();
        st.done = last;

        let chunk = ChunkFrame::new(data, last);
        let kind = match st.key.take() {
            Some(key) => WorkerDataReplyKind::Init { key, chunk },
            None => WorkerDataReplyKind::Data(chunk),
        };
        let reply = WorkerDataReply {
            reply_id: st.reply_id.clone(),
            kind,
        };
        Some((Ok(reply), st))
    })
    .boxed()
}
