use crate::*;

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use gridagent_core::message::reply_errors;
use gridagent_core::process::{Output, OutputInit, WorkerDataReplyKind};
use gridagent_core::{DataReply, DataRequest, ProcessReply, ProcessReplyKind, ReplyTag};
use gridagent_services::{encode_chunks, separate, FsResourceStore, ProtocolError, QueueError};
use tokio_util::sync::CancellationToken;

fn request(key: &str) -> DataRequest {
    DataRequest {
        communication_token: TOKEN.into(),
        key: key.into(),
    }
}

// ── Resources ─────────────────────────────────────────────────────────────────

/// A file-backed resource comes back as Init, the remaining chunks, then
/// the completion marker.
#[tokio::test]
async fn resource_from_disk_is_chunked() {
    let dir = TempDir::new("resource");
    let store = FsResourceStore::new(&dir.0, 4).unwrap();
    store.put("model", b"0123456789").unwrap();
    let (agent, _) = node_with_resources(Arc::new(store));

    let replies: Vec<DataReply> = agent.get_resource_data(request("model")).await.collect().await;
    assert_eq!(
        replies,
        vec![
            DataReply::init_data("model", Bytes::from_static(b"0123")),
            DataReply::data(Bytes::from_static(b"4567")),
            DataReply::data(Bytes::from_static(b"89")),
            DataReply::complete(),
        ]
    );
}

#[tokio::test]
async fn missing_resource_is_reported_in_init() {
    let dir = TempDir::new("missing");
    let store = FsResourceStore::new(&dir.0, 4).unwrap();
    let (agent, _) = node_with_resources(Arc::new(store));

    let replies: Vec<DataReply> = agent.get_resource_data(request("absent")).await.collect().await;
    assert_eq!(
        replies,
        vec![DataReply::init_error("absent", reply_errors::KEY_NOT_FOUND)]
    );
}

#[tokio::test]
async fn resource_with_wrong_token() {
    let node = node();
    node.resources.put("r", vec![Bytes::from_static(b"secret")]);

    let replies: Vec<DataReply> = node
        .agent
        .get_resource_data(DataRequest {
            communication_token: "other".into(),
            key: "r".into(),
        })
        .await
        .collect()
        .await;
    assert_eq!(
        replies,
        vec![DataReply::error("other", reply_errors::WRONG_TOKEN)]
    );
}

#[tokio::test]
async fn common_and_direct_data_are_refused() {
    let node = node();

    let common: Vec<DataReply> = node.agent.get_common_data(request("c")).await.collect().await;
    assert_eq!(
        common,
        vec![DataReply::error(TOKEN, reply_errors::COMMON_DATA_UNSUPPORTED)]
    );

    let direct: Vec<DataReply> = node.agent.get_direct_data(request("d")).await.collect().await;
    assert_eq!(
        direct,
        vec![DataReply::error(TOKEN, reply_errors::DIRECT_DATA_UNSUPPORTED)]
    );
}

// ── Worker replies ────────────────────────────────────────────────────────────

/// Wrap encoded chunks the way a worker reports its output.
async fn worker_output(id: &str, parts: &[&str]) -> Vec<ProcessReply> {
    let buffers: Vec<Bytes> = parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect();
    let buffers = futures::stream::iter(buffers);
    encode_chunks(buffers, id, "out")
        .map(|reply| {
            let reply = reply.unwrap();
            let output = match reply.kind {
                WorkerDataReplyKind::Init { chunk, .. } => {
                    Output::Init(Some(OutputInit::OutputChunk(chunk)))
                }
                WorkerDataReplyKind::Data(chunk) => Output::Data(chunk),
            };
            ProcessReply::new(reply.reply_id, ProcessReplyKind::Output(Some(output)))
        })
        .collect()
        .await
}

/// Two outputs sent back to back come apart into two groups, each
/// ending on its own last chunk.
#[tokio::test]
async fn encoded_outputs_separate_into_groups() {
    let mut replies = worker_output("a", &["a1", "a2", "a3"]).await;
    replies.extend(worker_output("b", &["b1"]).await);
    replies.push(ProcessReply::new("c", ProcessReplyKind::Resource("model".into())));

    let input = futures::stream::iter(replies.clone().into_iter().map(Ok));
    let mut groups = separate(input, CancellationToken::new());

    let a = groups.next_group().await.unwrap().unwrap();
    assert_eq!(a.first.tag(), Some(ReplyTag::Output));
    assert_eq!(a.messages.collect_all().await.unwrap(), replies[0..3].to_vec());

    let b = groups.next_group().await.unwrap().unwrap();
    assert_eq!(b.first.request_id, "b");
    assert_eq!(b.messages.collect_all().await.unwrap(), replies[3..4].to_vec());

    let c = groups.next_group().await.unwrap().unwrap();
    assert_eq!(c.first.tag(), Some(ReplyTag::Resource));
    assert_eq!(c.messages.collect_all().await.unwrap().len(), 1);

    assert!(groups.next_group().await.is_none());
}

/// A different request arriving mid-output fails the open group and the
/// whole stream.
#[tokio::test]
async fn interleaved_request_fails_everything() {
    let mut replies = worker_output("a", &["a1", "a2"]).await;
    let tail = replies.pop().unwrap();
    replies.push(ProcessReply::new("r", ProcessReplyKind::Resource("model".into())));
    replies.push(tail);

    let input = futures::stream::iter(replies.into_iter().map(Ok));
    let mut groups = separate(input, CancellationToken::new());

    let expected = QueueError::Protocol(ProtocolError::Interleaved {
        open: ReplyTag::Output,
        got: ReplyTag::Resource,
    });
    let a = groups.next_group().await.unwrap().unwrap();
    assert_eq!(a.messages.collect_all().await, Err(expected.clone()));
    assert_eq!(groups.next_group().await.map(|r| r.err()), Some(Some(expected)));
}

#[tokio::test]
async fn empty_resource_on_disk_has_no_data() {
    let dir = TempDir::new("empty");
    let store = FsResourceStore::new(&dir.0, 4).unwrap();
    store.put("blank", b"").unwrap();
    let (agent, _) = node_with_resources(Arc::new(store));

    let replies: Vec<DataReply> = agent.get_resource_data(request("blank")).await.collect().await;
    assert_eq!(replies, vec![DataReply::init_error("blank", "no data produced")]);
}
