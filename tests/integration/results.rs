use crate::*;

use bytes::Bytes;
use gridagent_core::message::{reply_errors, ResultReplyKind};
use gridagent_core::ResultRequest;
use gridagent_services::{AgentError, MemorySubmitter, ProtocolError};

fn result(key: &str, parts: &[&str]) -> Vec<ResultRequest> {
    let mut requests = vec![ResultRequest::key(TOKEN, key)];
    for part in parts {
        requests.push(ResultRequest::data(TOKEN, Bytes::copy_from_slice(part.as_bytes())));
    }
    requests.push(ResultRequest::data_complete(TOKEN));
    requests.push(ResultRequest::last_result(TOKEN));
    requests
}

#[tokio::test]
async fn result_is_stored_under_its_key() {
    let node = node();
    let reply = node
        .agent
        .send_result(messages(result("out", &["hello ", "world"])))
        .await
        .unwrap();

    assert_eq!(reply.kind, ResultReplyKind::Ok);
    assert_eq!(&node.submitter.result("out").unwrap()[..], b"hello world");
}

#[tokio::test]
async fn empty_result_is_stored() {
    let node = node();
    let reply = node.agent.send_result(messages(result("empty", &[]))).await.unwrap();
    assert_eq!(reply.kind, ResultReplyKind::Ok);
    assert!(node.submitter.result("empty").unwrap().is_empty());
}

#[tokio::test]
async fn wrong_token_stores_nothing() {
    let node = node();
    let mut requests = result("out", &["a", "b"]);
    requests[3] = ResultRequest::data_complete("guess");

    let reply = node.agent.send_result(messages(requests)).await.unwrap();
    assert_eq!(reply.communication_token, "guess");
    assert_eq!(
        reply.kind,
        ResultReplyKind::Error(reply_errors::WRONG_TOKEN.into())
    );
    assert_eq!(node.submitter.result_count(), 0);
}

/// Everything arrived except the final marker: the result is held back.
#[tokio::test]
async fn missing_last_result_stores_nothing() {
    let node = node();
    let mut requests = result("out", &["a"]);
    requests.pop();

    let err = node.agent.send_result(messages(requests)).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Protocol(ProtocolError::UnexpectedEnd(_))
    ));
    assert_eq!(node.submitter.result_count(), 0);
}

#[tokio::test]
async fn data_before_key_is_rejected() {
    let node = node();
    let requests = vec![
        ResultRequest::data(TOKEN, Bytes::from_static(b"early")),
        ResultRequest::last_result(TOKEN),
    ];

    let err = node.agent.send_result(messages(requests)).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Protocol(ProtocolError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn repeated_data_complete_is_rejected() {
    let node = node();
    let requests = vec![
        ResultRequest::key(TOKEN, "out"),
        ResultRequest::data_complete(TOKEN),
        ResultRequest::data_complete(TOKEN),
        ResultRequest::last_result(TOKEN),
    ];

    let err = node.agent.send_result(messages(requests)).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Protocol(ProtocolError::InvalidTransition(_))
    ));
    assert_eq!(node.submitter.result_count(), 0);
}

#[tokio::test]
async fn oversized_result_fails_in_band() {
    let node = node_with(MemorySubmitter::new(3));
    let reply = node
        .agent
        .send_result(messages(result("out", &["abc", "def"])))
        .await
        .unwrap();

    assert_eq!(reply.communication_token, TOKEN);
    assert_eq!(
        reply.kind,
        ResultReplyKind::Error(reply_errors::RESULT_FAILED.into())
    );
    assert_eq!(node.submitter.result_count(), 0);
}

#[tokio::test]
async fn shutdown_aborts_a_waiting_call() {
    let node = node();
    let (tx, rx) = futures::channel::mpsc::unbounded::<anyhow::Result<ResultRequest>>();
    tx.unbounded_send(Ok(ResultRequest::key(TOKEN, "out"))).unwrap();

    let shutdown = node.agent.shutdown_token();
    let agent = std::sync::Arc::new(node.agent);
    let call = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.send_result(rx).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    shutdown.cancel();

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), call)
        .await
        .expect("call hung past shutdown")
        .unwrap();
    assert!(matches!(outcome, Err(AgentError::Cancelled)));
    assert_eq!(node.submitter.result_count(), 0);
    drop(tx);
}
