use crate::*;

use bytes::Bytes;
use gridagent_core::message::{reply_errors, CreateTaskReplyKind, FinalizeReplyKind, FinalizeRequest};
use gridagent_core::{CreateTaskRequest, TaskOptions, TaskRequestHeader};
use gridagent_services::{AgentError, MemorySubmitter, ProtocolError};

fn header(id: &str) -> TaskRequestHeader {
    TaskRequestHeader {
        id: id.into(),
        expected_output_keys: vec![format!("{id}-out")],
        data_dependencies: vec!["input".into()],
    }
}

/// A full creation stream for tasks `(id, payload parts)`.
fn creation(tasks: &[(&str, Vec<&str>)]) -> Vec<CreateTaskRequest> {
    let options = TaskOptions {
        priority: 2,
        ..Default::default()
    };
    let mut requests = vec![CreateTaskRequest::init(TOKEN, Some(options))];
    for (id, parts) in tasks {
        requests.push(CreateTaskRequest::header(TOKEN, header(id)));
        for part in parts {
            requests.push(CreateTaskRequest::data(TOKEN, Bytes::copy_from_slice(part.as_bytes())));
        }
        requests.push(CreateTaskRequest::data_complete(TOKEN));
    }
    requests.push(CreateTaskRequest::last_task(TOKEN));
    requests
}

/// Two tasks created, then finalized in one go.
#[tokio::test]
async fn create_then_finalize() {
    let node = node();
    let requests = creation(&[("T1", vec!["b1", "b2"]), ("T2", vec!["only"])]);

    let reply = node.agent.create_task(messages(requests)).await.unwrap();
    assert_eq!(reply.kind, CreateTaskReplyKind::Successful);

    let t1 = node.submitter.task("T1").unwrap();
    assert_eq!(&t1.payload[..], b"b1b2");
    assert_eq!(t1.session_id, SESSION);
    assert_eq!(t1.parent_task_id, PARENT);
    assert_eq!(t1.options.as_ref().map(|o| o.priority), Some(2));
    assert!(!t1.finalized);
    assert_eq!(&node.submitter.task("T2").unwrap().payload[..], b"only");
    assert_eq!(node.agent.created_tasks().await.len(), 2);

    let reply = node
        .agent
        .finalize_task_creation(FinalizeRequest {
            communication_token: TOKEN.into(),
        })
        .await;
    assert_eq!(reply.kind, FinalizeReplyKind::Finalized(2));
    assert!(node.submitter.task("T1").unwrap().finalized);
    assert!(node.submitter.task("T2").unwrap().finalized);
    assert!(node.agent.created_tasks().await.is_empty());
}

#[tokio::test]
async fn empty_batch_succeeds() {
    let node = node();
    let reply = node.agent.create_task(messages(creation(&[]))).await.unwrap();
    assert_eq!(reply.kind, CreateTaskReplyKind::Successful);
    assert_eq!(node.submitter.task_count(), 0);
}

#[tokio::test]
async fn wrong_token_creates_nothing() {
    let node = node();
    let mut requests = creation(&[("T1", vec!["x"])]);
    requests[2] = CreateTaskRequest::data("stolen", Bytes::from_static(b"x"));

    let reply = node.agent.create_task(messages(requests)).await.unwrap();
    assert_eq!(reply.communication_token, "stolen");
    assert_eq!(
        reply.kind,
        CreateTaskReplyKind::Error(reply_errors::WRONG_TOKEN.into())
    );
    assert_eq!(node.submitter.task_count(), 0);
}

#[tokio::test]
async fn missing_token_is_reported() {
    let node = node();
    let requests = vec![CreateTaskRequest::init("", None)];

    let reply = node.agent.create_task(messages(requests)).await.unwrap();
    assert_eq!(
        reply.kind,
        CreateTaskReplyKind::Error(reply_errors::MISSING_TOKEN.into())
    );
}

#[tokio::test]
async fn repeated_data_complete_is_rejected() {
    let node = node();
    let requests = vec![
        CreateTaskRequest::init(TOKEN, None),
        CreateTaskRequest::header(TOKEN, header("T1")),
        CreateTaskRequest::data_complete(TOKEN),
        CreateTaskRequest::data_complete(TOKEN),
        CreateTaskRequest::last_task(TOKEN),
    ];

    let err = node.agent.create_task(messages(requests)).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Protocol(ProtocolError::InvalidTransition(_))
    ));
    assert_eq!(node.submitter.task_count(), 0);
}

#[tokio::test]
async fn stream_ending_early_commits_nothing() {
    let node = node();
    let mut requests = creation(&[("T1", vec!["a"])]);
    requests.pop();

    let err = node.agent.create_task(messages(requests)).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Protocol(ProtocolError::UnexpectedEnd(_))
    ));
    assert_eq!(node.submitter.task_count(), 0);
}

#[tokio::test]
async fn broken_connection_commits_nothing() {
    let node = node();
    let mut requests = creation(&[("T1", vec!["a"])]);
    requests.pop();

    let err = node.agent.create_task(broken(requests)).await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(_)));
    assert_eq!(node.submitter.task_count(), 0);
}

/// An oversized payload fails the batch in-band, naming every task sent.
#[tokio::test]
async fn oversized_payload_lists_failed_ids() {
    let node = node_with(MemorySubmitter::new(4));
    let requests = creation(&[("T1", vec!["ok"]), ("T2", vec!["far", "too", "big"])]);

    let reply = node.agent.create_task(messages(requests)).await.unwrap();
    assert_eq!(
        reply.kind,
        CreateTaskReplyKind::NonSuccessfulIds(vec!["T1".into(), "T2".into()])
    );
    assert_eq!(node.submitter.task_count(), 0);
    assert!(node.agent.created_tasks().await.is_empty());
}

#[tokio::test]
async fn duplicate_task_id_fails_in_band() {
    let node = node();
    let first = creation(&[("T1", vec!["a"])]);
    assert_eq!(
        node.agent.create_task(messages(first)).await.unwrap().kind,
        CreateTaskReplyKind::Successful
    );

    let again = creation(&[("T1", vec!["b"])]);
    let reply = node.agent.create_task(messages(again)).await.unwrap();
    assert_eq!(reply.kind, CreateTaskReplyKind::NonSuccessfulIds(vec!["T1".into()]));
    assert_eq!(&node.submitter.task("T1").unwrap().payload[..], b"a");
}

#[tokio::test]
async fn finalize_with_wrong_token() {
    let node = node();
    let reply = node
        .agent
        .finalize_task_creation(FinalizeRequest {
            communication_token: "nope".into(),
        })
        .await;
    assert_eq!(
        reply.kind,
        FinalizeReplyKind::Error(reply_errors::WRONG_TOKEN.into())
    );
}
