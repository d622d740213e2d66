//! ChunkQueue: single-writer / single-reader queue with an explicit end.
//!
//! Completion is a message, not a side effect of dropping the writer: the
//! reader sees `close` as end-of-sequence and `fail` as an error. A writer
//! dropped without either shows up as [`QueueError::Abandoned`], so a
//! reader never mistakes a torn-down producer for a finished payload.
//!
//! Two capacities are used by the agent:
//!   - unbounded for one task's payload, whose size is limited upstream
//!   - bounded for task headers, so a slow consumer stalls the inbound
//!     stream instead of piling up tasks in memory
//!
//! Every wait honours the queue's cancellation token.

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue failed: {0}")]
    Failed(String),
    /// The producer rejected its own input.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("writer dropped before the queue was closed")]
    Abandoned,
    #[error("reader dropped, queue is no longer consumed")]
    ReaderGone,
    #[error("queue wait cancelled")]
    Cancelled,
}

enum Entry<T> {
    Item(T),
    End(Result<(), QueueError>),
}

enum Tx<T> {
    Bounded(mpsc::Sender<Entry<T>>),
    Unbounded(mpsc::UnboundedSender<Entry<T>>),
}

enum Rx<T> {
    Bounded(mpsc::Receiver<Entry<T>>),
    Unbounded(mpsc::UnboundedReceiver<Entry<T>>),
}

/// Create a queue that never blocks the writer.
pub fn unbounded<T>(cancel: CancellationToken) -> (QueueWriter<T>, QueueReader<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QueueWriter::new(Tx::Unbounded(tx), cancel.clone()),
        QueueReader::new(Rx::Unbounded(rx), cancel),
    )
}

/// Create a queue of `capacity` slots. A full queue suspends `push` until
/// the reader catches up.
///
/// `close` and `fail` take a slot as well, so a writer that fills every
/// slot before any reader runs cannot end the queue: `n` items plus the
/// end marker need `n + 1` slots.
pub fn bounded<T>(capacity: usize, cancel: CancellationToken) -> (QueueWriter<T>, QueueReader<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueWriter::new(Tx::Bounded(tx), cancel.clone()),
        QueueReader::new(Rx::Bounded(rx), cancel),
    )
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Write end. `close` and `fail` consume it, so a queue ends exactly once.
pub struct QueueWriter<T> {
    tx: Tx<T>,
    cancel: CancellationToken,
}

impl<T> QueueWriter<T> {
    fn new(tx: Tx<T>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Append an item. Suspends while a bounded queue is full.
    pub async fn push(&mut self, item: T) -> Result<(), QueueError> {
        self.send(Entry::Item(item)).await
    }

    /// No more items. The reader drains what is pending, then ends.
    pub async fn close(mut self) -> Result<(), QueueError> {
        self.send(Entry::End(Ok(()))).await
    }

    /// Abnormal end. The reader drains what is pending, then sees `error`.
    pub async fn fail(mut self, error: QueueError) -> Result<(), QueueError> {
        self.send(Entry::End(Err(error))).await
    }

    async fn send(&mut self, entry: Entry<T>) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        match &self.tx {
            Tx::Unbounded(tx) => tx.send(entry).map_err(|_| QueueError::ReaderGone),
            Tx::Bounded(tx) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(QueueError::Cancelled),
                    sent = tx.send(entry) => sent.map_err(|_| QueueError::ReaderGone),
                }
            }
        }
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Read end. Yields items in write order, then `None` after a clean close
/// or one `Err` after a failure.
pub struct QueueReader<T> {
    rx: Rx<T>,
    cancel: CancellationToken,
    finished: bool,
}

impl<T> QueueReader<T> {
    fn new(rx: Rx<T>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            finished: false,
        }
    }

    pub async fn recv(&mut self) -> Option<Result<T, QueueError>> {
        if self.finished {
            return None;
        }

        let entry = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finished = true;
                return Some(Err(QueueError::Cancelled));
            }
            entry = recv_entry(&mut self.rx) => entry,
        };

        match entry {
            Some(Entry::Item(item)) => Some(Ok(item)),
            Some(Entry::End(Ok(()))) => {
                self.finished = true;
                None
            }
            Some(Entry::End(Err(e))) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                Some(Err(QueueError::Abandoned))
            }
        }
    }

    /// True once the end marker (or an error) has been consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read everything, stopping at the first error.
    pub async fn collect_all(mut self) -> Result<Vec<T>, QueueError> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item?);
        }
        Ok(items)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T, QueueError>> + Send
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut reader| async move {
            reader.recv().await.map(|item| (item, reader))
        })
    }
}

async fn recv_entry<T>(rx: &mut Rx<T>) -> Option<Entry<T>> {
    match rx {
        Rx::Bounded(rx) => rx.recv().await,
        Rx::Unbounded(rx) => rx.recv().await,
    }
}
