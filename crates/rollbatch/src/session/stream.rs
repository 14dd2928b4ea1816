use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::session::ResultStatus;

/// One piece of a session's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Bytes,

    /// Set on the one chunk that ends the session.
    pub last: bool,
}

/// # ResponseStream
///
/// The caller's view of an admitted session: a finite stream of [`Chunk`]s
/// backed by a Tokio unbounded channel, plus the session's overall status.
///
/// ## Implementation Details
///
/// - The stream ends (`None`) right after the chunk marked `last`
/// - The status starts as success and may be overwritten while chunks are
///   still being produced, so read it after the final chunk
/// - The stream is not restartable; chunks already read are gone
pub struct ResponseStream {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<Chunk>,
    status: watch::Receiver<ResultStatus>,
    content_type: Option<&'static str>,
}

impl ResponseStream {
    pub(crate) fn new(
        id: Uuid,
        receiver: mpsc::UnboundedReceiver<Chunk>,
        status: watch::Receiver<ResultStatus>,
        content_type: Option<&'static str>,
    ) -> Self {
        Self {
            id,
            receiver,
            status,
            content_type,
        }
    }

    /// Identifier of the session behind this stream.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status of the session.
    pub fn status(&self) -> ResultStatus {
        self.status.borrow().clone()
    }

    /// Declared content type of the response, if the output format has one.
    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    /// Drains the stream and returns the concatenated body with the final status.
    pub async fn collect_body(mut self) -> (Vec<u8>, ResultStatus) {
        let mut body = Vec::new();
        while let Some(chunk) = self.next().await {
            body.extend_from_slice(&chunk.data);
        }
        let status = self.status();
        (body, status)
    }
}

impl Stream for ResponseStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::test;
    use tokio::sync::mpsc::unbounded_channel;

    fn stream() -> (mpsc::UnboundedSender<Chunk>, watch::Sender<ResultStatus>, ResponseStream) {
        let (tx, rx) = unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ResultStatus::default());
        (tx, status_tx, ResponseStream::new(Uuid::new_v4(), rx, status_rx, Some("application/json")))
    }

    fn chunk(data: &'static str, last: bool) -> Chunk {
        Chunk { data: Bytes::from_static(data.as_bytes()), last }
    }

    #[test]
    async fn test_receives_chunks_in_order() {
        let (tx, _status, mut stream) = stream();

        tx.send(chunk("a", false)).unwrap();
        tx.send(chunk("b", false)).unwrap();
        tx.send(chunk("c", true)).unwrap();
        drop(tx);

        let mut received = Vec::new();
        while let Some(item) = stream.next().await {
            received.push(item);
        }

        assert_eq!(received, vec![chunk("a", false), chunk("b", false), chunk("c", true)]);
    }

    #[test]
    async fn test_status_updates_are_visible() {
        let (_tx, status, stream) = stream();
        assert!(stream.status().is_success());

        status.send_replace(ResultStatus::new(424, "bad input"));
        assert_eq!(stream.status(), ResultStatus::new(424, "bad input"));
        assert_eq!(stream.content_type(), Some("application/json"));
    }

    #[test]
    async fn test_collect_body() {
        let (tx, status, stream) = stream();

        tx.send(chunk("hello ", false)).unwrap();
        tx.send(chunk("world", true)).unwrap();
        drop(tx);
        status.send_replace(ResultStatus::new(200, "ok"));

        let (body, status) = stream.collect_body().await;
        assert_eq!(body, b"hello world");
        assert_eq!(status, ResultStatus::new(200, "ok"));
    }

    #[test]
    async fn test_empty_stream() {
        let (tx, _status, mut stream) = stream();
        drop(tx);

        assert_eq!(stream.next().await, None);
    }
}
