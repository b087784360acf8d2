// Lazy, cancellable read results.
//
// Purpose
// - Let backing stores produce commits one at a time while the consumer pulls
//   them, without materializing the full result set.
//
// Responsibilities
// - A bounded channel couples producer and consumer. The producer runs in its
//   own task and stops as soon as the consumer drops or closes the stream.
//
// Testing guidance
// - `try_collect` drains a stream into a Vec; `from_items` builds one from
//   values already in memory.

use crate::core::ports::EventStoreError;
use std::future::Future;
use tokio::sync::mpsc;

pub const DEFAULT_READ_BUFFER: usize = 64;

type Item<T> = Result<T, EventStoreError>;

pub struct ReadStream<T> {
    receiver: mpsc::Receiver<Item<T>>,
}

/// Producing half of a [`ReadStream`].
pub struct ReadSink<T> {
    sender: mpsc::Sender<Item<T>>,
}

impl<T: Send + 'static> ReadStream<T> {
    pub fn channel(buffer: usize) -> (ReadSink<T>, ReadStream<T>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (ReadSink { sender }, ReadStream { receiver })
    }

    /// Spawns `producer` on the runtime and hands it the sink of a fresh stream.
    pub fn spawn<F, Fut>(buffer: usize, producer: F) -> Self
    where
        F: FnOnce(ReadSink<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sink, stream) = Self::channel(buffer);
        tokio::spawn(producer(sink));
        stream
    }

    pub fn from_items(items: Vec<T>) -> Self {
        let (sink, stream) = Self::channel(items.len());
        for item in items {
            // Capacity equals the item count, so this cannot be full.
            let _ = sink.sender.try_send(Ok(item));
        }
        stream
    }

    pub fn empty() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn failed(err: EventStoreError) -> Self {
        let (sink, stream) = Self::channel(1);
        let _ = sink.sender.try_send(Err(err));
        stream
    }

    pub async fn next(&mut self) -> Option<Item<T>> {
        self.receiver.recv().await
    }

    /// Stops the producer. Items already buffered can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Drains the stream, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<T>, EventStoreError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T> ReadSink<T> {
    /// Returns `false` once the consumer has gone away.
    pub async fn send(&self, item: T) -> bool {
        self.sender.send(Ok(item)).await.is_ok()
    }

    pub async fn fail(&self, err: EventStoreError) -> bool {
        self.sender.send(Err(err)).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }
}
