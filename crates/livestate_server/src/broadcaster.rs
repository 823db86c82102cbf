//! Single-process fan-out of push-channel frames.

use crate::error::{ServerError, ServerResult};
use livestate_protocol::{encode_data_frame, CONNECTED_FRAME_DATA};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Frames queued per subscriber before it counts as stalled.
pub const DEFAULT_STREAM_BUFFER: usize = 256;

/// Tracks open streams and delivers encoded frames to each of them.
///
/// Each subscriber has a bounded queue; a subscriber whose queue is full
/// is dropped like one whose stream is gone.
#[derive(Debug)]
pub struct Broadcaster {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    limit: usize,
    buffer: usize,
}

impl Broadcaster {
    /// Creates a broadcaster admitting at most `limit` subscribers, 0 for
    /// unlimited.
    pub fn new(limit: usize) -> Self {
        Self::with_buffer(limit, DEFAULT_STREAM_BUFFER)
    }

    /// Creates a broadcaster queueing at most `buffer` frames per subscriber.
    pub fn with_buffer(limit: usize, buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            limit,
            buffer: buffer.max(1),
        }
    }

    /// Opens a stream. The `{"connected": true}` frame is queued first.
    pub fn subscribe(self: &Arc<Self>) -> ServerResult<EventStream> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut subscribers = self.subscribers.lock();
            if self.limit > 0 && subscribers.len() >= self.limit {
                return Err(ServerError::TooManySubscribers { limit: self.limit });
            }
            // the queue is empty and the receiver alive, so this cannot fail
            let _ = tx.try_send(encode_data_frame(CONNECTED_FRAME_DATA));
            subscribers.insert(id, tx);
        }
        debug!(id, "stream subscriber added");

        Ok(EventStream {
            id,
            rx,
            broadcaster: Arc::downgrade(self),
        })
    }

    /// Sends `data` as one frame to every subscriber.
    ///
    /// Subscribers whose stream is gone or whose queue is full are dropped.
    /// Returns the number of subscribers reached.
    pub fn broadcast(&self, data: &str) -> usize {
        let frame = encode_data_frame(data);
        let mut subscribers = self.subscribers.lock();

        let before = subscribers.len();
        subscribers.retain(|_, tx| tx.try_send(frame.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            debug!(dropped, "removed broken stream subscribers");
        }
        subscribers.len()
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(id, "stream subscriber removed");
        }
    }

    /// Number of open streams.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Ends every open stream.
    pub fn close_all(&self) {
        self.subscribers.lock().clear();
    }
}

/// Receiving end of one open stream.
///
/// Yields encoded `data: ...\n\n` frames. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    id: u64,
    rx: mpsc::Receiver<String>,
    broadcaster: Weak<Broadcaster>,
}

impl EventStream {
    /// Subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next frame. `None` once the stream was closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Returns a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_first() {
        let broadcaster = Arc::new(Broadcaster::new(0));
        let mut stream = broadcaster.subscribe().unwrap();

        assert_eq!(stream.try_recv().as_deref(), Some("data: {\"connected\": true}\n\n"));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn broadcast_reaches_every_subscriber() {
        let broadcaster = Arc::new(Broadcaster::new(0));
        let mut a = broadcaster.subscribe().unwrap();
        let mut b = broadcaster.subscribe().unwrap();
        a.try_recv();
        b.try_recv();

        assert_eq!(broadcaster.broadcast(r#"{"key":"k","value":1}"#), 2);
        assert_eq!(a.try_recv().as_deref(), Some("data: {\"key\":\"k\",\"value\":1}\n\n"));
        assert_eq!(b.try_recv().as_deref(), Some("data: {\"key\":\"k\",\"value\":1}\n\n"));
    }

    #[test]
    fn dropped_stream_unsubscribes() {
        let broadcaster = Arc::new(Broadcaster::new(0));
        let stream = broadcaster.subscribe().unwrap();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(stream);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn failed_send_drops_subscriber() {
        let broadcaster = Arc::new(Broadcaster::new(0));
        let (tx, rx) = mpsc::channel(1);
        broadcaster.subscribers.lock().insert(99, tx);
        drop(rx);

        let _live = broadcaster.subscribe().unwrap();
        assert_eq!(broadcaster.subscriber_count(), 2);
        assert_eq!(broadcaster.broadcast("{}"), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn stalled_subscriber_is_dropped() {
        let broadcaster = Arc::new(Broadcaster::with_buffer(0, 2));
        let mut stalled = broadcaster.subscribe().unwrap();
        let mut reading = broadcaster.subscribe().unwrap();
        reading.try_recv();

        // the connected frame and one change fill the stalled queue
        assert_eq!(broadcaster.broadcast("1"), 2);
        reading.try_recv();
        assert_eq!(broadcaster.broadcast("2"), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(reading.try_recv().as_deref(), Some("data: 2\n\n"));

        // queued frames drain, then the stream ends
        assert!(stalled.try_recv().is_some());
        assert_eq!(stalled.try_recv().as_deref(), Some("data: 1\n\n"));
        assert_eq!(stalled.try_recv(), None);
    }

    #[test]
    fn subscriber_limit() {
        let broadcaster = Arc::new(Broadcaster::new(1));
        let first = broadcaster.subscribe().unwrap();

        let err = broadcaster.subscribe().unwrap_err();
        assert!(matches!(err, ServerError::TooManySubscribers { limit: 1 }));

        drop(first);
        assert!(broadcaster.subscribe().is_ok());
    }

    #[tokio::test]
    async fn close_all_ends_streams() {
        let broadcaster = Arc::new(Broadcaster::new(0));
        let mut stream = broadcaster.subscribe().unwrap();
        assert!(stream.recv().await.is_some());

        broadcaster.close_all();
        assert_eq!(stream.recv().await, None);
    }
}
