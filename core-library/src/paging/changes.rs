//! "Something changed" signal fanned out to page consumers.
//!
//! Uses `tokio::sync::broadcast`: every committed write sends one unit
//! signal, every subscriber gets its own stream. The signal carries no diff;
//! subscribers re-request the pages they hold.

use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Broadcasts change signals from the store to subscribers.
#[derive(Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<()>,
}

impl ChangeNotifier {
    /// Create a notifier buffering up to `capacity` signals per subscriber.
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Signal every subscriber. Sending with nobody listening is not an error.
    pub(crate) fn notify(&self) {
        let receivers = self.sender.send(()).unwrap_or(0);
        debug!(receivers, "Change signal sent");
    }

    /// Stream yielding `()` after each committed write from now on.
    ///
    /// A subscriber that falls behind receives a single signal for everything
    /// it missed rather than an error. The stream ends when the store is
    /// dropped.
    pub fn subscribe(&self) -> BoxStream<'static, ()> {
        stream::unfold(self.sender.subscribe(), |mut receiver| async move {
            match receiver.recv().await {
                Ok(()) => Some(((), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Change subscriber lagged; coalescing");
                    Some(((), receiver))
                }
                Err(RecvError::Closed) => None,
            }
        })
        .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
