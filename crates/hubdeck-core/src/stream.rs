// ── Reactive entity streams ──
//
// Subscription handle vended by each `EntitySyncStore`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{EntityId, EntityState};

/// Ordered, immutable view of a store's entities.
pub type Snapshot = Arc<Vec<Arc<EntityState>>>;

/// A subscription to one store's entity states.
///
/// Offers point-in-time access and change notification via
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct EntityStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl EntityStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// The latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// One entity from the latest snapshot.
    pub fn get(&self, entity_id: &EntityId) -> Option<Arc<EntityState>> {
        self.receiver
            .borrow()
            .iter()
            .find(|s| &s.entity_id == entity_id)
            .cloned()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntityWatchStream {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding a fresh snapshot on every store mutation.
pub struct EntityWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for EntityWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
