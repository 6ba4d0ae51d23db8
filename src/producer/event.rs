use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use event_listener::Event;

/// Wakeup signal that remembers notifications nobody was listening for.
///
/// A bare [`Event`] drops a notify that lands while no listener is
/// registered. The pending counter keeps it, so every notify wakes exactly
/// one later `wait`, regardless of which side ran first.
#[derive(Default)]
pub(crate) struct NotifyCounter {
    pending: AtomicUsize,
    event: Event,
}

impl NotifyCounter {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn notify(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.event.notify(1);
    }

    /// Consume one outstanding notification, waiting if none has arrived.
    pub(crate) async fn wait(&self) {
        loop {
            if self.take_pending() {
                return;
            }
            let listener = self.event.listen();
            // re-check, a notify may have slipped in before we registered
            if self.take_pending() {
                return;
            }
            listener.await;
        }
    }

    fn take_pending(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}
