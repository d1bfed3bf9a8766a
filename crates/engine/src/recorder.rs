use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use page_store_common::PageNumber;

use crate::snapshot::{AccessResult, PageAccess};
use crate::store::PageStore;
use crate::StoreError;

/// Shared state between a recorder and the store's subscription registry.
/// The store holds only a weak reference; the recorder owns the strong one,
/// so dropping the recorder unsubscribes.
pub(crate) struct Subscription {
    pub(crate) recorded: Mutex<HashSet<PageNumber>>,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(callback: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            recorded: Mutex::new(HashSet::new()),
            callback,
        }
    }

    /// Fire the callback once if any changed page was recorded. Firing
    /// clears the recorded set, so further commits stay silent until the
    /// subscriber records again.
    pub(crate) fn notify_if_overlapping(&self, changed: &[PageNumber]) {
        let overlaps = {
            let mut recorded = self.recorded.lock().unwrap();
            if changed.iter().any(|page| recorded.contains(page)) {
                recorded.clear();
                true
            } else {
                false
            }
        };
        if overlaps {
            (self.callback)();
        }
    }
}

/// Subscription object tracking which pages a read-only action observed.
///
/// `record` runs the action against the current snapshot and accumulates
/// every page number it touches, across the engine's load-and-rerun cycles.
/// When a later commit overwrites any recorded page the callback fires
/// exactly once; calling `record` again re-arms the subscription against
/// the newer snapshot.
pub struct PageReadsRecorder {
    store: Arc<PageStore>,
    subscription: Arc<Subscription>,
}

impl PageReadsRecorder {
    pub(crate) fn new(store: Arc<PageStore>, subscription: Arc<Subscription>) -> Self {
        Self {
            store,
            subscription,
        }
    }

    /// Run a read-only action, recording the pages it reads.
    pub async fn record<T, F>(&self, action: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut PageAccess<'_>) -> AccessResult<T>,
    {
        self.subscription.recorded.lock().unwrap().clear();
        self.store.run_read(Some(&self.subscription), action).await
    }

    /// Stop watching without dropping the recorder.
    pub fn cancel(&self) {
        self.subscription.recorded.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_subscription() -> (Arc<Subscription>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = Arc::new(Subscription::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        (subscription, count)
    }

    #[test]
    fn test_overlap_fires_once_and_disarms() {
        let (subscription, count) = counting_subscription();
        subscription.recorded.lock().unwrap().extend([1u64, 2]);

        subscription.notify_if_overlapping(&[2, 9]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The set was cleared: a second overlapping commit is silent.
        subscription.notify_if_overlapping(&[1, 2]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disjoint_commit_is_silent() {
        let (subscription, count) = counting_subscription();
        subscription.recorded.lock().unwrap().extend([1u64, 2]);

        subscription.notify_if_overlapping(&[3, 4]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // Still armed.
        subscription.notify_if_overlapping(&[2]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
