//! Copy-on-write listener sets.
//!
//! Notification iterates a snapshot loaded from the [`ArcSwap`], so listeners may be
//! added or removed from inside a callback without affecting the iteration in
//! progress.

use crate::layer::{AvailableLayers, SubscriptionState};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::Arc;

/// Publisher-side callback: what subscribers currently want.
#[async_trait]
pub trait PublisherListener: Send + Sync {
    async fn on_subscription_change(&self, subscription_state: &SubscriptionState);
}

/// Subscriber-side callback: what publishers currently offer.
#[async_trait]
pub trait SubscriberListener: Send + Sync {
    async fn on_layers_availability_change(&self, available_layers: &AvailableLayers);
}

pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: ArcSwap<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Adds `listener` unless the same instance is already registered.
    pub(crate) fn add(&self, listener: Arc<L>) {
        self.listeners.rcu(|current| {
            let mut next: Vec<Arc<L>> = current.iter().cloned().collect();
            if !next.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
                next.push(listener.clone());
            }
            next
        });
    }

    pub(crate) fn remove(&self, listener: &Arc<L>) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|existing| !Arc::ptr_eq(existing, listener))
                .cloned()
                .collect::<Vec<Arc<L>>>()
        });
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        self.listeners.load_full()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::ListenerSet;
    use std::sync::Arc;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Listener(&'static str);

    impl Named for Listener {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn add_is_idempotent_per_instance() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        let listener: Arc<dyn Named> = Arc::new(Listener("a"));

        set.add(listener.clone());
        set.add(listener.clone());
        set.add(Arc::new(Listener("a")));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_removal() {
        let set: ListenerSet<dyn Named> = ListenerSet::new();
        let first: Arc<dyn Named> = Arc::new(Listener("first"));
        let second: Arc<dyn Named> = Arc::new(Listener("second"));
        set.add(first.clone());
        set.add(second.clone());

        let snapshot = set.snapshot();
        set.remove(&first);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].name(), "second");
    }
}
