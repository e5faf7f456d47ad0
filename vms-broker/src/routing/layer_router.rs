//! Subscriber routing table keyed by layer and, optionally, publisher.

use crate::client::SubscriberHandle;
use crate::layer::{AssociatedLayer, Layer, PublisherId, SubscriptionState};
use crate::observability::{events, fields};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const COMPONENT: &str = "layer_router";

/// Routing state. Callers provide the serialization; the broker keeps it behind
/// its lock.
#[derive(Default)]
pub(crate) struct LayerRouter {
    promiscuous_subscribers: HashSet<SubscriberHandle>,
    layer_subscriptions: HashMap<Layer, HashSet<SubscriberHandle>>,
    layer_from_publisher_subscriptions:
        HashMap<Layer, HashMap<PublisherId, HashSet<SubscriberHandle>>>,
    sequence_number: u64,
}

impl LayerRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every layer from every publisher.
    pub(crate) fn add_subscription(&mut self, subscriber: &SubscriberHandle) {
        if self.promiscuous_subscribers.insert(subscriber.clone()) {
            self.sequence_number += 1;
            debug!(
                event = events::SUBSCRIPTION_ADDED,
                component = COMPONENT,
                subscriber = %subscriber.id(),
                scope = "all_layers",
                "added promiscuous subscription"
            );
        }
    }

    pub(crate) fn remove_subscription(&mut self, subscriber: &SubscriberHandle) {
        if self.promiscuous_subscribers.remove(subscriber) {
            self.sequence_number += 1;
            debug!(
                event = events::SUBSCRIPTION_REMOVED,
                component = COMPONENT,
                subscriber = %subscriber.id(),
                scope = "all_layers",
                "removed promiscuous subscription"
            );
        } else {
            Self::log_missing(subscriber, "all_layers");
        }
    }

    pub(crate) fn add_layer_subscription(&mut self, subscriber: &SubscriberHandle, layer: Layer) {
        if self
            .layer_subscriptions
            .entry(layer)
            .or_default()
            .insert(subscriber.clone())
        {
            self.sequence_number += 1;
            debug!(
                event = events::SUBSCRIPTION_ADDED,
                component = COMPONENT,
                subscriber = %subscriber.id(),
                layer = %fields::format_layer(&layer),
                "added layer subscription"
            );
        }
    }

    pub(crate) fn remove_layer_subscription(&mut self, subscriber: &SubscriberHandle, layer: Layer) {
        let Some(subscribers) = self.layer_subscriptions.get_mut(&layer) else {
            Self::log_missing(subscriber, "layer");
            return;
        };

        if !subscribers.remove(subscriber) {
            Self::log_missing(subscriber, "layer");
            return;
        }
        if subscribers.is_empty() {
            self.layer_subscriptions.remove(&layer);
        }

        self.sequence_number += 1;
        debug!(
            event = events::SUBSCRIPTION_REMOVED,
            component = COMPONENT,
            subscriber = %subscriber.id(),
            layer = %fields::format_layer(&layer),
            "removed layer subscription"
        );
    }

    pub(crate) fn add_layer_from_publisher_subscription(
        &mut self,
        subscriber: &SubscriberHandle,
        layer: Layer,
        publisher_id: PublisherId,
    ) {
        if self
            .layer_from_publisher_subscriptions
            .entry(layer)
            .or_default()
            .entry(publisher_id)
            .or_default()
            .insert(subscriber.clone())
        {
            self.sequence_number += 1;
            debug!(
                event = events::SUBSCRIPTION_ADDED,
                component = COMPONENT,
                subscriber = %subscriber.id(),
                layer = %fields::format_layer(&layer),
                publisher = %fields::format_publisher(publisher_id),
                "added publisher-scoped layer subscription"
            );
        }
    }

    pub(crate) fn remove_layer_from_publisher_subscription(
        &mut self,
        subscriber: &SubscriberHandle,
        layer: Layer,
        publisher_id: PublisherId,
    ) {
        let Some(publishers) = self.layer_from_publisher_subscriptions.get_mut(&layer) else {
            Self::log_missing(subscriber, "layer_from_publisher");
            return;
        };
        let Some(subscribers) = publishers.get_mut(&publisher_id) else {
            Self::log_missing(subscriber, "layer_from_publisher");
            return;
        };

        if !subscribers.remove(subscriber) {
            Self::log_missing(subscriber, "layer_from_publisher");
            return;
        }
        if subscribers.is_empty() {
            publishers.remove(&publisher_id);
        }
        if publishers.is_empty() {
            self.layer_from_publisher_subscriptions.remove(&layer);
        }

        self.sequence_number += 1;
        debug!(
            event = events::SUBSCRIPTION_REMOVED,
            component = COMPONENT,
            subscriber = %subscriber.id(),
            layer = %fields::format_layer(&layer),
            publisher = %fields::format_publisher(publisher_id),
            "removed publisher-scoped layer subscription"
        );
    }

    /// Removes every subscription referencing `subscriber`. Returns `true` when
    /// anything was removed.
    pub(crate) fn remove_dead_subscriber(&mut self, subscriber: &SubscriberHandle) -> bool {
        let mut removed: u64 = 0;

        if self.promiscuous_subscribers.remove(subscriber) {
            removed += 1;
        }

        self.layer_subscriptions.retain(|_, subscribers| {
            if subscribers.remove(subscriber) {
                removed += 1;
            }
            !subscribers.is_empty()
        });

        self.layer_from_publisher_subscriptions
            .retain(|_, publishers| {
                publishers.retain(|_, subscribers| {
                    if subscribers.remove(subscriber) {
                        removed += 1;
                    }
                    !subscribers.is_empty()
                });
                !publishers.is_empty()
            });

        if removed == 0 {
            return false;
        }

        self.sequence_number += removed;
        debug!(
            event = events::DEAD_SUBSCRIBER_PURGED,
            component = COMPONENT,
            subscriber = %subscriber.id(),
            removed,
            "purged dead subscriber"
        );
        true
    }

    /// Subscribers a publisher must deliver `layer` payloads to.
    pub(crate) fn subscribers_for_layer_from_publisher(
        &self,
        layer: &Layer,
        publisher_id: PublisherId,
    ) -> HashSet<SubscriberHandle> {
        let mut subscribers = self.promiscuous_subscribers.clone();

        if let Some(layer_subscribers) = self.layer_subscriptions.get(layer) {
            subscribers.extend(layer_subscribers.iter().cloned());
        }

        if let Some(publisher_subscribers) = self
            .layer_from_publisher_subscriptions
            .get(layer)
            .and_then(|publishers| publishers.get(&publisher_id))
        {
            subscribers.extend(publisher_subscribers.iter().cloned());
        }

        subscribers
    }

    pub(crate) fn has_layer_subscriptions(&self, layer: &Layer) -> bool {
        self.layer_subscriptions.contains_key(layer)
    }

    pub(crate) fn has_layer_from_publisher_subscriptions(
        &self,
        layer: &Layer,
        publisher_id: PublisherId,
    ) -> bool {
        self.layer_from_publisher_subscriptions
            .get(layer)
            .is_some_and(|publishers| publishers.contains_key(&publisher_id))
    }

    pub(crate) fn subscription_state(&self) -> SubscriptionState {
        SubscriptionState {
            sequence_number: self.sequence_number,
            layers: self.layer_subscriptions.keys().copied().collect(),
            associated_layers: self
                .layer_from_publisher_subscriptions
                .iter()
                .map(|(layer, publishers)| AssociatedLayer {
                    layer: *layer,
                    publisher_ids: publishers.keys().copied().collect(),
                })
                .collect(),
        }
    }

    fn log_missing(subscriber: &SubscriberHandle, scope: &str) {
        debug!(
            event = events::SUBSCRIPTION_REMOVE_MISSING,
            component = COMPONENT,
            subscriber = %subscriber.id(),
            scope,
            "no such subscription; ignoring removal"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::LayerRouter;
    use crate::client::{ClientId, SubscriberClient, SubscriberHandle};
    use crate::layer::{Layer, PublisherId};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticSubscriber(ClientId);

    #[async_trait]
    impl SubscriberClient for StaticSubscriber {
        fn client_id(&self) -> ClientId {
            self.0
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn closed(&self) {
            futures::future::pending::<()>().await
        }
    }

    fn subscriber() -> SubscriberHandle {
        SubscriberHandle::new(Arc::new(StaticSubscriber(ClientId::random())))
    }

    const LAYER: Layer = Layer::new(1, 0, 0);
    const OTHER_LAYER: Layer = Layer::new(2, 0, 0);

    #[test]
    fn subscribers_include_promiscuous_layer_and_publisher_scoped() {
        let mut router = LayerRouter::new();
        let everything = subscriber();
        let any_publisher = subscriber();
        let scoped = subscriber();
        let scoped_elsewhere = subscriber();

        router.add_subscription(&everything);
        router.add_layer_subscription(&any_publisher, LAYER);
        router.add_layer_from_publisher_subscription(&scoped, LAYER, PublisherId(7));
        router.add_layer_from_publisher_subscription(&scoped_elsewhere, LAYER, PublisherId(8));

        let subscribers = router.subscribers_for_layer_from_publisher(&LAYER, PublisherId(7));

        assert_eq!(subscribers.len(), 3);
        assert!(subscribers.contains(&everything));
        assert!(subscribers.contains(&any_publisher));
        assert!(subscribers.contains(&scoped));
        assert!(!subscribers.contains(&scoped_elsewhere));
    }

    #[test]
    fn subscriber_with_overlapping_scopes_is_returned_once() {
        let mut router = LayerRouter::new();
        let s = subscriber();

        router.add_subscription(&s);
        router.add_layer_subscription(&s, LAYER);
        router.add_layer_from_publisher_subscription(&s, LAYER, PublisherId(1));

        assert_eq!(
            router
                .subscribers_for_layer_from_publisher(&LAYER, PublisherId(1))
                .len(),
            1
        );
    }

    #[test]
    fn remove_of_unknown_subscription_keeps_sequence_number() {
        let mut router = LayerRouter::new();
        let s = subscriber();
        let before = router.subscription_state().sequence_number;

        router.remove_subscription(&s);
        router.remove_layer_subscription(&s, LAYER);
        router.remove_layer_from_publisher_subscription(&s, LAYER, PublisherId(1));

        assert_eq!(router.subscription_state().sequence_number, before);
    }

    #[test]
    fn remove_dead_subscriber_is_total() {
        let mut router = LayerRouter::new();
        let dead = subscriber();
        let alive = subscriber();

        router.add_subscription(&dead);
        router.add_layer_subscription(&dead, LAYER);
        router.add_layer_subscription(&alive, OTHER_LAYER);
        router.add_layer_from_publisher_subscription(&dead, LAYER, PublisherId(3));
        router.add_layer_from_publisher_subscription(&dead, OTHER_LAYER, PublisherId(4));

        assert!(router.remove_dead_subscriber(&dead));

        for layer in [LAYER, OTHER_LAYER] {
            for publisher in [PublisherId(3), PublisherId(4), PublisherId(5)] {
                assert!(!router
                    .subscribers_for_layer_from_publisher(&layer, publisher)
                    .contains(&dead));
            }
        }
        assert!(!router.has_layer_subscriptions(&LAYER));
        assert!(router.has_layer_subscriptions(&OTHER_LAYER));
        assert!(router.subscription_state().associated_layers.is_empty());

        assert!(!router.remove_dead_subscriber(&dead));
    }

    #[test]
    fn subscription_state_reports_layers_and_associated_publishers() {
        let mut router = LayerRouter::new();
        let s = subscriber();

        router.add_layer_subscription(&s, LAYER);
        router.add_layer_from_publisher_subscription(&s, OTHER_LAYER, PublisherId(2));
        router.add_layer_from_publisher_subscription(&s, OTHER_LAYER, PublisherId(9));

        let state = router.subscription_state();

        assert_eq!(state.sequence_number, 3);
        assert_eq!(state.layers.into_iter().collect::<Vec<_>>(), vec![LAYER]);
        let associated = state
            .associated_layers
            .into_iter()
            .next()
            .expect("one associated layer");
        assert_eq!(associated.layer, OTHER_LAYER);
        assert_eq!(
            associated.publisher_ids.into_iter().collect::<Vec<_>>(),
            vec![PublisherId(2), PublisherId(9)]
        );
    }

    #[test]
    fn last_removal_drops_layer_entry() {
        let mut router = LayerRouter::new();
        let first = subscriber();
        let second = subscriber();

        router.add_layer_from_publisher_subscription(&first, LAYER, PublisherId(1));
        router.add_layer_from_publisher_subscription(&second, LAYER, PublisherId(1));
        router.remove_layer_from_publisher_subscription(&first, LAYER, PublisherId(1));
        assert!(router.has_layer_from_publisher_subscriptions(&LAYER, PublisherId(1)));

        router.remove_layer_from_publisher_subscription(&second, LAYER, PublisherId(1));
        assert!(!router.has_layer_from_publisher_subscriptions(&LAYER, PublisherId(1)));
    }
}
