//! Layer broker: routing, availability and publisher identity behind one lock.

use crate::broker::listeners::{ListenerSet, PublisherListener, SubscriberListener};
use crate::client::SubscriberHandle;
use crate::layer::{AvailableLayers, Layer, LayersOffering, PublisherId, SubscriptionState};
use crate::observability::{events, fields};
use crate::routing::availability::AvailabilityAggregator;
use crate::routing::layer_router::LayerRouter;
use crate::routing::publisher_registry::PublisherRegistry;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const COMPONENT: &str = "layer_broker";

/// Identity of one live publisher connection, used to key its offerings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionToken(pub Uuid);

impl ConnectionToken {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ConnectionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Default)]
struct BrokerState {
    router: LayerRouter,
    registry: PublisherRegistry,
    availability: AvailabilityAggregator,
    offerings: HashMap<ConnectionToken, HashMap<PublisherId, LayersOffering>>,
}

impl BrokerState {
    fn update_layer_availability(&mut self) -> AvailableLayers {
        self.availability.set_publishers_offering(
            self.offerings
                .values()
                .flat_map(|publisher_offerings| publisher_offerings.values()),
        );
        self.availability.available_layers()
    }
}

/// Subscription routing and layer availability shared by publisher and subscriber
/// services.
///
/// Listener callbacks always run after the state lock is released, with the
/// snapshot captured while it was held.
pub struct LayerBroker {
    state: Mutex<BrokerState>,
    publisher_listeners: ListenerSet<dyn PublisherListener>,
    subscriber_listeners: ListenerSet<dyn SubscriberListener>,
}

impl Default for LayerBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState {
                router: LayerRouter::new(),
                registry: PublisherRegistry::new(),
                availability: AvailabilityAggregator::new(),
                offerings: HashMap::new(),
            }),
            publisher_listeners: ListenerSet::new(),
            subscriber_listeners: ListenerSet::new(),
        }
    }

    pub fn add_publisher_listener(&self, listener: Arc<dyn PublisherListener>) {
        self.publisher_listeners.add(listener);
    }

    pub fn remove_publisher_listener(&self, listener: &Arc<dyn PublisherListener>) {
        self.publisher_listeners.remove(listener);
    }

    pub fn add_subscriber_listener(&self, listener: Arc<dyn SubscriberListener>) {
        self.subscriber_listeners.add(listener);
    }

    pub fn remove_subscriber_listener(&self, listener: &Arc<dyn SubscriberListener>) {
        self.subscriber_listeners.remove(listener);
    }

    /// Subscribes to every layer from every publisher. Publishers are not notified.
    pub async fn add_subscription(&self, subscriber: &SubscriberHandle) {
        self.state.lock().await.router.add_subscription(subscriber);
    }

    pub async fn remove_subscription(&self, subscriber: &SubscriberHandle) {
        self.state.lock().await.router.remove_subscription(subscriber);
    }

    pub async fn add_layer_subscription(&self, subscriber: &SubscriberHandle, layer: Layer) {
        let changed_state = {
            let mut state = self.state.lock().await;
            let first_subscription_for_layer = !state.router.has_layer_subscriptions(&layer);
            state.router.add_layer_subscription(subscriber, layer);

            first_subscription_for_layer.then(|| state.router.subscription_state())
        };

        if let Some(subscription_state) = changed_state {
            self.notify_of_subscription_change(subscription_state).await;
        }
    }

    pub async fn remove_layer_subscription(&self, subscriber: &SubscriberHandle, layer: Layer) {
        let changed_state = {
            let mut state = self.state.lock().await;
            if !state.router.has_layer_subscriptions(&layer) {
                debug!(
                    event = events::SUBSCRIPTION_REMOVE_MISSING,
                    component = COMPONENT,
                    layer = %fields::format_layer(&layer),
                    "trying to remove a layer with no subscription"
                );
                return;
            }

            state.router.remove_layer_subscription(subscriber, layer);
            let layer_has_subscribers = state.router.has_layer_subscriptions(&layer);

            (!layer_has_subscribers).then(|| state.router.subscription_state())
        };

        if let Some(subscription_state) = changed_state {
            self.notify_of_subscription_change(subscription_state).await;
        }
    }

    pub async fn add_layer_from_publisher_subscription(
        &self,
        subscriber: &SubscriberHandle,
        layer: Layer,
        publisher_id: PublisherId,
    ) {
        let changed_state = {
            let mut state = self.state.lock().await;
            let first_subscription_for_layer = !(state.router.has_layer_subscriptions(&layer)
                || state
                    .router
                    .has_layer_from_publisher_subscriptions(&layer, publisher_id));
            state
                .router
                .add_layer_from_publisher_subscription(subscriber, layer, publisher_id);

            first_subscription_for_layer.then(|| state.router.subscription_state())
        };

        if let Some(subscription_state) = changed_state {
            self.notify_of_subscription_change(subscription_state).await;
        }
    }

    pub async fn remove_layer_from_publisher_subscription(
        &self,
        subscriber: &SubscriberHandle,
        layer: Layer,
        publisher_id: PublisherId,
    ) {
        let changed_state = {
            let mut state = self.state.lock().await;
            if !state
                .router
                .has_layer_from_publisher_subscriptions(&layer, publisher_id)
            {
                debug!(
                    event = events::SUBSCRIPTION_REMOVE_MISSING,
                    component = COMPONENT,
                    layer = %fields::format_layer(&layer),
                    publisher = %fields::format_publisher(publisher_id),
                    "trying to remove a publisher-scoped layer with no subscription"
                );
                return;
            }

            state
                .router
                .remove_layer_from_publisher_subscription(subscriber, layer, publisher_id);
            let layer_has_subscribers = state.router.has_layer_subscriptions(&layer)
                || state
                    .router
                    .has_layer_from_publisher_subscriptions(&layer, publisher_id);

            (!layer_has_subscribers).then(|| state.router.subscription_state())
        };

        if let Some(subscription_state) = changed_state {
            self.notify_of_subscription_change(subscription_state).await;
        }
    }

    /// Purges every subscription of a subscriber that went away.
    pub async fn remove_dead_subscriber(&self, subscriber: &SubscriberHandle) {
        let changed_state = {
            let mut state = self.state.lock().await;
            state
                .router
                .remove_dead_subscriber(subscriber)
                .then(|| state.router.subscription_state())
        };

        if let Some(subscription_state) = changed_state {
            self.notify_of_subscription_change(subscription_state).await;
        }
    }

    pub async fn subscribers_for_layer_from_publisher(
        &self,
        layer: &Layer,
        publisher_id: PublisherId,
    ) -> HashSet<SubscriberHandle> {
        self.state
            .lock()
            .await
            .router
            .subscribers_for_layer_from_publisher(layer, publisher_id)
    }

    pub async fn subscription_state(&self) -> SubscriptionState {
        self.state.lock().await.router.subscription_state()
    }

    /// Assigns an idempotent id for `publisher_info`: the same bytes always map to
    /// the same id for the lifetime of the broker.
    pub async fn publisher_id(&self, publisher_info: &[u8]) -> PublisherId {
        let publisher_id = self.state.lock().await.registry.id_for_info(publisher_info);
        info!(
            event = events::PUBLISHER_ID_REQUESTED,
            component = COMPONENT,
            publisher_id = publisher_id.0,
            "publisher id requested"
        );
        publisher_id
    }

    /// Info registered through [`Self::publisher_id`]; empty for an unknown id.
    pub async fn publisher_info(&self, publisher_id: PublisherId) -> Vec<u8> {
        self.state
            .lock()
            .await
            .registry
            .publisher_info(publisher_id)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Replaces the offering previously set by `token` for the same publisher id.
    pub async fn set_publisher_layers_offering(
        &self,
        token: ConnectionToken,
        offering: LayersOffering,
    ) {
        let publisher_id = offering.publisher_id;
        let available_layers = {
            let mut state = self.state.lock().await;
            state
                .offerings
                .entry(token)
                .or_default()
                .insert(publisher_id, offering);
            state.update_layer_availability()
        };

        info!(
            event = events::OFFERING_SET,
            component = COMPONENT,
            token = %token,
            publisher = %fields::format_publisher(publisher_id),
            "publisher layers offering set"
        );
        self.notify_of_availability_change(available_layers).await;
    }

    /// Drops every offering made through `token`.
    pub async fn remove_dead_publisher(&self, token: ConnectionToken) {
        let available_layers = {
            let mut state = self.state.lock().await;
            let removed = state.offerings.remove(&token);
            debug!(
                event = events::DEAD_PUBLISHER_REMOVED,
                component = COMPONENT,
                token = %token,
                offerings = removed.as_ref().map_or(0, HashMap::len),
                "removing dead publisher offerings"
            );
            state.update_layer_availability()
        };

        self.notify_of_availability_change(available_layers).await;
    }

    pub async fn available_layers(&self) -> AvailableLayers {
        self.state.lock().await.availability.available_layers()
    }

    async fn notify_of_subscription_change(&self, subscription_state: SubscriptionState) {
        let listeners = self.publisher_listeners.snapshot();
        info!(
            event = events::NOTIFY_SUBSCRIPTION_CHANGE,
            component = COMPONENT,
            sequence_number = subscription_state.sequence_number,
            layers = %fields::format_layers(&subscription_state.layers),
            listeners = listeners.len(),
            "notifying publishers of subscriptions"
        );
        for listener in listeners.iter() {
            listener.on_subscription_change(&subscription_state).await;
        }
    }

    async fn notify_of_availability_change(&self, available_layers: AvailableLayers) {
        let listeners = self.subscriber_listeners.snapshot();
        info!(
            event = events::NOTIFY_AVAILABILITY_CHANGE,
            component = COMPONENT,
            sequence_number = available_layers.sequence_number,
            layers = %fields::format_layers(available_layers.layers.keys()),
            listeners = listeners.len(),
            "notifying subscribers of layers availability"
        );
        for listener in listeners.iter() {
            listener.on_layers_availability_change(&available_layers).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionToken, LayerBroker};
    use crate::broker::listeners::{PublisherListener, SubscriberListener};
    use crate::client::{ClientId, SubscriberClient, SubscriberHandle};
    use crate::layer::{AvailableLayers, Layer, LayersOffering, PublisherId, SubscriptionState};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex as StdMutex};

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

    #[derive(Default)]
    struct RecordingPublisherListener {
        states: StdMutex<Vec<SubscriptionState>>,
    }

    impl RecordingPublisherListener {
        fn count(&self) -> usize {
            self.states.lock().expect("lock states").len()
        }

        fn last(&self) -> Option<SubscriptionState> {
            self.states.lock().expect("lock states").last().cloned()
        }
    }

    #[async_trait]
    impl PublisherListener for RecordingPublisherListener {
        async fn on_subscription_change(&self, subscription_state: &SubscriptionState) {
            self.states
                .lock()
                .expect("lock states")
                .push(subscription_state.clone());
        }
    }

    #[derive(Default)]
    struct RecordingSubscriberListener {
        availability: StdMutex<Vec<AvailableLayers>>,
    }

    #[async_trait]
    impl SubscriberListener for RecordingSubscriberListener {
        async fn on_layers_availability_change(&self, available_layers: &AvailableLayers) {
            self.availability
                .lock()
                .expect("lock availability")
                .push(available_layers.clone());
        }
    }

    /// Calls back into the broker from inside the notification.
    struct ReentrantListener {
        broker: Arc<LayerBroker>,
        observed: StdMutex<Vec<SubscriptionState>>,
    }

    #[async_trait]
    impl PublisherListener for ReentrantListener {
        async fn on_subscription_change(&self, _subscription_state: &SubscriptionState) {
            let current = self.broker.subscription_state().await;
            self.observed.lock().expect("lock observed").push(current);
        }
    }

    const LAYER: Layer = Layer::new(1, 0, 0);

    #[tokio::test]
    async fn second_subscriber_to_layer_does_not_notify_publishers() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        broker.add_publisher_listener(listener.clone());
        let first = subscriber();
        let second = subscriber();

        broker.add_layer_subscription(&first, LAYER).await;
        broker.add_layer_subscription(&second, LAYER).await;
        assert_eq!(listener.count(), 1);

        broker.remove_layer_subscription(&first, LAYER).await;
        assert_eq!(listener.count(), 1);

        broker.remove_layer_subscription(&second, LAYER).await;
        assert_eq!(listener.count(), 2);
        assert!(listener.last().expect("state").layers.is_empty());
    }

    #[tokio::test]
    async fn publisher_scoped_subscription_under_layer_subscription_does_not_notify() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        broker.add_publisher_listener(listener.clone());
        let s = subscriber();

        broker.add_layer_subscription(&s, LAYER).await;
        broker
            .add_layer_from_publisher_subscription(&s, LAYER, PublisherId(4))
            .await;
        assert_eq!(listener.count(), 1);

        broker
            .remove_layer_from_publisher_subscription(&s, LAYER, PublisherId(4))
            .await;
        assert_eq!(listener.count(), 1);
    }

    #[tokio::test]
    async fn removing_missing_subscription_is_silent() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        broker.add_publisher_listener(listener.clone());
        let s = subscriber();

        broker.remove_layer_subscription(&s, LAYER).await;
        broker
            .remove_layer_from_publisher_subscription(&s, LAYER, PublisherId(1))
            .await;
        broker.remove_subscription(&s).await;
        broker.remove_dead_subscriber(&s).await;

        assert_eq!(listener.count(), 0);
    }

    #[tokio::test]
    async fn promiscuous_subscription_routes_without_notification() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        broker.add_publisher_listener(listener.clone());
        let s = subscriber();

        broker.add_subscription(&s).await;

        assert!(broker
            .subscribers_for_layer_from_publisher(&LAYER, PublisherId(99))
            .await
            .contains(&s));
        assert_eq!(listener.count(), 0);

        broker.remove_subscription(&s).await;
        assert!(broker
            .subscribers_for_layer_from_publisher(&LAYER, PublisherId(99))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn dead_subscriber_purge_notifies_once() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        broker.add_publisher_listener(listener.clone());
        let s = subscriber();

        broker.add_layer_subscription(&s, LAYER).await;
        broker.remove_dead_subscriber(&s).await;

        assert_eq!(listener.count(), 2);
        assert!(broker.subscription_state().await.layers.is_empty());
    }

    #[tokio::test]
    async fn offerings_are_replaced_per_token_and_publisher() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingSubscriberListener::default());
        broker.add_subscriber_listener(listener.clone());
        let token = ConnectionToken::random();
        let other_layer = Layer::new(2, 0, 0);

        broker
            .set_publisher_layers_offering(token, LayersOffering::of_layers(PublisherId(1), [LAYER]))
            .await;
        broker
            .set_publisher_layers_offering(
                token,
                LayersOffering::of_layers(PublisherId(1), [other_layer]),
            )
            .await;

        let available = broker.available_layers().await;
        assert!(!available.contains(&LAYER));
        assert!(available.contains(&other_layer));
        assert_eq!(listener.availability.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn remove_dead_publisher_drops_all_token_offerings_and_always_notifies() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingSubscriberListener::default());
        broker.add_subscriber_listener(listener.clone());
        let token = ConnectionToken::random();
        let survivor = ConnectionToken::random();
        let other_layer = Layer::new(2, 0, 0);

        broker
            .set_publisher_layers_offering(token, LayersOffering::of_layers(PublisherId(1), [LAYER]))
            .await;
        broker
            .set_publisher_layers_offering(token, LayersOffering::of_layers(PublisherId(2), [LAYER]))
            .await;
        broker
            .set_publisher_layers_offering(
                survivor,
                LayersOffering::of_layers(PublisherId(3), [other_layer]),
            )
            .await;

        broker.remove_dead_publisher(token).await;
        broker.remove_dead_publisher(ConnectionToken::random()).await;

        let available = broker.available_layers().await;
        assert_eq!(available.layer_set(), [other_layer].into_iter().collect());
        assert_eq!(listener.availability.lock().expect("lock").len(), 5);
    }

    #[tokio::test]
    async fn publisher_info_round_trips_and_unknown_is_empty() {
        let broker = LayerBroker::new();

        let id = broker.publisher_id(b"info").await;

        assert_eq!(broker.publisher_id(b"info").await, id);
        assert_eq!(broker.publisher_info(id).await, b"info".to_vec());
        assert!(broker.publisher_info(PublisherId(id.0 + 10)).await.is_empty());
    }

    #[tokio::test]
    async fn listener_may_reenter_broker_during_notification() {
        let broker = Arc::new(LayerBroker::new());
        let listener = Arc::new(ReentrantListener {
            broker: broker.clone(),
            observed: StdMutex::new(Vec::new()),
        });
        broker.add_publisher_listener(listener.clone());

        broker.add_layer_subscription(&subscriber(), LAYER).await;

        let observed = listener.observed.lock().expect("lock observed");
        assert_eq!(observed.len(), 1);
        assert!(observed[0].layers.contains(&LAYER));
    }

    #[tokio::test]
    async fn removed_listener_is_not_notified() {
        let broker = LayerBroker::new();
        let listener = Arc::new(RecordingPublisherListener::default());
        let as_dyn: Arc<dyn PublisherListener> = listener.clone();
        broker.add_publisher_listener(as_dyn.clone());
        broker.remove_publisher_listener(&as_dyn);

        broker.add_layer_subscription(&subscriber(), LAYER).await;

        assert_eq!(listener.count(), 0);
    }
}
