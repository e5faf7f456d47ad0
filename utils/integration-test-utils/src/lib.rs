/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! In-process fakes for the platform collaborators of `vms-broker`.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vms_broker::connection::{
    BaseSessionUnlockListener, BindError, PackageQuery, PublisherService, PublisherTarget,
    ServiceBinder, ServiceConnection, ServiceInfo, SessionId, SessionLifecycle, SessionListener,
    Uid,
};
use vms_broker::{
    AvailableLayers, ClientId, PublisherClient, PublisherListener, SubscriberClient,
    SubscriberHandle, SubscriberListener, SubscriptionState, DEFAULT_BIND_CAPABILITY,
};

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber for the test process. Filter with `RUST_LOG`.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Lets spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn parse_target(client_name: &str) -> PublisherTarget {
    client_name.parse().expect("valid publisher target")
}

// ---------------------------------------------------------------------------
// session lifecycle

#[derive(Default)]
pub struct FakeSessionLifecycle {
    session_listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
    base_unlock_listeners: Mutex<Vec<Arc<dyn BaseSessionUnlockListener>>>,
    base_unlocked: AtomicBool,
    unlocked_sessions: Mutex<HashSet<SessionId>>,
}

impl FakeSessionLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_listener_count(&self) -> usize {
        self.session_listeners.lock().expect("lock listeners").len()
    }

    pub async fn unlock_base_session(&self) {
        self.base_unlocked.store(true, Ordering::SeqCst);
        let listeners: Vec<Arc<dyn BaseSessionUnlockListener>> = self
            .base_unlock_listeners
            .lock()
            .expect("lock listeners")
            .drain(..)
            .collect();
        for listener in listeners {
            listener.on_base_session_unlocked().await;
        }
    }

    pub async fn switch_session(&self, session: SessionId) {
        for listener in self.session_listeners() {
            listener.on_session_switched(session).await;
        }
    }

    pub async fn set_session_unlocked(&self, session: SessionId, unlocked: bool) {
        {
            let mut sessions = self.unlocked_sessions.lock().expect("lock sessions");
            if unlocked {
                sessions.insert(session);
            } else {
                sessions.remove(&session);
            }
        }
        for listener in self.session_listeners() {
            listener.on_session_unlock_changed(session, unlocked).await;
        }
    }

    /// Marks `session` unlocked without notifying listeners.
    pub fn mark_session_unlocked(&self, session: SessionId) {
        self.unlocked_sessions
            .lock()
            .expect("lock sessions")
            .insert(session);
    }

    fn session_listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        self.session_listeners.lock().expect("lock listeners").clone()
    }
}

#[async_trait]
impl SessionLifecycle for FakeSessionLifecycle {
    async fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.session_listeners
            .lock()
            .expect("lock listeners")
            .push(listener);
    }

    async fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.session_listeners
            .lock()
            .expect("lock listeners")
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    async fn run_on_base_session_unlock(&self, listener: Arc<dyn BaseSessionUnlockListener>) {
        if self.base_unlocked.load(Ordering::SeqCst) {
            listener.on_base_session_unlocked().await;
        } else {
            self.base_unlock_listeners
                .lock()
                .expect("lock listeners")
                .push(listener);
        }
    }

    fn is_session_unlocked(&self, session: SessionId) -> bool {
        (session == SessionId::BASE && self.base_unlocked.load(Ordering::SeqCst))
            || self
                .unlocked_sessions
                .lock()
                .expect("lock sessions")
                .contains(&session)
    }
}

// ---------------------------------------------------------------------------
// service binding

#[derive(Clone)]
struct BindRecord {
    target: PublisherTarget,
    session: SessionId,
    connection: Arc<dyn ServiceConnection>,
}

/// Accepts or refuses every bind and keeps the connections it was handed so tests
/// can deliver callbacks from outside the `bind` call.
pub struct RecordingBinder {
    accept: AtomicBool,
    error: AtomicBool,
    binds: Mutex<Vec<BindRecord>>,
    unbinds: AtomicUsize,
}

impl Default for RecordingBinder {
    fn default() -> Self {
        Self {
            accept: AtomicBool::new(true),
            error: AtomicBool::new(false),
            binds: Mutex::new(Vec::new()),
            unbinds: AtomicUsize::new(0),
        }
    }
}

impl RecordingBinder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// Makes every later bind fail with a [`BindError`].
    pub fn set_error(&self, error: bool) {
        self.error.store(error, Ordering::SeqCst);
    }

    pub fn bind_count(&self) -> usize {
        self.binds.lock().expect("lock binds").len()
    }

    pub fn unbind_count(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    /// Number of binds requested for `client_name` in `session`.
    pub fn bind_count_for(&self, client_name: &str, session: SessionId) -> usize {
        let target = parse_target(client_name);
        self.binds
            .lock()
            .expect("lock binds")
            .iter()
            .filter(|record| record.target == target && record.session == session)
            .count()
    }

    /// Sessions that were asked to bind, in request order.
    pub fn bound_sessions(&self) -> Vec<SessionId> {
        self.binds
            .lock()
            .expect("lock binds")
            .iter()
            .map(|record| record.session)
            .collect()
    }

    fn latest_connection(&self, client_name: &str, session: SessionId) -> Arc<dyn ServiceConnection> {
        let target = parse_target(client_name);
        self.binds
            .lock()
            .expect("lock binds")
            .iter()
            .rev()
            .find(|record| record.target == target && record.session == session)
            .map(|record| record.connection.clone())
            .expect("bind requested for target")
    }

    /// Delivers a connected callback for the latest bind of `client_name`.
    pub async fn connect(&self, client_name: &str, session: SessionId) -> Arc<FakePublisherClient> {
        let client = FakePublisherClient::new();
        self.latest_connection(client_name, session)
            .on_service_connected(client.clone())
            .await;
        client
    }

    pub async fn disconnect(&self, client_name: &str, session: SessionId) {
        self.latest_connection(client_name, session)
            .on_service_disconnected()
            .await;
    }

    pub async fn binding_died(&self, client_name: &str, session: SessionId) {
        self.latest_connection(client_name, session)
            .on_binding_died()
            .await;
    }
}

#[async_trait]
impl ServiceBinder for RecordingBinder {
    async fn bind(
        &self,
        target: &PublisherTarget,
        session: SessionId,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<bool, BindError> {
        self.binds.lock().expect("lock binds").push(BindRecord {
            target: target.clone(),
            session,
            connection,
        });
        if self.error.load(Ordering::SeqCst) {
            return Err(BindError::PermissionDenied(target.flatten()));
        }
        Ok(self.accept.load(Ordering::SeqCst))
    }

    async fn unbind(&self, _connection: &Arc<dyn ServiceConnection>) -> Result<(), BindError> {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// package lookup

#[derive(Default)]
pub struct FakePackageQuery {
    services: Mutex<HashMap<PublisherTarget, ServiceInfo>>,
    names: Mutex<HashMap<Uid, String>>,
}

impl FakePackageQuery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn install(&self, client_name: &str, uid: Uid, capability: Option<&str>) {
        self.services.lock().expect("lock services").insert(
            parse_target(client_name),
            ServiceInfo {
                uid,
                capability: capability.map(str::to_string),
            },
        );
    }

    /// Installs a service that declares the default bind capability.
    pub fn install_publisher(&self, client_name: &str, uid: Uid) {
        self.install(client_name, uid, Some(DEFAULT_BIND_CAPABILITY));
    }

    pub fn set_name_for_uid(&self, uid: Uid, name: &str) {
        self.names
            .lock()
            .expect("lock names")
            .insert(uid, name.to_string());
    }
}

impl PackageQuery for FakePackageQuery {
    fn service_info(&self, target: &PublisherTarget) -> Option<ServiceInfo> {
        self.services
            .lock()
            .expect("lock services")
            .get(target)
            .cloned()
    }

    fn name_for_uid(&self, uid: Uid) -> Option<String> {
        self.names.lock().expect("lock names").get(&uid).cloned()
    }
}

// ---------------------------------------------------------------------------
// publisher service

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublisherServiceEvent {
    Connected(String),
    Disconnected(String),
}

#[derive(Default)]
pub struct RecordingPublisherService {
    events: Mutex<Vec<PublisherServiceEvent>>,
}

impl RecordingPublisherService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PublisherServiceEvent> {
        self.events.lock().expect("lock events").clone()
    }

    pub fn connected_count(&self, display_name: &str) -> usize {
        self.count(&PublisherServiceEvent::Connected(display_name.to_string()))
    }

    pub fn disconnected_count(&self, display_name: &str) -> usize {
        self.count(&PublisherServiceEvent::Disconnected(display_name.to_string()))
    }

    fn count(&self, event: &PublisherServiceEvent) -> usize {
        self.events
            .lock()
            .expect("lock events")
            .iter()
            .filter(|recorded| *recorded == event)
            .count()
    }
}

#[async_trait]
impl PublisherService for RecordingPublisherService {
    async fn on_client_connected(&self, display_name: &str, _client: Arc<dyn PublisherClient>) {
        self.events
            .lock()
            .expect("lock events")
            .push(PublisherServiceEvent::Connected(display_name.to_string()));
    }

    async fn on_client_disconnected(&self, display_name: &str) {
        self.events
            .lock()
            .expect("lock events")
            .push(PublisherServiceEvent::Disconnected(display_name.to_string()));
    }
}

// ---------------------------------------------------------------------------
// remote endpoints

pub struct FakePublisherClient {
    id: ClientId,
}

impl FakePublisherClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::random(),
        })
    }
}

impl PublisherClient for FakePublisherClient {
    fn client_id(&self) -> ClientId {
        self.id
    }
}

/// Subscriber endpoint whose death is triggered by [`FakeSubscriber::kill`].
pub struct FakeSubscriber {
    id: ClientId,
    closed: watch::Sender<bool>,
}

impl FakeSubscriber {
    pub fn new() -> Arc<Self> {
        Self::with_id(ClientId::random())
    }

    /// Another handle to the same remote endpoint as `id`.
    pub fn with_id(id: ClientId) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self { id, closed })
    }

    pub fn dead() -> Arc<Self> {
        let subscriber = Self::new();
        subscriber.kill();
        subscriber
    }

    pub fn kill(&self) {
        self.closed.send_replace(true);
    }

    pub fn handle(self: &Arc<Self>) -> SubscriberHandle {
        SubscriberHandle::new(self.clone())
    }
}

#[async_trait]
impl SubscriberClient for FakeSubscriber {
    fn client_id(&self) -> ClientId {
        self.id
    }

    fn is_alive(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

// ---------------------------------------------------------------------------
// broker listeners

#[derive(Default)]
pub struct RecordingPublisherListener {
    states: Mutex<Vec<SubscriptionState>>,
}

impl RecordingPublisherListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<SubscriptionState> {
        self.states.lock().expect("lock states").clone()
    }

    pub fn count(&self) -> usize {
        self.states.lock().expect("lock states").len()
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
pub struct RecordingSubscriberListener {
    availability: Mutex<Vec<AvailableLayers>>,
}

impl RecordingSubscriberListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn availability(&self) -> Vec<AvailableLayers> {
        self.availability
            .lock()
            .expect("lock availability")
            .clone()
    }
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
