//! Publisher binding supervision and subscriber tracking across session changes.

use crate::broker::LayerBroker;
use crate::client::{ClientId, PublisherClient, SubscriberClient, SubscriberHandle};
use crate::config::BrokerConfig;
use crate::connection::collaborators::{
    BaseSessionUnlockListener, PackageQuery, PublisherService, ServiceBinder, SessionLifecycle,
    SessionListener,
};
use crate::connection::publisher_connection::{ConnectionDeps, PublisherConnection};
use crate::connection::session::{SessionId, Uid};
use crate::connection::state::ConnectionState;
use crate::connection::subscriber_connection::SubscriberConnection;
use crate::connection::target::PublisherTarget;
use crate::observability::events;
use crate::stats::ConnectionStatsLogger;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use up_rust::{UCode, UStatus};

const COMPONENT: &str = "connection_manager";

/// Identity used for the HAL data-source pseudo-client.
pub const HAL_CLIENT_NAME: &str = "HalClient";
/// Package name reported for unknown subscribers and unresolvable uids.
pub const UNKNOWN_PACKAGE: &str = "UnknownPackage";

/// Platform facilities a [`ConnectionManager`] is wired to.
pub struct ManagerCollaborators {
    pub session_lifecycle: Arc<dyn SessionLifecycle>,
    pub binder: Arc<dyn ServiceBinder>,
    pub packages: Arc<dyn PackageQuery>,
    pub publisher_service: Arc<dyn PublisherService>,
    pub stats: Arc<dyn ConnectionStatsLogger>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientScope {
    System,
    User,
}

impl ClientScope {
    fn as_str(self) -> &'static str {
        match self {
            ClientScope::System => "system",
            ClientScope::User => "user",
        }
    }
}

struct ManagerState {
    released: bool,
    base_unlocked: bool,
    current_session: SessionId,
    system_clients: HashMap<String, Arc<PublisherConnection>>,
    user_clients: HashMap<String, Arc<PublisherConnection>>,
    hal_client: Option<Arc<dyn PublisherClient>>,
    subscribers: HashMap<ClientId, SubscriberConnection>,
}

impl ManagerState {
    fn clients(&self, scope: ClientScope) -> &HashMap<String, Arc<PublisherConnection>> {
        match scope {
            ClientScope::System => &self.system_clients,
            ClientScope::User => &self.user_clients,
        }
    }

    fn clients_mut(&mut self, scope: ClientScope) -> &mut HashMap<String, Arc<PublisherConnection>> {
        match scope {
            ClientScope::System => &mut self.system_clients,
            ClientScope::User => &mut self.user_clients,
        }
    }

    fn take_subscribers(
        &mut self,
        filter: impl Fn(&SubscriberConnection) -> bool,
    ) -> Vec<SubscriberConnection> {
        let ids: Vec<ClientId> = self
            .subscribers
            .iter()
            .filter(|(_, subscriber)| filter(subscriber))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.subscribers.remove(&id))
            .collect()
    }
}

/// Forwards session events to the manager without keeping it alive.
struct SessionEvents {
    manager: Weak<ConnectionManager>,
}

#[async_trait]
impl SessionListener for SessionEvents {
    async fn on_session_switched(&self, session: SessionId) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_session_switched(session).await;
        }
    }

    async fn on_session_unlock_changed(&self, session: SessionId, unlocked: bool) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_session_unlock_changed(session, unlocked).await;
        }
    }
}

#[async_trait]
impl BaseSessionUnlockListener for SessionEvents {
    async fn on_base_session_unlocked(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_base_session_unlocked().await;
        }
    }
}

/// Binds publisher services for the base session and the current foreground session,
/// rebinds them when they drop, and tracks subscriber processes until they go away.
///
/// Collaborator callbacks and broker purges run after the manager lock is released.
pub struct ConnectionManager {
    config: BrokerConfig,
    own_uid: Uid,
    broker: Arc<LayerBroker>,
    collaborators: ManagerCollaborators,
    session_events: Arc<SessionEvents>,
    self_ref: Weak<ConnectionManager>,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    /// `own_uid` identifies this process; it is recorded for the HAL pseudo-client.
    pub fn new(
        config: BrokerConfig,
        own_uid: Uid,
        broker: Arc<LayerBroker>,
        collaborators: ManagerCollaborators,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            own_uid,
            broker,
            collaborators,
            session_events: Arc::new(SessionEvents {
                manager: self_ref.clone(),
            }),
            self_ref: self_ref.clone(),
            state: Mutex::new(ManagerState {
                released: false,
                base_unlocked: false,
                current_session: SessionId::NULL,
                system_clients: HashMap::new(),
                user_clients: HashMap::new(),
                hal_client: None,
                subscribers: HashMap::new(),
            }),
        })
    }

    pub fn broker(&self) -> &Arc<LayerBroker> {
        &self.broker
    }

    /// Registers for session events.
    pub async fn init(&self) {
        self.state.lock().await.released = false;
        let lifecycle = &self.collaborators.session_lifecycle;
        lifecycle
            .run_on_base_session_unlock(self.session_events.clone())
            .await;
        lifecycle
            .add_session_listener(self.session_events.clone())
            .await;
    }

    /// Stops listening for session events and tears down every connection and
    /// subscriber.
    pub async fn release(&self) {
        let session_listener: Arc<dyn SessionListener> = self.session_events.clone();
        self.collaborators
            .session_lifecycle
            .remove_session_listener(&session_listener)
            .await;

        let (hal_client, connections, subscribers) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.released = true;
            let hal_client = state.hal_client.take();
            let connections: Vec<Arc<PublisherConnection>> = state
                .system_clients
                .drain()
                .chain(state.user_clients.drain())
                .map(|(_, connection)| connection)
                .collect();
            let subscribers = state.take_subscribers(|_| true);
            (hal_client, connections, subscribers)
        };

        if hal_client.is_some() {
            self.collaborators
                .publisher_service
                .on_client_disconnected(HAL_CLIENT_NAME)
                .await;
        }
        self.terminate_connections(connections).await;
        self.terminate_subscribers(subscribers).await;
    }

    pub async fn on_base_session_unlocked(&self) {
        self.state.lock().await.base_unlocked = true;
        info!(
            event = events::SESSION_UNLOCKED,
            component = COMPONENT,
            session = %SessionId::BASE,
            "base session unlocked"
        );
        self.bind_to_system_clients().await;
    }

    pub async fn on_session_switched(&self, session: SessionId) {
        let (connections, subscribers) = {
            let mut state = self.state.lock().await;
            if state.current_session == session {
                (Vec::new(), Vec::new())
            } else {
                state.current_session = session;
                let connections: Vec<Arc<PublisherConnection>> = state
                    .user_clients
                    .drain()
                    .map(|(_, connection)| connection)
                    .collect();
                let subscribers = state.take_subscribers(|subscriber| {
                    subscriber.session != session && !subscriber.session.is_base()
                });
                info!(
                    event = events::SESSION_SWITCHED,
                    component = COMPONENT,
                    session = %session,
                    terminated_connections = connections.len(),
                    terminated_subscribers = subscribers.len(),
                    "foreground session switched"
                );
                (connections, subscribers)
            }
        };

        self.terminate_connections(connections).await;
        self.terminate_subscribers(subscribers).await;
        self.bind_to_user_clients().await;
    }

    pub async fn on_session_unlock_changed(&self, session: SessionId, unlocked: bool) {
        let current_session = self.state.lock().await.current_session;
        if current_session == session && unlocked {
            info!(
                event = events::SESSION_UNLOCKED,
                component = COMPONENT,
                session = %session,
                "foreground session unlocked"
            );
            self.bind_to_user_clients().await;
        }
    }

    /// Tracks `client` as a subscriber owned by `calling_uid`. Registering the same
    /// endpoint again is a no-op; nothing is registered once released.
    pub async fn add_subscriber(
        &self,
        client: Arc<dyn SubscriberClient>,
        calling_uid: Uid,
    ) -> Result<(), UStatus> {
        if !client.is_alive() {
            error!(
                event = events::SUBSCRIBER_REJECTED,
                component = COMPONENT,
                uid = %calling_uid,
                "subscriber already dead"
            );
            return Err(UStatus::fail_with_code(
                UCode::INVALID_ARGUMENT,
                "Subscriber must be a live endpoint",
            ));
        }

        let package_name = self
            .collaborators
            .packages
            .name_for_uid(calling_uid)
            .unwrap_or_else(|| UNKNOWN_PACKAGE.to_string());
        let handle = SubscriberHandle::new(client);

        let mut state = self.state.lock().await;
        if state.released {
            warn!(
                event = events::SUBSCRIBER_REJECTED,
                component = COMPONENT,
                uid = %calling_uid,
                "connection manager released"
            );
            return Err(UStatus::fail_with_code(
                UCode::UNAVAILABLE,
                "Connection manager is released",
            ));
        }
        if state.subscribers.contains_key(&handle.id()) {
            debug!(
                event = events::SUBSCRIBER_REGISTERED,
                component = COMPONENT,
                subscriber = %handle.id(),
                "subscriber already registered"
            );
            return Ok(());
        }

        let session = calling_uid.session();
        if session != state.current_session && !session.is_base() {
            error!(
                event = events::SUBSCRIBER_REJECTED,
                component = COMPONENT,
                uid = %calling_uid,
                session = %session,
                current_session = %state.current_session,
                "subscriber not in foreground or base session"
            );
            return Err(UStatus::fail_with_code(
                UCode::PERMISSION_DENIED,
                "Caller must be foreground session or base session",
            ));
        }

        let subscriber = SubscriberConnection {
            watch: Some(self.spawn_liveness_watch(handle.clone())),
            handle,
            uid: calling_uid,
            package_name,
            session,
        };
        info!(
            event = events::SUBSCRIBER_REGISTERED,
            component = COMPONENT,
            subscriber = %subscriber.handle.id(),
            registration = %subscriber,
            "registered subscriber"
        );
        state.subscribers.insert(subscriber.handle.id(), subscriber);
        Ok(())
    }

    /// Stops tracking `client` and purges its subscriptions. Unknown clients are
    /// ignored.
    pub async fn remove_subscriber(&self, client: &dyn SubscriberClient) {
        let subscriber = self
            .state
            .lock()
            .await
            .subscribers
            .remove(&client.client_id());
        if let Some(subscriber) = subscriber {
            self.terminate_subscribers(vec![subscriber]).await;
        }
    }

    pub async fn get_all_subscribers(&self) -> Vec<SubscriberHandle> {
        self.state
            .lock()
            .await
            .subscribers
            .values()
            .map(|subscriber| subscriber.handle.clone())
            .collect()
    }

    pub async fn get_subscriber_uid(&self, client: &dyn SubscriberClient) -> Option<Uid> {
        self.state
            .lock()
            .await
            .subscribers
            .get(&client.client_id())
            .map(|subscriber| subscriber.uid)
    }

    pub async fn get_package_name(&self, client: &dyn SubscriberClient) -> String {
        self.state
            .lock()
            .await
            .subscribers
            .get(&client.client_id())
            .map_or_else(
                || UNKNOWN_PACKAGE.to_string(),
                |subscriber| subscriber.package_name.clone(),
            )
    }

    /// Registers the HAL data source as a publisher and its subscriber side as a
    /// base-session subscriber.
    pub async fn on_hal_connected(
        &self,
        publisher_client: Arc<dyn PublisherClient>,
        subscriber_client: Arc<dyn SubscriberClient>,
    ) {
        {
            let mut state = self.state.lock().await;
            state.hal_client = Some(publisher_client.clone());
            let handle = SubscriberHandle::new(subscriber_client);
            let replaced = state.subscribers.insert(
                handle.id(),
                SubscriberConnection {
                    handle,
                    uid: self.own_uid,
                    package_name: HAL_CLIENT_NAME.to_string(),
                    session: SessionId::BASE,
                    watch: None,
                },
            );
            if let Some(mut replaced) = replaced {
                replaced.detach_watch();
            }
        }

        self.collaborators
            .publisher_service
            .on_client_connected(HAL_CLIENT_NAME, publisher_client)
            .await;
        self.collaborators
            .stats
            .log_connection_state(self.own_uid, ConnectionState::Connected);
        info!(
            event = events::HAL_CONNECTED,
            component = COMPONENT,
            "hal client connected"
        );
    }

    pub async fn on_hal_disconnected(&self) {
        let (was_connected, subscribers) = {
            let mut state = self.state.lock().await;
            let was_connected = state.hal_client.take().is_some();
            let subscribers =
                state.take_subscribers(|subscriber| subscriber.package_name == HAL_CLIENT_NAME);
            (was_connected, subscribers)
        };

        if was_connected {
            self.collaborators
                .publisher_service
                .on_client_disconnected(HAL_CLIENT_NAME)
                .await;
            self.collaborators
                .stats
                .log_connection_state(self.own_uid, ConnectionState::Disconnected);
            info!(
                event = events::HAL_DISCONNECTED,
                component = COMPONENT,
                "hal client disconnected"
            );
        }
        self.terminate_subscribers(subscribers).await;
    }

    /// Diagnostic listing of the session, HAL client, connections and subscribers.
    pub async fn dump(&self) -> String {
        let (current_session, hal_connected, system, user, mut subscribers) = {
            let state = self.state.lock().await;
            let sorted = |clients: &HashMap<String, Arc<PublisherConnection>>| {
                let mut connections: Vec<Arc<PublisherConnection>> =
                    clients.values().cloned().collect();
                connections.sort_by(|a, b| a.display_name().cmp(b.display_name()));
                connections
            };
            (
                state.current_session,
                state.hal_client.is_some(),
                sorted(&state.system_clients),
                sorted(&state.user_clients),
                state
                    .subscribers
                    .values()
                    .map(|subscriber| subscriber.to_string())
                    .collect::<Vec<String>>(),
            )
        };
        subscribers.sort();

        let mut out = String::from("*ConnectionManager*\n");
        let _ = writeln!(out, "current_session: {current_session}");
        let _ = writeln!(
            out,
            "hal_client: {}",
            if hal_connected { "connected" } else { "disconnected" }
        );
        for (title, connections) in [("system_clients", system), ("user_clients", user)] {
            let _ = writeln!(out, "{title}:");
            for connection in connections {
                let bound = if connection.is_bound().await {
                    "connected"
                } else {
                    "disconnected"
                };
                let _ = writeln!(
                    out,
                    "\t{}: {bound} ({})",
                    connection.target().package,
                    connection.state().await
                );
            }
        }
        let _ = writeln!(out, "subscribers:");
        for subscriber in subscribers {
            let _ = writeln!(out, "\t{subscriber}");
        }
        out
    }

    async fn bind_to_system_clients(&self) {
        if !self.state.lock().await.base_unlocked {
            return;
        }

        info!(
            event = events::BIND_ATTEMPT,
            component = COMPONENT,
            count = self.config.system_clients.len(),
            "attempting to bind system clients"
        );
        for client_name in &self.config.system_clients {
            self.bind(ClientScope::System, client_name, SessionId::BASE)
                .await;
        }
    }

    async fn bind_to_user_clients(&self) {
        // System binds are retried on every user trigger; they are idempotent.
        self.bind_to_system_clients().await;

        let session = self.state.lock().await.current_session;
        if session == SessionId::NULL {
            error!(
                event = events::USER_BIND_DEFERRED,
                component = COMPONENT,
                "unknown session in foreground"
            );
            return;
        }
        // Clients running in the base session are only ever bound as system clients.
        if session.is_base() {
            error!(
                event = events::USER_BIND_DEFERRED,
                component = COMPONENT,
                session = %session,
                "base session in foreground, user clients will not be bound"
            );
            return;
        }
        if !self
            .collaborators
            .session_lifecycle
            .is_session_unlocked(session)
        {
            info!(
                event = events::USER_BIND_DEFERRED,
                component = COMPONENT,
                session = %session,
                "waiting for foreground session to be unlocked"
            );
            return;
        }

        info!(
            event = events::BIND_ATTEMPT,
            component = COMPONENT,
            session = %session,
            count = self.config.user_clients.len(),
            "attempting to bind user clients"
        );
        for client_name in &self.config.user_clients {
            self.bind(ClientScope::User, client_name, session).await;
        }
    }

    async fn bind(&self, scope: ClientScope, client_name: &str, session: SessionId) {
        let existing = self
            .state
            .lock()
            .await
            .clients(scope)
            .get(client_name)
            .cloned();
        if let Some(connection) = existing {
            if connection.needs_retry().await {
                connection.bind().await;
            } else {
                debug!(
                    event = events::BIND_SKIPPED_ALREADY_BOUND,
                    component = COMPONENT,
                    client = client_name,
                    "already bound"
                );
            }
            return;
        }

        let target: PublisherTarget = match client_name.parse() {
            Ok(target) => target,
            Err(err) => {
                error!(
                    event = events::BIND_TARGET_INVALID,
                    component = COMPONENT,
                    client = client_name,
                    error = %err,
                    "invalid client name"
                );
                return;
            }
        };

        let Some(service_info) = self.collaborators.packages.service_info(&target) else {
            warn!(
                event = events::BIND_TARGET_NOT_INSTALLED,
                component = COMPONENT,
                client = client_name,
                "client not installed"
            );
            return;
        };

        let stats_uid = Uid::for_session(session, service_info.uid);
        if service_info.capability.as_deref() != Some(self.config.bind_capability.as_str()) {
            error!(
                event = events::BIND_TARGET_WRONG_CAPABILITY,
                component = COMPONENT,
                client = client_name,
                required = %self.config.bind_capability,
                "client service does not require bind capability"
            );
            self.collaborators
                .stats
                .log_connection_state(stats_uid, ConnectionState::ConnectionError);
            return;
        }

        let connection = PublisherConnection::new(
            target,
            session,
            stats_uid,
            ConnectionDeps {
                binder: self.collaborators.binder.clone(),
                publisher_service: self.collaborators.publisher_service.clone(),
                stats: self.collaborators.stats.clone(),
                rebind_delay: self.config.rebind_delay(),
            },
        );
        if !connection.bind().await {
            error!(
                event = events::BIND_FAILED,
                component = COMPONENT,
                connection = connection.display_name(),
                "binding failed"
            );
            return;
        }

        let stored = {
            let mut state = self.state.lock().await;
            let session_is_current = match scope {
                ClientScope::System => true,
                ClientScope::User => state.current_session == session,
            };
            if state.released
                || !session_is_current
                || state.clients(scope).contains_key(client_name)
            {
                false
            } else {
                state
                    .clients_mut(scope)
                    .insert(client_name.to_string(), connection.clone());
                true
            }
        };

        if stored {
            info!(
                event = events::BIND_OK,
                component = COMPONENT,
                scope = scope.as_str(),
                connection = connection.display_name(),
                "client bound"
            );
        } else {
            warn!(
                event = events::BIND_DISCARDED_STALE_SESSION,
                component = COMPONENT,
                scope = scope.as_str(),
                connection = connection.display_name(),
                "discarding binding made for a session that is no longer current"
            );
            connection.terminate().await;
        }
    }

    fn spawn_liveness_watch(&self, handle: SubscriberHandle) -> tokio::task::JoinHandle<()> {
        let manager = self.self_ref.clone();
        tokio::spawn(async move {
            handle.client().closed().await;
            if let Some(manager) = manager.upgrade() {
                manager.on_subscriber_died(handle).await;
            }
        })
    }

    /// Runs on the watch task itself, so the watch is dropped rather than aborted.
    async fn on_subscriber_died(&self, handle: SubscriberHandle) {
        let subscriber = self.state.lock().await.subscribers.remove(&handle.id());
        let Some(mut subscriber) = subscriber else {
            return;
        };
        warn!(
            event = events::SUBSCRIBER_DIED,
            component = COMPONENT,
            subscriber = %handle.id(),
            registration = %subscriber,
            "subscriber died"
        );
        subscriber.watch = None;
        self.broker.remove_dead_subscriber(&subscriber.handle).await;
    }

    async fn terminate_connections(&self, connections: Vec<Arc<PublisherConnection>>) {
        for connection in connections {
            connection.terminate().await;
        }
    }

    async fn terminate_subscribers(&self, subscribers: Vec<SubscriberConnection>) {
        for mut subscriber in subscribers {
            subscriber.detach_watch();
            self.broker.remove_dead_subscriber(&subscriber.handle).await;
            debug!(
                event = events::SUBSCRIBER_TERMINATED,
                component = COMPONENT,
                subscriber = %subscriber.handle.id(),
                registration = %subscriber,
                "terminated subscriber"
            );
        }
    }
}
