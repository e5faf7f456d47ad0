//! One supervised binding to a publisher service in one session.

use crate::client::PublisherClient;
use crate::connection::collaborators::{PublisherService, ServiceBinder, ServiceConnection};
use crate::connection::session::{SessionId, Uid};
use crate::connection::state::ConnectionState;
use crate::connection::target::PublisherTarget;
use crate::observability::events;
use crate::stats::ConnectionStatsLogger;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "publisher_connection";

struct ConnectionInner {
    state: ConnectionState,
    bound: bool,
    terminated: bool,
    rebind_scheduled: bool,
    rebind_task: Option<JoinHandle<()>>,
    client: Option<Arc<dyn PublisherClient>>,
}

pub(crate) struct ConnectionDeps {
    pub(crate) binder: Arc<dyn ServiceBinder>,
    pub(crate) publisher_service: Arc<dyn PublisherService>,
    pub(crate) stats: Arc<dyn ConnectionStatsLogger>,
    pub(crate) rebind_delay: Duration,
}

/// Never reused once terminated.
pub(crate) struct PublisherConnection {
    target: PublisherTarget,
    session: SessionId,
    stats_uid: Uid,
    display_name: String,
    deps: ConnectionDeps,
    self_ref: Weak<PublisherConnection>,
    inner: Mutex<ConnectionInner>,
}

impl PublisherConnection {
    pub(crate) fn new(
        target: PublisherTarget,
        session: SessionId,
        stats_uid: Uid,
        deps: ConnectionDeps,
    ) -> Arc<Self> {
        let display_name = format!("{} U={}", target.flatten(), session);
        Arc::new_cyclic(|self_ref| Self {
            target,
            session,
            stats_uid,
            display_name,
            deps,
            self_ref: self_ref.clone(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Unbound,
                bound: false,
                terminated: false,
                rebind_scheduled: false,
                rebind_task: None,
                client: None,
            }),
        })
    }

    pub(crate) fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn target(&self) -> &PublisherTarget {
        &self.target
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub(crate) async fn is_bound(&self) -> bool {
        self.inner.lock().await.bound
    }

    /// A stored connection whose last bind attempt failed.
    pub(crate) async fn needs_retry(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.bound && !inner.terminated && inner.state == ConnectionState::ConnectionError
    }

    /// Requests a binding. True when bound, including when it already was.
    pub(crate) async fn bind(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.bind_locked(&mut inner).await
    }

    pub(crate) async fn terminate(&self) {
        let client = {
            let mut inner = self.inner.lock().await;
            if inner.terminated {
                return;
            }
            inner.terminated = true;
            inner.rebind_scheduled = false;
            if let Some(rebind_task) = inner.rebind_task.take() {
                rebind_task.abort();
            }
            self.transition(&mut inner, ConnectionState::Terminated);
            self.deps
                .stats
                .log_connection_state(self.stats_uid, ConnectionState::Terminated);
            let client = inner.client.take();
            self.unbind_locked(&mut inner).await;
            client
        };

        info!(
            event = events::CONNECTION_TERMINATED,
            component = COMPONENT,
            connection = %self.display_name,
            "publisher connection terminated"
        );
        if client.is_some() {
            self.deps
                .publisher_service
                .on_client_disconnected(&self.display_name)
                .await;
        }
    }

    async fn bind_locked(&self, inner: &mut ConnectionInner) -> bool {
        if inner.bound {
            return true;
        }
        if inner.terminated {
            return false;
        }
        let Some(connection) = self.self_ref.upgrade() else {
            return false;
        };

        self.transition(inner, ConnectionState::Connecting);
        self.deps
            .stats
            .log_connection_state(self.stats_uid, ConnectionState::Connecting);
        debug!(
            event = events::BIND_ATTEMPT,
            component = COMPONENT,
            connection = %self.display_name,
            "binding publisher service"
        );

        let connection: Arc<dyn ServiceConnection> = connection;
        inner.bound = match self
            .deps
            .binder
            .bind(&self.target, self.session, connection)
            .await
        {
            Ok(bound) => bound,
            Err(err) => {
                error!(
                    event = events::BIND_FAILED,
                    component = COMPONENT,
                    connection = %self.display_name,
                    error = %err,
                    "error while binding"
                );
                false
            }
        };

        if !inner.bound {
            self.transition(inner, ConnectionState::ConnectionError);
            self.deps
                .stats
                .log_connection_state(self.stats_uid, ConnectionState::ConnectionError);
        }
        inner.bound
    }

    async fn unbind_locked(&self, inner: &mut ConnectionInner) {
        if !inner.bound {
            return;
        }
        let Some(connection) = self.self_ref.upgrade() else {
            inner.bound = false;
            return;
        };

        debug!(
            event = events::UNBIND_ATTEMPT,
            component = COMPONENT,
            connection = %self.display_name,
            "unbinding publisher service"
        );
        let connection: Arc<dyn ServiceConnection> = connection;
        if let Err(err) = self.deps.binder.unbind(&connection).await {
            warn!(
                event = events::UNBIND_FAILED,
                component = COMPONENT,
                connection = %self.display_name,
                error = %err,
                "error while unbinding"
            );
        }
        inner.bound = false;
    }

    fn transition(&self, inner: &mut ConnectionInner, next: ConnectionState) -> bool {
        if !inner.state.can_transition_to(next) {
            debug!(
                event = events::CONNECTION_STATE_REJECTED,
                component = COMPONENT,
                connection = %self.display_name,
                from = %inner.state,
                to = %next,
                "ignoring connection state transition"
            );
            return false;
        }
        inner.state = next;
        true
    }

    fn schedule_rebind(&self, inner: &mut ConnectionInner) {
        if inner.rebind_scheduled || inner.terminated {
            return;
        }

        let connection = self.self_ref.clone();
        let delay = self.deps.rebind_delay;
        inner.rebind_scheduled = true;
        inner.rebind_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(connection) = connection.upgrade() {
                connection.rebind().await;
            }
        }));

        debug!(
            event = events::REBIND_SCHEDULED,
            component = COMPONENT,
            connection = %self.display_name,
            delay_ms = delay.as_millis() as u64,
            "rebind scheduled"
        );
    }

    async fn rebind(&self) {
        let mut inner = self.inner.lock().await;
        inner.rebind_scheduled = false;
        inner.rebind_task = None;
        // A platform that reconnected on its own leaves nothing to do.
        if inner.terminated || inner.client.is_some() {
            debug!(
                event = events::REBIND_SKIPPED,
                component = COMPONENT,
                connection = %self.display_name,
                terminated = inner.terminated,
                "rebind not needed"
            );
            return;
        }

        info!(
            event = events::REBIND_START,
            component = COMPONENT,
            connection = %self.display_name,
            "rebinding"
        );
        self.unbind_locked(&mut inner).await;
        self.bind_locked(&mut inner).await;
    }

    async fn on_disconnect(&self) {
        let client = {
            let mut inner = self.inner.lock().await;
            let client = inner.client.take();
            if client.is_some() {
                self.transition(&mut inner, ConnectionState::Disconnected);
                self.deps
                    .stats
                    .log_connection_state(self.stats_uid, ConnectionState::Disconnected);
            }
            self.schedule_rebind(&mut inner);
            client
        };

        if client.is_some() {
            info!(
                event = events::CLIENT_DISCONNECTED,
                component = COMPONENT,
                connection = %self.display_name,
                "publisher client disconnected"
            );
            self.deps
                .publisher_service
                .on_client_disconnected(&self.display_name)
                .await;
        }
    }
}

#[async_trait]
impl ServiceConnection for PublisherConnection {
    async fn on_service_connected(&self, client: Arc<dyn PublisherClient>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.terminated || !self.transition(&mut inner, ConnectionState::Connected) {
                return;
            }
            inner.client = Some(client.clone());
            self.deps
                .stats
                .log_connection_state(self.stats_uid, ConnectionState::Connected);
        }

        info!(
            event = events::CLIENT_CONNECTED,
            component = COMPONENT,
            connection = %self.display_name,
            client_id = %client.client_id(),
            "publisher client connected"
        );
        self.deps
            .publisher_service
            .on_client_connected(&self.display_name, client)
            .await;
    }

    async fn on_service_disconnected(&self) {
        self.on_disconnect().await;
    }

    async fn on_binding_died(&self) {
        self.on_disconnect().await;
    }
}
