//! Platform facilities the connection manager is wired to.

use crate::client::PublisherClient;
use crate::connection::session::{SessionId, Uid};
use crate::connection::target::PublisherTarget;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn on_session_switched(&self, session: SessionId);

    async fn on_session_unlock_changed(&self, session: SessionId, unlocked: bool);
}

#[async_trait]
pub trait BaseSessionUnlockListener: Send + Sync {
    async fn on_base_session_unlocked(&self);
}

/// Source of foreground-session and unlock events.
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    async fn add_session_listener(&self, listener: Arc<dyn SessionListener>);

    async fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>);

    /// Runs `listener` once the base session unlocks, immediately when it already has.
    async fn run_on_base_session_unlock(&self, listener: Arc<dyn BaseSessionUnlockListener>);

    fn is_session_unlocked(&self, session: SessionId) -> bool;
}

/// Callbacks delivered by a [`ServiceBinder`] for one binding.
#[async_trait]
pub trait ServiceConnection: Send + Sync {
    async fn on_service_connected(&self, client: Arc<dyn PublisherClient>);

    async fn on_service_disconnected(&self);

    async fn on_binding_died(&self);
}

pub enum BindError {
    PermissionDenied(String),
    Unavailable(String),
}

impl Debug for BindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BindError::PermissionDenied(reason) => write!(f, "PermissionDenied({reason:?})"),
            BindError::Unavailable(reason) => write!(f, "Unavailable({reason:?})"),
        }
    }
}

impl Display for BindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BindError::PermissionDenied(reason) => write!(f, "Binding not permitted: {reason}"),
            BindError::Unavailable(reason) => write!(f, "Binding facility unavailable: {reason}"),
        }
    }
}

impl Error for BindError {}

/// Asynchronous-accept service binding facility.
///
/// `bind` only accepts the request; the outcome arrives later through the
/// [`ServiceConnection`] callbacks, never from inside the `bind` call.
#[async_trait]
pub trait ServiceBinder: Send + Sync {
    async fn bind(
        &self,
        target: &PublisherTarget,
        session: SessionId,
        connection: Arc<dyn ServiceConnection>,
    ) -> Result<bool, BindError>;

    async fn unbind(&self, connection: &Arc<dyn ServiceConnection>) -> Result<(), BindError>;
}

/// Installed service metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Application uid, independent of session.
    pub uid: Uid,
    /// Capability a caller must hold to bind the service.
    pub capability: Option<String>,
}

pub trait PackageQuery: Send + Sync {
    fn service_info(&self, target: &PublisherTarget) -> Option<ServiceInfo>;

    fn name_for_uid(&self, uid: Uid) -> Option<String>;
}

/// Receives publisher clients as their bindings come and go.
#[async_trait]
pub trait PublisherService: Send + Sync {
    async fn on_client_connected(&self, display_name: &str, client: Arc<dyn PublisherClient>);

    async fn on_client_disconnected(&self, display_name: &str);
}
