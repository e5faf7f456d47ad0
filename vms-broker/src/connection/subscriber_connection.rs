use crate::client::SubscriberHandle;
use crate::connection::session::{SessionId, Uid};
use std::fmt::{Display, Formatter};
use tokio::task::JoinHandle;

/// A registered subscriber and the task watching its liveness.
pub(crate) struct SubscriberConnection {
    pub(crate) handle: SubscriberHandle,
    pub(crate) uid: Uid,
    pub(crate) package_name: String,
    pub(crate) session: SessionId,
    pub(crate) watch: Option<JoinHandle<()>>,
}

impl SubscriberConnection {
    /// Stops the liveness watch. Must not be called from the watch task itself.
    pub(crate) fn detach_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.abort();
        }
    }
}

impl Display for SubscriberConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} U={}", self.package_name, self.session)
    }
}
