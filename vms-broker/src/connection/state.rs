//! Publisher connection state machine.

use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionState {
    Unbound,
    Connecting,
    Connected,
    Disconnected,
    ConnectionError,
    Terminated,
}

impl ConnectionState {
    /// Whether `next` may follow `self`. `Terminated` is absorbing.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Unbound, Connecting) => true,
            (Connecting, Connecting | Connected | ConnectionError) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Connecting | Connected) => true,
            (ConnectionError, Connecting) => true,
            _ => false,
        }
    }

    pub fn is_terminated(self) -> bool {
        self == ConnectionState::Terminated
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Unbound => "UNBOUND",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::ConnectionError => "CONNECTION_ERROR",
            ConnectionState::Terminated => "TERMINATED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{self, *};

    const ALL: [ConnectionState; 6] = [
        Unbound,
        Connecting,
        Connected,
        Disconnected,
        ConnectionError,
        Terminated,
    ];

    #[test]
    fn unbound_only_reaches_connecting_or_terminated() {
        let reachable: Vec<ConnectionState> = ALL
            .into_iter()
            .filter(|next| Unbound.can_transition_to(*next))
            .collect();

        assert_eq!(reachable, vec![Connecting, Terminated]);
    }

    #[test]
    fn terminated_is_absorbing() {
        assert!(ALL.into_iter().all(|next| !Terminated.can_transition_to(next)));
        assert!(ALL
            .into_iter()
            .filter(|state| !state.is_terminated())
            .all(|state| state.can_transition_to(Terminated)));
    }

    #[test]
    fn silent_reconnect_and_retry_paths() {
        assert!(Disconnected.can_transition_to(Connected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(ConnectionError.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!ConnectionError.can_transition_to(Connected));
    }
}
