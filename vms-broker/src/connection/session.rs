//! Session and uid arithmetic.

use std::fmt::{Display, Formatter};

/// Number of uids reserved per session.
pub const PER_SESSION_RANGE: u32 = 100_000;

/// A user session on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i32);

impl SessionId {
    /// The headless system session, reachable regardless of foreground.
    pub const BASE: SessionId = SessionId(0);
    /// No foreground session yet.
    pub const NULL: SessionId = SessionId(-10_000);

    pub fn is_base(&self) -> bool {
        *self == Self::BASE
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process uid; the session is encoded in its high range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u32);

impl Uid {
    pub fn session(&self) -> SessionId {
        SessionId((self.0 / PER_SESSION_RANGE) as i32)
    }

    /// Uid `app_uid` runs under within `session`. Sessions without a uid range map to
    /// the base session. Sessions beyond the `u32` uid space wrap.
    pub fn for_session(session: SessionId, app_uid: Uid) -> Uid {
        let session_index = u32::try_from(session.0).unwrap_or(0);
        Uid(session_index
            .wrapping_mul(PER_SESSION_RANGE)
            .wrapping_add(app_uid.0 % PER_SESSION_RANGE))
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionId, Uid};

    #[test]
    fn session_is_uid_high_range() {
        assert_eq!(Uid(1_010_057).session(), SessionId(10));
        assert_eq!(Uid(1000).session(), SessionId::BASE);
    }

    #[test]
    fn for_session_rebases_app_uid() {
        let app_uid = Uid(10_057);

        assert_eq!(Uid::for_session(SessionId(10), app_uid), Uid(1_010_057));
        assert_eq!(Uid::for_session(SessionId::BASE, Uid(1_010_057)), app_uid);
        assert_eq!(Uid::for_session(SessionId::NULL, app_uid), app_uid);
    }

    #[test]
    fn for_session_wraps_past_uid_space() {
        let uid = Uid::for_session(SessionId(50_000), Uid(10_057));

        assert_eq!(uid, Uid(50_000_u32.wrapping_mul(100_000).wrapping_add(10_057)));
        assert_eq!(
            Uid::for_session(SessionId(i32::MAX), Uid(10_057)),
            Uid((i32::MAX as u32).wrapping_mul(100_000).wrapping_add(10_057))
        );
    }
}
