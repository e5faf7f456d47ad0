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

//! Per-uid connection-state telemetry.

use crate::connection::session::Uid;
use crate::connection::state::ConnectionState;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};

/// Receives one event per publisher connection state transition, keyed by the uid
/// of the owning process.
pub trait ConnectionStatsLogger: Send + Sync {
    fn log_connection_state(&self, uid: Uid, state: ConnectionState);
}

const DUMP_HEADER: &str = "uid,attempts,connected,disconnected,terminated,errors";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub attempts: u64,
    pub connected: u64,
    pub disconnected: u64,
    pub terminated: u64,
    pub errors: u64,
}

impl ConnectionCounts {
    fn record(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connecting => self.attempts += 1,
            ConnectionState::Connected => self.connected += 1,
            ConnectionState::Disconnected => self.disconnected += 1,
            ConnectionState::Terminated => self.terminated += 1,
            ConnectionState::ConnectionError => self.errors += 1,
            ConnectionState::Unbound => {}
        }
    }
}

/// In-memory [`ConnectionStatsLogger`].
#[derive(Default)]
pub struct ConnectionStatsRecorder {
    counts: Mutex<BTreeMap<Uid, ConnectionCounts>>,
}

impl ConnectionStatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self, uid: Uid) -> ConnectionCounts {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uid)
            .copied()
            .unwrap_or_default()
    }

    /// CSV rows ordered by uid, preceded by a header line.
    pub fn dump(&self) -> String {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::from(DUMP_HEADER);
        out.push('\n');
        for (uid, entry) in counts.iter() {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{}",
                uid,
                entry.attempts,
                entry.connected,
                entry.disconnected,
                entry.terminated,
                entry.errors
            );
        }
        out
    }
}

impl ConnectionStatsLogger for ConnectionStatsRecorder {
    fn log_connection_state(&self, uid: Uid, state: ConnectionState) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uid)
            .or_default()
            .record(state);
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionCounts, ConnectionStatsLogger, ConnectionStatsRecorder};
    use crate::connection::session::Uid;
    use crate::connection::state::ConnectionState;

    #[test]
    fn counts_are_tracked_per_uid() {
        let recorder = ConnectionStatsRecorder::new();

        recorder.log_connection_state(Uid(20), ConnectionState::Connecting);
        recorder.log_connection_state(Uid(20), ConnectionState::Connected);
        recorder.log_connection_state(Uid(10), ConnectionState::ConnectionError);

        assert_eq!(
            recorder.counts(Uid(20)),
            ConnectionCounts {
                attempts: 1,
                connected: 1,
                ..ConnectionCounts::default()
            }
        );
        assert_eq!(recorder.counts(Uid(10)).errors, 1);
        assert_eq!(recorder.counts(Uid(30)), ConnectionCounts::default());
    }

    #[test]
    fn dump_is_sorted_by_uid() {
        let recorder = ConnectionStatsRecorder::new();
        recorder.log_connection_state(Uid(20), ConnectionState::Terminated);
        recorder.log_connection_state(Uid(10), ConnectionState::Disconnected);

        assert_eq!(
            recorder.dump(),
            "uid,attempts,connected,disconnected,terminated,errors\n10,0,0,1,0,0\n20,0,0,0,1,0\n"
        );
    }
}
