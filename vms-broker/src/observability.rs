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

//! Stable event names and field formatters shared by all `tracing` call sites.
//!
//! Event names are part of the log contract consumed by log-scraping tooling.

pub mod events {
    // routing
    pub const SUBSCRIPTION_ADDED: &str = "subscription_added";
    pub const SUBSCRIPTION_REMOVED: &str = "subscription_removed";
    pub const SUBSCRIPTION_REMOVE_MISSING: &str = "subscription_remove_missing";
    pub const DEAD_SUBSCRIBER_PURGED: &str = "dead_subscriber_purged";

    // registry / availability
    pub const PUBLISHER_ID_ASSIGNED: &str = "publisher_id_assigned";
    pub const PUBLISHER_ID_REQUESTED: &str = "publisher_id_requested";
    pub const AVAILABILITY_RECOMPUTED: &str = "availability_recomputed";
    pub const AVAILABILITY_CYCLIC_DEPENDENCY: &str = "availability_cyclic_dependency";

    // broker
    pub const OFFERING_SET: &str = "offering_set";
    pub const DEAD_PUBLISHER_REMOVED: &str = "dead_publisher_removed";
    pub const NOTIFY_SUBSCRIPTION_CHANGE: &str = "notify_subscription_change";
    pub const NOTIFY_AVAILABILITY_CHANGE: &str = "notify_availability_change";

    // connection manager
    pub const BIND_ATTEMPT: &str = "bind_attempt";
    pub const BIND_SKIPPED_ALREADY_BOUND: &str = "bind_skipped_already_bound";
    pub const BIND_TARGET_INVALID: &str = "bind_target_invalid";
    pub const BIND_TARGET_NOT_INSTALLED: &str = "bind_target_not_installed";
    pub const BIND_TARGET_WRONG_CAPABILITY: &str = "bind_target_wrong_capability";
    pub const BIND_OK: &str = "bind_ok";
    pub const BIND_FAILED: &str = "bind_failed";
    pub const BIND_DISCARDED_STALE_SESSION: &str = "bind_discarded_stale_session";
    pub const UNBIND_ATTEMPT: &str = "unbind_attempt";
    pub const UNBIND_FAILED: &str = "unbind_failed";
    pub const CLIENT_CONNECTED: &str = "client_connected";
    pub const CLIENT_DISCONNECTED: &str = "client_disconnected";
    pub const REBIND_SCHEDULED: &str = "rebind_scheduled";
    pub const REBIND_SKIPPED: &str = "rebind_skipped";
    pub const REBIND_START: &str = "rebind_start";
    pub const CONNECTION_TERMINATED: &str = "connection_terminated";
    pub const CONNECTION_STATE_REJECTED: &str = "connection_state_rejected";
    pub const SESSION_SWITCHED: &str = "session_switched";
    pub const SESSION_UNLOCKED: &str = "session_unlocked";
    pub const USER_BIND_DEFERRED: &str = "user_bind_deferred";
    pub const SUBSCRIBER_REJECTED: &str = "subscriber_rejected";
    pub const SUBSCRIBER_REGISTERED: &str = "subscriber_registered";
    pub const SUBSCRIBER_DIED: &str = "subscriber_died";
    pub const SUBSCRIBER_TERMINATED: &str = "subscriber_terminated";
    pub const HAL_CONNECTED: &str = "hal_connected";
    pub const HAL_DISCONNECTED: &str = "hal_disconnected";

    // config
    pub const CONFIG_LOADED: &str = "config_loaded";
}

pub mod fields {
    use crate::layer::{Layer, PublisherId};

    pub fn format_layer(layer: &Layer) -> String {
        format!(
            "({}, {}, {})",
            layer.layer_type, layer.subtype, layer.version
        )
    }

    pub fn format_publisher(publisher_id: PublisherId) -> String {
        format!("pub:{}", publisher_id.0)
    }

    pub fn format_layers<'a>(layers: impl IntoIterator<Item = &'a Layer>) -> String {
        let formatted: Vec<String> = layers.into_iter().map(format_layer).collect();
        format!("[{}]", formatted.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::fields;
    use crate::layer::{Layer, PublisherId};

    #[test]
    fn layer_formatting_is_stable() {
        let layers = [Layer::new(1, 0, 0), Layer::new(2, 3, 4)];

        assert_eq!(fields::format_layer(&layers[0]), "(1, 0, 0)");
        assert_eq!(fields::format_layers(&layers), "[(1, 0, 0), (2, 3, 4)]");
    }

    #[test]
    fn publisher_formatting_is_prefixed() {
        assert_eq!(fields::format_publisher(PublisherId(7)), "pub:7");
    }
}
