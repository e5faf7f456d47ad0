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

//! Connection manager configuration, loaded from JSON5.

use crate::observability::events;
use serde::Deserialize;
use std::fs::{self, canonicalize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use up_rust::{UCode, UStatus};

const COMPONENT: &str = "config";

pub const DEFAULT_MILLIS_BEFORE_REBIND: u64 = 10_000;
pub const DEFAULT_BIND_CAPABILITY: &str = "android.car.permission.BIND_VMS_CLIENT";

fn default_millis_before_rebind() -> u64 {
    DEFAULT_MILLIS_BEFORE_REBIND
}

fn default_bind_capability() -> String {
    DEFAULT_BIND_CAPABILITY.to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Publisher targets bound in the base session once it unlocks.
    #[serde(default)]
    pub system_clients: Vec<String>,
    /// Publisher targets bound in every unlocked foreground session.
    #[serde(default)]
    pub user_clients: Vec<String>,
    #[serde(default = "default_millis_before_rebind")]
    pub millis_before_rebind: u64,
    /// Capability a target service must declare to be bound.
    #[serde(default = "default_bind_capability")]
    pub bind_capability: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            system_clients: Vec::new(),
            user_clients: Vec::new(),
            millis_before_rebind: DEFAULT_MILLIS_BEFORE_REBIND,
            bind_capability: default_bind_capability(),
        }
    }
}

impl BrokerConfig {
    pub fn rebind_delay(&self) -> Duration {
        Duration::from_millis(self.millis_before_rebind)
    }

    pub fn from_json5_str(data: &str) -> Result<Self, UStatus> {
        json5::from_str(data).map_err(|error| {
            UStatus::fail_with_code(
                UCode::INVALID_ARGUMENT,
                format!("Unable to parse broker config: {error}"),
            )
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, UStatus> {
        let config_file = PathBuf::from(path.as_ref());
        debug!("config_file: {config_file:?}");

        let config_file = canonicalize(config_file).map_err(|error| {
            UStatus::fail_with_code(
                UCode::INVALID_ARGUMENT,
                format!("Broker config file not found: {error:?}"),
            )
        })?;
        let data = fs::read_to_string(&config_file).map_err(|error| {
            UStatus::fail_with_code(
                UCode::INVALID_ARGUMENT,
                format!("Unable to read file: {error:?}"),
            )
        })?;

        let config = Self::from_json5_str(&data)?;
        info!(
            event = events::CONFIG_LOADED,
            component = COMPONENT,
            path = %config_file.display(),
            system_clients = config.system_clients.len(),
            user_clients = config.user_clients.len(),
            millis_before_rebind = config.millis_before_rebind,
            "loaded broker config"
        );
        Ok(config)
    }
}
