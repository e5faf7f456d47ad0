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

//! Broker facade over the routing leaves.
//!
//! [`LayerBroker`] owns the routing table, publisher registry and availability view
//! behind a single mutex. Notifications leave the broker only after that mutex is
//! released.

pub(crate) mod layer_broker;
pub(crate) mod listeners;

pub use layer_broker::{ConnectionToken, LayerBroker};
pub use listeners::{PublisherListener, SubscriberListener};
