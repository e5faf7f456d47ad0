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

//! Routing and availability layer.
//!
//! Leaf state owned by [`crate::LayerBroker`]: the subscriber routing table, the
//! content-addressed publisher registry and the aggregated layer availability.
//! None of these types lock internally; the broker serializes access.
//!
//! ```
//! use std::sync::Arc;
//! use vms_broker::{ConnectionToken, Layer, LayerBroker, LayersOffering};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = Arc::new(LayerBroker::new());
//! let publisher_id = broker.publisher_id(b"example publisher").await;
//! let layer = Layer::new(1, 0, 0);
//!
//! broker
//!     .set_publisher_layers_offering(
//!         ConnectionToken::random(),
//!         LayersOffering::of_layers(publisher_id, [layer]),
//!     )
//!     .await;
//! assert!(broker.available_layers().await.contains(&layer));
//! # });
//! ```

pub(crate) mod availability;
pub(crate) mod layer_router;
pub(crate) mod publisher_registry;
