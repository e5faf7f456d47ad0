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

//! # vms-broker
//!
//! `vms-broker` distributes vehicle data layers from publisher processes to
//! subscriber processes, and supervises the publisher bindings across user-session
//! changes.
//!
//! Typical usage is centered on [`LayerBroker`] for routing and availability and
//! [`ConnectionManager`] for the connection lifecycle.
//!
//! ## Routing
//!
//! Publishers learn about subscriptions only when a layer gains its first or loses
//! its last subscriber; churn between subscribers of a layer is invisible to them.
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use vms_broker::{
//!     ClientId, Layer, LayerBroker, PublisherListener, SubscriberClient, SubscriberHandle,
//!     SubscriptionState,
//! };
//!
//! struct Subscriber(ClientId);
//!
//! #[async_trait]
//! impl SubscriberClient for Subscriber {
//!     fn client_id(&self) -> ClientId {
//!         self.0
//!     }
//!     fn is_alive(&self) -> bool {
//!         true
//!     }
//!     async fn closed(&self) {
//!         futures::future::pending::<()>().await
//!     }
//! }
//!
//! struct Publisher;
//!
//! #[async_trait]
//! impl PublisherListener for Publisher {
//!     async fn on_subscription_change(&self, state: &SubscriptionState) {
//!         println!("publishers must now produce {:?}", state.layers);
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = LayerBroker::new();
//! broker.add_publisher_listener(Arc::new(Publisher));
//!
//! let s1 = SubscriberHandle::new(Arc::new(Subscriber(ClientId::random())));
//! let layer = Layer::new(1, 0, 0);
//! broker.add_layer_subscription(&s1, layer).await;
//!
//! let publisher_id = broker.publisher_id(b"publisher 7").await;
//! assert!(broker
//!     .subscribers_for_layer_from_publisher(&layer, publisher_id)
//!     .await
//!     .contains(&s1));
//! # });
//! ```
//!
//! ## Connection lifecycle
//!
//! [`ConnectionManager`] is constructor-injected with its platform collaborators
//! ([`connection::SessionLifecycle`], [`connection::ServiceBinder`],
//! [`connection::PackageQuery`], [`connection::PublisherService`] and a
//! [`ConnectionStatsLogger`]) and configured with a [`BrokerConfig`].
//!
//! ## Internal architecture map
//!
//! - Broker: facade over routing state and listener fan-out
//! - Routing: subscription table, publisher registry and availability aggregation
//! - Connection: publisher binding supervision and subscriber liveness
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events.
//! Library code emits events and does not unconditionally initialize a global
//! subscriber. Binaries and tests are responsible for one-time
//! `tracing_subscriber` initialization at process boundaries.

mod broker;
pub use broker::{ConnectionToken, LayerBroker, PublisherListener, SubscriberListener};

mod client;
pub use client::{ClientId, PublisherClient, SubscriberClient, SubscriberHandle};

mod config;
pub use config::{BrokerConfig, DEFAULT_BIND_CAPABILITY, DEFAULT_MILLIS_BEFORE_REBIND};

pub mod connection;
pub use connection::{ConnectionManager, ManagerCollaborators};

mod layer;
pub use layer::{
    AssociatedLayer, AvailableLayers, Layer, LayerAvailability, LayerDependency, LayersOffering,
    PublisherId, SubscriptionState,
};

#[doc(hidden)]
pub mod observability;
mod routing;

mod stats;
pub use stats::{ConnectionCounts, ConnectionStatsLogger, ConnectionStatsRecorder};
