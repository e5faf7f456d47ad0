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

//! Remote client handles.

use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a remote endpoint. Two handles referring to the same endpoint
/// report the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A subscriber process endpoint.
#[async_trait]
pub trait SubscriberClient: Send + Sync {
    fn client_id(&self) -> ClientId;

    /// Whether the remote endpoint is still reachable at the time of the call.
    fn is_alive(&self) -> bool;

    /// Resolves once the remote endpoint becomes unreachable. Resolves immediately
    /// if it already is.
    async fn closed(&self);
}

/// A publisher process endpoint handed over when a binding connects.
pub trait PublisherClient: Send + Sync {
    fn client_id(&self) -> ClientId;
}

/// Subscriber handle compared and hashed by the identity of its remote endpoint.
#[derive(Clone)]
pub struct SubscriberHandle {
    client: Arc<dyn SubscriberClient>,
}

impl SubscriberHandle {
    pub fn new(client: Arc<dyn SubscriberClient>) -> Self {
        Self { client }
    }

    pub fn id(&self) -> ClientId {
        self.client.client_id()
    }

    pub fn client(&self) -> &Arc<dyn SubscriberClient> {
        &self.client
    }
}

impl Hash for SubscriberHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialEq for SubscriberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SubscriberHandle {}

impl Debug for SubscriberHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl From<Arc<dyn SubscriberClient>> for SubscriberHandle {
    fn from(client: Arc<dyn SubscriberClient>) -> Self {
        Self::new(client)
    }
}
