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

//! Connection supervision layer.
//!
//! Publisher services are bound through a [`ServiceBinder`] per (target, session) and
//! rebound after a configurable delay when they drop. Subscribers are tracked with a
//! liveness watch and purged from the broker when they go away or when their session
//! leaves the foreground.

pub(crate) mod collaborators;
pub(crate) mod manager;
pub(crate) mod publisher_connection;
pub(crate) mod session;
pub(crate) mod state;
pub(crate) mod subscriber_connection;
pub(crate) mod target;

pub use collaborators::{
    BaseSessionUnlockListener, BindError, PackageQuery, PublisherService, ServiceBinder,
    ServiceConnection, ServiceInfo, SessionLifecycle, SessionListener,
};
pub use manager::{ConnectionManager, ManagerCollaborators, HAL_CLIENT_NAME, UNKNOWN_PACKAGE};
pub use session::{SessionId, Uid, PER_SESSION_RANGE};
pub use state::ConnectionState;
pub use target::{PublisherTarget, TargetError};
