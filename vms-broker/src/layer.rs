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

//! Layer value types exchanged between publishers, subscribers and the broker.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// A typed category of vehicle data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Layer {
    pub layer_type: i32,
    pub subtype: i32,
    pub version: i32,
}

impl Layer {
    pub const fn new(layer_type: i32, subtype: i32, version: i32) -> Self {
        Self {
            layer_type,
            subtype,
            version,
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Layer(type={}, subtype={}, version={})",
            self.layer_type, self.subtype, self.version
        )
    }
}

/// Broker-assigned publisher identity, stable for the lifetime of the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublisherId(pub u32);

impl Display for PublisherId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A layer together with the layers it is derived from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerDependency {
    pub layer: Layer,
    pub dependencies: BTreeSet<Layer>,
}

impl LayerDependency {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_dependencies(layer: Layer, dependencies: impl IntoIterator<Item = Layer>) -> Self {
        Self {
            layer,
            dependencies: dependencies.into_iter().collect(),
        }
    }
}

/// The set of layers one publisher declares it can produce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayersOffering {
    pub publisher_id: PublisherId,
    pub dependencies: BTreeSet<LayerDependency>,
}

impl LayersOffering {
    pub fn new(
        publisher_id: PublisherId,
        dependencies: impl IntoIterator<Item = LayerDependency>,
    ) -> Self {
        Self {
            publisher_id,
            dependencies: dependencies.into_iter().collect(),
        }
    }

    /// Offering of dependency-free layers.
    pub fn of_layers(publisher_id: PublisherId, layers: impl IntoIterator<Item = Layer>) -> Self {
        Self::new(publisher_id, layers.into_iter().map(LayerDependency::new))
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.dependencies.iter().map(|dependency| &dependency.layer)
    }
}

/// A layer paired with the publishers it is associated with.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssociatedLayer {
    pub layer: Layer,
    pub publisher_ids: BTreeSet<PublisherId>,
}

/// Subscription snapshot transmitted to publishers.
///
/// `layers` holds every layer with at least one any-publisher subscription;
/// `associated_layers` holds the publisher-scoped subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub sequence_number: u64,
    pub layers: BTreeSet<Layer>,
    pub associated_layers: BTreeSet<AssociatedLayer>,
}

/// Per-layer availability annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerAvailability {
    pub publisher_ids: BTreeSet<PublisherId>,
    /// Union of the dependency sets declared for this layer across offerings.
    pub dependencies: BTreeSet<Layer>,
    /// Whether at least one declared dependency set is fully available.
    pub dependencies_met: bool,
}

/// Aggregate of every layer offered by a live publisher.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AvailableLayers {
    pub sequence_number: u64,
    pub layers: BTreeMap<Layer, LayerAvailability>,
}

impl AvailableLayers {
    pub fn contains(&self, layer: &Layer) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_set(&self) -> BTreeSet<Layer> {
        self.layers.keys().copied().collect()
    }

    pub fn associated_layers(&self) -> BTreeSet<AssociatedLayer> {
        self.layers
            .iter()
            .map(|(layer, availability)| AssociatedLayer {
                layer: *layer,
                publisher_ids: availability.publisher_ids.clone(),
            })
            .collect()
    }

    /// Layers that are offered but whose dependencies cannot currently be produced.
    pub fn unmet_dependencies(&self) -> BTreeSet<Layer> {
        self.layers
            .iter()
            .filter(|(_, availability)| !availability.dependencies_met)
            .map(|(layer, _)| *layer)
            .collect()
    }
}
