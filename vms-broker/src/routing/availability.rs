//! Aggregated layer availability across all live publisher offerings.

use crate::layer::{AvailableLayers, Layer, LayerAvailability, LayersOffering, PublisherId};
use crate::observability::{events, fields};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

const COMPONENT: &str = "availability";

#[derive(Default)]
struct PotentialLayer {
    publisher_ids: BTreeSet<PublisherId>,
    dependency_sets: BTreeSet<BTreeSet<Layer>>,
}

/// Recomputed from the complete offering set on every change.
#[derive(Default)]
pub(crate) struct AvailabilityAggregator {
    available: AvailableLayers,
}

impl AvailabilityAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_publishers_offering<'a>(
        &mut self,
        offerings: impl IntoIterator<Item = &'a LayersOffering>,
    ) {
        let mut potential: BTreeMap<Layer, PotentialLayer> = BTreeMap::new();

        for offering in offerings {
            for dependency in &offering.dependencies {
                let entry = potential.entry(dependency.layer).or_default();
                entry.publisher_ids.insert(offering.publisher_id);
                entry
                    .dependency_sets
                    .insert(dependency.dependencies.clone());
            }
        }

        let mut resolved = HashSet::new();
        let mut in_progress = HashSet::new();
        for layer in potential.keys() {
            Self::resolve(layer, &potential, &mut resolved, &mut in_progress);
        }

        let layers = potential
            .into_iter()
            .map(|(layer, entry)| {
                let availability = LayerAvailability {
                    publisher_ids: entry.publisher_ids,
                    dependencies: entry.dependency_sets.into_iter().flatten().collect(),
                    dependencies_met: resolved.contains(&layer),
                };
                (layer, availability)
            })
            .collect();

        self.available = AvailableLayers {
            sequence_number: self.available.sequence_number + 1,
            layers,
        };

        debug!(
            event = events::AVAILABILITY_RECOMPUTED,
            component = COMPONENT,
            sequence_number = self.available.sequence_number,
            layers = %fields::format_layers(self.available.layers.keys()),
            unmet = %fields::format_layers(&self.available.unmet_dependencies()),
            "recomputed layer availability"
        );
    }

    pub(crate) fn available_layers(&self) -> AvailableLayers {
        self.available.clone()
    }

    /// Marks `layer` resolved when any one of its dependency sets is entirely
    /// resolvable. A layer on the current resolution path never satisfies itself.
    fn resolve(
        layer: &Layer,
        potential: &BTreeMap<Layer, PotentialLayer>,
        resolved: &mut HashSet<Layer>,
        in_progress: &mut HashSet<Layer>,
    ) {
        if resolved.contains(layer) {
            return;
        }
        let Some(entry) = potential.get(layer) else {
            return;
        };
        if in_progress.contains(layer) {
            warn!(
                event = events::AVAILABILITY_CYCLIC_DEPENDENCY,
                component = COMPONENT,
                layer = %fields::format_layer(layer),
                "cyclic layer dependency"
            );
            return;
        }

        for dependencies in &entry.dependency_sets {
            if dependencies.is_empty() {
                resolved.insert(*layer);
                return;
            }

            in_progress.insert(*layer);
            let mut satisfied = true;
            for dependency in dependencies {
                Self::resolve(dependency, potential, resolved, in_progress);
                if !resolved.contains(dependency) {
                    satisfied = false;
                    break;
                }
            }
            in_progress.remove(layer);

            if satisfied {
                resolved.insert(*layer);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AvailabilityAggregator;
    use crate::layer::{Layer, LayerDependency, LayersOffering, PublisherId};
    use std::collections::BTreeSet;

    const A: Layer = Layer::new(1, 0, 0);
    const B: Layer = Layer::new(2, 0, 0);
    const C: Layer = Layer::new(3, 0, 0);

    #[test]
    fn union_of_offerings_with_publisher_annotations() {
        let mut aggregator = AvailabilityAggregator::new();
        let offerings = [
            LayersOffering::of_layers(PublisherId(1), [A, B]),
            LayersOffering::of_layers(PublisherId(2), [B]),
        ];

        aggregator.set_publishers_offering(&offerings);
        let available = aggregator.available_layers();

        assert_eq!(available.layer_set(), [A, B].into_iter().collect());
        assert_eq!(
            available.layers[&B].publisher_ids,
            [PublisherId(1), PublisherId(2)].into_iter().collect()
        );
        assert!(available.unmet_dependencies().is_empty());
    }

    #[test]
    fn recompute_replaces_previous_view() {
        let mut aggregator = AvailabilityAggregator::new();

        aggregator.set_publishers_offering(&[LayersOffering::of_layers(PublisherId(1), [A])]);
        let first = aggregator.available_layers();
        let no_offerings: [LayersOffering; 0] = [];
        aggregator.set_publishers_offering(&no_offerings);
        let second = aggregator.available_layers();

        assert!(second.is_empty());
        assert!(second.sequence_number > first.sequence_number);
    }

    #[test]
    fn layer_with_unoffered_dependency_is_listed_but_unmet() {
        let mut aggregator = AvailabilityAggregator::new();

        aggregator.set_publishers_offering(&[LayersOffering::new(
            PublisherId(1),
            [LayerDependency::with_dependencies(A, [B])],
        )]);
        let available = aggregator.available_layers();

        assert!(available.contains(&A));
        assert_eq!(available.layers[&A].dependencies, [B].into_iter().collect());
        assert_eq!(available.unmet_dependencies(), [A].into_iter().collect());
    }

    #[test]
    fn dependency_chain_resolves_across_publishers() {
        let mut aggregator = AvailabilityAggregator::new();

        aggregator.set_publishers_offering(&[
            LayersOffering::new(PublisherId(1), [LayerDependency::with_dependencies(A, [B])]),
            LayersOffering::new(PublisherId(2), [LayerDependency::with_dependencies(B, [C])]),
            LayersOffering::of_layers(PublisherId(3), [C]),
        ]);

        assert!(aggregator.available_layers().unmet_dependencies().is_empty());
    }

    #[test]
    fn cyclic_dependencies_never_resolve() {
        let mut aggregator = AvailabilityAggregator::new();

        aggregator.set_publishers_offering(&[LayersOffering::new(
            PublisherId(1),
            [
                LayerDependency::with_dependencies(A, [B]),
                LayerDependency::with_dependencies(B, [A]),
            ],
        )]);

        let unmet: BTreeSet<Layer> = aggregator.available_layers().unmet_dependencies();
        assert_eq!(unmet, [A, B].into_iter().collect());
    }

    #[test]
    fn alternative_dependency_set_can_satisfy_layer() {
        let mut aggregator = AvailabilityAggregator::new();

        aggregator.set_publishers_offering(&[
            LayersOffering::new(PublisherId(1), [LayerDependency::with_dependencies(A, [B])]),
            LayersOffering::new(PublisherId(2), [LayerDependency::with_dependencies(A, [C])]),
            LayersOffering::of_layers(PublisherId(3), [C]),
        ]);

        let available = aggregator.available_layers();
        assert!(available.layers[&A].dependencies_met);
        assert_eq!(available.layers[&A].dependencies, [B, C].into_iter().collect());
    }
}
