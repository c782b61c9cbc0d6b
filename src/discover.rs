use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::JoinpointRegistry;

/// Dependency edges of one class, maintained by the surrounding tooling.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct ClassEdges {
    #[serde(default)]
    pub(crate) uses: Vec<String>,
    #[serde(default)]
    pub(crate) extends: Option<String>,
    #[serde(default)]
    pub(crate) implements: Vec<String>,
}

/// Queryable store mapping class names to declaring files and edges. Only
/// the discovery pass consults it; the weaving algorithm never does.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct DependencyIndex {
    #[serde(default)]
    pub(crate) files: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) edges: BTreeMap<String, ClassEdges>,
}

/// Transitive-closure discovery of additional sources to weave: classes a
/// working-set member mixes in (walked through the uses graph until a
/// declaring file anchors them), and classes referenced as an advice target
/// from a joinpoint whose receiving class is already in the set.
///
/// Returns the class-to-file map of anchored additions; unanchored names
/// still propagate their own edges but are never reported.
pub(crate) fn discover_sources(
    working: &BTreeSet<String>,
    index: &DependencyIndex,
    registry: &JoinpointRegistry,
) -> BTreeMap<String, String> {
    let mut known = working.clone();
    let mut added = BTreeMap::new();
    loop {
        let mut round: BTreeSet<String> = BTreeSet::new();
        for name in &known {
            if let Some(edges) = index.edges.get(name) {
                for used in &edges.uses {
                    if !known.contains(used) {
                        round.insert(used.clone());
                    }
                }
            }
            let method_map = registry.method_joinpoints(name);
            let property_map = registry.property_joinpoints(name);
            for advices in method_map.values().chain(property_map.values()) {
                for advice in advices {
                    if !known.contains(&advice.target.class) {
                        round.insert(advice.target.class.clone());
                    }
                }
            }
        }
        if round.is_empty() {
            break;
        }
        for name in round {
            if let Some(file) = index.files.get(&name) {
                debug!(class = %name, file = %file, "discovered source");
                added.insert(name.clone(), file.clone());
            }
            known.insert(name);
        }
    }
    added
}
