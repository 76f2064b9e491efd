//! # Variable Resolution
//!
//! Layered-override lookup over a host's ownership chain.
//!
//! A host sees the union of the variables defined at its ancestor scopes,
//! with deterministic precedence (highest first):
//!
//! 1. The host's own variables
//! 2. Attached labels, visited in ascending name order
//! 3. The host's cell, when it has one
//! 4. The host's region
//!
//! The view is an explicit ordered list of lookup layers queried
//! first-hit-wins. No merged structure is materialized for single-key
//! lookups, no source mapping is ever mutated, and every operation is a
//! total function: missing keys resolve to nothing, never to an error.

use std::collections::BTreeSet;

use fi_core::types::{Blame, SourceRef, VariableMap};

/// One scope's own (unmerged) variables, tagged with its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableLayer {
    pub source: SourceRef,
    pub variables: VariableMap,
}

impl VariableLayer {
    pub fn new(source: SourceRef, variables: VariableMap) -> Self {
        Self { source, variables }
    }
}

/// The resolved view of one host: its layers in priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedView {
    layers: Vec<VariableLayer>,
}

impl ResolvedView {
    /// Build a view from layers already in priority order (highest first).
    pub fn new(layers: Vec<VariableLayer>) -> Self {
        Self { layers }
    }

    /// Build the canonical host chain. Label layers are sorted by source
    /// name here so callers cannot accidentally depend on insertion order;
    /// `cell` is simply skipped when the host has none.
    pub fn for_host(
        host: VariableLayer,
        mut labels: Vec<VariableLayer>,
        cell: Option<VariableLayer>,
        region: VariableLayer,
    ) -> Self {
        labels.sort_by(|a, b| a.source.name.cmp(&b.source.name));

        let mut layers = Vec::with_capacity(labels.len() + 3);
        layers.push(host);
        layers.extend(labels);
        if let Some(cell) = cell {
            layers.push(cell);
        }
        layers.push(region);
        Self { layers }
    }

    /// First-hit-wins lookup of one key across the chain.
    #[must_use]
    pub fn resolve_one(&self, key: &str) -> Option<&serde_json::Value> {
        self.layers
            .iter()
            .find_map(|layer| layer.variables.get(key))
    }

    /// The union of every layer's key set.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.layers
            .iter()
            .flat_map(|layer| layer.variables.keys().cloned())
            .collect()
    }

    /// Materialize the merged mapping. Equivalent to flattening the layers
    /// in reverse priority order with overwrite, but built by first-hit
    /// insertion so no layer is ever mutated.
    #[must_use]
    pub fn resolved(&self) -> VariableMap {
        let mut merged = VariableMap::new();
        for layer in &self.layers {
            for (key, value) in &layer.variables {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        merged
    }

    /// Which scope set this key, paired with that scope's raw value.
    #[must_use]
    pub fn blame_one(&self, key: &str) -> Option<Blame> {
        self.layers.iter().find_map(|layer| {
            layer.variables.get(key).map(|value| Blame {
                source: layer.source.clone(),
                value: value.clone(),
            })
        })
    }

    /// Blame for the requested keys, or for every visible key when `keys`
    /// is `None`. Keys defined nowhere in the chain are omitted.
    #[must_use]
    pub fn blame(&self, keys: Option<&[String]>) -> std::collections::BTreeMap<String, Blame> {
        let keys: Vec<String> = match keys {
            Some(keys) => keys.to_vec(),
            None => self.keys().into_iter().collect(),
        };

        keys.into_iter()
            .filter_map(|key| self.blame_one(&key).map(|blame| (key, blame)))
            .collect()
    }

    #[must_use]
    pub fn layers(&self) -> &[VariableLayer] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fi_core::types::ResourceKind;
    use serde_json::json;

    fn source(kind: ResourceKind, id: &str, name: &str) -> SourceRef {
        SourceRef {
            kind,
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn layer(kind: ResourceKind, id: &str, name: &str, vars: &[(&str, &str)]) -> VariableLayer {
        VariableLayer::new(
            source(kind, id, name),
            vars.iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect(),
        )
    }

    fn fixture_with_cell() -> ResolvedView {
        ResolvedView::for_host(
            layer(
                ResourceKind::Device,
                "d-1",
                "host1",
                &[("foo", "H1"), ("baz", "H3")],
            ),
            vec![],
            Some(layer(ResourceKind::Cell, "c-1", "cell1", &[("bar", "C2")])),
            layer(
                ResourceKind::Region,
                "r-1",
                "region1",
                &[("foo", "R1"), ("bar", "R2"), ("bax", "R3")],
            ),
        )
    }

    #[test]
    fn test_resolution_precedence() {
        let view = fixture_with_cell();
        let resolved = view.resolved();

        let expected: VariableMap = [
            ("foo".to_string(), json!("H1")),
            ("bar".to_string(), json!("C2")),
            ("baz".to_string(), json!("H3")),
            ("bax".to_string(), json!("R3")),
        ]
        .into_iter()
        .collect();

        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_resolve_one_matches_resolved() {
        let view = fixture_with_cell();
        let resolved = view.resolved();
        for key in view.keys() {
            assert_eq!(view.resolve_one(&key), resolved.get(&key));
        }
        assert_eq!(view.resolve_one("missing"), None);
    }

    #[test]
    fn test_chain_agrees_with_reverse_flatten() {
        let view = ResolvedView::for_host(
            layer(ResourceKind::Device, "d-1", "host1", &[("a", "H")]),
            vec![
                layer(ResourceKind::Label, "l-2", "zeta", &[("a", "Z"), ("c", "Z")]),
                layer(ResourceKind::Label, "l-1", "alpha", &[("c", "A"), ("d", "A")]),
            ],
            Some(layer(
                ResourceKind::Cell,
                "c-1",
                "cell1",
                &[("d", "C"), ("e", "C")],
            )),
            layer(
                ResourceKind::Region,
                "r-1",
                "region1",
                &[("a", "R"), ("e", "R"), ("f", "R")],
            ),
        );

        // Flatten in reverse priority order with later-wins overwrite:
        // region, cell, labels in reverse sorted order, host last.
        let mut flattened = VariableMap::new();
        for layer in view.layers().iter().rev() {
            for (key, value) in &layer.variables {
                flattened.insert(key.clone(), value.clone());
            }
        }

        assert_eq!(view.resolved(), flattened);
    }

    #[test]
    fn test_blame_attribution() {
        let view = fixture_with_cell();
        let blame = view.blame(Some(&["foo".to_string(), "bar".to_string()]));

        assert_eq!(blame["foo"].source.kind, ResourceKind::Device);
        assert_eq!(blame["foo"].value, json!("H1"));
        assert_eq!(blame["bar"].source.kind, ResourceKind::Cell);
        assert_eq!(blame["bar"].value, json!("C2"));
    }

    #[test]
    fn test_blame_all_keys_and_missing_keys() {
        let view = fixture_with_cell();

        let all = view.blame(None);
        assert_eq!(all.len(), 4);
        assert_eq!(all["bax"].source.kind, ResourceKind::Region);

        let missing = view.blame(Some(&["nope".to_string()]));
        assert!(missing.is_empty());
    }

    #[test]
    fn test_no_cell_fallback() {
        let view = ResolvedView::for_host(
            layer(ResourceKind::Device, "d-1", "host1", &[("bar", "bar2")]),
            vec![],
            None,
            layer(ResourceKind::Region, "r-1", "region1", &[("foo", "R1")]),
        );

        let expected: VariableMap = [
            ("foo".to_string(), json!("R1")),
            ("bar".to_string(), json!("bar2")),
        ]
        .into_iter()
        .collect();
        assert_eq!(view.resolved(), expected);
    }

    #[test]
    fn test_label_order_is_sorted_by_name() {
        // Labels attached as ["b", "a"] must behave as [a, b].
        let view = ResolvedView::for_host(
            layer(ResourceKind::Device, "d-1", "host1", &[]),
            vec![
                layer(ResourceKind::Label, "l-b", "b", &[("key", "from-b")]),
                layer(ResourceKind::Label, "l-a", "a", &[("key", "from-a")]),
            ],
            None,
            layer(ResourceKind::Region, "r-1", "region1", &[]),
        );

        assert_eq!(view.resolve_one("key"), Some(&json!("from-a")));
        assert_eq!(view.layers()[1].source.name, "a");
        assert_eq!(view.layers()[2].source.name, "b");
    }

    #[test]
    fn test_empty_layers_are_harmless() {
        let view = ResolvedView::new(vec![]);
        assert!(view.resolved().is_empty());
        assert!(view.keys().is_empty());
        assert_eq!(view.resolve_one("anything"), None);
        assert!(view.blame(None).is_empty());
    }

    #[test]
    fn test_structured_values_resolve_intact() {
        let host_vars: VariableMap = [(
            "hardware_profiles".to_string(),
            json!({"disks": [{"size": 4096}, {"size": 8192}]}),
        )]
        .into_iter()
        .collect();

        let view = ResolvedView::for_host(
            VariableLayer::new(source(ResourceKind::Device, "d-1", "host1"), host_vars),
            vec![],
            None,
            layer(ResourceKind::Region, "r-1", "region1", &[]),
        );

        assert_eq!(
            view.resolve_one("hardware_profiles").unwrap()["disks"][1]["size"],
            json!(8192)
        );
    }
}
