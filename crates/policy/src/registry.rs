use std::sync::Arc;

use keel_core::{DynamicObject, ResourceKind};
use rustc_hash::FxHashMap;

/// Result of merging a desired object onto the live one.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Live object already matches; no write.
    NoChangeNeeded,
    /// Write this merged object as an update.
    Update(DynamicObject),
    /// An immutable field differs: delete the live object and create this one.
    MustRecreate(DynamicObject),
}

/// Which standard identity labels a kind receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StandardLabels {
    #[default]
    None,
    /// Pod template labels and default selector only.
    TemplateOnly,
    /// Resource labels as well as pod template labels and default selector.
    ResourceAndTemplate,
}

/// Where a kind keeps the pod specs and containers the pipeline normalizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodLayout {
    /// Pod specs (image pull policy, volume ordering, cipher env).
    pub pod_specs: &'static [&'static str],
    /// Objects receiving the OS `nodeSelector`.
    pub node_selectors: &'static [&'static str],
    /// Container lists whose probes get default thresholds.
    pub probed_containers: &'static [&'static str],
    pub standard_labels: StandardLabels,
    /// Containers receive the TLS cipher suites environment variable.
    pub cipher_env: bool,
}

/// Kind-specific behavior. New kinds register an implementation with the
/// [`StrategyRegistry`]; every method has a neutral default.
pub trait KindStrategy: Send + Sync {
    fn layout(&self) -> PodLayout {
        PodLayout::default()
    }

    /// Whether the configured owner is attached. Objects collected through a
    /// different parent opt out.
    fn takes_owner(&self) -> bool {
        true
    }

    /// Kind-specific merge. `desired` already carries the common metadata merge.
    fn merge(&self, desired: DynamicObject, _current: &DynamicObject) -> MergeOutcome {
        MergeOutcome::Update(desired)
    }
}

/// Fallback for unlisted kinds: always write the merged object.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericStrategy;

impl KindStrategy for GenericStrategy {}

/// Strategy table keyed by `(group, kind)`.
pub struct StrategyRegistry {
    by_kind: FxHashMap<(String, String), Arc<dyn KindStrategy>>,
    fallback: Arc<dyn KindStrategy>,
}

impl StrategyRegistry {
    /// Registry without any kind-specific strategies.
    pub fn empty() -> Self {
        Self { by_kind: FxHashMap::default(), fallback: Arc::new(GenericStrategy) }
    }

    pub fn register(&mut self, group: &str, kind: &str, strategy: impl KindStrategy + 'static) -> &mut Self {
        self.by_kind.insert((group.to_string(), kind.to_string()), Arc::new(strategy));
        self
    }

    pub fn lookup(&self, kind: &ResourceKind) -> &dyn KindStrategy {
        self.by_kind
            .get(&(kind.group.clone(), kind.kind.clone()))
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

impl Default for StrategyRegistry {
    /// Registry with every built-in kind strategy.
    fn default() -> Self {
        let mut registry = Self::empty();
        crate::kinds::register_builtin(&mut registry);
        registry
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("StrategyRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverWrite;

    impl KindStrategy for NeverWrite {
        fn merge(&self, _desired: DynamicObject, _current: &DynamicObject) -> MergeOutcome {
            MergeOutcome::NoChangeNeeded
        }
    }

    #[test]
    fn unknown_kinds_fall_back_to_generic() {
        let registry = StrategyRegistry::empty();
        let strategy = registry.lookup(&ResourceKind::new("example.com", "v1", "Widget"));
        assert!(strategy.takes_owner());
        assert!(strategy.layout().pod_specs.is_empty());
    }

    #[test]
    fn registered_strategy_applies_to_every_version() {
        let mut registry = StrategyRegistry::empty();
        registry.register("example.com", "Widget", NeverWrite);
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "example.com/v2", "kind": "Widget", "metadata": { "name": "w" }
        }))
        .unwrap();
        let outcome = registry.lookup(&ResourceKind::new("example.com", "v2", "Widget")).merge(obj.clone(), &obj);
        assert!(matches!(outcome, MergeOutcome::NoChangeNeeded));
    }

    #[test]
    fn default_registry_knows_builtin_kinds() {
        let registry = StrategyRegistry::default();
        assert!(!registry.is_empty());
        let deployment = registry.lookup(&ResourceKind::new("apps", "v1", "Deployment")).layout();
        assert_eq!(deployment.standard_labels, StandardLabels::ResourceAndTemplate);
        assert!(deployment.cipher_env);
        assert!(!registry.lookup(&ResourceKind::new("projectcalico.org", "v3", "UISettings")).takes_owner());
    }
}
