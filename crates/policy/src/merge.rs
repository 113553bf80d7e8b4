//! Merge policy table: combine a desired object with the live one and decide
//! whether it needs a write, an update or a delete/create cycle.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use keel_core::{DesiredObject, DynamicObject, OwnershipMode, ResourceKind};
use tracing::{debug, trace};

use crate::registry::{MergeOutcome, StrategyRegistry};

/// Live objects annotated with this key set to `"true"` are left alone.
pub const IGNORE_ANNOTATION: &str = "unsupported.keel.dev/ignore";

pub fn is_ignored(obj: &DynamicObject) -> bool {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(IGNORE_ANNOTATION))
        .is_some_and(|v| v == "true")
}

/// Apply the common metadata merge, then the kind's strategy.
pub fn merge_state(
    registry: &StrategyRegistry,
    kind: &ResourceKind,
    desired: &DesiredObject,
    current: &DynamicObject,
) -> MergeOutcome {
    let mut merged = desired.object.clone();
    merge_common(&mut merged, current, desired.ownership);
    let outcome = registry.lookup(kind).merge(merged, current);
    match &outcome {
        MergeOutcome::NoChangeNeeded => trace!(%kind, name = ?current.metadata.name, "no change needed"),
        MergeOutcome::MustRecreate(_) => debug!(%kind, name = ?current.metadata.name, "immutable field differs"),
        MergeOutcome::Update(_) => {}
    }
    outcome
}

/// Metadata merge shared by every kind: adopt the live object's identity
/// fields and generation, union labels and annotations (desired wins), and
/// union owner references for shared ownership.
pub fn merge_common(desired: &mut DynamicObject, current: &DynamicObject, ownership: OwnershipMode) {
    let (dm, cm) = (&mut desired.metadata, &current.metadata);
    if dm.resource_version.as_deref().unwrap_or("").is_empty() {
        dm.resource_version = cm.resource_version.clone();
    }
    if dm.uid.as_deref().unwrap_or("").is_empty() {
        dm.uid = cm.uid.clone();
    }
    if dm.creation_timestamp.is_none() {
        dm.creation_timestamp = cm.creation_timestamp.clone();
    }
    dm.generation = cm.generation;

    dm.annotations = merge_maps(cm.annotations.as_ref(), dm.annotations.as_ref());
    dm.labels = merge_maps(cm.labels.as_ref(), dm.labels.as_ref());

    if ownership == OwnershipMode::SharedNonController {
        let merged = merge_owner_references(
            dm.owner_references.as_deref().unwrap_or_default(),
            cm.owner_references.as_deref().unwrap_or_default(),
        );
        dm.owner_references = (!merged.is_empty()).then_some(merged);
    }
}

/// Union with `desired` winning on key conflicts. `None` only when both are absent.
pub fn merge_maps(
    current: Option<&BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    if current.is_none() && desired.is_none() {
        return None;
    }
    let mut merged = current.cloned().unwrap_or_default();
    merged.extend(desired.into_iter().flatten().map(|(k, v)| (k.clone(), v.clone())));
    Some(merged)
}

/// Desired references first, then live ones not already present.
pub fn merge_owner_references(desired: &[OwnerReference], current: &[OwnerReference]) -> Vec<OwnerReference> {
    let same = |a: &OwnerReference, b: &OwnerReference| {
        if !a.uid.is_empty() && !b.uid.is_empty() {
            a.uid == b.uid
        } else {
            a.api_version == b.api_version && a.kind == b.kind && a.name == b.name
        }
    };
    let mut merged: Vec<OwnerReference> = Vec::with_capacity(desired.len() + current.len());
    for r in desired.iter().chain(current.iter()) {
        if !merged.iter().any(|m| same(m, r)) {
            merged.push(r.clone());
        }
    }
    merged
}
