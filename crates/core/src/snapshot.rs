//! Snapshot primitives: normalization, structural equality and change summaries.

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Copy of `obj` without server bookkeeping (resourceVersion, uid, creationTimestamp,
/// generation, managedFields). Two snapshots of the same logical object compare
/// equal no matter which round trip produced them.
pub fn normalize(obj: &DynamicObject) -> DynamicObject {
    let mut out = obj.clone();
    let meta = &mut out.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.generation = None;
    meta.managed_fields = None;
    if out.data.is_null() {
        out.data = Json::Object(serde_json::Map::new());
    }
    out
}

/// Field-by-field equality over type meta, metadata and payload.
pub fn same_object(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.types == b.types && a.metadata == b.metadata && a.data == b.data
}

pub fn generation(obj: &DynamicObject) -> i64 {
    obj.metadata.generation.unwrap_or(0)
}

/// Deletion requested, or (for namespaces) the `Terminating` phase reported.
pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
        || obj.data.pointer("/status/phase").and_then(Json::as_str) == Some("Terminating")
}

/// Clear the fields that tie an object to one incarnation on the server so it
/// is accepted as a fresh creation.
pub fn reset_for_create(obj: &mut DynamicObject) {
    obj.metadata.resource_version = None;
    obj.metadata.uid = None;
    obj.metadata.creation_timestamp = None;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Summarize how `target` differs from the live `base` object, ignoring
/// server-populated fields.
pub fn summarize(target: &DynamicObject, base: &DynamicObject) -> DiffSummary {
    let t = serde_json::to_value(target).map(strip_noisy).unwrap_or(Json::Null);
    let b = serde_json::to_value(base).map(strip_noisy).unwrap_or(Json::Null);
    diff_summary(&t, &b)
}

fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
        meta.remove("uid");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                out.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    out.updates += 1;
                }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}
