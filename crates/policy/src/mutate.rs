//! Mutation pipeline applied to every desired object before a create or update.
//!
//! Each step is a plain function over the object and is idempotent on its own;
//! [`mutate`] runs them in a fixed order.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use keel_core::{DesiredObject, DynamicObject, OsType, OwnerRef, OwnershipMode, ResourceKind};
use serde_json::{json, Value as Json};
use thiserror::Error;

use crate::json::{child_object, name_of, select_mut};
use crate::registry::{PodLayout, StandardLabels, StrategyRegistry};

pub const OS_NODE_LABEL: &str = "kubernetes.io/os";
pub const TLS_CIPHERS_ENV_VAR: &str = "TLS_CIPHER_SUITES";
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
pub const APP_LABEL: &str = "k8s-app";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

const FAILURE_THRESHOLD: i64 = 3;
const SUCCESS_THRESHOLD: i64 = 1;
const TIMEOUT_SECONDS: i64 = 5;
const LIVENESS_PERIOD_SECONDS: i64 = 60;
const READINESS_PERIOD_SECONDS: i64 = 30;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{object} is already controlled by {kind} {name}")]
    AlreadyOwned { object: String, kind: String, name: String },
    #[error("owner in namespace {owner_ns} cannot own {object} in namespace {object_ns}")]
    CrossNamespaceOwner { object: String, owner_ns: String, object_ns: String },
}

/// Inputs the pipeline needs besides the object itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationContext<'a> {
    pub owner: Option<&'a OwnerRef>,
    pub os: OsType,
    /// Resolved installation cipher suites; `None` or empty skips injection.
    pub tls_cipher_suites: Option<&'a str>,
}

/// Run every pipeline step on `desired`.
pub fn mutate(
    registry: &StrategyRegistry,
    kind: &ResourceKind,
    desired: &mut DesiredObject,
    ctx: &MutationContext<'_>,
) -> Result<(), MutationError> {
    let strategy = registry.lookup(kind);
    let layout = strategy.layout();
    if strategy.takes_owner() {
        if let Some(owner) = ctx.owner {
            link_owner(&mut desired.object, owner, desired.ownership)?;
        }
    }
    let obj = &mut desired.object;
    ensure_os_scheduling(obj, &layout, ctx.os);
    set_image_pull_policy(obj, &layout);
    order_volumes(obj, &layout);
    set_probe_timeouts(obj, &layout);
    set_standard_labels(obj, &layout);
    if let Some(ciphers) = ctx.tls_cipher_suites {
        ensure_tls_ciphers(obj, &layout, ciphers);
    }
    Ok(())
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("")
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    api_group(&a.api_version) == api_group(&b.api_version) && a.kind == b.kind && a.name == b.name
}

/// Attach `owner` to `obj`. Skipped when a namespaced owner meets a
/// cluster-scoped object, since such references are invalid.
pub fn link_owner(obj: &mut DynamicObject, owner: &OwnerRef, mode: OwnershipMode) -> Result<(), MutationError> {
    let object_ns = obj.metadata.namespace.as_deref().filter(|ns| !ns.is_empty());
    match (owner.namespace.as_deref(), object_ns) {
        (Some(_), None) => return Ok(()),
        (Some(owner_ns), Some(object_ns)) if owner_ns != object_ns => {
            return Err(MutationError::CrossNamespaceOwner {
                object: obj.metadata.name.clone().unwrap_or_default(),
                owner_ns: owner_ns.to_string(),
                object_ns: object_ns.to_string(),
            });
        }
        _ => {}
    }

    let controller = mode == OwnershipMode::Controller;
    let wanted = owner.to_reference(controller);
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    if controller {
        if let Some(other) = refs.iter().find(|r| r.controller == Some(true) && !same_owner(r, &wanted)) {
            return Err(MutationError::AlreadyOwned {
                object: obj.metadata.name.clone().unwrap_or_default(),
                kind: other.kind.clone(),
                name: other.name.clone(),
            });
        }
    }
    match refs.iter_mut().find(|r| same_owner(r, &wanted)) {
        Some(existing) => *existing = wanted,
        None => refs.push(wanted),
    }
    Ok(())
}

/// Pin pods to nodes of the component's OS through `nodeSelector`.
pub fn ensure_os_scheduling(obj: &mut DynamicObject, layout: &PodLayout, os: OsType) {
    let Some(label) = os.node_label() else { return };
    for path in layout.node_selectors {
        for spec in select_mut(&mut obj.data, path) {
            if let Some(selector) = child_object(spec, "nodeSelector") {
                selector.insert(OS_NODE_LABEL.to_string(), Json::String(label.to_string()));
            }
        }
    }
}

fn containers_mut<'a>(spec: &'a mut Json, lists: &[&str]) -> Vec<&'a mut Json> {
    let Some(spec) = spec.as_object_mut() else { return Vec::new() };
    spec.iter_mut()
        .filter(|(k, _)| lists.contains(&k.as_str()))
        .filter_map(|(_, v)| v.as_array_mut())
        .flat_map(|cs| cs.iter_mut())
        .collect()
}

pub fn set_image_pull_policy(obj: &mut DynamicObject, layout: &PodLayout) {
    for path in layout.pod_specs {
        for spec in select_mut(&mut obj.data, path) {
            for c in containers_mut(spec, &["containers", "initContainers"]) {
                let Some(c) = c.as_object_mut() else { continue };
                let unset = c.get("imagePullPolicy").and_then(Json::as_str).map_or(true, str::is_empty);
                if unset {
                    c.insert("imagePullPolicy".to_string(), Json::String(DEFAULT_PULL_POLICY.to_string()));
                }
            }
        }
    }
}

fn sort_by_name(list: Option<&mut Json>) {
    if let Some(items) = list.and_then(Json::as_array_mut) {
        items.sort_by(|a, b| name_of(a).cmp(name_of(b)));
    }
}

/// Sort volumes and every container's volume mounts by name.
pub fn order_volumes(obj: &mut DynamicObject, layout: &PodLayout) {
    for path in layout.pod_specs {
        for spec in select_mut(&mut obj.data, path) {
            sort_by_name(spec.get_mut("volumes"));
            for c in containers_mut(spec, &["containers", "initContainers"]) {
                sort_by_name(c.get_mut("volumeMounts"));
            }
        }
    }
}

fn default_if_unset(probe: &mut serde_json::Map<String, Json>, field: &str, value: i64) {
    let unset = probe.get(field).map_or(true, |v| v.is_null() || v.as_i64() == Some(0));
    if unset {
        probe.insert(field.to_string(), json!(value));
    }
}

fn default_probe(container: &mut Json, probe: &str, period: i64) {
    let Some(p) = container.get_mut(probe).and_then(Json::as_object_mut) else { return };
    default_if_unset(p, "failureThreshold", FAILURE_THRESHOLD);
    default_if_unset(p, "successThreshold", SUCCESS_THRESHOLD);
    default_if_unset(p, "timeoutSeconds", TIMEOUT_SECONDS);
    default_if_unset(p, "periodSeconds", period);
}

/// Default unset probe thresholds: liveness fails after ~3 minutes,
/// readiness after ~1.5 minutes.
pub fn set_probe_timeouts(obj: &mut DynamicObject, layout: &PodLayout) {
    for path in layout.probed_containers {
        for list in select_mut(&mut obj.data, path) {
            let Some(containers) = list.as_array_mut() else { continue };
            for c in containers {
                default_probe(c, "livenessProbe", LIVENESS_PERIOD_SECONDS);
                default_probe(c, "readinessProbe", READINESS_PERIOD_SECONDS);
            }
        }
    }
}

/// `k8s-app`/`app.kubernetes.io/name` labels plus a default selector.
pub fn set_standard_labels(obj: &mut DynamicObject, layout: &PodLayout) {
    if layout.standard_labels == StandardLabels::None {
        return;
    }
    let Some(name) = obj.metadata.name.clone() else { return };

    if layout.standard_labels == StandardLabels::ResourceAndTemplate {
        let labels = obj.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(APP_LABEL.to_string(), name.clone());
        labels.insert(NAME_LABEL.to_string(), name.clone());
    }

    let Some(spec) = child_object(&mut obj.data, "spec") else { return };
    let has_selector = spec.get("selector").is_some_and(|s| !s.is_null());
    if !has_selector {
        spec.insert("selector".to_string(), json!({ "matchLabels": { APP_LABEL: name } }));
    }

    let Some(template) = spec.get_mut("template") else { return };
    let Some(metadata) = child_object(template, "metadata") else { return };
    let labels = metadata.entry("labels".to_string()).or_insert_with(|| json!({}));
    if !labels.is_object() {
        *labels = json!({});
    }
    let Some(labels) = labels.as_object_mut() else { return };
    for key in [APP_LABEL, NAME_LABEL] {
        let unset = labels.get(key).and_then(Json::as_str).map_or(true, str::is_empty);
        if unset {
            labels.insert(key.to_string(), Json::String(name.clone()));
        }
    }
}

/// Add the cipher suites env var to containers that do not define it.
pub fn ensure_tls_ciphers(obj: &mut DynamicObject, layout: &PodLayout, ciphers: &str) {
    if !layout.cipher_env || ciphers.is_empty() {
        return;
    }
    for path in layout.pod_specs {
        for spec in select_mut(&mut obj.data, path) {
            for c in containers_mut(spec, &["containers"]) {
                let Some(c) = c.as_object_mut() else { continue };
                let env = c.entry("env".to_string()).or_insert_with(|| json!([]));
                if !env.is_array() {
                    *env = json!([]);
                }
                let Some(env) = env.as_array_mut() else { continue };
                if env.iter().any(|e| name_of(e) == TLS_CIPHERS_ENV_VAR) {
                    continue;
                }
                env.push(json!({ "name": TLS_CIPHERS_ENV_VAR, "value": ciphers }));
            }
        }
    }
}
