//! Built-in kind strategies.

use keel_core::DynamicObject;
use serde_json::Value as Json;

use crate::json::{at, merge_maps, set_at};
use crate::registry::{KindStrategy, MergeOutcome, PodLayout, StandardLabels, StrategyRegistry};

const RBAC: &str = "rbac.authorization.k8s.io";
const CALICO: &str = "projectcalico.org";
const MONITORING: &str = "monitoring.coreos.com";

const TEMPLATE_SPEC: &[&str] = &["spec/template/spec"];
const TEMPLATE_CONTAINERS: &[&str] = &["spec/template/spec/containers"];

const DEPLOYMENT: PodLayout = PodLayout {
    pod_specs: TEMPLATE_SPEC,
    node_selectors: TEMPLATE_SPEC,
    probed_containers: TEMPLATE_CONTAINERS,
    standard_labels: StandardLabels::ResourceAndTemplate,
    cipher_env: true,
};

const DAEMONSET: PodLayout = PodLayout { standard_labels: StandardLabels::TemplateOnly, ..DEPLOYMENT };

const TEMPLATED: PodLayout = PodLayout {
    pod_specs: TEMPLATE_SPEC,
    node_selectors: TEMPLATE_SPEC,
    probed_containers: &[],
    standard_labels: StandardLabels::None,
    cipher_env: false,
};

const POD_TEMPLATE: PodLayout = PodLayout { pod_specs: &["template/spec"], node_selectors: &["template/spec"], ..TEMPLATED };

const CRONJOB: PodLayout = PodLayout {
    pod_specs: &["spec/jobTemplate/spec/template/spec"],
    node_selectors: &["spec/jobTemplate/spec/template/spec"],
    ..TEMPLATED
};

const ELASTICSEARCH: PodLayout = PodLayout {
    pod_specs: &["spec/nodeSets/*/podTemplate/spec"],
    node_selectors: &["spec/nodeSets/*/podTemplate/spec"],
    probed_containers: &["spec/nodeSets/*/podTemplate/spec/containers"],
    ..TEMPLATED
};

const KIBANA: PodLayout = PodLayout {
    pod_specs: &["spec/podTemplate/spec"],
    node_selectors: &["spec/podTemplate/spec"],
    probed_containers: &["spec/podTemplate/spec/containers"],
    ..TEMPLATED
};

// Prometheus operator kinds carry their pod fields directly on `spec`.
const PROMETHEUS: PodLayout = PodLayout {
    pod_specs: &[],
    node_selectors: &["spec"],
    probed_containers: &["spec/containers"],
    ..TEMPLATED
};

const ALERTMANAGER: PodLayout = PodLayout { probed_containers: &[], ..PROMETHEUS };

pub(crate) fn register_builtin(r: &mut StrategyRegistry) {
    r.register("apps", "Deployment", Workload { layout: DEPLOYMENT, preserve_replicas: true })
        .register("apps", "DaemonSet", Workload { layout: DAEMONSET, preserve_replicas: false })
        .register("apps", "StatefulSet", PodOwner(TEMPLATED))
        .register("", "PodTemplate", PodOwner(POD_TEMPLATE))
        .register("batch", "CronJob", PodOwner(CRONJOB))
        .register("batch", "Job", Job)
        .register("", "Service", Service)
        .register("", "Secret", Secret)
        .register("", "ServiceAccount", ServiceAccount)
        .register(RBAC, "RoleBinding", RoleRefBinding)
        .register(RBAC, "ClusterRoleBinding", RoleRefBinding)
        .register("elasticsearch.k8s.elastic.co", "Elasticsearch", StatusManaged { layout: ELASTICSEARCH, pinned_spec: &[] })
        .register("kibana.k8s.elastic.co", "Kibana", StatusManaged { layout: KIBANA, pinned_spec: &["elasticsearchRef"] })
        .register(MONITORING, "Prometheus", PodOwner(PROMETHEUS))
        .register(MONITORING, "Alertmanager", PodOwner(ALERTMANAGER))
        .register(CALICO, "UISettings", UiSettings)
        .register(CALICO, "NetworkPolicy", SpecOnly)
        .register(CALICO, "Tier", SpecOnly);
}

fn spec_of(obj: &DynamicObject) -> Option<&Json> {
    at(&obj.data, "spec")
}

fn spec_unchanged(desired: &DynamicObject, current: &DynamicObject) -> bool {
    spec_of(desired) == spec_of(current)
}

fn merge_template_metadata(desired: &mut DynamicObject, current: &DynamicObject) {
    for field in ["labels", "annotations"] {
        let path = format!("spec/template/metadata/{field}");
        if let Some(merged) = merge_maps(at(&current.data, &path), at(&desired.data, &path)) {
            set_at(&mut desired.data, &path, Some(merged));
        }
    }
}

/// Kinds that stamp out pods but need no special merge.
struct PodOwner(PodLayout);

impl KindStrategy for PodOwner {
    fn layout(&self) -> PodLayout {
        self.0
    }
}

/// Deployments and DaemonSets: keep the live replica count unless one is
/// requested and merge pod template labels/annotations.
struct Workload {
    layout: PodLayout,
    preserve_replicas: bool,
}

impl KindStrategy for Workload {
    fn layout(&self) -> PodLayout {
        self.layout
    }

    fn merge(&self, mut desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        if self.preserve_replicas && at(&desired.data, "spec/replicas").is_none() {
            if let Some(replicas) = at(&current.data, "spec/replicas") {
                set_at(&mut desired.data, "spec/replicas", Some(replicas.clone()));
            }
        }
        merge_template_metadata(&mut desired, current);
        MergeOutcome::Update(desired)
    }
}

/// Jobs cannot be patched in place: any difference in container count, images
/// or template annotations means delete and create.
struct Job;

impl KindStrategy for Job {
    fn layout(&self) -> PodLayout {
        TEMPLATED
    }

    fn merge(&self, desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        let containers = |obj: &DynamicObject| -> Vec<Option<String>> {
            at(&obj.data, "spec/template/spec/containers")
                .and_then(Json::as_array)
                .map(|cs| cs.iter().map(|c| c.get("image").and_then(Json::as_str).map(str::to_string)).collect())
                .unwrap_or_default()
        };
        if containers(&desired) != containers(current) {
            return MergeOutcome::MustRecreate(desired);
        }
        let annotations = |obj: &DynamicObject| {
            at(&obj.data, "spec/template/metadata/annotations").and_then(Json::as_object).cloned().unwrap_or_default()
        };
        if annotations(&desired) == annotations(current) {
            return MergeOutcome::NoChangeNeeded;
        }
        MergeOutcome::MustRecreate(desired)
    }
}

const HEADLESS: &str = "None";

/// Services keep their cluster-assigned address; dropping it requires a new object.
struct Service;

impl KindStrategy for Service {
    fn merge(&self, mut desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        let current_ip = at(&current.data, "spec/clusterIP").and_then(Json::as_str).filter(|ip| !ip.is_empty());
        let wants_headless = at(&desired.data, "spec/clusterIP").and_then(Json::as_str) == Some(HEADLESS);
        if wants_headless {
            return match current_ip {
                Some(ip) if ip != HEADLESS => MergeOutcome::MustRecreate(desired),
                _ => MergeOutcome::Update(desired),
            };
        }
        if let Some(ip) = current_ip {
            set_at(&mut desired.data, "spec/clusterIP", Some(Json::String(ip.to_string())));
        }
        MergeOutcome::Update(desired)
    }
}

const OPAQUE: &str = "Opaque";

/// Secret types are immutable. An unset type defaults to Opaque on the server.
struct Secret;

impl KindStrategy for Secret {
    fn merge(&self, desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        let desired_type = at(&desired.data, "type").and_then(Json::as_str).unwrap_or("");
        let current_type = at(&current.data, "type").and_then(Json::as_str).unwrap_or("");
        let defaulted = desired_type.is_empty() && current_type == OPAQUE;
        if desired_type != current_type && !defaulted {
            return MergeOutcome::MustRecreate(desired);
        }
        MergeOutcome::Update(desired)
    }
}

/// Keep token and pull secrets that other controllers provision.
struct ServiceAccount;

impl KindStrategy for ServiceAccount {
    fn merge(&self, mut desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        for field in ["secrets", "imagePullSecrets"] {
            let present = |obj: &DynamicObject| at(&obj.data, field).and_then(Json::as_array).is_some_and(|a| !a.is_empty());
            if present(current) && !present(&desired) {
                if let Some(v) = at(&current.data, field) {
                    set_at(&mut desired.data, field, Some(v.clone()));
                }
            }
        }
        MergeOutcome::Update(desired)
    }
}

/// RoleBinding/ClusterRoleBinding: `roleRef` cannot be modified.
struct RoleRefBinding;

impl KindStrategy for RoleRefBinding {
    fn merge(&self, desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        let role = |obj: &DynamicObject| at(&obj.data, "roleRef/name").and_then(Json::as_str).map(str::to_string);
        if role(&desired) != role(current) {
            return MergeOutcome::MustRecreate(desired);
        }
        MergeOutcome::Update(desired)
    }
}

/// Resources whose own controller writes annotations, finalizers and status
/// back. Only a spec change triggers a write, and then the externally written
/// fields are carried over.
struct StatusManaged {
    layout: PodLayout,
    /// Spec fields owned by the other controller once set.
    pinned_spec: &'static [&'static str],
}

impl KindStrategy for StatusManaged {
    fn layout(&self) -> PodLayout {
        self.layout
    }

    fn merge(&self, mut desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        if spec_unchanged(&desired, current) {
            return MergeOutcome::NoChangeNeeded;
        }
        desired.metadata.annotations = current.metadata.annotations.clone();
        desired.metadata.finalizers = current.metadata.finalizers.clone();
        for field in self.pinned_spec {
            let path = format!("spec/{field}");
            set_at(&mut desired.data, &path, at(&current.data, &path).cloned());
        }
        set_at(&mut desired.data, "status", at(&current.data, "status").cloned());
        MergeOutcome::Update(desired)
    }
}

/// UI settings are garbage collected through their group: never attach our
/// owner and never replace the owners the server reports.
struct UiSettings;

impl KindStrategy for UiSettings {
    fn takes_owner(&self) -> bool {
        false
    }

    fn merge(&self, mut desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        if spec_unchanged(&desired, current) {
            return MergeOutcome::NoChangeNeeded;
        }
        desired.metadata.owner_references = current.metadata.owner_references.clone();
        MergeOutcome::Update(desired)
    }
}

/// Declarative policy kinds: write only when the spec changed.
struct SpecOnly;

impl KindStrategy for SpecOnly {
    fn merge(&self, desired: DynamicObject, current: &DynamicObject) -> MergeOutcome {
        if spec_unchanged(&desired, current) {
            MergeOutcome::NoChangeNeeded
        } else {
            MergeOutcome::Update(desired)
        }
    }
}
