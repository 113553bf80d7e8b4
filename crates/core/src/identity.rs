use std::fmt;

use kube::core::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

use crate::IdentityError;

/// Group/version/kind of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Split an `apiVersion` string (`v1` or `apps/v1`) into group and version.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Version-agnostic match on group and kind.
    pub fn is(&self, group: &str, kind: &str) -> bool {
        self.group == group && self.kind == kind
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind { group: self.group.clone(), version: self.version.clone(), kind: self.kind.clone() }
    }

    /// Stable string key, e.g. `v1/Secret` or `apps/v1/Deployment`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    pub fn namespace() -> Self {
        Self::new("", "v1", "Namespace")
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Addressing key for one managed resource: kind + namespace + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    /// `None` for cluster-scoped resources.
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        Self { kind, namespace, name: name.into() }
    }

    /// Extract the identity of an object. Type meta and `metadata.name` are required.
    pub fn of(obj: &DynamicObject) -> Result<Self, IdentityError> {
        let types = obj.types.as_ref().ok_or(IdentityError::MissingTypeMeta)?;
        if types.api_version.is_empty() || types.kind.is_empty() {
            return Err(IdentityError::MissingTypeMeta);
        }
        let name = obj
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| IdentityError::MissingName(types.kind.clone()))?;
        Ok(Self::new(
            ResourceKind::from_api_version(&types.api_version, &types.kind),
            obj.metadata.namespace.as_deref(),
            name,
        ))
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }

    /// Identity of the Namespace object this resource lives in.
    pub fn namespace_identity(&self) -> Option<ResourceIdentity> {
        self.namespace.as_deref().map(|ns| ResourceIdentity::new(ResourceKind::namespace(), None, ns))
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Workload kinds whose availability is reported to the status tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
    CronJob,
}

impl WorkloadKind {
    pub fn of(kind: &ResourceKind) -> Option<Self> {
        match (kind.group.as_str(), kind.kind.as_str()) {
            ("apps", "DaemonSet") => Some(Self::DaemonSet),
            ("apps", "Deployment") => Some(Self::Deployment),
            ("apps", "StatefulSet") => Some(Self::StatefulSet),
            ("batch", "CronJob") => Some(Self::CronJob),
            _ => None,
        }
    }
}
