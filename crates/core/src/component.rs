use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::{IdentityError, ResourceIdentity};

/// Operating system a component's pods must be scheduled on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    #[default]
    Any,
    Linux,
    Windows,
}

impl OsType {
    /// Value for the `kubernetes.io/os` node label, `None` when unconstrained.
    pub fn node_label(self) -> Option<&'static str> {
        match self {
            OsType::Any => None,
            OsType::Linux => Some("linux"),
            OsType::Windows => Some("windows"),
        }
    }
}

/// How the configured owner is attached to a desired object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipMode {
    /// A single controlling owner reference.
    #[default]
    Controller,
    /// A non-controlling reference merged with whatever owners the object already has.
    SharedNonController,
}

/// A desired object plus the ownership decision the caller made for it.
#[derive(Debug, Clone)]
pub struct DesiredObject {
    pub object: DynamicObject,
    pub ownership: OwnershipMode,
}

impl DesiredObject {
    pub fn new(object: DynamicObject) -> Self {
        Self { object, ownership: OwnershipMode::Controller }
    }

    pub fn shared(object: DynamicObject) -> Self {
        Self { object, ownership: OwnershipMode::SharedNonController }
    }

    pub fn identity(&self) -> Result<ResourceIdentity, IdentityError> {
        ResourceIdentity::of(&self.object)
    }
}

impl From<DynamicObject> for DesiredObject {
    fn from(object: DynamicObject) -> Self {
        Self::new(object)
    }
}

/// The logical parent attached as owner to every managed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// `None` when the owner itself is cluster-scoped.
    pub namespace: Option<String>,
}

impl OwnerRef {
    pub fn to_reference(&self, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: controller.then_some(true),
            block_owner_deletion: controller.then_some(true),
        }
    }
}

/// A set of resources reconciled together.
pub trait Component: Send + Sync {
    /// Objects to create or update, in order, and objects to remove.
    fn objects(&self) -> (Vec<DesiredObject>, Vec<DynamicObject>);

    /// Dependency hook: a component that is not ready is skipped entirely.
    fn ready(&self) -> bool {
        true
    }

    fn supported_os(&self) -> OsType {
        OsType::Any
    }

    fn name(&self) -> &str {
        "component"
    }
}

/// Component built from fixed object lists.
#[derive(Debug, Clone, Default)]
pub struct StaticComponent {
    pub name: String,
    pub desired: Vec<DesiredObject>,
    pub obsolete: Vec<DynamicObject>,
    pub os: OsType,
    pub ready: bool,
}

impl StaticComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ready: true, ..Default::default() }
    }

    pub fn with_desired(mut self, objs: impl IntoIterator<Item = DesiredObject>) -> Self {
        self.desired.extend(objs);
        self
    }

    pub fn with_obsolete(mut self, objs: impl IntoIterator<Item = DynamicObject>) -> Self {
        self.obsolete.extend(objs);
        self
    }

    pub fn with_os(mut self, os: OsType) -> Self {
        self.os = os;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }
}

impl Component for StaticComponent {
    fn objects(&self) -> (Vec<DesiredObject>, Vec<DynamicObject>) {
        (self.desired.clone(), self.obsolete.clone())
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn supported_os(&self) -> OsType {
        self.os
    }

    fn name(&self) -> &str {
        &self.name
    }
}
