//! Keel core types: resource identity, snapshots, error taxonomy and the
//! collaborator traits the reconciliation engine talks to.

#![forbid(unsafe_code)]

mod client;
mod component;
mod error;
mod identity;
pub mod snapshot;

pub use client::{ClusterClient, InstallationConfig, NoInstallation, StaticInstallation, StatusTracker};
pub use component::{Component, DesiredObject, OsType, OwnerRef, OwnershipMode, StaticComponent};
pub use error::{ApiError, IdentityError};
pub use identity::{ResourceIdentity, ResourceKind, WorkloadKind};

/// Re-exported object model so downstream crates agree on one representation.
pub use kube::core::{DynamicObject, TypeMeta};

pub mod prelude {
    pub use super::{
        ApiError, ClusterClient, Component, DesiredObject, DynamicObject, OsType, OwnerRef, OwnershipMode,
        ResourceIdentity, ResourceKind, StatusTracker, WorkloadKind,
    };
}
