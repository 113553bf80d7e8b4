use keel_core::{ApiError, IdentityError, ResourceIdentity};
use keel_policy::MutationError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Create-only mode found objects that already exist. Reported after
    /// every desired object was processed.
    #[error("already exists: {}", join(.identities))]
    AlreadyExists { identities: Vec<ResourceIdentity> },
    #[error("{identity}: {source}")]
    Api { identity: ResourceIdentity, source: ApiError },
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("{identity}: {source}")]
    Mutation { identity: ResourceIdentity, source: MutationError },
    #[error("installation config: {0}")]
    Installation(#[source] anyhow::Error),
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub(crate) fn api(identity: &ResourceIdentity, source: ApiError) -> Self {
        match source {
            ApiError::Cancelled => Self::Cancelled,
            source => Self::Api { identity: identity.clone(), source },
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::Api { source: ApiError::AlreadyExists, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { source: ApiError::Conflict(_), .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn join(ids: &[ResourceIdentity]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
