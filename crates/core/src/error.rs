/// Classified outcome of a failed call against the cluster API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not_found")]
    NotFound,
    #[error("already_exists")]
    AlreadyExists,
    /// Optimistic-concurrency rejection: the caller's view of the object was stale.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("object missing apiVersion/kind")]
    MissingTypeMeta,
    #[error("{0} object missing metadata.name")]
    MissingName(String),
}
