use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use keel_cache::DedupCache;
use keel_core::{
    snapshot, ApiError, ClusterClient, Component, DesiredObject, DynamicObject, InstallationConfig, NoInstallation,
    OwnerRef, ResourceIdentity, StatusTracker, WorkloadKind,
};
use keel_policy::{is_ignored, merge_state, mutate, MergeOutcome, MutationContext, StrategyRegistry};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ReconcileError;

/// Write attempts per object. A conflict on the last attempt is fatal.
pub const MAX_WRITE_ATTEMPTS: usize = 2;

/// What happened to one desired object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Recreated,
    Unchanged,
    Skipped,
    AlreadyExists,
}

/// Reconciles components against one cluster.
///
/// Cheap to clone pieces are shared: the dedup cache in particular should be
/// one instance per process, handed to every handler.
pub struct ComponentHandler {
    client: Arc<dyn ClusterClient>,
    cache: Arc<DedupCache>,
    registry: Arc<StrategyRegistry>,
    installation: Arc<dyn InstallationConfig>,
    owner: Option<OwnerRef>,
    create_only: bool,
    cancel: CancellationToken,
}

impl ComponentHandler {
    pub fn new(client: Arc<dyn ClusterClient>, cache: Arc<DedupCache>) -> Self {
        Self {
            client,
            cache,
            registry: Arc::new(StrategyRegistry::default()),
            installation: Arc::new(NoInstallation),
            owner: None,
            create_only: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_installation(mut self, installation: Arc<dyn InstallationConfig>) -> Self {
        self.installation = installation;
        self
    }

    /// Owner attached to every object that accepts one.
    pub fn with_owner(mut self, owner: Option<OwnerRef>) -> Self {
        self.owner = owner;
        self
    }

    /// Cancelling the token aborts in-flight cluster calls.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// From now on existing objects are never modified; finding one is
    /// reported as [`ReconcileError::AlreadyExists`].
    pub fn set_create_only(&mut self) {
        self.create_only = true;
    }

    pub fn is_create_only(&self) -> bool {
        self.create_only
    }

    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }

    /// Converge `component`: create or update its desired objects in order,
    /// delete its obsolete ones and report workloads to `status`.
    ///
    /// Any error other than create-only "already exists" aborts the call.
    pub async fn create_or_update_or_delete(
        &self,
        component: &dyn Component,
        status: Option<&dyn StatusTracker>,
    ) -> Result<(), ReconcileError> {
        let name = component.name();
        if !component.ready() {
            info!(component = name, "component not ready, skipping");
            return Ok(());
        }
        let started = Instant::now();
        debug!(component = name, "reconciling");
        let res = self.reconcile(component, status).await;
        let outcome = match &res {
            Ok(()) => "ok",
            Err(ReconcileError::AlreadyExists { .. }) => "already_exists",
            Err(ReconcileError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        histogram!("reconcile_component_ms", started.elapsed().as_secs_f64() * 1000.0, "outcome" => outcome);
        debug!(component = name, outcome, "done reconciling");
        res
    }

    async fn reconcile(&self, component: &dyn Component, status: Option<&dyn StatusTracker>) -> Result<(), ReconcileError> {
        let name = component.name();

        let (desired, obsolete) = component.objects();
        let ciphers = self.tls_cipher_suites(&desired).await?;
        let ctx = MutationContext {
            owner: self.owner.as_ref(),
            os: component.supported_os(),
            tls_cipher_suites: ciphers.as_deref(),
        };

        let mut workloads: BTreeMap<WorkloadKind, Vec<ResourceIdentity>> = BTreeMap::new();
        let mut existing = Vec::new();
        for obj in &desired {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            let id = obj.identity()?;
            match self.apply_with_retry(&id, obj, &ctx).await {
                Ok(Applied::AlreadyExists) => existing.push(id.clone()),
                Ok(outcome) => debug!(object = %id, ?outcome, "applied"),
                Err(err) => {
                    warn!(component = name, object = %id, error = %err, "failed to create or update object");
                    return Err(err);
                }
            }
            if let Some(kind) = WorkloadKind::of(&id.kind) {
                workloads.entry(kind).or_default().push(id);
            }
        }

        if let Some(status) = status {
            for (kind, ids) in &workloads {
                status.add_workloads(*kind, ids);
            }
        }

        for obj in &obsolete {
            let id = ResourceIdentity::of(obj)?;
            let existed = self.delete_object(&id).await.map_err(|err| {
                warn!(component = name, object = %id, error = %err, "failed to delete object");
                err
            })?;
            if !existed {
                continue;
            }
            if let (Some(status), Some(kind)) = (status, WorkloadKind::of(&id.kind)) {
                status.remove_workload(kind, &id);
            }
        }

        if let Some(status) = status {
            status.ready_to_monitor();
        }

        if existing.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::AlreadyExists { identities: existing })
        }
    }

    /// Look up cipher suites only when some desired kind carries the env var.
    async fn tls_cipher_suites(&self, desired: &[DesiredObject]) -> Result<Option<String>, ReconcileError> {
        let wanted = desired.iter().filter_map(|d| d.identity().ok()).any(|id| self.registry.lookup(&id.kind).layout().cipher_env);
        if !wanted {
            return Ok(None);
        }
        let ciphers = self.installation.tls_cipher_suites().await.map_err(ReconcileError::Installation)?;
        Ok(ciphers.filter(|c| !c.is_empty()))
    }

    /// Run `fut` unless the handler is cancelled first. A cancelled call may or
    /// may not have reached the server, so the cache entry is dropped.
    async fn call<T>(
        &self,
        id: &ResourceIdentity,
        fut: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.cache.delete(id);
                Err(ApiError::Cancelled)
            }
            res = fut => res,
        }
    }

    fn retryable(&self, err: &ReconcileError) -> bool {
        match err {
            ReconcileError::Api { source: ApiError::Conflict(_), .. } => true,
            // Created concurrently between our get and create.
            ReconcileError::Api { source: ApiError::AlreadyExists, .. } => !self.create_only,
            _ => false,
        }
    }

    async fn apply_with_retry(
        &self,
        id: &ResourceIdentity,
        desired: &DesiredObject,
        ctx: &MutationContext<'_>,
    ) -> Result<Applied, ReconcileError> {
        let mut attempt = 1;
        loop {
            match self.apply(id, desired, ctx).await {
                Err(err) if attempt < MAX_WRITE_ATTEMPTS && self.retryable(&err) => {
                    let reason = if err.is_conflict() {
                        counter!("reconcile_conflicts_total", 1);
                        "conflict"
                    } else {
                        "already_exists"
                    };
                    counter!("reconcile_retries_total", 1, "reason" => reason);
                    info!(object = %id, attempt, reason, error = %err, "write rejected, retrying");
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    /// One attempt: mutate a fresh copy, fetch the live object and write what is needed.
    async fn apply(
        &self,
        id: &ResourceIdentity,
        desired: &DesiredObject,
        ctx: &MutationContext<'_>,
    ) -> Result<Applied, ReconcileError> {
        let mut desired = desired.clone();
        mutate(&self.registry, &id.kind, &mut desired, ctx)
            .map_err(|source| ReconcileError::Mutation { identity: id.clone(), source })?;

        let current = match self.call(id, self.client.get(id)).await {
            Ok(current) => current,
            Err(err) => {
                self.cache.delete(id);
                if !err.is_not_found() {
                    return Err(ReconcileError::api(id, err));
                }
                return self.create_missing(id, desired).await;
            }
        };

        if self.create_only {
            info!(object = %id, "create-only, leaving existing object alone");
            return Ok(Applied::AlreadyExists);
        }

        if is_ignored(&current) {
            counter!("reconcile_skipped_total", 1, "reason" => "ignored");
            info!(object = %id, "object annotated as ignored, skipping");
            return Ok(Applied::Skipped);
        }

        match merge_state(&self.registry, &id.kind, &desired, &current) {
            MergeOutcome::NoChangeNeeded => {
                counter!("reconcile_skipped_total", 1, "reason" => "no_change");
                Ok(Applied::Unchanged)
            }
            MergeOutcome::Update(merged) => self.update(id, merged, &current).await,
            MergeOutcome::MustRecreate(merged) => {
                self.recreate(id, DesiredObject { object: merged, ownership: desired.ownership }).await
            }
        }
    }

    async fn create_missing(&self, id: &ResourceIdentity, desired: DesiredObject) -> Result<Applied, ReconcileError> {
        if let Some(ns_id) = id.namespace_identity() {
            match self.call(&ns_id, self.client.get(&ns_id)).await {
                Ok(ns) if snapshot::is_terminating(&ns) => {
                    counter!("reconcile_skipped_total", 1, "reason" => "ns_terminating");
                    info!(object = %id, "namespace is terminating, skipping creation");
                    return Ok(Applied::Skipped);
                }
                Ok(_) => {}
                Err(ApiError::NotFound) => debug!(object = %id, "namespace not found, creating anyway"),
                Err(err) => return Err(ReconcileError::api(&ns_id, err)),
            }
        }
        debug!(object = %id, "object does not exist, creating");
        match self.create(id, desired).await {
            Err(ReconcileError::Api { source: ApiError::AlreadyExists, .. }) if self.create_only => {
                Ok(Applied::AlreadyExists)
            }
            res => res.map(|_| Applied::Created),
        }
    }

    async fn create(&self, id: &ResourceIdentity, desired: DesiredObject) -> Result<DynamicObject, ReconcileError> {
        match self.call(id, self.client.create(&desired.object)).await {
            Ok(created) => {
                let settled = self.settled(id, desired, &created);
                self.cache.set(id.clone(), &settled, snapshot::generation(&created));
                counter!("reconcile_writes_total", 1, "op" => "create");
                Ok(created)
            }
            Err(err) => {
                self.cache.delete(id);
                Err(ReconcileError::api(id, err))
            }
        }
    }

    /// What the next reconcile will compute for a freshly created object: the
    /// submitted object merged onto what the server returned, so fields the
    /// server filled in (cluster IPs, default replicas) do not read as drift.
    fn settled(&self, id: &ResourceIdentity, desired: DesiredObject, created: &DynamicObject) -> DynamicObject {
        match merge_state(&self.registry, &id.kind, &desired, created) {
            MergeOutcome::Update(merged) => merged,
            MergeOutcome::NoChangeNeeded | MergeOutcome::MustRecreate(_) => desired.object,
        }
    }

    async fn update(
        &self,
        id: &ResourceIdentity,
        merged: DynamicObject,
        current: &DynamicObject,
    ) -> Result<Applied, ReconcileError> {
        if !self.cache.needs_update(id, &merged) {
            counter!("reconcile_skipped_total", 1, "reason" => "cached");
            debug!(object = %id, "unchanged since last write, skipping");
            return Ok(Applied::Unchanged);
        }
        let summary = snapshot::summarize(&merged, current);
        debug!(object = %id, adds = summary.adds, updates = summary.updates, removes = summary.removes, "updating");
        match self.call(id, self.client.update(&merged)).await {
            Ok(updated) => {
                self.cache.set(id.clone(), &merged, snapshot::generation(&updated));
                counter!("reconcile_writes_total", 1, "op" => "update");
                Ok(Applied::Updated)
            }
            Err(err) => {
                self.cache.delete(id);
                Err(ReconcileError::api(id, err))
            }
        }
    }

    /// Delete then create. Nothing guards the window in between: an external
    /// writer may recreate the object first, which surfaces as AlreadyExists.
    async fn recreate(&self, id: &ResourceIdentity, mut merged: DesiredObject) -> Result<Applied, ReconcileError> {
        info!(object = %id, "immutable field changed, recreating");
        self.delete_object(id).await?;
        snapshot::reset_for_create(&mut merged.object);
        self.create(id, merged).await?;
        counter!("reconcile_writes_total", 1, "op" => "recreate");
        Ok(Applied::Recreated)
    }

    /// Delete `id` if it exists. Returns whether the object was present.
    async fn delete_object(&self, id: &ResourceIdentity) -> Result<bool, ReconcileError> {
        match self.call(id, self.client.get(id)).await {
            Ok(_) => {}
            Err(ApiError::NotFound) => {
                debug!(object = %id, "object does not exist, skipping delete");
                self.cache.delete(id);
                return Ok(false);
            }
            Err(err) => {
                self.cache.delete(id);
                return Err(ReconcileError::api(id, err));
            }
        }
        let res = self.call(id, self.client.delete(id)).await;
        self.cache.delete(id);
        match res {
            Ok(()) => {
                counter!("reconcile_writes_total", 1, "op" => "delete");
                Ok(true)
            }
            Err(ApiError::NotFound) => Ok(true),
            Err(err) => Err(ReconcileError::api(id, err)),
        }
    }
}

impl std::fmt::Debug for ComponentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHandler")
            .field("owner", &self.owner)
            .field("create_only", &self.create_only)
            .field("cached", &self.cache.len())
            .finish()
    }
}
