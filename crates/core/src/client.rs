use kube::core::DynamicObject;

use crate::{ApiError, ResourceIdentity, WorkloadKind};

/// Cluster API primitives the engine converges through.
///
/// Every call may block on the network; implementations classify failures into
/// [`ApiError`] so the engine can branch on not-found and conflicts.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, id: &ResourceIdentity) -> Result<DynamicObject, ApiError>;

    /// Returns the object as persisted by the server.
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ApiError>;

    /// Full replace guarded by the object's resourceVersion.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ApiError>;

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ApiError>;
}

/// Receives the workloads a component manages so their availability can be tracked.
pub trait StatusTracker: Send + Sync {
    fn add_deployments(&self, ids: &[ResourceIdentity]);
    fn add_daemonsets(&self, ids: &[ResourceIdentity]);
    fn add_statefulsets(&self, ids: &[ResourceIdentity]);
    fn add_cronjobs(&self, ids: &[ResourceIdentity]);

    fn remove_deployments(&self, id: &ResourceIdentity);
    fn remove_daemonsets(&self, id: &ResourceIdentity);
    fn remove_statefulsets(&self, id: &ResourceIdentity);
    fn remove_cronjobs(&self, id: &ResourceIdentity);

    fn ready_to_monitor(&self);

    fn add_workloads(&self, kind: WorkloadKind, ids: &[ResourceIdentity]) {
        match kind {
            WorkloadKind::Deployment => self.add_deployments(ids),
            WorkloadKind::DaemonSet => self.add_daemonsets(ids),
            WorkloadKind::StatefulSet => self.add_statefulsets(ids),
            WorkloadKind::CronJob => self.add_cronjobs(ids),
        }
    }

    fn remove_workload(&self, kind: WorkloadKind, id: &ResourceIdentity) {
        match kind {
            WorkloadKind::Deployment => self.remove_deployments(id),
            WorkloadKind::DaemonSet => self.remove_daemonsets(id),
            WorkloadKind::StatefulSet => self.remove_statefulsets(id),
            WorkloadKind::CronJob => self.remove_cronjobs(id),
        }
    }
}

/// Installation-wide settings consulted while mutating objects.
#[async_trait::async_trait]
pub trait InstallationConfig: Send + Sync {
    /// Comma separated TLS cipher suites; `None` when no installation is configured.
    async fn tls_cipher_suites(&self) -> anyhow::Result<Option<String>>;
}

/// No installation configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstallation;

#[async_trait::async_trait]
impl InstallationConfig for NoInstallation {
    async fn tls_cipher_suites(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Installation settings fixed at startup (flags or environment).
#[derive(Debug, Clone, Default)]
pub struct StaticInstallation {
    pub tls_cipher_suites: Option<String>,
}

#[async_trait::async_trait]
impl InstallationConfig for StaticInstallation {
    async fn tls_cipher_suites(&self) -> anyhow::Result<Option<String>> {
        Ok(self.tls_cipher_suites.clone())
    }
}
