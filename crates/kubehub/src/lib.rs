//! Keel kubehub: the [`ClusterClient`] implementation over a live kube API server.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context};
use keel_core::{ApiError, ClusterClient, DynamicObject, ResourceIdentity, ResourceKind};
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::ApiResource,
    discovery::{self, Scope},
    Client,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Resolved API resource plus whether it is namespace scoped.
#[derive(Debug, Clone)]
struct Resolved {
    ar: ApiResource,
    namespaced: bool,
}

/// `ClusterClient` backed by `kube::Client`. Discovery results are cached per
/// group/version/kind for the lifetime of the client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    resources: Arc<RwLock<FxHashMap<String, Resolved>>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client, resources: Arc::new(RwLock::new(FxHashMap::default())) }
    }

    /// Client for the current kubeconfig context or in-cluster service account.
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        info!(ns = %client.default_namespace(), "kube client ready");
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn resolve(&self, kind: &ResourceKind) -> Result<Resolved, ApiError> {
        let key = kind.key();
        let cached = self.resources.read().get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let (ar, caps) = discovery::pinned_kind(&self.client, &kind.gvk()).await.map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => ApiError::Other(anyhow!("{key} is not served by the cluster")),
            other => classify(other),
        })?;
        let resolved = Resolved { ar, namespaced: matches!(caps.scope, Scope::Namespaced) };
        debug!(gvk = %key, namespaced = resolved.namespaced, "resolved api resource");
        self.resources.write().insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn api_for(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ApiError> {
        let r = self.resolve(kind).await?;
        let api = match (r.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &r.ar),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &r.ar),
            (false, _) => Api::all_with(self.client.clone(), &r.ar),
        };
        Ok(api)
    }

    async fn api_for_object(&self, obj: &DynamicObject) -> Result<(Api<DynamicObject>, ResourceIdentity), ApiError> {
        let id = ResourceIdentity::of(obj).map_err(|e| ApiError::Invalid(e.to_string()))?;
        let api = self.api_for(&id.kind, id.namespace.as_deref()).await?;
        Ok((api, id))
    }
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").field("resources", &self.resources.read().len()).finish()
    }
}

/// Map a kube error onto the engine's taxonomy.
pub fn classify(err: kube::Error) -> ApiError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => ApiError::NotFound,
            409 if ae.reason == "AlreadyExists" => ApiError::AlreadyExists,
            409 => ApiError::Conflict(ae.message),
            422 => ApiError::Invalid(ae.message),
            _ => ApiError::Other(anyhow!("{} ({}): {}", ae.reason, ae.code, ae.message)),
        },
        other => ApiError::Other(other.into()),
    }
}

fn count_call(op: &'static str, res: &Result<impl Sized, ApiError>) {
    let outcome = match res {
        Ok(_) => "ok",
        Err(ApiError::NotFound) => "not_found",
        Err(ApiError::Conflict(_)) | Err(ApiError::AlreadyExists) => "conflict",
        Err(_) => "error",
    };
    metrics::counter!("kube_calls_total", 1, "op" => op, "outcome" => outcome);
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, id: &ResourceIdentity) -> Result<DynamicObject, ApiError> {
        let api = self.api_for(&id.kind, id.namespace.as_deref()).await?;
        let res = api.get(&id.name).await.map_err(classify);
        count_call("get", &res);
        res
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let (api, id) = self.api_for_object(obj).await?;
        let res = api.create(&PostParams::default(), obj).await.map_err(classify);
        count_call("create", &res);
        debug!(object = %id, ok = res.is_ok(), "create");
        res
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let (api, id) = self.api_for_object(obj).await?;
        let res = api.replace(&id.name, &PostParams::default(), obj).await.map_err(classify);
        count_call("update", &res);
        debug!(object = %id, ok = res.is_ok(), "update");
        res
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ApiError> {
        let api = self.api_for(&id.kind, id.namespace.as_deref()).await?;
        let res = api.delete(&id.name, &DeleteParams::background()).await.map(|_| ()).map_err(classify);
        count_call("delete", &res);
        debug!(object = %id, ok = res.is_ok(), "delete");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} happened"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(classify(api_err(404, "NotFound")).is_not_found());
        assert!(classify(api_err(409, "AlreadyExists")).is_already_exists());
        assert!(classify(api_err(409, "Conflict")).is_conflict());
        assert!(matches!(classify(api_err(422, "Invalid")), ApiError::Invalid(_)));
        assert!(matches!(classify(api_err(500, "InternalError")), ApiError::Other(_)));
    }

    #[test]
    fn conflict_keeps_server_message() {
        match classify(api_err(409, "Conflict")) {
            ApiError::Conflict(msg) => assert_eq!(msg, "Conflict happened"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
