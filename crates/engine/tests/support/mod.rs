//! In-memory cluster and status tracker for engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use keel_core::{ApiError, ClusterClient, DynamicObject, ResourceIdentity, ResourceKind, StatusTracker};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};

pub fn obj(v: Json) -> DynamicObject {
    serde_json::from_value(v).expect("valid object")
}

pub fn id_of(o: &DynamicObject) -> ResourceIdentity {
    ResourceIdentity::of(o).expect("identity")
}

pub fn id(api_version: &str, kind: &str, ns: Option<&str>, name: &str) -> ResourceIdentity {
    ResourceIdentity::new(ResourceKind::from_api_version(api_version, kind), ns, name)
}

pub fn namespace(name: &str) -> DynamicObject {
    obj(json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": name } }))
}

pub fn config_map(ns: &str, name: &str, value: &str) -> DynamicObject {
    obj(json!({
        "apiVersion": "v1", "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": ns },
        "data": { "value": value }
    }))
}

pub fn deployment(ns: &str, name: &str, image: &str) -> DynamicObject {
    obj(json!({
        "apiVersion": "apps/v1", "kind": "Deployment",
        "metadata": { "name": name, "namespace": ns },
        "spec": { "template": { "spec": { "containers": [ { "name": name, "image": image } ] } } }
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub op: Op,
    pub id: ResourceIdentity,
    /// Object sent with create/update.
    pub payload: Option<DynamicObject>,
}

/// Failure injected into the next call of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    AlreadyExists,
    NotFound,
    Internal,
}

impl Fault {
    fn into_error(self) -> ApiError {
        match self {
            Fault::Conflict => ApiError::Conflict("the object has been modified".into()),
            Fault::AlreadyExists => ApiError::AlreadyExists,
            Fault::NotFound => ApiError::NotFound,
            Fault::Internal => ApiError::Other(anyhow::anyhow!("internal error")),
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceIdentity, DynamicObject>,
    calls: Vec<Call>,
    faults: Vec<(Op, VecDeque<Option<Fault>>)>,
    next_rv: u64,
    next_ip: u8,
}

impl State {
    fn take_fault(&mut self, op: Op) -> Option<Fault> {
        self.faults.iter_mut().find(|(o, _)| *o == op).and_then(|(_, q)| q.pop_front()).flatten()
    }

    fn apply_defaults(&mut self, id: &ResourceIdentity, o: &mut DynamicObject) {
        let Some(spec) = o.data.get_mut("spec").and_then(Json::as_object_mut) else {
            return;
        };
        match id.kind.kind.as_str() {
            "Service" if !spec.contains_key("clusterIP") => {
                self.next_ip = self.next_ip.wrapping_add(1);
                spec.insert("clusterIP".into(), json!(format!("10.96.0.{}", self.next_ip)));
            }
            "Deployment" if !spec.contains_key("replicas") => {
                spec.insert("replicas".into(), json!(1));
            }
            _ => {}
        }
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

/// Stores objects as written plus server bookkeeping (uid, resourceVersion,
/// generation, creationTimestamp). Creates also get the defaults a real API
/// server fills in: a Service cluster IP and Deployment replicas.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    stall_gets: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as if created by someone else.
    pub fn insert(&self, mut o: DynamicObject) -> DynamicObject {
        let mut st = self.state.lock();
        o.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        o.metadata.resource_version = Some(st.bump_rv());
        o.metadata.generation = Some(o.metadata.generation.unwrap_or(1));
        o.metadata.creation_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        st.objects.insert(id_of(&o), o.clone());
        o
    }

    /// Modify a stored object out of band, bumping its generation.
    pub fn edit(&self, id: &ResourceIdentity, f: impl FnOnce(&mut DynamicObject)) {
        let mut st = self.state.lock();
        let rv = st.bump_rv();
        let o = st.objects.get_mut(id).expect("object to edit");
        f(o);
        o.metadata.resource_version = Some(rv);
        o.metadata.generation = Some(o.metadata.generation.unwrap_or(1) + 1);
    }

    pub fn stored(&self, id: &ResourceIdentity) -> Option<DynamicObject> {
        self.state.lock().objects.get(id).cloned()
    }

    pub fn inject(&self, op: Op, fault: Fault) {
        self.queue(op, Some(fault));
    }

    /// Let the next call of `op` through before any later injected fault.
    pub fn pass(&self, op: Op) {
        self.queue(op, None);
    }

    fn queue(&self, op: Op, fault: Option<Fault>) {
        let mut st = self.state.lock();
        match st.faults.iter_mut().find(|(o, _)| *o == op) {
            Some((_, q)) => q.push_back(fault),
            None => st.faults.push((op, VecDeque::from([fault]))),
        }
    }

    /// Make every subsequent get hang until the caller gives up.
    pub fn stall_gets(&self) {
        self.stall_gets.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count(&self, op: Op) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Create, update and delete calls in order.
    pub fn writes(&self) -> Vec<Call> {
        self.state.lock().calls.iter().filter(|c| c.op != Op::Get).cloned().collect()
    }

    fn record(&self, op: Op, id: &ResourceIdentity, payload: Option<&DynamicObject>) -> Option<Fault> {
        let mut st = self.state.lock();
        st.calls.push(Call { op, id: id.clone(), payload: payload.cloned() });
        st.take_fault(op)
    }
}

fn without_status(o: &DynamicObject) -> Json {
    let mut data = o.data.clone();
    if let Some(m) = data.as_object_mut() {
        m.remove("status");
    }
    data
}

#[async_trait::async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, id: &ResourceIdentity) -> Result<DynamicObject, ApiError> {
        if let Some(f) = self.record(Op::Get, id, None) {
            return Err(f.into_error());
        }
        if self.stall_gets.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.state.lock().objects.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn create(&self, o: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let id = id_of(o);
        if let Some(f) = self.record(Op::Create, &id, Some(o)) {
            return Err(f.into_error());
        }
        let mut st = self.state.lock();
        if st.objects.contains_key(&id) {
            return Err(ApiError::AlreadyExists);
        }
        if o.metadata.resource_version.is_some() {
            return Err(ApiError::Invalid("resourceVersion should not be set on objects to be created".into()));
        }
        let mut stored = o.clone();
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(st.bump_rv());
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        st.apply_defaults(&id, &mut stored);
        st.objects.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, o: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let id = id_of(o);
        if let Some(f) = self.record(Op::Update, &id, Some(o)) {
            return Err(f.into_error());
        }
        let mut st = self.state.lock();
        let rv = st.bump_rv();
        let Some(live) = st.objects.get(&id).cloned() else {
            return Err(ApiError::NotFound);
        };
        if o.metadata.resource_version.is_some() && o.metadata.resource_version != live.metadata.resource_version {
            return Err(ApiError::Conflict("resourceVersion mismatch".into()));
        }
        let mut stored = o.clone();
        stored.metadata.uid = live.metadata.uid.clone();
        stored.metadata.creation_timestamp = live.metadata.creation_timestamp.clone();
        stored.metadata.resource_version = Some(rv);
        let generation = live.metadata.generation.unwrap_or(1);
        let changed = without_status(&stored) != without_status(&live);
        stored.metadata.generation = Some(if changed { generation + 1 } else { generation });
        st.objects.insert(id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ApiError> {
        if let Some(f) = self.record(Op::Delete, id, None) {
            return Err(f.into_error());
        }
        self.state.lock().objects.remove(id).map(|_| ()).ok_or(ApiError::NotFound)
    }
}

/// Status tracker that records every notification as a readable line.
#[derive(Default)]
pub struct RecordingStatus {
    events: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn add(&self, what: &str, ids: &[ResourceIdentity]) {
        let names: Vec<String> = ids.iter().map(|i| format!("{}/{}", i.namespace.as_deref().unwrap_or(""), i.name)).collect();
        self.events.lock().push(format!("add {what} {}", names.join(",")));
    }

    fn remove(&self, what: &str, id: &ResourceIdentity) {
        self.events.lock().push(format!("remove {what} {}/{}", id.namespace.as_deref().unwrap_or(""), id.name));
    }
}

impl StatusTracker for RecordingStatus {
    fn add_deployments(&self, ids: &[ResourceIdentity]) {
        self.add("deployments", ids)
    }
    fn add_daemonsets(&self, ids: &[ResourceIdentity]) {
        self.add("daemonsets", ids)
    }
    fn add_statefulsets(&self, ids: &[ResourceIdentity]) {
        self.add("statefulsets", ids)
    }
    fn add_cronjobs(&self, ids: &[ResourceIdentity]) {
        self.add("cronjobs", ids)
    }
    fn remove_deployments(&self, id: &ResourceIdentity) {
        self.remove("deployments", id)
    }
    fn remove_daemonsets(&self, id: &ResourceIdentity) {
        self.remove("daemonsets", id)
    }
    fn remove_statefulsets(&self, id: &ResourceIdentity) {
        self.remove("statefulsets", id)
    }
    fn remove_cronjobs(&self, id: &ResourceIdentity) {
        self.remove("cronjobs", id)
    }
    fn ready_to_monitor(&self) {
        self.events.lock().push("ready".to_string());
    }
}
