use keel_core::{ResourceIdentity, StatusTracker};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Workloads reported by one reconcile, for display.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Workloads {
    pub daemonsets: Vec<String>,
    pub deployments: Vec<String>,
    pub statefulsets: Vec<String>,
    pub cronjobs: Vec<String>,
    pub removed: Vec<String>,
    pub monitoring: bool,
}

/// Status tracker that logs and remembers what it was told.
#[derive(Debug, Default)]
pub struct LogStatus {
    seen: Mutex<Workloads>,
}

impl LogStatus {
    pub fn snapshot(&self) -> Workloads {
        self.seen.lock().clone()
    }

    fn add(&self, kind: &str, ids: &[ResourceIdentity], pick: impl FnOnce(&mut Workloads) -> &mut Vec<String>) {
        let names: Vec<String> = ids.iter().map(key).collect();
        info!(kind, objects = ?names, "tracking workloads");
        pick(&mut self.seen.lock()).extend(names);
    }

    fn remove(&self, kind: &str, id: &ResourceIdentity) {
        info!(kind, object = %key(id), "no longer tracking workload");
        self.seen.lock().removed.push(format!("{kind} {}", key(id)));
    }
}

fn key(id: &ResourceIdentity) -> String {
    match &id.namespace {
        Some(ns) => format!("{ns}/{}", id.name),
        None => id.name.clone(),
    }
}

impl StatusTracker for LogStatus {
    fn add_deployments(&self, ids: &[ResourceIdentity]) {
        self.add("Deployment", ids, |w| &mut w.deployments)
    }

    fn add_daemonsets(&self, ids: &[ResourceIdentity]) {
        self.add("DaemonSet", ids, |w| &mut w.daemonsets)
    }

    fn add_statefulsets(&self, ids: &[ResourceIdentity]) {
        self.add("StatefulSet", ids, |w| &mut w.statefulsets)
    }

    fn add_cronjobs(&self, ids: &[ResourceIdentity]) {
        self.add("CronJob", ids, |w| &mut w.cronjobs)
    }

    fn remove_deployments(&self, id: &ResourceIdentity) {
        self.remove("Deployment", id)
    }

    fn remove_daemonsets(&self, id: &ResourceIdentity) {
        self.remove("DaemonSet", id)
    }

    fn remove_statefulsets(&self, id: &ResourceIdentity) {
        self.remove("StatefulSet", id)
    }

    fn remove_cronjobs(&self, id: &ResourceIdentity) {
        self.remove("CronJob", id)
    }

    fn ready_to_monitor(&self) {
        self.seen.lock().monitoring = true;
    }
}
