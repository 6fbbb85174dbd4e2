//! An in-memory [`Cluster`] for tests.
//!
//! Resources are loaded from YAML manifests, as they would be applied with `kubectl`.
//! Queries are answered with the same semantics as the API server: lookups are scoped to
//! a namespace and missing objects produce `NotFound` errors.

use crate::cluster::{Cluster, Result, Workload, WorkloadKind};
use kube::core::ErrorResponse;
use linkerd_k8s_api::{
    labels::{Labels, Selector},
    policy::{AuthorizationPolicy, HttpRoute, Server, ServerAuthorization},
    resource, ObjectMeta, Pod,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::trace;

#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    pods: Vec<Pod>,
    workloads: Vec<Workload>,
    servers: Vec<Server>,
    server_authorizations: Vec<ServerAuthorization>,
    authorization_policies: Vec<AuthorizationPolicy>,
    http_routes: Vec<HttpRoute>,
    failing: HashSet<&'static str>,
    lists: Arc<Mutex<HashMap<&'static str, usize>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest has no kind")]
    MissingKind,

    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),
}

// === impl FakeCluster ===

impl FakeCluster {
    /// Builds a cluster from manifests. Each manifest may hold several `---`-separated
    /// documents.
    pub fn from_manifests<'m>(
        manifests: impl IntoIterator<Item = &'m str>,
    ) -> Result<Self, ManifestError> {
        let mut cluster = Self::default();
        for manifest in manifests {
            for doc in serde_yaml::Deserializer::from_str(manifest) {
                let value = serde_yaml::Value::deserialize(doc)?;
                if value.is_null() {
                    continue;
                }
                cluster.apply(value)?;
            }
        }
        Ok(cluster)
    }

    /// Causes every query for the given resource (by its canonical name, e.g.
    /// `resource::SERVER`) to fail.
    pub fn fail_on(mut self, canonical_name: &'static str) -> Self {
        self.failing.insert(canonical_name);
        self
    }

    /// The number of list queries made for the given resource. Clones share counts.
    pub fn list_calls(&self, canonical_name: &str) -> usize {
        self.lists.lock().get(canonical_name).copied().unwrap_or(0)
    }

    fn apply(&mut self, value: serde_yaml::Value) -> Result<(), ManifestError> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or(ManifestError::MissingKind)?
            .to_string();
        trace!(%kind, "Applying manifest");

        match kind.as_str() {
            "Pod" => self.pods.push(serde_yaml::from_value(value)?),
            "CronJob" => self
                .workloads
                .push(Workload::CronJob(serde_yaml::from_value(value)?)),
            "DaemonSet" => self
                .workloads
                .push(Workload::DaemonSet(serde_yaml::from_value(value)?)),
            "Deployment" => self
                .workloads
                .push(Workload::Deployment(serde_yaml::from_value(value)?)),
            "Job" => self
                .workloads
                .push(Workload::Job(serde_yaml::from_value(value)?)),
            "ReplicaSet" => self
                .workloads
                .push(Workload::ReplicaSet(serde_yaml::from_value(value)?)),
            "ReplicationController" => self
                .workloads
                .push(Workload::ReplicationController(serde_yaml::from_value(value)?)),
            "StatefulSet" => self
                .workloads
                .push(Workload::StatefulSet(serde_yaml::from_value(value)?)),
            "Server" => self.servers.push(serde_yaml::from_value(value)?),
            "ServerAuthorization" => self
                .server_authorizations
                .push(serde_yaml::from_value(value)?),
            "AuthorizationPolicy" => self
                .authorization_policies
                .push(serde_yaml::from_value(value)?),
            "HTTPRoute" => self.http_routes.push(serde_yaml::from_value(value)?),
            _ => return Err(ManifestError::UnsupportedKind(kind)),
        }
        Ok(())
    }

    fn check(&self, resource: &'static str) -> Result<()> {
        if self.failing.contains(resource) {
            return Err(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected failure querying {resource}"),
                reason: "InternalError".to_string(),
                code: 500,
            }));
        }
        Ok(())
    }

    fn check_list(&self, resource: &'static str) -> Result<()> {
        *self.lists.lock().entry(resource).or_default() += 1;
        self.check(resource)
    }
}

fn in_ns(meta: &ObjectMeta, ns: &str) -> bool {
    meta.namespace.as_deref().unwrap_or("default") == ns
}

fn named(meta: &ObjectMeta, ns: &str, name: &str) -> bool {
    in_ns(meta, ns) && meta.name.as_deref() == Some(name)
}

fn not_found(resource: &str, name: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{resource} \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

fn selected(meta: &ObjectMeta, selector: Option<&Selector>) -> bool {
    selector
        .map(|s| s.matches(&Labels::from(meta.labels.clone())))
        .unwrap_or(true)
}

#[async_trait::async_trait]
impl Cluster for FakeCluster {
    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod> {
        self.check(resource::POD)?;
        self.pods
            .iter()
            .find(|p| named(&p.metadata, ns, name))
            .cloned()
            .ok_or_else(|| not_found("pods", name))
    }

    async fn list_pods(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Pod>> {
        self.check_list(resource::POD)?;
        Ok(self
            .pods
            .iter()
            .filter(|p| in_ns(&p.metadata, ns) && selected(&p.metadata, selector))
            .cloned()
            .collect())
    }

    async fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload> {
        self.check(kind.canonical_name())?;
        self.workloads
            .iter()
            .find(|w| w.kind() == kind && named(w.meta(), ns, name))
            .cloned()
            .ok_or_else(|| not_found(kind.canonical_name(), name))
    }

    async fn list_workloads(&self, kind: WorkloadKind, ns: &str) -> Result<Vec<Workload>> {
        self.check_list(kind.canonical_name())?;
        Ok(self
            .workloads
            .iter()
            .filter(|w| w.kind() == kind && in_ns(w.meta(), ns))
            .cloned()
            .collect())
    }

    async fn get_server(&self, ns: &str, name: &str) -> Result<Server> {
        self.check(resource::SERVER)?;
        self.servers
            .iter()
            .find(|s| named(&s.metadata, ns, name))
            .cloned()
            .ok_or_else(|| not_found("servers.policy.linkerd.io", name))
    }

    async fn list_servers(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Server>> {
        self.check_list(resource::SERVER)?;
        Ok(self
            .servers
            .iter()
            .filter(|s| in_ns(&s.metadata, ns) && selected(&s.metadata, selector))
            .cloned()
            .collect())
    }

    async fn list_server_authorizations(&self, ns: &str) -> Result<Vec<ServerAuthorization>> {
        self.check_list(resource::SERVER_AUTHORIZATION)?;
        Ok(self
            .server_authorizations
            .iter()
            .filter(|s| in_ns(&s.metadata, ns))
            .cloned()
            .collect())
    }

    async fn list_authorization_policies(&self, ns: &str) -> Result<Vec<AuthorizationPolicy>> {
        self.check_list(resource::AUTHORIZATION_POLICY)?;
        Ok(self
            .authorization_policies
            .iter()
            .filter(|p| in_ns(&p.metadata, ns))
            .cloned()
            .collect())
    }

    async fn get_http_route(&self, ns: &str, name: &str) -> Result<HttpRoute> {
        self.check(resource::HTTP_ROUTE)?;
        self.http_routes
            .iter()
            .find(|r| named(&r.metadata, ns, name))
            .cloned()
            .ok_or_else(|| not_found("httproutes.policy.linkerd.io", name))
    }
}
