use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use linkerd_k8s_api::{
    self as k8s,
    labels::Selector,
    policy::{AuthorizationPolicy, HttpRoute, Server, ServerAuthorization},
    resource, CronJob, DaemonSet, Deployment, Job, ObjectMeta, Pod, ReplicaSet,
    ReplicationController, StatefulSet,
};
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, instrument, trace};

pub type Result<T, E = kube::Error> = std::result::Result<T, E>;

/// Read access to the cluster state that policy resolution depends on.
///
/// Every method maps onto a single `get` or `list` call against the API server.
/// Implementations do not cache.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod>;

    /// Lists pods in `ns`, restricted to those matching `selector` when one is given.
    async fn list_pods(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Pod>>;

    async fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload>;

    async fn list_workloads(&self, kind: WorkloadKind, ns: &str) -> Result<Vec<Workload>>;

    async fn get_server(&self, ns: &str, name: &str) -> Result<Server>;

    /// Lists servers in `ns`, restricted to those whose labels match `selector` when one
    /// is given.
    async fn list_servers(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Server>>;

    async fn list_server_authorizations(&self, ns: &str) -> Result<Vec<ServerAuthorization>>;

    async fn list_authorization_policies(&self, ns: &str) -> Result<Vec<AuthorizationPolicy>>;

    async fn get_http_route(&self, ns: &str, name: &str) -> Result<HttpRoute>;
}

/// The kinds of resources that own pods.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    CronJob,
    DaemonSet,
    Deployment,
    Job,
    ReplicaSet,
    ReplicationController,
    StatefulSet,
}

/// A resource that owns pods, either directly or through an intermediate workload.
#[derive(Clone, Debug)]
pub enum Workload {
    CronJob(CronJob),
    DaemonSet(DaemonSet),
    Deployment(Deployment),
    Job(Job),
    ReplicaSet(ReplicaSet),
    ReplicationController(ReplicationController),
    StatefulSet(StatefulSet),
}

// === impl WorkloadKind ===

impl WorkloadKind {
    /// Maps a canonical resource name (see `linkerd_k8s_api::resource`) to a workload kind.
    pub fn from_canonical(name: &str) -> Option<Self> {
        match name {
            resource::CRON_JOB => Some(Self::CronJob),
            resource::DAEMON_SET => Some(Self::DaemonSet),
            resource::DEPLOYMENT => Some(Self::Deployment),
            resource::JOB => Some(Self::Job),
            resource::REPLICA_SET => Some(Self::ReplicaSet),
            resource::REPLICATION_CONTROLLER => Some(Self::ReplicationController),
            resource::STATEFUL_SET => Some(Self::StatefulSet),
            _ => None,
        }
    }

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::CronJob => resource::CRON_JOB,
            Self::DaemonSet => resource::DAEMON_SET,
            Self::Deployment => resource::DEPLOYMENT,
            Self::Job => resource::JOB,
            Self::ReplicaSet => resource::REPLICA_SET,
            Self::ReplicationController => resource::REPLICATION_CONTROLLER,
            Self::StatefulSet => resource::STATEFUL_SET,
        }
    }

    /// The kind of the intermediate workload through which this kind owns its pods.
    pub fn child_kind(&self) -> Option<Self> {
        match self {
            Self::CronJob => Some(Self::Job),
            Self::Deployment => Some(Self::ReplicaSet),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

// === impl Workload ===

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::CronJob(_) => WorkloadKind::CronJob,
            Self::DaemonSet(_) => WorkloadKind::DaemonSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::Job(_) => WorkloadKind::Job,
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::ReplicationController(_) => WorkloadKind::ReplicationController,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::CronJob(w) => &w.metadata,
            Self::DaemonSet(w) => &w.metadata,
            Self::Deployment(w) => &w.metadata,
            Self::Job(w) => &w.metadata,
            Self::ReplicaSet(w) => &w.metadata,
            Self::ReplicationController(w) => &w.metadata,
            Self::StatefulSet(w) => &w.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }

    /// Returns the workload's pod selector.
    ///
    /// Selectors that would select every pod are treated as absent.
    pub fn selector(&self) -> Option<Selector> {
        let selector = match self {
            Self::CronJob(w) => w
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|s| s.selector.as_ref())
                .map(Selector::from),
            Self::DaemonSet(w) => w.spec.as_ref().map(|s| Selector::from(&s.selector)),
            Self::Deployment(w) => w.spec.as_ref().map(|s| Selector::from(&s.selector)),
            Self::Job(w) => w
                .spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .map(Selector::from),
            Self::ReplicaSet(w) => w.spec.as_ref().map(|s| Selector::from(&s.selector)),
            Self::ReplicationController(w) => w
                .spec
                .as_ref()
                .and_then(|s| s.selector.clone())
                .map(Selector::from_map),
            Self::StatefulSet(w) => w.spec.as_ref().map(|s| Selector::from(&s.selector)),
        };
        selector.filter(|s| !s.selects_all())
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

// === impl kube::Client ===

fn namespaced<K>(client: &kube::Client, ns: &str) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    Api::namespaced(client.clone(), ns)
}

async fn list<K>(client: &kube::Client, ns: &str, selector: Option<&Selector>) -> Result<Vec<K>>
where
    K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
    K::DynamicType: Default,
{
    let mut params = ListParams::default();
    if let Some(selector) = selector {
        if selector.matches_nothing() {
            debug!(%selector, "Selector matches nothing");
            return Ok(Vec::new());
        }
        params = params.labels(&selector.to_string());
    }
    let list = namespaced::<K>(client, ns).list(&params).await?;
    trace!(items = list.items.len());
    Ok(list.items)
}

#[async_trait::async_trait]
impl Cluster for kube::Client {
    #[instrument(skip(self))]
    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod> {
        namespaced::<Pod>(self, ns).get(name).await
    }

    #[instrument(skip(self, selector), fields(selector = ?selector.map(ToString::to_string)))]
    async fn list_pods(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Pod>> {
        list::<Pod>(self, ns, selector).await
    }

    #[instrument(skip(self))]
    async fn get_workload(&self, kind: WorkloadKind, ns: &str, name: &str) -> Result<Workload> {
        let workload = match kind {
            WorkloadKind::CronJob => {
                Workload::CronJob(namespaced::<CronJob>(self, ns).get(name).await?)
            }
            WorkloadKind::DaemonSet => {
                Workload::DaemonSet(namespaced::<DaemonSet>(self, ns).get(name).await?)
            }
            WorkloadKind::Deployment => {
                Workload::Deployment(namespaced::<Deployment>(self, ns).get(name).await?)
            }
            WorkloadKind::Job => Workload::Job(namespaced::<Job>(self, ns).get(name).await?),
            WorkloadKind::ReplicaSet => {
                Workload::ReplicaSet(namespaced::<ReplicaSet>(self, ns).get(name).await?)
            }
            WorkloadKind::ReplicationController => Workload::ReplicationController(
                namespaced::<ReplicationController>(self, ns)
                    .get(name)
                    .await?,
            ),
            WorkloadKind::StatefulSet => {
                Workload::StatefulSet(namespaced::<StatefulSet>(self, ns).get(name).await?)
            }
        };
        Ok(workload)
    }

    #[instrument(skip(self))]
    async fn list_workloads(&self, kind: WorkloadKind, ns: &str) -> Result<Vec<Workload>> {
        fn wrap<K>(items: Vec<K>, f: fn(K) -> Workload) -> Vec<Workload> {
            items.into_iter().map(f).collect()
        }

        let workloads = match kind {
            WorkloadKind::CronJob => wrap(list::<CronJob>(self, ns, None).await?, Workload::CronJob),
            WorkloadKind::DaemonSet => {
                wrap(list::<DaemonSet>(self, ns, None).await?, Workload::DaemonSet)
            }
            WorkloadKind::Deployment => {
                wrap(list::<Deployment>(self, ns, None).await?, Workload::Deployment)
            }
            WorkloadKind::Job => wrap(list::<Job>(self, ns, None).await?, Workload::Job),
            WorkloadKind::ReplicaSet => {
                wrap(list::<ReplicaSet>(self, ns, None).await?, Workload::ReplicaSet)
            }
            WorkloadKind::ReplicationController => wrap(
                list::<ReplicationController>(self, ns, None).await?,
                Workload::ReplicationController,
            ),
            WorkloadKind::StatefulSet => {
                wrap(list::<StatefulSet>(self, ns, None).await?, Workload::StatefulSet)
            }
        };
        Ok(workloads)
    }

    #[instrument(skip(self))]
    async fn get_server(&self, ns: &str, name: &str) -> Result<Server> {
        namespaced::<Server>(self, ns).get(name).await
    }

    #[instrument(skip(self, selector), fields(selector = ?selector.map(ToString::to_string)))]
    async fn list_servers(&self, ns: &str, selector: Option<&Selector>) -> Result<Vec<Server>> {
        list::<Server>(self, ns, selector).await
    }

    #[instrument(skip(self))]
    async fn list_server_authorizations(&self, ns: &str) -> Result<Vec<ServerAuthorization>> {
        list::<ServerAuthorization>(self, ns, None).await
    }

    #[instrument(skip(self))]
    async fn list_authorization_policies(&self, ns: &str) -> Result<Vec<AuthorizationPolicy>> {
        list::<AuthorizationPolicy>(self, ns, None).await
    }

    #[instrument(skip(self))]
    async fn get_http_route(&self, ns: &str, name: &str) -> Result<HttpRoute> {
        namespaced::<HttpRoute>(self, ns).get(name).await
    }
}

/// Returns whether an object is owned by one of `owners` (by UID).
///
/// The `controller: true` reference is authoritative when present; otherwise any owner
/// reference counts. Returns `None` when the object has no owner references at all.
pub fn owned_by<'a>(
    meta: &ObjectMeta,
    mut owners: impl Iterator<Item = &'a str>,
) -> Option<bool> {
    let refs = meta.owner_references.as_deref().filter(|r| !r.is_empty())?;
    if let Some(controller) = refs.iter().find(|r| r.controller == Some(true)) {
        return Some(owners.any(|uid| uid == controller.uid));
    }
    Some(owners.any(|uid| refs.iter().any(|r| r.uid == uid)))
}

/// The pod's labels as a selectable label set.
pub fn pod_labels(pod: &Pod) -> k8s::Labels {
    k8s::Labels::from(pod.metadata.labels.clone())
}
