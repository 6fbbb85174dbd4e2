use crate::Error;
use linkerd_k8s_api::{resource, Pod, ResourceExt};
use linkerd_k8s_client::{owned_by, pod_labels, Cluster, Workload, WorkloadKind};
use std::{collections::HashSet, fmt};
use tracing::{debug, instrument, trace};

/// Identifies a single named resource (`deploy/web`) or every resource of a kind
/// (`deploy`) in a namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: TargetKind,
    pub name: Option<String>,
    pub namespace: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Pod,
    Workload(WorkloadKind),
}

// === impl WorkloadRef ===

impl WorkloadRef {
    /// Parses a `kind` or `kind/name` token. The kind may be spelled with its short,
    /// singular, or plural name.
    pub fn parse(namespace: impl Into<String>, token: &str) -> Result<Self, Error> {
        let (kind, name) = match token.split_once('/') {
            Some((kind, "")) => return Err(Error::MissingResourceName(kind.to_string())),
            Some((kind, name)) => (kind, Some(name.to_string())),
            None => (token, None),
        };

        let canonical = resource::canonical_resource_name_from_friendly_name(kind)?;
        let kind = if canonical == resource::POD {
            TargetKind::Pod
        } else {
            WorkloadKind::from_canonical(canonical)
                .map(TargetKind::Workload)
                .ok_or_else(|| Error::UnsupportedResourceType(canonical.to_string()))?
        };

        Ok(Self {
            kind,
            name,
            namespace: namespace.into(),
        })
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;
        if let Some(name) = self.name.as_deref() {
            write!(f, "/{name}")?;
        }
        Ok(())
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => f.write_str(resource::POD),
            Self::Workload(kind) => fmt::Display::fmt(kind, f),
        }
    }
}

/// Resolves the pods that belong to `target`.
///
/// Pods are matched to a workload through their owner references, following one
/// intermediate hop for kinds that own pods through another workload (CronJob to Job,
/// Deployment to ReplicaSet). Pods without any owner references fall back to the
/// workload's label selector.
#[instrument(skip_all, fields(workload = %target, ns = %target.namespace))]
pub async fn resolve_pods<C>(cluster: &C, target: &WorkloadRef) -> Result<Vec<Pod>, Error>
where
    C: Cluster + ?Sized,
{
    let ns = target.namespace.as_str();
    let pods = match (target.kind, target.name.as_deref()) {
        (TargetKind::Pod, Some(name)) => vec![cluster
            .get_pod(ns, name)
            .await
            .map_err(Error::upstream(format!("get pod {ns}/{name}")))?],

        (TargetKind::Pod, None) => cluster
            .list_pods(ns, None)
            .await
            .map_err(Error::upstream(format!("list pods in {ns}")))?,

        (TargetKind::Workload(kind), Some(name)) => {
            let workload = cluster
                .get_workload(kind, ns, name)
                .await
                .map_err(Error::upstream(format!("get {kind} {ns}/{name}")))?;
            workload_pods(cluster, ns, &workload).await?
        }

        (TargetKind::Workload(kind), None) => {
            let workloads = cluster
                .list_workloads(kind, ns)
                .await
                .map_err(Error::upstream(format!("list {kind} in {ns}")))?;

            let mut seen = HashSet::new();
            let mut pods = Vec::new();
            for workload in workloads {
                for pod in workload_pods(cluster, ns, &workload).await? {
                    if seen.insert(pod.name_any()) {
                        pods.push(pod);
                    }
                }
            }
            pods
        }
    };

    debug!(pods = pods.len(), "Resolved");
    Ok(pods)
}

async fn workload_pods<C>(cluster: &C, ns: &str, workload: &Workload) -> Result<Vec<Pod>, Error>
where
    C: Cluster + ?Sized,
{
    let mut owners = workload
        .uid()
        .map(|uid| vec![uid.to_string()])
        .unwrap_or_default();

    if let Some(child_kind) = workload.kind().child_kind() {
        let children = cluster
            .list_workloads(child_kind, ns)
            .await
            .map_err(Error::upstream(format!("list {child_kind} in {ns}")))?;
        owners.extend(children.iter().filter_map(|child| {
            let owned = owned_by(child.meta(), workload.uid().into_iter())?;
            if !owned {
                return None;
            }
            trace!(%child, owner = %workload, "Owned");
            child.uid().map(ToString::to_string)
        }));
    }

    let selector = workload.selector();
    let pods = cluster
        .list_pods(ns, None)
        .await
        .map_err(Error::upstream(format!("list pods in {ns}")))?;

    Ok(pods
        .into_iter()
        .filter(|pod| {
            match owned_by(&pod.metadata, owners.iter().map(String::as_str)) {
                Some(owned) => owned,
                // Orphaned pods are attributed by label.
                None => selector
                    .as_ref()
                    .is_some_and(|s| s.matches(&pod_labels(pod))),
            }
        })
        .collect())
}
