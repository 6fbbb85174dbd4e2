use crate::{pods::resolve_pods, server::server_includes_pod, Error, WorkloadRef};
use linkerd_k8s_api::{
    policy::{
        httproute::parent_ref_targets_kind, server_authorization::ServerTarget,
        AuthorizationPolicy, HttpRoute, Server, ServerAuthorization,
    },
    resource, Namespace, Pod, ResourceExt,
};
use linkerd_k8s_client::Cluster;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument, trace, warn};

/// A policy resource that grants access to a server on the workload's pods.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authorization {
    pub route: Option<String>,
    pub server: String,
    pub server_authorization: Option<String>,
    pub authorization_policy: Option<String>,
}

/// A reference that could not be followed. The referring resource is skipped.
#[derive(Debug)]
pub struct Warning {
    /// The referring resource, e.g. `authorizationpolicy/ap-web`.
    pub resource: String,
    /// The referenced resource, e.g. `server/srv-web`.
    pub reference: String,
    pub error: kube::Error,
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// Authorizations in discovery order: server authorizations first, then
    /// authorization policies.
    pub authorizations: Vec<Authorization>,
    pub warnings: Vec<Warning>,
}

struct Resolver<'a, C: ?Sized> {
    cluster: &'a C,
    ns: &'a str,
    pods: &'a [Pod],
    namespace_servers: Option<Arc<[Server]>>,
    resolution: Resolution,
}

/// Resolves every authorization that applies to the pods of `target`.
///
/// Failing to enumerate the pods or to list the namespace's authorization resources
/// fails the resolution. A reference that cannot be followed from an individual
/// authorization resource is recorded as a [`Warning`] and that resource is skipped.
#[instrument(skip_all, fields(workload = %target, ns = %target.namespace))]
pub async fn resolve_authorizations<C>(cluster: &C, target: &WorkloadRef) -> Result<Resolution, Error>
where
    C: Cluster + ?Sized,
{
    let pods = resolve_pods(cluster, target).await?;
    let mut resolver = Resolver {
        cluster,
        ns: &target.namespace,
        pods: &pods,
        namespace_servers: None,
        resolution: Resolution::default(),
    };
    resolver.server_authorizations().await?;
    resolver.authorization_policies().await?;

    let resolution = resolver.resolution;
    debug!(
        authorizations = resolution.authorizations.len(),
        warnings = resolution.warnings.len(),
        "Resolved"
    );
    Ok(resolution)
}

// === impl Resolver ===

impl<C> Resolver<'_, C>
where
    C: Cluster + ?Sized,
{
    async fn server_authorizations(&mut self) -> Result<(), Error> {
        let (ns, pods) = (self.ns, self.pods);
        let sazs = self
            .cluster
            .list_server_authorizations(ns)
            .await
            .map_err(Error::upstream(format!("list server authorizations in {ns}")))?;

        for saz in sazs {
            let saz_name = saz.name_any();
            let servers = match saz.spec.server.target() {
                Some(ServerTarget::Name(name)) => match self.cluster.get_server(ns, name).await {
                    Ok(srv) => vec![srv],
                    Err(error) => {
                        self.warn::<ServerAuthorization>(&saz_name, resource::SERVER, name, error);
                        continue;
                    }
                },
                Some(ServerTarget::Selector(selector)) => {
                    match self.cluster.list_servers(ns, Some(selector)).await {
                        Ok(servers) => servers,
                        Err(error) => {
                            let reference = selector.to_string();
                            self.warn::<ServerAuthorization>(
                                &saz_name,
                                resource::SERVER,
                                &reference,
                                error,
                            );
                            continue;
                        }
                    }
                }
                None => {
                    debug!(saz = %saz_name, "No server target");
                    continue;
                }
            };

            for srv in servers.iter().filter(|s| includes_pods(pods, s)) {
                self.resolution.authorizations.push(Authorization {
                    server: srv.name_any(),
                    server_authorization: Some(saz_name.clone()),
                    ..Default::default()
                });
            }
        }
        Ok(())
    }

    async fn authorization_policies(&mut self) -> Result<(), Error> {
        let (ns, pods) = (self.ns, self.pods);
        let policies = self
            .cluster
            .list_authorization_policies(ns)
            .await
            .map_err(Error::upstream(format!("list authorization policies in {ns}")))?;

        for policy in policies {
            let policy_name = policy.name_any();
            let target = &policy.spec.target_ref;

            if target.targets_kind::<Namespace>() {
                // Servers only select pods in their own namespace.
                if target.name != ns {
                    debug!(
                        policy = %policy_name,
                        target = %target.name,
                        "Skipping foreign namespace"
                    );
                    continue;
                }
                let servers = match self.namespace_servers().await {
                    Ok(servers) => servers,
                    Err(error) => {
                        self.warn::<AuthorizationPolicy>(
                            &policy_name,
                            resource::NAMESPACE,
                            &target.name,
                            error,
                        );
                        continue;
                    }
                };
                for srv in servers.iter().filter(|s| includes_pods(pods, s)) {
                    self.resolution.authorizations.push(Authorization {
                        server: srv.name_any(),
                        authorization_policy: Some(policy_name.clone()),
                        ..Default::default()
                    });
                }
            } else if target.targets_kind::<Server>() {
                let srv = match self.cluster.get_server(ns, &target.name).await {
                    Ok(srv) => srv,
                    Err(error) => {
                        self.warn::<AuthorizationPolicy>(
                            &policy_name,
                            resource::SERVER,
                            &target.name,
                            error,
                        );
                        continue;
                    }
                };
                if includes_pods(self.pods, &srv) {
                    self.resolution.authorizations.push(Authorization {
                        server: srv.name_any(),
                        authorization_policy: Some(policy_name),
                        ..Default::default()
                    });
                }
            } else if target.targets_kind::<HttpRoute>() {
                let route = match self.cluster.get_http_route(ns, &target.name).await {
                    Ok(route) => route,
                    Err(error) => {
                        self.warn::<AuthorizationPolicy>(
                            &policy_name,
                            resource::HTTP_ROUTE,
                            &target.name,
                            error,
                        );
                        continue;
                    }
                };
                self.route_servers(&policy_name, &route).await;
            } else {
                debug!(
                    policy = %policy_name,
                    target = %target.canonical_kind(),
                    "Skipping unsupported target"
                );
            }
        }
        Ok(())
    }

    async fn route_servers(&mut self, policy_name: &str, route: &HttpRoute) {
        let route_name = route.name_any();
        for parent in route
            .spec
            .parent_refs
            .iter()
            .flatten()
            .filter(|p| parent_ref_targets_kind::<Server>(p))
        {
            let ns = parent.namespace.as_deref().unwrap_or(self.ns);
            let srv = match self.cluster.get_server(ns, &parent.name).await {
                Ok(srv) => srv,
                Err(error) => {
                    self.warn::<HttpRoute>(&route_name, resource::SERVER, &parent.name, error);
                    continue;
                }
            };
            if includes_pods(self.pods, &srv) {
                self.resolution.authorizations.push(Authorization {
                    route: Some(route_name.clone()),
                    server: srv.name_any(),
                    authorization_policy: Some(policy_name.to_string()),
                    ..Default::default()
                });
            }
        }
    }

    /// Lists the servers in the target namespace, at most once per resolution.
    async fn namespace_servers(&mut self) -> Result<Arc<[Server]>, kube::Error> {
        if let Some(servers) = self.namespace_servers.as_ref() {
            trace!(ns = %self.ns, "Using cached servers");
            return Ok(servers.clone());
        }
        let servers: Arc<[Server]> = self.cluster.list_servers(self.ns, None).await?.into();
        self.namespace_servers = Some(servers.clone());
        Ok(servers)
    }

    fn warn<K>(&mut self, name: &str, reference_kind: &str, reference: &str, error: kube::Error)
    where
        K: kube::Resource,
        K::DynamicType: Default,
    {
        let warning = Warning {
            resource: format!("{}/{name}", K::kind(&Default::default()).to_lowercase()),
            reference: format!("{reference_kind}/{reference}"),
            error,
        };
        warn!(%warning, "Skipping");
        self.resolution.warnings.push(warning);
    }
}

fn includes_pods(pods: &[Pod], srv: &Server) -> bool {
    pods.iter().any(|pod| server_includes_pod(srv, pod))
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} references {}: {}",
            self.resource, self.reference, self.error
        )
    }
}
