//! Friendly resource names.
//!
//! Users refer to resources with short names (`deploy`), canonical singular names
//! (`deployment`), or plural names (`deployments`). These helpers map between the
//! spellings.

pub const ALL: &str = "all";
pub const AUTHORITY: &str = "authority";
pub const AUTHORIZATION_POLICY: &str = "authorizationpolicy";
pub const CONFIG_MAP: &str = "configmap";
pub const CRON_JOB: &str = "cronjob";
pub const DAEMON_SET: &str = "daemonset";
pub const DEPLOYMENT: &str = "deployment";
pub const ENDPOINTS: &str = "endpoints";
pub const HTTP_ROUTE: &str = "httproute";
pub const JOB: &str = "job";
pub const LINK: &str = "link";
pub const MUTATING_WEBHOOK_CONFIGURATION: &str = "mutatingwebhookconfiguration";
pub const NAMESPACE: &str = "namespace";
pub const POD: &str = "pod";
pub const REPLICA_SET: &str = "replicaset";
pub const REPLICATION_CONTROLLER: &str = "replicationcontroller";
pub const SERVER: &str = "server";
pub const SERVER_AUTHORIZATION: &str = "serverauthorization";
pub const SERVICE: &str = "service";
pub const SERVICE_PROFILE: &str = "serviceprofile";
pub const STATEFUL_SET: &str = "statefulset";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot find Kubernetes canonical name from friendly name [{0}]")]
pub struct UnknownResource(pub String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ResourceName {
    short: &'static str,
    full: &'static str,
    plural: &'static str,
}

static RESOURCE_NAMES: &[ResourceName] = &[
    ResourceName::new("au", AUTHORITY, "authorities"),
    ResourceName::new("cm", CONFIG_MAP, "configmaps"),
    ResourceName::new("cj", CRON_JOB, "cronjobs"),
    ResourceName::new("ds", DAEMON_SET, "daemonsets"),
    ResourceName::new("deploy", DEPLOYMENT, "deployments"),
    ResourceName::new("ep", ENDPOINTS, "endpoints"),
    ResourceName::new("job", JOB, "jobs"),
    ResourceName::new(
        "mwc",
        MUTATING_WEBHOOK_CONFIGURATION,
        "mutatingwebhookconfigurations",
    ),
    ResourceName::new("ns", NAMESPACE, "namespaces"),
    ResourceName::new("po", POD, "pods"),
    ResourceName::new("rc", REPLICATION_CONTROLLER, "replicationcontrollers"),
    ResourceName::new("rs", REPLICA_SET, "replicasets"),
    ResourceName::new("svc", SERVICE, "services"),
    ResourceName::new("sp", SERVICE_PROFILE, "serviceprofiles"),
    ResourceName::new("saz", SERVER_AUTHORIZATION, "serverauthorizations"),
    ResourceName::new("srv", SERVER, "servers"),
    ResourceName::new("ap", AUTHORIZATION_POLICY, "authorizationpolicies"),
    ResourceName::new("route", HTTP_ROUTE, "httproutes"),
    ResourceName::new("sts", STATEFUL_SET, "statefulsets"),
    ResourceName::new("ln", LINK, "links"),
    ResourceName::new(ALL, ALL, ALL),
];

impl ResourceName {
    const fn new(short: &'static str, full: &'static str, plural: &'static str) -> Self {
        Self {
            short,
            full,
            plural,
        }
    }

    fn has(&self, name: &str) -> bool {
        [self.short, self.full, self.plural]
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }
}

fn lookup(friendly_name: &str) -> Result<&'static ResourceName, UnknownResource> {
    RESOURCE_NAMES
        .iter()
        .find(|name| name.has(friendly_name))
        .ok_or_else(|| UnknownResource(friendly_name.to_string()))
}

/// Returns the canonical (singular, lowercase) name for a friendly resource name.
pub fn canonical_resource_name_from_friendly_name(
    friendly_name: &str,
) -> Result<&'static str, UnknownResource> {
    lookup(friendly_name).map(|name| name.full)
}

/// Returns the plural name for a friendly resource name.
pub fn plural_resource_name_from_friendly_name(
    friendly_name: &str,
) -> Result<&'static str, UnknownResource> {
    lookup(friendly_name).map(|name| name.plural)
}

/// Returns the short name for a canonical resource name, if one exists.
pub fn short_name_from_canonical_resource_name(canonical_name: &str) -> Option<&'static str> {
    RESOURCE_NAMES
        .iter()
        .find(|name| name.full == canonical_name)
        .map(|name| name.short)
}

/// Returns the metric label used for a resource kind. `job` collides with the label
/// Prometheus attaches to every scrape, so it is renamed.
pub fn kind_to_l5d_label(kind: &str) -> &str {
    if kind == JOB {
        "k8s_job"
    } else {
        kind
    }
}
