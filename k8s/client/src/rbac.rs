use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use linkerd_k8s_api::{policy::API_GROUP, resource};
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not authorized to {verb} {resource}{}: {reason}", in_namespace(.namespace))]
    NotAuthorized {
        verb: String,
        resource: String,
        namespace: Option<String>,
        reason: String,
    },

    #[error("failed to review access: {0}")]
    Review(#[from] kube::Error),
}

/// An access request to check for the current user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAccess {
    /// The namespace to check; `None` checks access across all namespaces.
    pub namespace: Option<String>,
    pub verb: String,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub name: Option<String>,
}

fn in_namespace(ns: &Option<String>) -> String {
    match ns {
        Some(ns) => format!(" in namespace {ns}"),
        None => String::new(),
    }
}

impl ResourceAccess {
    pub fn list(namespace: Option<&str>, group: &str, version: &str, resource: &str) -> Self {
        Self {
            namespace: namespace.map(Into::into),
            verb: "list".to_string(),
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            name: None,
        }
    }

    fn review(&self) -> SelfSubjectAccessReview {
        SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: self.namespace.clone(),
                    verb: Some(self.verb.clone()),
                    group: Some(self.group.clone()),
                    version: Some(self.version.clone()),
                    resource: Some(self.resource.clone()),
                    name: self.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Checks that the current user may perform `access`, returning the reviewer's reason
/// when it is denied.
#[instrument(skip(client))]
pub async fn resource_authz(client: &kube::Client, access: &ResourceAccess) -> Result<(), Error> {
    let review = Api::<SelfSubjectAccessReview>::all(client.clone())
        .create(&PostParams::default(), &access.review())
        .await?;
    let status = review.status.unwrap_or_default();
    debug!(allowed = status.allowed, reason = ?status.reason);
    if status.allowed {
        return Ok(());
    }
    Err(Error::NotAuthorized {
        verb: access.verb.clone(),
        resource: access.resource.clone(),
        namespace: access.namespace.clone(),
        reason: status
            .reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "no RBAC policy matched".to_string()),
    })
}

/// The access checks for every resource read while resolving authorizations.
pub fn policy_resources(namespace: Option<&str>) -> Vec<ResourceAccess> {
    [
        ("", "v1", resource::POD),
        ("apps", "v1", resource::DEPLOYMENT),
        ("apps", "v1", resource::REPLICA_SET),
        ("apps", "v1", resource::STATEFUL_SET),
        ("apps", "v1", resource::DAEMON_SET),
        ("batch", "v1", resource::JOB),
        ("batch", "v1", resource::CRON_JOB),
        ("", "v1", resource::REPLICATION_CONTROLLER),
        (API_GROUP, "v1beta3", resource::SERVER),
        (API_GROUP, "v1beta1", resource::SERVER_AUTHORIZATION),
        (API_GROUP, "v1alpha1", resource::AUTHORIZATION_POLICY),
        (API_GROUP, "v1beta3", resource::HTTP_ROUTE),
    ]
    .into_iter()
    .filter_map(|(group, version, kind)| {
        let plural = resource::plural_resource_name_from_friendly_name(kind).ok()?;
        Some(ResourceAccess::list(namespace, group, version, plural))
    })
    .collect()
}

/// Checks `list` access on every resource read while resolving authorizations, stopping
/// at the first denial.
pub async fn policy_resources_access(
    client: &kube::Client,
    namespace: Option<&str>,
) -> Result<(), Error> {
    for access in policy_resources(namespace) {
        resource_authz(client, &access).await?;
    }
    Ok(())
}
