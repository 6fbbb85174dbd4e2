use crate::labels;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authorizes clients to connect to a Server.
#[derive(CustomResource, Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "policy.linkerd.io",
    version = "v1beta1",
    kind = "ServerAuthorization",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuthorizationSpec {
    pub server: Server,
}

/// Identifies the servers an authorization applies to, either by name or by a
/// selector over server labels.
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct Server {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<labels::Selector>,
}

/// How a `ServerAuthorization` selects its servers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerTarget<'a> {
    Name(&'a str),
    Selector(&'a labels::Selector),
}

// === impl Server ===

impl Server {
    /// Returns the server target, preferring a name over a selector. `None` when the
    /// authorization sets neither.
    pub fn target(&self) -> Option<ServerTarget<'_>> {
        if let Some(name) = self.name.as_deref() {
            return Some(ServerTarget::Name(name));
        }
        self.selector.as_ref().map(ServerTarget::Selector)
    }
}
