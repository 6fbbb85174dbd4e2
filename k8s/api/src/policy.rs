pub mod authorization_policy;
pub mod httproute;
pub mod server;
pub mod server_authorization;
mod target_ref;

pub use self::{
    authorization_policy::{AuthorizationPolicy, AuthorizationPolicySpec},
    httproute::{HttpRoute, HttpRouteSpec, ParentReference},
    server::{Server, ServerSpec},
    server_authorization::{ServerAuthorization, ServerAuthorizationSpec},
    target_ref::LocalTargetRef,
};

/// The API group shared by all policy resources.
pub const API_GROUP: &str = "policy.linkerd.io";

/// Checks whether a `group`/`kind` pair refers to the resource type `T`.
///
/// An empty or missing group refers to the core API group.
pub fn targets_kind<T>(group: Option<&str>, kind: &str) -> bool
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();

    let mut t_group = &*T::group(&dt);
    if t_group.is_empty() {
        t_group = "core";
    }

    let group = match group {
        Some(g) if !g.is_empty() => g,
        _ => "core",
    };

    group.eq_ignore_ascii_case(t_group) && kind.eq_ignore_ascii_case(&T::kind(&dt))
}
