use super::targets_kind;

/// References a resource in the same namespace as the referring resource.
#[derive(
    Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct LocalTargetRef {
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl LocalTargetRef {
    pub fn from_resource<T>(resource: &T) -> Self
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        let dt = Default::default();
        let group = match T::group(&dt) {
            g if (*g).is_empty() => None,
            g => Some(g.to_string()),
        };
        Self {
            group,
            kind: T::kind(&dt).to_string(),
            name: resource.meta().name.clone().unwrap_or_default(),
        }
    }

    /// Returns the target ref kind, qualified by its group, if necessary.
    pub fn canonical_kind(&self) -> String {
        match self.group.as_deref() {
            Some(group) if !group.is_empty() => format!("{}.{group}", self.kind),
            _ => self.kind.clone(),
        }
    }

    /// Checks whether the target references the given resource type
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        targets_kind::<T>(self.group.as_deref(), &self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::{HttpRoute, Server},
        Namespace, ObjectMeta,
    };

    #[test]
    fn targets_namespace() {
        for group in [None, Some(""), Some("core"), Some("CORE")] {
            let t = LocalTargetRef {
                group: group.map(ToString::to_string),
                kind: "Namespace".to_string(),
                name: "appns".to_string(),
            };
            assert!(t.targets_kind::<Namespace>(), "{t:?}");
            assert!(!t.targets_kind::<Server>(), "{t:?}");
            assert_eq!(t.canonical_kind(), "Namespace");
        }
    }

    #[test]
    fn targets_policy_kinds() {
        let t = LocalTargetRef {
            group: Some("policy.linkerd.io".to_string()),
            kind: "HTTPRoute".to_string(),
            name: "route".to_string(),
        };
        assert!(t.targets_kind::<HttpRoute>());
        assert!(!t.targets_kind::<Server>());
        assert_eq!(t.canonical_kind(), "HTTPRoute.policy.linkerd.io");

        let t = LocalTargetRef {
            group: Some("gateway.networking.k8s.io".to_string()),
            kind: "HTTPRoute".to_string(),
            name: "route".to_string(),
        };
        assert!(!t.targets_kind::<HttpRoute>(), "group must match");
    }

    #[test]
    fn from_resource() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("appns".to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        assert_eq!(
            LocalTargetRef::from_resource(&ns),
            LocalTargetRef {
                group: None,
                kind: "Namespace".to_string(),
                name: "appns".to_string(),
            }
        );
    }
}
