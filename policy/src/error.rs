use linkerd_k8s_api::resource::UnknownResource;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidResourceKind(#[from] UnknownResource),

    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    #[error("a name is required for resource type {0}")]
    MissingResourceName(String),

    #[error("failed to {what}: {source}")]
    UpstreamQueryFailed {
        what: String,
        #[source]
        source: kube::Error,
    },
}

impl Error {
    pub(crate) fn upstream(what: impl Into<String>) -> impl FnOnce(kube::Error) -> Self {
        let what = what.into();
        move |source| Self::UpstreamQueryFailed { what, source }
    }
}
