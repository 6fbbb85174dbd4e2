use tracing::debug;

/// The oldest Kubernetes release supported.
pub const MINIMUM_KUBERNETES_VERSION: [u32; 3] = [1, 22, 0];

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to get Kubernetes version: {0}")]
    Query(#[from] kube::Error),

    #[error("invalid version: {0}")]
    Invalid(String),

    #[error("installed Kubernetes version ({actual}) is older than the minimum supported version ({minimum})")]
    Incompatible { actual: String, minimum: String },
}

/// Parses a Kubernetes `gitVersion` like `v1.28.3-eks-4f4795d` into its release
/// components. Pre-release and build suffixes are ignored.
pub fn parse_version(version: &str) -> Result<[u32; 3], VersionError> {
    let invalid = || VersionError::Invalid(version.to_string());

    let version = version.trim().trim_start_matches('v');
    let release = version
        .split(['-', '+'])
        .next()
        .filter(|r| !r.is_empty())
        .ok_or_else(invalid)?;

    let mut parts = release.split('.');
    let mut parsed = [0; 3];
    for part in parsed.iter_mut() {
        *part = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
    }
    Ok(parsed)
}

/// Returns true if `actual` is at least `expected`.
pub fn is_compatible_version(expected: [u32; 3], actual: [u32; 3]) -> bool {
    actual >= expected
}

/// Fails if the API server reports a version older than [`MINIMUM_KUBERNETES_VERSION`].
pub async fn check_kubernetes_version(client: &kube::Client) -> Result<[u32; 3], VersionError> {
    let info = client.apiserver_version().await?;
    debug!(version = %info.git_version, "Kubernetes API server");
    let actual = parse_version(&info.git_version)?;
    if !is_compatible_version(MINIMUM_KUBERNETES_VERSION, actual) {
        return Err(VersionError::Incompatible {
            actual: display(actual),
            minimum: display(MINIMUM_KUBERNETES_VERSION),
        });
    }
    Ok(actual)
}

fn display([major, minor, patch]: [u32; 3]) -> String {
    format!("{major}.{minor}.{patch}")
}
