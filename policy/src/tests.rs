
use linkerd_k8s_client::FakeCluster;

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

fn cluster(manifests: &[&str]) -> FakeCluster {
    FakeCluster::from_manifests(manifests.iter().copied()).expect("manifests must be valid")
}

/// A pod labeled `app=foo` that serves `http` on 8080 and is owned by `owner`, if given.
fn mk_pod(name: &str, owner: Option<(&str, &str, &str)>) -> String {
    let owner = owner
        .map(|(kind, name, uid)| {
            format!(
                r#"
  ownerReferences:
  - apiVersion: apps/v1
    kind: {kind}
    name: {name}
    uid: {uid}
    controller: true"#
            )
        })
        .unwrap_or_default();
    format!(
        r#"
apiVersion: v1
kind: Pod
metadata:
  name: {name}
  namespace: ns
  labels:
    app: foo{owner}
spec:
  containers:
  - name: app
    ports:
    - name: http
      containerPort: 8080
"#
    )
}
