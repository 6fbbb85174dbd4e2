use linkerd_k8s_api::{
    policy::{server::Port, Server},
    Pod,
};
use linkerd_k8s_client::pod_labels;

/// Returns true if the server is in the pod's namespace, its pod selector matches the
/// pod's labels, and the pod declares a container port matching the server's port, by
/// number or by name.
///
/// Servers that select external workloads never include a pod.
pub fn server_includes_pod(server: &Server, pod: &Pod) -> bool {
    if server.metadata.namespace != pod.metadata.namespace {
        return false;
    }
    let Some(selector) = server.spec.pod_selector() else {
        return false;
    };
    if !selector.matches(&pod_labels(pod)) {
        return false;
    }

    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .any(|p| match &server.spec.port {
            Port::Number(n) => p.container_port == i32::from(n.get()),
            Port::Name(name) => p.name.as_deref() == Some(name.as_str()),
        })
}
