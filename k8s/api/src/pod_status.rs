use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, Pod};

/// Summarizes a pod's state the way `kubectl get pods` reports it in its `STATUS`
/// column, e.g. `Running`, `CrashLoopBackOff`, `Init:0/2`, or `ExitCode:2`.
pub fn pod_status(pod: &Pod) -> String {
    let status = pod.status.as_ref();
    let mut reason = status
        .and_then(|s| s.reason.clone())
        .filter(|r| !r.is_empty())
        .or_else(|| status.and_then(|s| s.phase.clone()))
        .unwrap_or_default();

    let init_containers = pod
        .spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .map_or(0, Vec::len);

    let mut initializing = false;
    for (i, container) in status
        .and_then(|s| s.init_container_statuses.as_ref())
        .into_iter()
        .flatten()
        .enumerate()
    {
        let state = container.state.as_ref();
        let terminated = state.and_then(|s| s.terminated.as_ref());
        let waiting_reason = state
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            .filter(|r| !r.is_empty());

        match (terminated, waiting_reason) {
            (Some(t), _) if t.exit_code == 0 && t.signal.unwrap_or(0) == 0 => continue,
            (Some(t), _) => {
                reason = match t.reason.as_deref().filter(|r| !r.is_empty()) {
                    Some(r) => format!("Init:{r}"),
                    None => format!("Init:{}", exit_description(t)),
                };
            }
            (None, Some(r)) if r != "PodInitializing" => {
                reason = format!("Init:{r}");
            }
            _ => {
                reason = format!("Init:{i}/{init_containers}");
            }
        }
        initializing = true;
        break;
    }

    if !initializing {
        let mut has_running = false;
        for container in status
            .and_then(|s| s.container_statuses.as_ref())
            .into_iter()
            .flatten()
            .rev()
        {
            let state = container.state.as_ref();
            if let Some(r) = waiting_reason(state) {
                reason = r.to_string();
            } else if let Some(t) = state.and_then(|s| s.terminated.as_ref()) {
                reason = match t.reason.as_deref().filter(|r| !r.is_empty()) {
                    Some(r) => r.to_string(),
                    None => exit_description(t),
                };
            } else if container.ready && state.and_then(|s| s.running.as_ref()).is_some() {
                has_running = true;
                reason = "Running".to_string();
            }
        }

        // A pod that still has a running container is not completed.
        if reason == "Completed" && has_running {
            reason = "Running".to_string();
        }
    }

    reason
}

fn waiting_reason(state: Option<&ContainerState>) -> Option<&str> {
    state
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.reason.as_deref())
        .filter(|r| !r.is_empty())
}

fn exit_description(terminated: &ContainerStateTerminated) -> String {
    match terminated.signal {
        Some(signal) if signal != 0 => format!("Signal:{signal}"),
        _ => format!("ExitCode:{}", terminated.exit_code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(yaml: &str) -> Pod {
        serde_yaml::from_str(yaml).expect("pod must decode")
    }

    #[test]
    fn pending_pod_reports_reason() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Pending
  reason: podReason
"#);
        assert_eq!(pod_status(&p), "podReason");
    }

    #[test]
    fn pending_pod_reports_phase() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Pending
"#);
        assert_eq!(pod_status(&p), "Pending");
    }

    #[test]
    fn waiting_container() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Running
  containerStatuses:
  - name: app
    image: app
    imageID: ""
    ready: false
    restartCount: 4
    state:
      waiting:
        reason: CrashLoopBackOff
"#);
        assert_eq!(pod_status(&p), "CrashLoopBackOff");
    }

    #[test]
    fn terminated_container_without_reason() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Failed
  containerStatuses:
  - name: app
    image: app
    imageID: ""
    ready: false
    restartCount: 0
    state:
      terminated:
        exitCode: 2
"#);
        assert_eq!(pod_status(&p), "ExitCode:2");
    }

    #[test]
    fn terminated_container_with_signal() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Failed
  containerStatuses:
  - name: app
    image: app
    imageID: ""
    ready: false
    restartCount: 0
    state:
      terminated:
        exitCode: 137
        signal: 9
"#);
        assert_eq!(pod_status(&p), "Signal:9");
    }

    #[test]
    fn init_container_pod_initializing() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Pending
  initContainerStatuses:
  - name: init
    image: init
    imageID: ""
    ready: false
    restartCount: 0
    state:
      waiting:
        reason: PodInitializing
"#);
        assert_eq!(pod_status(&p), "Init:0/0");
    }

    #[test]
    fn init_container_failed() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
spec:
  initContainers:
  - name: init
  - name: init-2
  containers:
  - name: app
status:
  phase: Pending
  initContainerStatuses:
  - name: init
    image: init
    imageID: ""
    ready: false
    restartCount: 0
    state:
      terminated:
        exitCode: 0
  - name: init-2
    image: init
    imageID: ""
    ready: false
    restartCount: 0
    state:
      terminated:
        exitCode: 1
        reason: Error
"#);
        assert_eq!(pod_status(&p), "Init:Error");
    }

    #[test]
    fn completed_with_running_container_is_running() {
        let p = pod(r#"
apiVersion: v1
kind: Pod
metadata:
  name: pod-1
status:
  phase: Running
  containerStatuses:
  - name: app
    image: app
    imageID: ""
    ready: true
    restartCount: 0
    state:
      running: {}
  - name: sidecar
    image: sidecar
    imageID: ""
    ready: false
    restartCount: 0
    state:
      terminated:
        exitCode: 0
        reason: Completed
"#);
        assert_eq!(pod_status(&p), "Running");
    }
}
