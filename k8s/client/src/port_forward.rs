//! Local port-forwarding to pods through the API server.

use kube::api::{Api, ListParams};
use linkerd_k8s_api::{labels::Selector, Deployment, Pod};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time,
};
use tracing::{debug, info, info_span, Instrument};

const CONNECT_ATTEMPTS: usize = 3;
const CONNECT_RETRY_DELAY: time::Duration = time::Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no running pods found for deployment {namespace}/{name}")]
    NoRunningPod { namespace: String, name: String },

    #[error("port-forward did not provide a stream for port {0}")]
    MissingStream(u16),

    #[error("port-forward has not been initialized")]
    NotInitialized,
}

/// Forwards connections accepted on a local port to a port on a pod.
pub struct PortForward {
    api: Api<Pod>,
    namespace: String,
    pod: String,
    remote_port: u16,
    local_port: u16,
    running: Option<Running>,
}

struct Running {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Opens a single port-forwarded stream to `port` on `pod`.
///
/// The API server intermittently fails the protocol upgrade, so that failure is retried
/// a few times.
pub async fn open_stream(
    api: &Api<Pod>,
    pod: &str,
    port: u16,
) -> Result<impl AsyncRead + AsyncWrite + Unpin + Send + 'static, Error> {
    let mut attempt = 1;
    let mut pf = loop {
        match api.portforward(pod, &[port]).await {
            Err(kube::Error::UpgradeConnection(
                kube::client::UpgradeConnectionError::ProtocolSwitch(status),
            )) if attempt < CONNECT_ATTEMPTS => {
                info!(?status, attempt, "Flakey port forward; retrying");
                attempt += 1;
                time::sleep(CONNECT_RETRY_DELAY).await;
            }
            res => break res?,
        }
    };
    pf.take_stream(port).ok_or(Error::MissingStream(port))
}

// === impl PortForward ===

impl PortForward {
    /// Prepares a forward to `remote_port` on a pod. A `local_port` of zero binds an
    /// ephemeral port.
    pub fn for_pod(
        client: kube::Client,
        namespace: impl Into<String>,
        pod: impl Into<String>,
        remote_port: u16,
        local_port: u16,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
            pod: pod.into(),
            remote_port,
            local_port,
            running: None,
        }
    }

    /// Prepares a forward to the first running pod of a deployment.
    pub async fn for_deployment(
        client: kube::Client,
        namespace: &str,
        deployment: &str,
        remote_port: u16,
        local_port: u16,
    ) -> Result<Self, Error> {
        let no_pod = || Error::NoRunningPod {
            namespace: namespace.to_string(),
            name: deployment.to_string(),
        };

        let deploy = Api::<Deployment>::namespaced(client.clone(), namespace)
            .get(deployment)
            .await?;
        let selector = deploy
            .spec
            .as_ref()
            .map(|s| Selector::from(&s.selector))
            .filter(|s| !s.selects_all())
            .ok_or_else(no_pod)?;

        let params = ListParams::default().labels(&selector.to_string());
        let pods = Api::<Pod>::namespaced(client.clone(), namespace)
            .list(&params)
            .await?;
        let pod = pods
            .items
            .into_iter()
            .find(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
            .and_then(|p| p.metadata.name)
            .ok_or_else(no_pod)?;
        debug!(%pod, %deployment, "Selected pod");

        Ok(Self::for_pod(
            client,
            namespace,
            pod,
            remote_port,
            local_port,
        ))
    }

    /// Binds the local listener and starts forwarding accepted connections.
    pub async fn init(&mut self) -> Result<SocketAddr, Error> {
        if let Some(running) = self.running.as_ref() {
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(("127.0.0.1", self.local_port)).await?;
        let local_addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(
            accept(
                listener,
                self.api.clone(),
                self.pod.clone(),
                self.remote_port,
                stopped,
            )
            .instrument(info_span!(
                "port_forward",
                ns = %self.namespace,
                pod = %self.pod,
                port = self.remote_port,
            )),
        );
        debug!(%local_addr, "Forwarding");

        self.running = Some(Running {
            local_addr,
            stop,
            task,
        });
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.running
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(Error::NotInitialized)
    }

    /// Returns an `http` URL for `path` on the local end of the forward.
    pub fn url_for(&self, path: &str) -> Result<String, Error> {
        let addr = self.local_addr()?;
        Ok(format!("http://{addr}{path}"))
    }

    pub fn stop(&mut self) {
        if let Some(Running { stop, .. }) = self.running.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

async fn accept(
    listener: TcpListener,
    api: Api<Pod>,
    pod: String,
    port: u16,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        let (conn, client_addr) = tokio::select! {
            _ = &mut stopped => {
                debug!("Stopped");
                return;
            }
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(error) => {
                    info!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        let api = api.clone();
        let pod = pod.clone();
        tokio::spawn(
            async move {
                match forward(conn, &api, &pod, port).await {
                    Ok(()) => debug!("Connection closed"),
                    Err(error) => info!(%error, "Forwarding failed"),
                }
            }
            .instrument(info_span!("conn", client.addr = %client_addr)),
        );
    }
}

async fn forward(mut conn: TcpStream, api: &Api<Pod>, pod: &str, port: u16) -> Result<(), Error> {
    let mut upstream = open_stream(api, pod, port).await?;
    let (sent, received) = tokio::io::copy_bidirectional(&mut conn, &mut upstream).await?;
    debug!(sent, received);
    Ok(())
}
