//! Bounded, deadline-limited collection of proxy metrics from many pods.

use crate::port_forward;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use kube::api::Api;
use linkerd_k8s_api::{Pod, ResourceExt};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::mpsc, task::JoinSet, time};
use tracing::{debug, instrument, warn, Instrument};

/// The port on which proxies serve their admin endpoints.
pub const PROXY_ADMIN_PORT: u16 = 4191;

pub const PROXY_CONTAINER_NAME: &str = "linkerd-proxy";

/// Fetches a metrics payload from a single pod.
#[async_trait::async_trait]
pub trait FetchMetrics: Send + Sync + 'static {
    async fn fetch(&self, pod: &Pod) -> anyhow::Result<Bytes>;
}

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// The maximum number of pods scraped at once.
    pub concurrency: usize,

    /// The time after which collection ends and unfinished pods are reported as timed out.
    pub deadline: time::Duration,
}

#[derive(Debug)]
pub struct PodMetrics {
    pub namespace: String,
    pub pod: String,
    pub result: Result<Bytes, MetricsError>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("timed out waiting for metrics")]
    TimedOut,

    #[error("failed to fetch metrics: {0:#}")]
    Fetch(anyhow::Error),
}

/// Scrapes each proxy's admin server through a port-forward.
#[derive(Clone)]
pub struct ProxyAdminFetcher {
    client: kube::Client,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 10,
            deadline: time::Duration::from_secs(30),
        }
    }
}

/// Fetches metrics for each pod, running at most `config.concurrency` fetches at a time.
///
/// Results are returned in the order of `pods`. Pods whose fetch has not completed by the
/// deadline are reported as [`MetricsError::TimedOut`] and their fetches are aborted.
pub async fn gather<F: FetchMetrics>(
    pods: Vec<Pod>,
    fetcher: Arc<F>,
    config: Config,
) -> Vec<PodMetrics> {
    let ids = pods
        .iter()
        .map(|p| (p.namespace().unwrap_or_default(), p.name_any()))
        .collect::<Vec<_>>();
    let total = pods.len();
    if total == 0 {
        return Vec::new();
    }

    let queue = Arc::new(Mutex::new(
        pods.into_iter().enumerate().collect::<VecDeque<_>>(),
    ));
    let (tx, mut rx) = mpsc::channel(total);
    let mut workers = JoinSet::new();
    for worker in 0..config.concurrency.clamp(1, total) {
        let queue = queue.clone();
        let tx = tx.clone();
        let fetcher = fetcher.clone();
        workers.spawn(
            async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some((idx, pod)) = next else {
                        return;
                    };
                    let result = fetcher.fetch(&pod).await.map_err(MetricsError::Fetch);
                    debug!(pod = %pod.name_any(), ok = result.is_ok(), "Fetched");
                    if tx.send((idx, result)).await.is_err() {
                        return;
                    }
                }
            }
            .instrument(tracing::debug_span!("worker", worker)),
        );
    }
    drop(tx);

    let mut results = (0..total).map(|_| None).collect::<Vec<_>>();
    let mut received = 0;
    let deadline = time::sleep(config.deadline);
    tokio::pin!(deadline);
    while received < total {
        tokio::select! {
            _ = &mut deadline => {
                warn!(pending = total - received, "Deadline elapsed before all metrics were fetched");
                break;
            }
            msg = rx.recv() => match msg {
                Some((idx, result)) => {
                    results[idx] = Some(result);
                    received += 1;
                }
                None => break,
            },
        }
    }
    workers.abort_all();

    results
        .into_iter()
        .zip(ids)
        .map(|(result, (namespace, pod))| PodMetrics {
            namespace,
            pod,
            result: result.unwrap_or(Err(MetricsError::TimedOut)),
        })
        .collect()
}

/// Returns true if the pod runs a Linkerd proxy.
pub fn has_proxy(pod: &Pod) -> bool {
    pod.spec.as_ref().is_some_and(|spec| {
        spec.containers
            .iter()
            .chain(spec.init_containers.iter().flatten())
            .any(|c| c.name == PROXY_CONTAINER_NAME)
    })
}

/// Scrapes proxy metrics from every meshed pod in `pods`.
#[instrument(skip_all, fields(pods = pods.len()))]
pub async fn gather_proxy_metrics(
    client: kube::Client,
    pods: Vec<Pod>,
    config: Config,
) -> Vec<PodMetrics> {
    let meshed = pods.into_iter().filter(has_proxy).collect::<Vec<_>>();
    debug!(meshed = meshed.len());
    gather(meshed, Arc::new(ProxyAdminFetcher::new(client)), config).await
}

// === impl ProxyAdminFetcher ===

impl ProxyAdminFetcher {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FetchMetrics for ProxyAdminFetcher {
    async fn fetch(&self, pod: &Pod) -> anyhow::Result<Bytes> {
        let ns = pod.namespace().unwrap_or_else(|| "default".to_string());
        let name = pod.name_any();
        let api = Api::<Pod>::namespaced(self.client.clone(), &ns);
        let io = port_forward::open_stream(&api, &name, PROXY_ADMIN_PORT).await?;

        let (mut tx, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        tokio::spawn(
            async move {
                if let Err(error) = conn.await {
                    debug!(%error, "Connection failed");
                }
            }
            .in_current_span(),
        );

        let req = http::Request::get("/metrics")
            .header(http::header::HOST, "localhost")
            .body(Empty::<Bytes>::new())?;
        let rsp = tx.send_request(req).await?;
        if !rsp.status().is_success() {
            anyhow::bail!("{ns}/{name} responded with {}", rsp.status());
        }
        let body = rsp.into_body().collect().await?.to_bytes();
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct Scripted {
        delays: HashMap<&'static str, time::Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Scripted {
        fn new(delays: HashMap<&'static str, time::Duration>) -> Arc<Self> {
            Arc::new(Self {
                delays,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl FetchMetrics for Scripted {
        async fn fetch(&self, pod: &Pod) -> anyhow::Result<Bytes> {
            let name = pod.name_any();
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(n, Ordering::SeqCst);
            let delay = self
                .delays
                .get(name.as_str())
                .copied()
                .unwrap_or_default();
            time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if name == "broken" {
                anyhow::bail!("connection refused");
            }
            Ok(Bytes::from(format!("metrics for {name}")))
        }
    }

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: linkerd_k8s_api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gathers_in_order_with_bounded_concurrency() {
        let fetcher = Scripted::new(hashmap! {
            "a" => time::Duration::from_secs(3),
            "b" => time::Duration::from_secs(1),
            "c" => time::Duration::from_secs(2),
            "d" => time::Duration::from_secs(1),
        });
        let pods = ["a", "b", "c", "d", "broken"].into_iter().map(pod).collect();
        let results = gather(
            pods,
            fetcher.clone(),
            Config {
                concurrency: 2,
                deadline: time::Duration::from_secs(60),
            },
        )
        .await;

        let names = results.iter().map(|r| r.pod.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["a", "b", "c", "d", "broken"]);
        assert_eq!(
            results[0].result.as_ref().unwrap(),
            &Bytes::from_static(b"metrics for a")
        );
        assert!(results[..4].iter().all(|r| r.result.is_ok()));
        assert!(matches!(results[4].result, Err(MetricsError::Fetch(_))));
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_unfinished_pods() {
        let fetcher = Scripted::new(hashmap! {
            "fast" => time::Duration::from_secs(1),
            "slow" => time::Duration::from_secs(120),
        });
        let pods = ["slow", "fast"].into_iter().map(pod).collect();
        let results = gather(
            pods,
            fetcher,
            Config {
                concurrency: 4,
                deadline: time::Duration::from_secs(10),
            },
        )
        .await;

        assert!(matches!(results[0].result, Err(MetricsError::TimedOut)));
        assert_eq!(results[0].pod, "slow");
        assert!(results[1].result.is_ok());
    }

    #[tokio::test]
    async fn no_pods() {
        let results = gather(Vec::new(), Scripted::new(HashMap::new()), Config::default()).await;
        assert!(results.is_empty());
    }

    #[test]
    fn detects_proxy_containers() {
        let mut meshed = pod("meshed");
        meshed.spec = Some(linkerd_k8s_api::PodSpec {
            containers: vec![
                linkerd_k8s_api::Container {
                    name: "app".to_string(),
                    ..Default::default()
                },
                linkerd_k8s_api::Container {
                    name: PROXY_CONTAINER_NAME.to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        assert!(has_proxy(&meshed));

        let mut sidecar = pod("sidecar");
        sidecar.spec = Some(linkerd_k8s_api::PodSpec {
            init_containers: Some(vec![linkerd_k8s_api::Container {
                name: PROXY_CONTAINER_NAME.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(has_proxy(&sidecar));

        assert!(!has_proxy(&pod("bare")));
    }
}
