use crate::table::Table;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use linkerd_k8s_api::{pod_status, ResourceExt};
use linkerd_k8s_client::{metrics, rbac, version};
use linkerd_policy_resolve::{resolve_authorizations, resolve_pods, WorkloadRef};
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "linkerd-authz",
    about = "Lists the authorization policies that apply to a workload"
)]
pub struct Args {
    #[clap(long, default_value = "linkerd=info,warn", env = "LINKERD_AUTHZ_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// The namespace of the target resource.
    #[clap(short, long, default_value = "default", global = true)]
    namespace: String,

    /// Fails unless the API server meets the minimum supported Kubernetes version.
    #[clap(long, global = true)]
    check_version: bool,

    /// Fails unless the current user may read every resource used for resolution.
    #[clap(long, global = true)]
    check_rbac: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists the authorizations for the servers on a resource's pods.
    Authz {
        /// A resource as `kind/name`, or `kind` for every resource of that kind.
        resource: String,
    },

    /// Lists a resource's pods and their status.
    Pods { resource: String },

    /// Fetches proxy metrics from a resource's meshed pods.
    Metrics {
        resource: String,

        /// The maximum number of pods scraped concurrently.
        #[clap(long, default_value = "10")]
        concurrency: usize,

        /// The time allowed to scrape all pods.
        #[clap(long, default_value = "30000")]
        deadline_ms: u64,
    },

    /// Runs the version and RBAC checks.
    Check,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            namespace,
            check_version,
            check_rbac,
            command,
        } = self;

        log_format.try_init(log_level)?;
        let client = client
            .try_client()
            .await
            .context("failed to configure the Kubernetes client")?;

        let check = matches!(command, Command::Check);
        if check || check_version {
            let actual = version::check_kubernetes_version(&client).await?;
            info!(version = ?actual, "Kubernetes version is supported");
        }
        if check || check_rbac {
            rbac::policy_resources_access(&client, Some(&namespace)).await?;
            info!(%namespace, "Resource access is authorized");
        }

        match command {
            Command::Check => Ok(()),

            Command::Authz { resource } => {
                let target = WorkloadRef::parse(&namespace, &resource)?;
                let resolution = resolve_authorizations(&client, &target).await?;
                for warning in &resolution.warnings {
                    eprintln!("warning: {warning}");
                }

                let mut table = Table::new([
                    "ROUTE",
                    "SERVER",
                    "SERVER_AUTHORIZATION",
                    "AUTHORIZATION_POLICY",
                ]);
                for authz in resolution.authorizations {
                    table.push([
                        authz.route.unwrap_or_else(|| "*".to_string()),
                        authz.server,
                        authz.server_authorization.unwrap_or_default(),
                        authz.authorization_policy.unwrap_or_default(),
                    ]);
                }
                print!("{table}");
                Ok(())
            }

            Command::Pods { resource } => {
                let target = WorkloadRef::parse(&namespace, &resource)?;
                let pods = resolve_pods(&client, &target).await?;
                let mut table = Table::new(["NAME", "STATUS"]);
                for pod in &pods {
                    table.push([pod.name_any(), pod_status(pod)]);
                }
                print!("{table}");
                Ok(())
            }

            Command::Metrics {
                resource,
                concurrency,
                deadline_ms,
            } => {
                if concurrency == 0 {
                    bail!("--concurrency must be greater than zero");
                }
                let target = WorkloadRef::parse(&namespace, &resource)?;
                let pods = resolve_pods(&client, &target).await?;
                debug!(pods = pods.len(), "Scraping");
                let config = metrics::Config {
                    concurrency,
                    deadline: Duration::from_millis(deadline_ms),
                };
                let mut failed = 0;
                for pod in metrics::gather_proxy_metrics(client, pods, config).await {
                    match pod.result {
                        Ok(body) => {
                            println!("# POD {}/{}", pod.namespace, pod.pod);
                            println!("{}", String::from_utf8_lossy(&body));
                        }
                        Err(error) => {
                            warn!(pod = %pod.pod, %error, "Failed to fetch metrics");
                            failed += 1;
                        }
                    }
                }
                if failed > 0 {
                    bail!("failed to fetch metrics from {failed} pods");
                }
                Ok(())
            }
        }
    }
}
