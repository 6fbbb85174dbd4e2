#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster;
pub mod fake;
pub mod metrics;
pub mod port_forward;
pub mod rbac;
pub mod version;

pub use self::{
    cluster::{owned_by, pod_labels, Cluster, Result, Workload, WorkloadKind},
    fake::FakeCluster,
};
