#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod pod_status;
pub mod policy;
pub mod resource;

pub use self::{labels::Labels, pod_status::pod_status};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{
            Container, ContainerPort, Namespace, Pod, PodSpec, PodStatus, ReplicationController,
        },
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
};
pub use kube::{Resource, ResourceExt};
