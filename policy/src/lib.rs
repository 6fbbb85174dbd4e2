#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Resolves the authorization policies that apply to a workload's pods.

mod authz;
mod error;
mod pods;
mod server;

#[cfg(test)]
mod tests;

pub use self::{
    authz::{resolve_authorizations, Authorization, Resolution, Warning},
    error::Error,
    pods::{resolve_pods, TargetKind, WorkloadRef},
    server::server_includes_pod,
};
