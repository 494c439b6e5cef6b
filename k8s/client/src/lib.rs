//! Kubernetes client surface of the gateway.
//!
//! Everything the session path needs from the cluster goes through here:
//! namespace and pod listings (behind the mockable [`ClusterClient`] trait),
//! ephemeral-container injection with its readiness watch, and the
//! exec/attach byte streams an SSH session is spliced onto.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attach;
mod client;
mod terminal;

pub use self::{
    attach::{attach_access_container, ACCESS_CONTAINER_PREFIX},
    client::{ApiClient, ClientError, ClusterClient, TerminalStreams},
    terminal::TerminalSession,
};

pub use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, EphemeralContainer, Pod, PodSpec, PodStatus,
};
pub use kube::api::TerminalSize;
pub use kube::core::ObjectMeta;
