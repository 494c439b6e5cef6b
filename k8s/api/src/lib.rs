//! The `IngreSsh` custom resource and the Kubernetes API types shared across
//! the workspace.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod ingressh;

pub use self::ingressh::{IngreSsh, IngreSshSpec, IngreSshStatus, InvalidResource, FINALIZER};

pub use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, EphemeralContainer, Namespace, ObjectReference, Pod, PodSpec,
    PodStatus,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
pub use kube::core::ObjectMeta;
