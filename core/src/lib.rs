//! Core domain types for the SSH ingress gateway.
//!
//! These types carry no Kubernetes or transport dependencies: an
//! [`AccessConfig`] describes one declarative SSH route (which pods a set of
//! public keys may reach, and how a session attaches to them), and an
//! [`SshTarget`] is the `(namespace, pod, container)` triple a session
//! resolves to, possibly pre-filled from the hint a user encodes in the SSH
//! login name.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
mod target;

pub use self::{
    config::{AccessConfig, SessionMode},
    target::SshTarget,
};
