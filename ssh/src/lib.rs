//! The SSH-facing half of the gateway: the russh server, public-key
//! authentication against the routing table, the authorization engine, and
//! the per-session orchestration that ends in an exec or attach stream into
//! a container.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authz;
mod config;
mod handler;
mod keys;
mod metrics;
mod select;
mod server;
#[cfg(test)]
mod testing;
mod wizard;

pub use self::{
    authz::{Authorizer, AuthzError, PodAccess},
    config::ServerConfig,
    handler::SessionHandler,
    metrics::SshMetrics,
    server::SshServer,
};
