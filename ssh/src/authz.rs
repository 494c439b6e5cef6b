//! The authorization engine: from the configs activated by an authenticated
//! key, plus an optional user hint, to the namespaces, pods and containers
//! the session may reach.
//!
//! Hints make one distinction observable at the client: a hinted object that
//! exists but is not covered by any config is an authorization failure, while
//! a hinted object that does not exist at all yields an empty result. For
//! pods this requires a second, selector-free query once the filtered one
//! comes back empty.

use std::collections::HashSet;

use ingressh_core::AccessConfig;
use ingressh_k8s_client::{ClientError, ClusterClient, Pod};

/// A target pod paired with the access configuration that authorized it; the
/// config carries the container allow-list and session parameters forward.
#[derive(Clone, Debug)]
pub struct PodAccess {
    pub pod: Pod,
    pub config: AccessConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// The user is not authorized to access the requested object.
    #[error("authorization failed")]
    Denied,

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub struct Authorizer<'a, C> {
    configs: &'a [AccessConfig],
    client: &'a C,
}

impl<'a, C: ClusterClient + Sync> Authorizer<'a, C> {
    pub fn new(configs: &'a [AccessConfig], client: &'a C) -> Self {
        Self { configs, client }
    }

    async fn cluster_namespaces(&self) -> Result<HashSet<String>, AuthzError> {
        Ok(self.client.namespaces().await?.into_iter().collect())
    }

    /// The namespaces the user is authorized to access.
    ///
    /// With a hint, the result is either exactly the hinted namespace,
    /// [`AuthzError::Denied`] when it exists but is not authorized, or empty
    /// when it does not exist.
    pub async fn namespaces(&self, hint: &str) -> Result<Vec<String>, AuthzError> {
        let cluster = self.cluster_namespaces().await?;

        let mut authorized: Vec<String> = Vec::new();
        for config in self.configs {
            // Skip configuration entries not backed by a cluster namespace.
            if !cluster.contains(&config.namespace) {
                continue;
            }
            if hint.is_empty() {
                if !authorized.contains(&config.namespace) {
                    authorized.push(config.namespace.clone());
                }
            } else if hint == config.namespace {
                // Only a single namespace is of interest, search no more.
                authorized.push(config.namespace.clone());
                break;
            }
        }
        if !authorized.is_empty() {
            return Ok(authorized);
        }

        if !hint.is_empty() && cluster.contains(hint) {
            return Err(AuthzError::Denied);
        }
        Ok(Vec::new())
    }

    /// The pods in `namespace` the user is authorized to access, deduplicated
    /// by pod name with the first authorizing config winning.
    pub async fn pods(&self, namespace: &str, hint: &str) -> Result<Vec<PodAccess>, AuthzError> {
        let cluster = self.cluster_namespaces().await?;
        let relevant: Vec<&AccessConfig> = self
            .configs
            .iter()
            .filter(|config| config.namespace == namespace && cluster.contains(&config.namespace))
            .collect();

        let result = self.list_pods(&relevant, hint, true).await?;
        if !result.is_empty() {
            return Ok(result);
        }

        if !hint.is_empty() {
            // The filtered result is empty although a pod was named: either
            // the pod does not exist, or the selectors exclude it. Querying
            // again without selectors tells the two apart.
            let unfiltered = self.list_pods(&relevant, hint, false).await?;
            if !unfiltered.is_empty() {
                return Err(AuthzError::Denied);
            }
        }
        Ok(Vec::new())
    }

    async fn list_pods(
        &self,
        configs: &[&'a AccessConfig],
        hint: &str,
        use_selectors: bool,
    ) -> Result<Vec<PodAccess>, AuthzError> {
        let mut result: Vec<PodAccess> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut append = |pods: Vec<Pod>, config: &AccessConfig, result: &mut Vec<PodAccess>| {
            for pod in pods {
                let name = pod.metadata.name.clone().unwrap_or_default();
                if seen.insert(name) {
                    result.push(PodAccess {
                        pod,
                        config: config.clone(),
                    });
                }
            }
        };

        for &config in configs {
            if config.selectors.is_empty() || !use_selectors {
                // An unselected listing already covers the whole namespace,
                // the remaining configs cannot add anything.
                let pods = self.client.pods("", &config.namespace, hint).await?;
                append(pods, config, &mut result);
                break;
            }
            for selector in &config.selectors {
                let pods = self.client.pods(selector, &config.namespace, hint).await?;
                append(pods, config, &mut result);
            }
        }
        Ok(result)
    }

    /// The containers of `pod` the user may attach to, in pod-spec order,
    /// restricted by the config's allow-list when it is non-empty.
    pub fn containers(
        &self,
        pod: &Pod,
        allowed: &[String],
        hint: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let spec_containers: Vec<&str> = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default();

        let mut result: Vec<String> = Vec::new();
        for name in &spec_containers {
            if !allowed.is_empty() && !allowed.iter().any(|allow| allow == name) {
                continue;
            }
            if hint.is_empty() {
                result.push(name.to_string());
            } else if *name == hint {
                return Ok(vec![name.to_string()]);
            }
        }
        if !result.is_empty() {
            return Ok(result);
        }

        if !hint.is_empty() && spec_containers.contains(&hint) {
            // The hinted container exists in the pod but is outside the
            // allow-list.
            return Err(AuthzError::Denied);
        }
        Ok(Vec::new())
    }
}
