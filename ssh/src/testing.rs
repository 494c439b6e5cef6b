//! Shared fixtures for the in-crate tests: a canned cluster implementing
//! [`ClusterClient`] and builders for pods and access configs.

use async_trait::async_trait;
use ingressh_core::AccessConfig;
use ingressh_k8s_client::{ClientError, ClusterClient, Container, ObjectMeta, Pod, PodSpec};
use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct MockCluster {
    pub(crate) namespaces: Vec<&'static str>,
    pub(crate) pods: Vec<Pod>,
    pub(crate) fail: bool,
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    if selector.is_empty() {
        return true;
    }
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    selector.split(',').all(|expr| match expr.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => false,
    })
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn namespaces(&self) -> Result<Vec<String>, ClientError> {
        if self.fail {
            return Err(ClientError::Protocol("client request error".to_string()));
        }
        Ok(self.namespaces.iter().map(|ns| ns.to_string()).collect())
    }

    async fn pods(
        &self,
        selector: &str,
        namespace: &str,
        name_hint: &str,
    ) -> Result<Vec<Pod>, ClientError> {
        Ok(self
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| name_hint.is_empty() || pod.metadata.name.as_deref() == Some(name_hint))
            .filter(|pod| matches_selector(pod, selector))
            .cloned()
            .collect())
    }
}

pub(crate) fn pod(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    containers: &[&str],
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn config(
    name: &str,
    namespace: &str,
    selectors: &[&str],
    containers: &[&str],
) -> AccessConfig {
    AccessConfig {
        name: name.to_string(),
        namespace: namespace.to_string(),
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        containers: containers.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}
