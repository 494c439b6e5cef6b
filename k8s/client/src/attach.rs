use ingressh_core::AccessConfig;
use k8s_openapi::api::core::v1::{EphemeralContainer, Pod};
use kube::ResourceExt;

use crate::client::{ApiClient, ClientError};

/// Name prefix of the ephemeral containers this gateway injects; the suffix
/// is a decimal index, monotonic within a pod.
pub const ACCESS_CONTAINER_PREFIX: &str = "ssh-access-";

/// Ensures the pod has a running access container targeting
/// `target_container` and returns its name.
///
/// A running access container already targeting the same container is reused
/// as-is. Otherwise a new ephemeral container is appended under the next
/// free index and the call waits, via a single-object watch, for it to reach
/// the running state.
pub async fn attach_access_container(
    client: &ApiClient,
    pod: &Pod,
    target_container: &str,
    config: &AccessConfig,
) -> Result<(Pod, String), ClientError> {
    let scan = scan_access_containers(pod, target_container)?;
    if let Some(name) = scan.running {
        tracing::info!(pod = %pod.name_any(), container = %name, "reusing running access container");
        return Ok((pod.clone(), name));
    }

    let name = next_access_name(&scan);
    let container = access_container_spec(config, &name, target_container);

    let mut updated = pod.clone();
    updated
        .spec
        .get_or_insert_with(Default::default)
        .ephemeral_containers
        .get_or_insert_with(Vec::new)
        .push(container);

    let namespace = pod.namespace().unwrap_or_default();
    let pod_name = pod.name_any();
    let updated = client
        .update_ephemeral_containers(&namespace, &pod_name, &updated)
        .await?;

    tracing::info!(pod = %pod_name, container = %name, "watching the pod until the access container is ready");
    client
        .wait_pod_modified(&namespace, &updated, |pod| readiness(pod, &name))
        .await?;

    Ok((updated, name))
}

struct AccessScan {
    running: Option<String>,
    max_index: u64,
}

/// Walks the pod's ephemeral containers, pairing each spec entry with the
/// status at the same position.
///
/// The spec and status lists must agree in length; anything else means the
/// status of the containers cannot be reasoned about.
fn scan_access_containers(pod: &Pod, target_container: &str) -> Result<AccessScan, ClientError> {
    let spec = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.ephemeral_containers.as_deref())
        .unwrap_or_default();
    let statuses = pod
        .status
        .as_ref()
        .and_then(|status| status.ephemeral_container_statuses.as_deref())
        .unwrap_or_default();
    if spec.len() != statuses.len() {
        return Err(ClientError::Protocol(format!(
            "cannot detect ephemeral container status of pod {}: status and spec lists differ",
            pod.name_any(),
        )));
    }

    let mut scan = AccessScan {
        running: None,
        max_index: 0,
    };
    for (container, status) in spec.iter().zip(statuses) {
        let Some(suffix) = container.name.strip_prefix(ACCESS_CONTAINER_PREFIX) else {
            continue;
        };
        match suffix.parse::<u64>() {
            Ok(index) => scan.max_index = scan.max_index.max(index),
            Err(_) => {
                tracing::warn!(container = %container.name, "skipping access container name without a numeric index");
            }
        }

        if container.target_container_name.as_deref() != Some(target_container) {
            continue;
        }
        let running = status
            .state
            .as_ref()
            .map_or(false, |state| state.running.is_some());
        if running && scan.running.is_none() {
            scan.running = Some(container.name.clone());
        }
    }
    Ok(scan)
}

fn next_access_name(scan: &AccessScan) -> String {
    format!("{ACCESS_CONTAINER_PREFIX}{}", scan.max_index + 1)
}

/// The ephemeral container always starts with the command from the resource
/// spec, never the user's input; a one-shot command is exec'd into it later.
/// No security context is set, so the container runs with the context of the
/// pod it is attached to.
fn access_container_spec(
    config: &AccessConfig,
    name: &str,
    target_container: &str,
) -> EphemeralContainer {
    EphemeralContainer {
        name: name.to_string(),
        image: (!config.image.is_empty()).then(|| config.image.clone()),
        command: (!config.command.is_empty()).then(|| config.command.clone()),
        args: (!config.args.is_empty()).then(|| config.args.clone()),
        working_dir: (!config.working_dir.is_empty()).then(|| config.working_dir.clone()),
        stdin: Some(true),
        tty: Some(true),
        target_container_name: Some(target_container.to_string()),
        ..Default::default()
    }
}

/// One step of the readiness wait: `Some(())` once the named container is
/// running, `None` to keep waiting, an error when it terminated or is gone.
///
/// The status entry is located by position against the spec entry with the
/// matching name, which sidesteps any assumptions about the orchestrator's
/// ordering of the status list.
fn readiness(pod: &Pod, container_name: &str) -> Result<Option<()>, ClientError> {
    let spec = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.ephemeral_containers.as_deref())
        .unwrap_or_default();
    let statuses = pod
        .status
        .as_ref()
        .and_then(|status| status.ephemeral_container_statuses.as_deref())
        .unwrap_or_default();

    for (index, status) in statuses.iter().enumerate() {
        let Some(container) = spec.get(index) else {
            break;
        };
        if container.name != container_name {
            continue;
        }
        let Some(state) = status.state.as_ref() else {
            return Ok(None);
        };
        if state.running.is_some() {
            return Ok(Some(()));
        }
        if state.terminated.is_some() {
            return Err(ClientError::Protocol(format!(
                "pod {} has the attach container {container_name} terminated",
                pod.name_any(),
            )));
        }
        return Ok(None);
    }
    Err(ClientError::Protocol(format!(
        "pod {} does not have ephemeral container {container_name}",
        pod.name_any(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
        PodSpec, PodStatus,
    };
    use kube::core::ObjectMeta;

    fn ephemeral(name: &str, target: &str) -> EphemeralContainer {
        EphemeralContainer {
            name: name.to_string(),
            target_container_name: Some(target.to_string()),
            ..Default::default()
        }
    }

    fn status(name: &str, state: Option<ContainerState>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            state,
            ..Default::default()
        }
    }

    fn running() -> Option<ContainerState> {
        Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        })
    }

    fn terminated() -> Option<ContainerState> {
        Some(ContainerState {
            terminated: Some(ContainerStateTerminated::default()),
            ..Default::default()
        })
    }

    fn pod(containers: Vec<EphemeralContainer>, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("api-1".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                ephemeral_containers: Some(containers),
                ..Default::default()
            }),
            status: Some(PodStatus {
                ephemeral_container_statuses: Some(statuses),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn index_allocation_is_monotonic() {
        let pod = pod(
            vec![
                ephemeral("ssh-access-1", "shell"),
                ephemeral("ssh-access-3", "shell"),
            ],
            vec![status("ssh-access-1", None), status("ssh-access-3", None)],
        );
        let scan = scan_access_containers(&pod, "shell").expect("scan");
        assert_eq!(scan.max_index, 3);
        assert_eq!(next_access_name(&scan), "ssh-access-4");
    }

    #[test]
    fn running_container_for_the_same_target_is_reused() {
        let pod = pod(
            vec![ephemeral("ssh-access-2", "shell")],
            vec![status("ssh-access-2", running())],
        );
        let scan = scan_access_containers(&pod, "shell").expect("scan");
        assert_eq!(scan.running.as_deref(), Some("ssh-access-2"));
    }

    #[test]
    fn running_container_for_another_target_is_not_reused() {
        let pod = pod(
            vec![ephemeral("ssh-access-2", "sidecar")],
            vec![status("ssh-access-2", running())],
        );
        let scan = scan_access_containers(&pod, "shell").expect("scan");
        assert!(scan.running.is_none());
        // Its index is still accounted for when naming the next one.
        assert_eq!(next_access_name(&scan), "ssh-access-3");
    }

    #[test]
    fn terminated_container_is_not_reused() {
        let pod = pod(
            vec![ephemeral("ssh-access-1", "shell")],
            vec![status("ssh-access-1", terminated())],
        );
        let scan = scan_access_containers(&pod, "shell").expect("scan");
        assert!(scan.running.is_none());
        assert_eq!(next_access_name(&scan), "ssh-access-2");
    }

    #[test]
    fn spec_status_length_mismatch_fails_fast() {
        let pod = pod(vec![ephemeral("ssh-access-1", "shell")], vec![]);
        assert!(matches!(
            scan_access_containers(&pod, "shell"),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn non_numeric_suffix_is_skipped() {
        let pod = pod(
            vec![ephemeral("ssh-access-nightly", "shell")],
            vec![status("ssh-access-nightly", None)],
        );
        let scan = scan_access_containers(&pod, "shell").expect("scan");
        assert_eq!(next_access_name(&scan), "ssh-access-1");
    }

    #[test]
    fn spec_carries_session_parameters_but_no_empty_fields() {
        let config = AccessConfig {
            image: "busybox".to_string(),
            command: vec!["/bin/sh".to_string()],
            ..Default::default()
        };
        let container = access_container_spec(&config, "ssh-access-1", "shell");
        assert_eq!(container.image.as_deref(), Some("busybox"));
        assert_eq!(container.command.as_deref(), Some(&["/bin/sh".to_string()][..]));
        assert!(container.args.is_none());
        assert!(container.working_dir.is_none());
        assert_eq!(container.stdin, Some(true));
        assert_eq!(container.tty, Some(true));
        assert_eq!(container.target_container_name.as_deref(), Some("shell"));
        assert!(container.security_context.is_none());
    }

    #[test]
    fn readiness_tracks_the_named_container_by_position() {
        let waiting = pod(
            vec![ephemeral("ssh-access-1", "shell")],
            vec![status("ssh-access-1", None)],
        );
        assert!(readiness(&waiting, "ssh-access-1").expect("pending").is_none());

        let ready = pod(
            vec![ephemeral("ssh-access-1", "shell")],
            vec![status("ssh-access-1", running())],
        );
        assert!(readiness(&ready, "ssh-access-1").expect("running").is_some());

        let dead = pod(
            vec![ephemeral("ssh-access-1", "shell")],
            vec![status("ssh-access-1", terminated())],
        );
        assert!(matches!(
            readiness(&dead, "ssh-access-1"),
            Err(ClientError::Protocol(_))
        ));

        let gone = pod(vec![], vec![]);
        assert!(matches!(
            readiness(&gone, "ssh-access-1"),
            Err(ClientError::Protocol(_))
        ));
    }
}
