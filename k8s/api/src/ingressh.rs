use ingressh_core::{AccessConfig, SessionMode};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding route removal: the resource is only released once the
/// routing table has observed the delete.
pub const FINALIZER: &str = "ingressh.ingress.kuberstein.io/finalizer";

/// Configures SSH access to pods through the ingress server running in the
/// cluster. Users, authorized with their public keys, can establish SSH
/// connections with the pods matched by the configured selectors.
///
/// The resource is namespace-scoped; its namespace is the namespace it
/// grants access to.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ingress.kuberstein.io",
    version = "v1",
    kind = "IngreSsh",
    plural = "ingresshes",
    status = "IngreSshStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngreSshSpec {
    /// The mechanism used for SSH sessions of this resource: exec in an
    /// existing container (`Exec`) or an ephemeral container (`Debug`,
    /// the default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionMode>,

    /// Image for the ephemeral container. If not specified, the default from
    /// the server configuration is used. Only relevant for `Debug` sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// The command to run as the login shell of the SSH session.
    ///
    /// In `Debug` mode this sets the entrypoint of the ephemeral container's
    /// image; the image's own entrypoint is used when unset. In `Exec` mode
    /// it functions as the login shell and must be present unless the user
    /// supplies a command on the SSH command line, which always takes
    /// precedence in that mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Arguments to the entrypoint. The image's CMD is used if not provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// The container working directory to drop the SSH session into. The
    /// container runtime's default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Label selectors defining the pods this resource authorizes SSH
    /// sessions to. All pods in the namespace are authorized when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<String>>,

    /// Names of the containers a session may attach to. All containers of an
    /// authorized pod are eligible when empty. The user may pick one with the
    /// login-name hint, e.g. `ssh ::my-container@cluster`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<String>>,

    /// Public keys authorized to use this route, one per element, in the
    /// `.ssh/authorized_keys` line format.
    #[schemars(length(min = 1))]
    pub authorized_keys: Vec<String>,
}

/// Observed state of an `IngreSsh` resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngreSshStatus {
    /// Sessions currently running against this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<ObjectReference>>,

    /// When an SSH session was last opened through this route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastlog_time: Option<Time>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidResource {
    #[error("resource has no name")]
    MissingName,

    #[error("resource has no namespace")]
    MissingNamespace,

    #[error("authorizedKeys must not be empty")]
    NoAuthorizedKeys,
}

impl IngreSsh {
    /// Projects the resource into the routing-table representation.
    ///
    /// Authorized-key lines are trimmed here so the table always stores the
    /// normalized form it is queried with.
    pub fn access_config(&self) -> Result<AccessConfig, InvalidResource> {
        let name = self
            .metadata
            .name
            .clone()
            .ok_or(InvalidResource::MissingName)?;
        let namespace = self
            .metadata
            .namespace
            .clone()
            .ok_or(InvalidResource::MissingNamespace)?;

        let authorized_keys: Vec<String> = self
            .spec
            .authorized_keys
            .iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        if authorized_keys.is_empty() {
            return Err(InvalidResource::NoAuthorizedKeys);
        }

        Ok(AccessConfig {
            name,
            namespace,
            session: self.spec.session.unwrap_or_default(),
            image: self.spec.image.clone().unwrap_or_default(),
            command: self.spec.command.clone().unwrap_or_default(),
            args: self.spec.args.clone().unwrap_or_default(),
            working_dir: self.spec.working_dir.clone().unwrap_or_default(),
            selectors: self.spec.selectors.clone().unwrap_or_default(),
            containers: self.spec.containers.clone().unwrap_or_default(),
            authorized_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn resource(spec: IngreSshSpec) -> IngreSsh {
        IngreSsh {
            metadata: ObjectMeta {
                name: Some("dev-access".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn converts_with_defaults() {
        let config = resource(IngreSshSpec {
            session: None,
            image: None,
            command: None,
            args: None,
            working_dir: None,
            selectors: None,
            containers: None,
            authorized_keys: vec!["ssh-ed25519 AAAA key-comment\n".to_string()],
        })
        .access_config()
        .expect("conversion");

        assert_eq!(config.name, "dev-access");
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.session, SessionMode::Debug);
        assert!(config.selectors.is_empty());
        assert_eq!(
            config.authorized_keys,
            vec!["ssh-ed25519 AAAA key-comment".to_string()]
        );
    }

    #[test]
    fn rejects_empty_authorized_keys() {
        let err = resource(IngreSshSpec {
            session: Some(SessionMode::Exec),
            image: None,
            command: None,
            args: None,
            working_dir: None,
            selectors: None,
            containers: None,
            authorized_keys: vec!["   ".to_string()],
        })
        .access_config()
        .unwrap_err();
        assert!(matches!(err, InvalidResource::NoAuthorizedKeys));
    }

    #[test]
    fn session_field_deserializes_from_manifest_case() {
        let spec: IngreSshSpec = serde_json::from_value(serde_json::json!({
            "session": "Exec",
            "workingDir": "/tmp",
            "authorizedKeys": ["ssh-rsa AAAA"],
        }))
        .expect("deserialize");
        assert_eq!(spec.session, Some(SessionMode::Exec));
        assert_eq!(spec.working_dir.as_deref(), Some("/tmp"));
    }
}
