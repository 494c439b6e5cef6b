use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How an SSH session attaches to the selected container.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub enum SessionMode {
    /// Inject an ephemeral container sharing the target container's
    /// namespaces, then attach (or exec) into it.
    #[default]
    Debug,
    /// Exec directly in the existing target container.
    Exec,
}

/// One SSH route: the authorization rules and session parameters contributed
/// by a single declarative resource.
///
/// `(name, namespace)` identifies the route; the namespace is also the only
/// namespace the route grants access to. Empty `selectors` authorize every
/// pod in the namespace, and an empty `containers` list authorizes every
/// container of an authorized pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessConfig {
    pub name: String,
    pub namespace: String,

    pub session: SessionMode,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub working_dir: String,
    pub selectors: Vec<String>,
    pub containers: Vec<String>,
    pub authorized_keys: Vec<String>,
}

impl AccessConfig {
    /// Fills fields the resource left empty from the server-wide defaults.
    pub fn apply_defaults(&mut self, debug_image: &str) {
        if self.image.is_empty() {
            self.image = debug_image.to_string();
        }
    }
}
