/// The Kubernetes object an SSH session routes to.
///
/// Any component may be empty while the target is still being resolved; a
/// session can only be attached once the target [is complete](Self::is_complete).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SshTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl SshTarget {
    /// Extracts target hints from the login component of the SSH connection
    /// string.
    ///
    /// The recognized format is `namespace?:pod?:container?` — exactly two
    /// colons, each field optional (`::my-container`, `my-ns::`). A username
    /// that does not match leaves every field empty: it is a plain login
    /// name, not a hint.
    pub fn from_username(username: &str) -> Self {
        let mut parts = username.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(pod), Some(container), None) => Self {
                namespace: ns.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
            },
            _ => Self::default(),
        }
    }

    /// Renders the target back into its login-string form, the inverse of
    /// [`from_username`](Self::from_username) for matching inputs.
    pub fn to_username(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.pod, self.container)
    }

    /// True if all components of the target are known.
    pub fn is_complete(&self) -> bool {
        !self.namespace.is_empty() && !self.pod.is_empty() && !self.container.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_hint() {
        let target = SshTarget::from_username("prod:api-1:shell");
        assert_eq!(
            target,
            SshTarget {
                namespace: "prod".to_string(),
                pod: "api-1".to_string(),
                container: "shell".to_string(),
            }
        );
        assert!(target.is_complete());
    }

    #[test]
    fn parses_partial_hints() {
        let target = SshTarget::from_username("::my-ctr");
        assert_eq!(target.namespace, "");
        assert_eq!(target.pod, "");
        assert_eq!(target.container, "my-ctr");
        assert!(!target.is_complete());

        let target = SshTarget::from_username("myns::");
        assert_eq!(target.namespace, "myns");
        assert_eq!(target.pod, "");
        assert_eq!(target.container, "");
    }

    #[test]
    fn username_without_colons_is_not_a_hint() {
        assert_eq!(SshTarget::from_username("alice"), SshTarget::default());
    }

    #[test]
    fn wrong_colon_count_is_not_a_hint() {
        assert_eq!(SshTarget::from_username("a:b"), SshTarget::default());
        assert_eq!(SshTarget::from_username("a:b:c:d"), SshTarget::default());
    }

    #[test]
    fn empty_fields_still_match() {
        let target = SshTarget::from_username("::");
        assert_eq!(target, SshTarget::default());
        // The empty triple matched the grammar even though nothing was named.
        assert_eq!(SshTarget::from_username("::").to_username(), "::");
    }

    #[test]
    fn complete_targets_round_trip() {
        for raw in ["prod:api-1:shell", "a:b:c"] {
            let parsed = SshTarget::from_username(raw);
            assert!(parsed.is_complete());
            assert_eq!(SshTarget::from_username(&parsed.to_username()), parsed);
        }
    }
}
