use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{counter::Counter, family::Family};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug)]
pub struct SshMetrics {
    auth: Family<AuthLabels, Counter>,
    sessions: Family<SessionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct AuthLabels {
    result: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct SessionLabels {
    mode: &'static str,
    exit_code: u32,
}

impl SshMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let auth = Family::<AuthLabels, Counter>::default();
        reg.register(
            "auth",
            "Public-key authentication attempts against the routing table",
            auth.clone(),
        );

        let sessions = Family::<SessionLabels, Counter>::default();
        reg.register(
            "sessions",
            "SSH sessions by attach mode and exit code",
            sessions.clone(),
        );

        Self { auth, sessions }
    }

    pub(crate) fn auth_succeeded(&self) {
        self.auth.get_or_create(&AuthLabels { result: "success" }).inc();
    }

    pub(crate) fn auth_failed(&self) {
        self.auth.get_or_create(&AuthLabels { result: "failure" }).inc();
    }

    pub(crate) fn session_finished(&self, mode: &'static str, exit_code: u32) {
        self.sessions
            .get_or_create(&SessionLabels { mode, exit_code })
            .inc();
    }
}
