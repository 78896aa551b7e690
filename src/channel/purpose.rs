//! What a broker session is opened for.

use std::collections::BTreeMap;

use crate::provider::StartSessionRequest;

/// Port the in-band SSH proxy connects to on the target.
pub const SSH_PORT: u16 = 22;

/// Port the remote desktop service listens on.
pub const RDP_PORT: u16 = 3389;

const SSH_DOCUMENT: &str = "AWS-StartSSHSession";
const PORT_FORWARD_DOCUMENT: &str = "AWS-StartPortForwardingSession";
const REMOTE_HOST_DOCUMENT: &str = "AWS-StartPortForwardingSessionToRemoteHost";

/// Purpose of a session, which selects the broker document and its
/// parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionPurpose {
    /// Interactive shell on the target.
    InteractiveShell,
    /// Stream used as an SSH `ProxyCommand`.
    SshProxy {
        /// Port of the SSH daemon on the target.
        port: u16,
    },
    /// Forward a local port to a port on the target itself.
    PortForwardToSelf {
        /// Port on the target.
        remote_port: u16,
        /// Port bound on the operator's machine.
        local_port: u16,
    },
    /// Forward a local port to a host reachable from the target.
    PortForwardToRemoteHost {
        /// Host the target connects to.
        host: String,
        /// Port on that host.
        remote_port: u16,
        /// Port bound on the operator's machine.
        local_port: u16,
    },
}

impl SessionPurpose {
    /// SSH through the broker on the standard port.
    #[must_use]
    pub const fn ssh() -> Self {
        Self::SshProxy { port: SSH_PORT }
    }

    /// Broker document name; `None` opens the default shell document.
    #[must_use]
    pub const fn document(&self) -> Option<&'static str> {
        match self {
            Self::InteractiveShell => None,
            Self::SshProxy { .. } => Some(SSH_DOCUMENT),
            Self::PortForwardToSelf { .. } => Some(PORT_FORWARD_DOCUMENT),
            Self::PortForwardToRemoteHost { .. } => Some(REMOTE_HOST_DOCUMENT),
        }
    }

    /// Document parameters, each a single-element list as the broker expects.
    #[must_use]
    pub fn parameters(&self) -> BTreeMap<String, Vec<String>> {
        let pairs: Vec<(&str, String)> = match self {
            Self::InteractiveShell => Vec::new(),
            Self::SshProxy { port } => vec![("portNumber", port.to_string())],
            Self::PortForwardToSelf {
                remote_port,
                local_port,
            } => vec![
                ("portNumber", remote_port.to_string()),
                ("localPortNumber", local_port.to_string()),
            ],
            Self::PortForwardToRemoteHost {
                host,
                remote_port,
                local_port,
            } => vec![
                ("host", host.clone()),
                ("portNumber", remote_port.to_string()),
                ("localPortNumber", local_port.to_string()),
            ],
        };
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_owned(), vec![value]))
            .collect()
    }

    /// Local port the session binds, if it forwards one.
    #[must_use]
    pub const fn local_port(&self) -> Option<u16> {
        match self {
            Self::PortForwardToSelf { local_port, .. }
            | Self::PortForwardToRemoteHost { local_port, .. } => Some(*local_port),
            Self::InteractiveShell | Self::SshProxy { .. } => None,
        }
    }

    /// Broker request for `target`.
    #[must_use]
    pub fn request(&self, target: &str) -> StartSessionRequest {
        StartSessionRequest {
            target: target.to_owned(),
            document: self.document().map(str::to_owned),
            parameters: self.parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn shell_uses_default_document() {
        let request = SessionPurpose::InteractiveShell.request("i-1");
        assert_eq!(request.document, None);
        assert!(request.parameters.is_empty());
    }

    #[rstest]
    #[case(SessionPurpose::ssh(), "AWS-StartSSHSession", &[("portNumber", "22")])]
    #[case(
        SessionPurpose::PortForwardToSelf { remote_port: 3389, local_port: 55_000 },
        "AWS-StartPortForwardingSession",
        &[("localPortNumber", "55000"), ("portNumber", "3389")]
    )]
    #[case(
        SessionPurpose::PortForwardToRemoteHost {
            host: String::from("db.internal"),
            remote_port: 5432,
            local_port: 15_432,
        },
        "AWS-StartPortForwardingSessionToRemoteHost",
        &[("host", "db.internal"), ("localPortNumber", "15432"), ("portNumber", "5432")]
    )]
    fn purposes_map_to_documents(
        #[case] purpose: SessionPurpose,
        #[case] document: &str,
        #[case] expected: &[(&str, &str)],
    ) {
        let request = purpose.request("i-1");
        assert_eq!(request.target, "i-1");
        assert_eq!(request.document.as_deref(), Some(document));
        let flattened: Vec<(&str, &str)> = request
            .parameters
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value.as_str())))
            .collect();
        assert_eq!(flattened, expected);
    }
}
