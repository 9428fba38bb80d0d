use std::fmt;

/// The two conditions treated as real errors rather than data: "no nodes
/// configured" from the checker, and "no upstreams" from the selector.
/// Every other failure is encoded in a [`crate::probe::NodeHealth`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("no nodes configured")]
    NoNodesConfigured,
    #[error("no upstreams available for request")]
    NoUpstreamsAvailable,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no nodes configured after environment auto-discovery")]
    NoNodes,
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    #[error("node {0} has an empty url")]
    EmptyUrl(String),
    #[error("node name must not be empty")]
    EmptyName,
}

/// Tags every failure path a probe can take. Never thrown;
/// attached to `NodeHealth.last_error` and used to label the `errors_total`
/// metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Status,
    Parse,
    Semantics,
    Configuration,
    Suppressed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Status => "status",
            ErrorKind::Parse => "parse",
            ErrorKind::Semantics => "semantics",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
