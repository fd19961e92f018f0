use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Expected exactly one APIExport, found {found}")]
    AmbiguousOrMissing { found: usize },

    #[error("APIExport watch failed: {0}")]
    WatchFailed(#[source] kube::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("API group {group} is not served; camel-kcp must run against a kcp server")]
    GroupNotServed { group: String },

    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Invalid logical cluster name: {0:?}")]
    InvalidCluster(String),

    #[error("{kind} {namespace}/{name} does not exist")]
    MissingTarget {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the API server answered 404 for the request
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Whether a create raced with another writer
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists")
    }
}

/// Builds the error the API server returns for a missing resource
#[cfg(test)]
pub(crate) fn not_found(message: impl Into<String>) -> kube::Error {
    api_error(404, "NotFound", message)
}

/// Builds the error the API server returns when a created object exists
#[cfg(test)]
pub(crate) fn already_exists(message: impl Into<String>) -> kube::Error {
    api_error(409, "AlreadyExists", message)
}

#[cfg(test)]
fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
