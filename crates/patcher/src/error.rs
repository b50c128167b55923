//! Error types shared across the event pipeline.

use thiserror::Error;

/// The webhook payload could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON or does not match the expected shape
    #[error("failed unmarshalling event: {0}")]
    Json(#[from] serde_json::Error),
}

/// The event does not carry what is needed to build job refs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Full name did not split into exactly `org/repo`
    #[error("repository name {0:?} is not in org/repo format")]
    RepositoryName(String),

    /// Event has no default branch rename (or an empty `from`)
    #[error("event for {0} carries no default branch rename")]
    MissingRename(String),

    /// Event has no current default branch
    #[error("event for {0} carries no default branch")]
    MissingDefaultBranch(String),
}

/// Failure returned by the job creation API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A job with this exact name already exists
    #[error("prowjob {0} already exists")]
    AlreadyExists(String),

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 || ae.reason == "AlreadyExists" => {
                Self::AlreadyExists(ae.message)
            }
            other => Self::Other(other.to_string()),
        }
    }
}
