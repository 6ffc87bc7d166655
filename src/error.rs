// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failure talking to the cluster API, classified by how the engine reacts to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Throttling or server-side failure (429/5xx)
    #[error("transient API failure ({code}): {message}")]
    Transient { code: u16, message: String },

    /// Transport failure; the cluster could not be reached at all
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl ClusterError {
    /// Connectivity failures abort the whole apply instead of being recorded per object.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClusterError::NotFound(resp.message),
                409 => ClusterError::Conflict(resp.message),
                429 | 500..=599 => ClusterError::Transient {
                    code: resp.code,
                    message: resp.message,
                },
                code => ClusterError::Rejected {
                    code,
                    message: resp.message,
                },
            },
            kube::Error::SerdeError(e) => ClusterError::Invalid(e.to_string()),
            other => ClusterError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("channel '{channel}' has no entry for component '{component}'")]
    ComponentNotInChannel { channel: String, component: String },

    #[error("package {component}@{version} not found")]
    PackageNotFound { component: String, version: String },

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("failed to read manifest source: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch #{index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("patch #{index} matches no object ({target})")]
    NoTarget { index: usize, target: String },

    #[error("patch #{index} failed on {object}: {reason}")]
    Apply {
        index: usize,
        object: String,
        reason: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{transform}: {source}")]
    Patch {
        transform: String,
        #[source]
        source: PatchError,
    },

    #[error("{transform}: {reason}")]
    Failed { transform: String, reason: String },

    #[error("object {0} appears more than once")]
    Duplicate(String),
}

/// Outcome of a failed reconcile pass.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// Network failure, throttling or a 5xx
    #[error("transient cluster error: {0}")]
    TransientCluster(ClusterError),

    /// Any other failed cluster request, e.g. a forbidden status write
    #[error("cluster request failed: {0}")]
    Cluster(ClusterError),

    #[error("{failed} of {total} objects failed to apply")]
    ApplyPartialFailure { failed: usize, total: usize },

    #[error("failed to prune {0} stale objects")]
    Prune(usize),

    #[error("invalid source object: {0}")]
    InvalidSource(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ClusterError> for ReconcileError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Transient { .. } | ClusterError::Unavailable(_) => {
                ReconcileError::TransientCluster(err)
            }
            other => ReconcileError::Cluster(other),
        }
    }
}

impl ReconcileError {
    /// Fatal errors need a user correction and are only retried on the steady-state resync.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::Render(_)
                | ReconcileError::Transform(_)
                | ReconcileError::InvalidSource(_)
        )
    }

    /// Condition reason surfaced on the source object.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Render(_) => "RenderFailed",
            ReconcileError::Transform(TransformError::Patch { .. }) => "PatchFailed",
            ReconcileError::Transform(_) => "TransformFailed",
            ReconcileError::TransientCluster(_) => "ClusterUnavailable",
            ReconcileError::Cluster(_) => "ClusterRequestFailed",
            ReconcileError::ApplyPartialFailure { .. } => "ApplyFailed",
            ReconcileError::Prune(_) => "PruneFailed",
            ReconcileError::InvalidSource(_) => "InvalidSpec",
            ReconcileError::Serialization(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Whatever".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_classification() {
        assert!(matches!(ClusterError::from(api_error(404)), ClusterError::NotFound(_)));
        assert!(matches!(ClusterError::from(api_error(409)), ClusterError::Conflict(_)));
        assert!(matches!(
            ClusterError::from(api_error(429)),
            ClusterError::Transient { code: 429, .. }
        ));
        assert!(matches!(
            ClusterError::from(api_error(503)),
            ClusterError::Transient { code: 503, .. }
        ));
        assert!(matches!(
            ClusterError::from(api_error(422)),
            ClusterError::Rejected { code: 422, .. }
        ));
    }

    #[test]
    fn test_only_unavailable_is_connectivity() {
        assert!(ClusterError::Unavailable("dial tcp".into()).is_connectivity());
        assert!(!ClusterError::Transient {
            code: 500,
            message: String::new()
        }
        .is_connectivity());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ReconcileError::Render(RenderError::UnknownChannel("beta".into())).is_fatal());
        assert!(ReconcileError::Transform(TransformError::Patch {
            transform: "apply-patches".into(),
            source: PatchError::Malformed {
                index: 0,
                reason: "x".into()
            },
        })
        .is_fatal());
        assert!(!ReconcileError::TransientCluster(ClusterError::Unavailable("x".into())).is_fatal());
        assert!(!ReconcileError::ApplyPartialFailure { failed: 1, total: 3 }.is_fatal());
        assert!(!ReconcileError::Prune(1).is_fatal());
    }

    #[test]
    fn test_only_network_and_server_errors_are_transient() {
        let transient = [
            ClusterError::Unavailable("connection reset".into()),
            ClusterError::Transient {
                code: 429,
                message: "slow down".into(),
            },
        ];
        for err in transient {
            let err = ReconcileError::from(err);
            assert!(matches!(err, ReconcileError::TransientCluster(_)));
            assert_eq!(err.reason(), "ClusterUnavailable");
        }

        let rejected = [
            ClusterError::Rejected {
                code: 403,
                message: "forbidden".into(),
            },
            ClusterError::Invalid("bad object".into()),
            ClusterError::Conflict("modified".into()),
            ClusterError::NotFound("argocd".into()),
        ];
        for err in rejected {
            let err = ReconcileError::from(err);
            assert!(matches!(err, ReconcileError::Cluster(_)));
            assert_eq!(err.reason(), "ClusterRequestFailed");
            assert!(!err.is_fatal());
        }
    }
}
