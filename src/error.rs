use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
///
/// None of these errors are fatal to a running server: fetch and construction failures are logged
/// by the refresh cycle, evaluation failures are swallowed by the client's
/// [`ErrorHandler`](crate::ErrorHandler).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The datafile could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An evaluation client could not be built from a fetched datafile.
    #[error(transparent)]
    ClientConstruction(#[from] ClientConstructionError),

    /// An error raised while evaluating an experiment or a feature.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Invalid URL in configuration.
    #[error("invalid url {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The refresh interval is zero, which would fetch the datafile in a tight loop.
    #[error("refresh interval must be greater than zero")]
    InvalidRefreshInterval,

    /// The HTTP listener could not be bound.
    #[error("failed to bind to {addr}")]
    Bind {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Failure to fetch a datafile. The next poll simply tries again.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// The response body was empty or JSON `null`.
    #[error("datafile response body is empty")]
    EmptyBody,

    #[error("received non-success response while fetching datafile: {0}")]
    Status(reqwest::StatusCode),

    #[error("network error while fetching datafile")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("datafile is not valid JSON")]
    InvalidJson(#[source] Arc<serde_json::Error>),
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        FetchError::Network(Arc::new(value.without_url()))
    }
}

/// A fetched datafile that could not be turned into an evaluation client.
#[derive(Error, Debug, Clone)]
pub enum ClientConstructionError {
    #[error("datafile does not match the expected schema")]
    InvalidDatafile(#[source] Arc<serde_json::Error>),

    #[error("unsupported datafile version {0:?}")]
    UnsupportedVersion(String),
}

/// Errors raised inside the evaluation client. They never reach HTTP callers; the caller gets the
/// fallback value instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    #[error("experiment {0:?} is not in the datafile")]
    ExperimentNotFound(String),

    #[error("feature {0:?} is not in the datafile")]
    FeatureNotFound(String),

    #[error("variable {variable_key:?} is not defined for feature {feature_key:?}")]
    VariableNotFound {
        feature_key: String,
        variable_key: String,
    },

    #[error("variable {variable_key:?} has type {actual:?}, expected {expected:?}")]
    VariableTypeMismatch {
        variable_key: String,
        expected: &'static str,
        actual: String,
    },

    #[error("variation {variation_key:?} is not in experiment {experiment_key:?}")]
    VariationNotFound {
        experiment_key: String,
        variation_key: String,
    },

    #[error("event {0:?} is not in the datafile")]
    EventNotFound(String),
}
