use thiserror::Error;

/// Failures talking to a baseboard management controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BmcError {
    /// Connection, timeout, or subprocess launch failure.
    #[error("bmc transport error: {0}")]
    Transport(String),

    /// The BMC answered, but not with something we understand.
    #[error("bmc protocol error: {0}")]
    Protocol(String),

    /// The BMC does not implement the requested operation.
    #[error("bmc operation not supported: {0}")]
    Unsupported(String),
}

impl BmcError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            BmcError::Transport(err.to_string())
        } else {
            BmcError::Protocol(err.to_string())
        }
    }
}

/// Failures talking to the on-box agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent transport error: {0}")]
    Transport(String),

    #[error("agent protocol error: {0}")]
    Protocol(String),

    /// The agent refused the request (e.g. load generator already running).
    #[error("agent rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl AgentError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AgentError::Transport(err.to_string())
        } else {
            AgentError::Protocol(err.to_string())
        }
    }
}

/// Persistence failures. Always fatal to the run.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    /// The collector stopped writing samples. The underlying error is
    /// returned by `CollectorHandle::stop`.
    #[error("collector stopped on a store failure")]
    CollectorHalted,

    #[error("collector task failed: {0}")]
    CollectorTask(String),
}

/// Why a single trial was marked invalid.
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("{step} failed: {source}")]
    Bmc {
        step: &'static str,
        #[source]
        source: BmcError,
    },

    #[error("load trigger failed: {source}")]
    Agent {
        #[source]
        source: AgentError,
    },

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("run cancelled")]
    Cancelled,
}

impl TrialError {
    /// Errors that must end the whole run rather than just the trial.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrialError::Persistence(_) | TrialError::Cancelled)
    }
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}
