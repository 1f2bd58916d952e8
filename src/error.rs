use std::fmt;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy for the consensus core.
///
/// Protocol-level rejections (stale term, log mismatch) are not represented
/// here — they are ordinary RPC replies, not errors.
#[derive(Debug, Clone)]
pub enum Error {
    /// A client operation was submitted to a server that isn't the leader.
    /// `leader_hint` is the last-known leader id, or 0 if unknown.
    NotLeader { leader_hint: u64 },

    /// A previously-accepted proposal will never be committed because this
    /// server stepped down (or was deposed) before it reached a quorum.
    LeadershipLost,

    /// A membership change was requested while an uncommitted CONFIGURATION
    /// entry is still pending.
    ConfigurationBusy,

    /// A persistent-storage operation failed. Fatal: the instance halts the
    /// role state machine but remains closable.
    IoFault(String),

    /// A transport send failed. Absorbed locally by the caller; surfaced
    /// here only for callers that want to observe it (e.g. tests).
    TransportFault(String),

    /// Malformed input: a zero id, a duplicate id, an empty configuration,
    /// or an option combination rejected by `RaftOptions::validate`.
    InvalidArgument(String),

    /// The operation was outstanding when the instance was closed.
    Cancelled,

    /// The operation was submitted after close was initiated.
    Shutdown,

    /// Catch-all for invariant violations that should never happen in a
    /// correct embedding (e.g. truncating a committed suffix).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotLeader { leader_hint } => {
                write!(f, "not leader (last known leader: {leader_hint})")
            }
            Error::LeadershipLost => write!(f, "leadership lost before proposal committed"),
            Error::ConfigurationBusy => {
                write!(f, "a configuration change is already uncommitted")
            }
            Error::IoFault(msg) => write!(f, "io fault: {msg}"),
            Error::TransportFault(msg) => write!(f, "transport fault: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Shutdown => write!(f, "instance is shutting down"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::IoFault(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::Cancelled
    }
}
