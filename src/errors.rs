use thiserror::Error;

use crate::realtime::ConnectionId;

/// Failure of an Event Log or Subscription Store call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {}", describe_db_error(.0))]
    Database(#[from] tokio_postgres::Error),

    #[error("pool setup failed: {0}")]
    Setup(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to append a frame to a connection's sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The transport side of the sink is gone, or the connection was closed.
    #[error("sink closed")]
    Closed,
    /// The consumer is not draining fast enough.
    #[error("sink buffer full")]
    Full,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("user is not subscribed to any of these channels")]
    Forbidden,

    #[error("write to connection {connection} failed: {source}")]
    TransientIo {
        connection: ConnectionId,
        #[source]
        source: SinkError,
    },

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("event hub is shutting down")]
    ShuttingDown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Render a postgres error with SQLSTATE, detail and hint when the server sent them.
pub fn describe_db_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        let mut msg = format!(
            "PostgreSQL error: {} (SQLSTATE {})",
            db_error.message(),
            db_error.code().code()
        );
        if let Some(detail) = db_error.detail() {
            msg.push_str(&format!("; detail: {}", detail));
        }
        if let Some(hint) = db_error.hint() {
            msg.push_str(&format!("; hint: {}", hint));
        }
        msg
    } else {
        format!("{}", e)
    }
}
