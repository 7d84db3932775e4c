use thiserror::Error;

/// Failure talking to the expense database.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("invalid amount {0}: expenses must be positive")]
    InvalidAmount(i64),
}

/// Failure building or writing an export file. Individual bad rows are
/// skipped before this is ever raised; this covers the whole-file cases.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure on the messaging-network boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bridge protocol error: {0}")]
    Protocol(String),
}

/// Unrecoverable conditions: the process logs, exits nonzero and leaves
/// restarting to the external process manager.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("gave up after {0} failed connection attempts")]
    ReconnectExhausted(u32),

    #[error("startup failed: {0}")]
    Startup(String),
}
