use thiserror::Error;

/// Severity class of a server-reported query error.
///
/// These map one-to-one onto the error response type codes on the wire.
/// Query errors are delivered only to the query that caused them; they do
/// not poison the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The server could not understand the query frame itself.
    Client,
    /// The term tree failed server-side compilation.
    Compile,
    /// The query failed while executing.
    Runtime,
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryErrorKind::Client => write!(f, "Client"),
            QueryErrorKind::Compile => write!(f, "Compile"),
            QueryErrorKind::Runtime => write!(f, "Runtime"),
        }
    }
}

/// Driver error taxonomy.
///
/// The enum is `Clone` so a single transport failure can be fanned out to
/// every in-flight waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    /// DNS resolution or TCP connect failure. Nothing is in flight yet.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Protocol-version rejection or malformed handshake reply. Fatal.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// SCRAM failure: bad password, bad signature, missing fields. Fatal.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Socket read/write failure after connect. Fatal; every in-flight
    /// waiter receives this once and the connection becomes errored.
    #[error("IO error: {0}")]
    Io(String),

    /// Unparseable response envelope or frame. Fatal, handled like `Io`.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server-reported per-query error. Not fatal; reaches only the
    /// waiter of the query that caused it.
    #[error("{kind} error: {message}")]
    Query {
        kind: QueryErrorKind,
        message: String,
    },

    /// Operation attempted on a closed or errored connection.
    #[error("Not connected")]
    NotConnected,

    /// A cursor continuation handle was invoked twice.
    #[error("Cursor continuation already consumed")]
    ContinuationMisuse,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DriverError::Connect("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");

        let err = DriverError::Handshake("Incompatible protocol".to_string());
        assert_eq!(err.to_string(), "Handshake failed: Incompatible protocol");

        let err = DriverError::Auth("bad signature".to_string());
        assert_eq!(err.to_string(), "Authentication failed: bad signature");

        let err = DriverError::Io("disconnected".to_string());
        assert_eq!(err.to_string(), "IO error: disconnected");

        let err = DriverError::Query {
            kind: QueryErrorKind::Runtime,
            message: "No such table.".to_string(),
        };
        assert_eq!(err.to_string(), "Runtime error: No such table.");

        assert_eq!(DriverError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: DriverError = io.into();
        assert!(matches!(err, DriverError::Io(_)));
    }

    #[test]
    fn test_errors_are_clonable() {
        let err = DriverError::Io("disconnected".to_string());
        let copy = err.clone();
        assert_eq!(err, copy);
    }
}
