// ABOUTME: Error types for the delta sync pipeline
// ABOUTME: Separates connectivity failures from query failures so a run can report which one aborted it

use thiserror::Error;

/// Boxed driver error carried as the source of a [`SyncError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of a pipeline stage.
///
/// Every variant is fatal for the run that produced it. Stages never retry;
/// retry policy belongs to whatever schedules the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source or destination could not be reached, or the connection dropped mid-stage.
    #[error("failed to connect to {endpoint}")]
    Connection {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// A statement was rejected: malformed extraction query, constraint violation, bad row shape.
    #[error("{context}")]
    Query {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A step payload could not be read, parsed or written.
    #[error("{context}")]
    Payload {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl SyncError {
    pub fn connection(endpoint: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SyncError::Connection {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }

    pub fn query(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SyncError::Query {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn payload(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SyncError::Payload {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Classify a tokio-postgres error raised while running a statement.
    ///
    /// A closed connection is reported as [`SyncError::Connection`] even when it
    /// surfaces from a query call.
    pub fn from_postgres(context: impl Into<String>, err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            SyncError::connection("postgresql", err)
        } else {
            SyncError::query(context, err)
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, SyncError::Connection { .. })
    }

    pub fn is_query(&self) -> bool {
        matches!(self, SyncError::Query { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_message() {
        let err = SyncError::connection("sqlite:/tmp/x.db", "unable to open database file");
        assert!(err.is_connection());
        assert!(!err.is_query());
        assert_eq!(err.to_string(), "failed to connect to sqlite:/tmp/x.db");
    }

    #[test]
    fn test_query_error_keeps_source() {
        let err = SyncError::query("Failed to upsert page", "UNIQUE constraint failed");
        assert!(err.is_query());
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("UNIQUE constraint failed"));
    }

    #[test]
    fn test_config_error_message() {
        let err = SyncError::Config("page_size must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: page_size must be greater than zero"
        );
    }
}
