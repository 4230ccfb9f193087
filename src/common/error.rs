//! Error types for kvfront

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("key not found: {0}")]
    NotFound(i64),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("storage backend is closed")]
    BackendClosed,

    // === Telemetry Errors ===
    #[error("telemetry error: {0}")]
    Telemetry(String),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("reflection error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    // === Config Errors ===
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the requested key has no record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Convert to gRPC status for RPC responses.
    ///
    /// Anything not recognised as not-found is reported as `INTERNAL` with the
    /// error text as message so operators can see the underlying cause.
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NotFound(_) => tonic::Status::new(Code::NotFound, self.to_string()),
            Error::Config(_) | Error::InvalidConfig(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        e.to_grpc_status()
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_not_found_maps_to_not_found() {
        let status = Error::NotFound(7).to_grpc_status();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains('7'));
    }

    #[test]
    fn test_other_errors_map_to_internal_with_cause() {
        let status = Error::Other("disk on fire".into()).to_grpc_status();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "disk on fire");

        let status = Error::BackendClosed.to_grpc_status();
        assert_eq!(status.code(), Code::Internal);

        let status = Error::Storage(rusqlite::Error::InvalidQuery).to_grpc_status();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().starts_with("storage error"));
    }

    #[test]
    fn test_grpc_status_passes_through() {
        let original = tonic::Status::unavailable("try later");
        let status = Error::Grpc(original).to_grpc_status();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "try later");
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound(1).is_not_found());
        assert!(!Error::Internal("x".into()).is_not_found());
    }
}
