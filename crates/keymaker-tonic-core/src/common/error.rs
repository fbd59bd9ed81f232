//! Error types shared by drones and clients.
//!
//! [`Error`] covers everything outside the key codec: configuration and TLS
//! setup, per-connection handshake and authorization failures, and client
//! transport failures. `From<Error> for tonic::Status` lets server code
//! propagate it with `?`.

use crate::proto::KeyStatus;
use tonic::Status;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration or TLS material. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The TLS handshake with a peer failed or timed out.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The peer completed the handshake but its identity is not allowed.
    #[error("connection rejected: {0}")]
    Authorization(String),

    /// A request could not reach a drone or its response was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// A drone answered with a non-OK status.
    #[error("drone answered {status}: {message}")]
    Drone { status: KeyStatus, message: String },

    /// Invalid or unsupported key algorithm, or a codec failure.
    #[error(transparent)]
    Key(#[from] keymaker::Error),

    /// The service is in the process of shutting down.
    #[error("service is shutting down")]
    ServiceShutdown,
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::Transport(format!("{:?}: {}", status.code(), status.message()))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(message) => Status::failed_precondition(message),
            Error::Handshake(message) => Status::unavailable(message),
            Error::Authorization(message) => Status::permission_denied(message),
            Error::Transport(message) => Status::unavailable(message),
            Error::Drone { status, message } => {
                Status::internal(format!("drone answered {status}: {message}"))
            }
            Error::Key(e) => Status::invalid_argument(e.to_string()),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn status_codes() {
        let cases = [
            (Error::Config("bad".into()), Code::FailedPrecondition),
            (Error::Authorization("cn".into()), Code::PermissionDenied),
            (Error::Transport("down".into()), Code::Unavailable),
            (Error::ServiceShutdown, Code::Unavailable),
            (
                Error::Key(keymaker::Error::InvalidAlgorithm("RSA2047".into())),
                Code::InvalidArgument,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn key_errors_display_transparently() {
        let err = Error::from(keymaker::Error::UnknownAlgorithm("DSA".into()));
        assert_eq!(
            err.to_string(),
            keymaker::Error::UnknownAlgorithm("DSA".into()).to_string()
        );
    }

    #[test]
    fn status_round_trips_into_transport_error() {
        let err = Error::from(Status::unavailable("connection refused"));
        match err {
            Error::Transport(message) => assert!(message.contains("connection refused")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
