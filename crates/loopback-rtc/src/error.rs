//! Error types for loopback negotiation

use crate::endpoint::EndpointRole;
use crate::signaling::SdpType;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring media or negotiating a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local media capture was denied or no device is available
    #[error("Media access error: {reason}")]
    MediaAccessError {
        /// Human-readable cause reported by the media source
        reason: String,
    },

    /// A session description could not be created or applied
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// A description of the wrong type was supplied
    #[error("Description mismatch: expected {expected}, got {actual}")]
    DescriptionMismatchError {
        /// Type the endpoint expected for this slot
        expected: SdpType,
        /// Type that was supplied
        actual: SdpType,
    },

    /// Operation not permitted in the current phase or role
    #[error("State error: {0}")]
    StateError(String),

    /// A single remote ICE candidate was rejected
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// The endpoint was closed before the operation could complete
    #[error("Endpoint closed: {0}")]
    EndpointClosed(EndpointRole),

    /// A session is already active on this controller
    #[error("A session is already active")]
    SessionActive,

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Errors the user should be told about (capture denied, failed call)
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::MediaAccessError { .. } | Error::NegotiationError(_) | Error::SessionActive
        )
    }

    /// Protocol misuse; unreachable when the state machine is respected
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Error::DescriptionMismatchError { .. } | Error::StateError(_)
        )
    }

    /// Errors that abort the negotiation of the current session
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::NegotiationError(_)
                | Error::DescriptionMismatchError { .. }
                | Error::StateError(_)
                | Error::WebRtcError(_)
        )
    }

    /// The operation lost a race with `close()`/`hangup()`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::EndpointClosed(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MediaAccessError {
            reason: "NotAllowedError".to_string(),
        };
        assert_eq!(err.to_string(), "Media access error: NotAllowedError");

        let err = Error::DescriptionMismatchError {
            expected: SdpType::Answer,
            actual: SdpType::Offer,
        };
        assert_eq!(
            err.to_string(),
            "Description mismatch: expected answer, got offer"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::NegotiationError("x".to_string()).is_user_visible());
        assert!(Error::NegotiationError("x".to_string()).is_fatal_to_session());
        assert!(Error::StateError("x".to_string()).is_protocol_misuse());
        assert!(!Error::StateError("x".to_string()).is_user_visible());
        assert!(!Error::IceCandidateError("x".to_string()).is_fatal_to_session());
        assert!(Error::EndpointClosed(EndpointRole::Answerer).is_cancellation());
        assert!(!Error::SessionActive.is_cancellation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
