//! Error types for session and ratchet operations.

use thiserror::Error;

/// Result type alias for session and ratchet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session, handshake and ratchet layers.
///
/// Errors are never retried internally. A failed `receive` leaves the
/// session state untouched, so the caller may keep using the session
/// unless the error is [`Error::InternalInvariant`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Envelope, base64, header or body length invalid
    #[error("malformed message")]
    Malformed,

    /// Message tag is incompatible with the current session state
    #[error("unexpected message for current session state")]
    UnexpectedMessage,

    /// Signed pre-key signature verification failed
    #[error("invalid signed pre-key signature")]
    BadSignature,

    /// The peer verification callback refused the peer's identity key
    #[error("peer identity key rejected")]
    PeerRejected,

    /// AEAD authentication failed
    #[error("message authentication failed")]
    MacMismatch,

    /// PKCS#7 padding validation failed
    #[error("invalid padding")]
    BadPadding,

    /// Requested skip exceeds the per-step limit
    #[error("too many skipped messages")]
    SkipOverflow,

    /// Out-of-order message whose key was never cached or already consumed
    #[error("no cached key for skipped message")]
    UnknownSkipped,

    /// The injected randomness source failed
    #[error("entropy source failure")]
    EntropyFailure,

    /// Impossible internal state; the session should be closed
    #[error("internal invariant violated")]
    InternalInvariant,
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::BadSignature
    }
}

impl From<base64::DecodeError> for Error {
    fn from(_: base64::DecodeError) -> Self {
        Error::Malformed
    }
}
