use thiserror::Error;

/// Failure modes surfaced by packet encoding, decoding, and dispatch.
///
/// Mirrors the taxonomy in `protocol_versioning::ProtocolVersionError` from the
/// wider workspace: one variant per distinct failure, plus a passthrough for the
/// underlying transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed packet: {reason}")]
    MalformedPacket { reason: String },

    #[error("packet truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown packet type id {0}")]
    UnknownPacketType(u16),

    #[error("sender identity is invalid")]
    InvalidSender,

    #[error("metadata exceeds maximum size of {max} bytes (got {actual})")]
    MetadataTooLarge { max: usize, actual: usize },

    #[error("transport send failed: {0}")]
    SendFailed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
