use thiserror::Error;

/// Failure taxonomy for the manifest, mailbox, watchdog, and runtime, in the
/// style of `protocol_versioning::ProtocolVersionError` from the wider
/// workspace: one variant per row of the error-handling design, plus a
/// passthrough for the underlying store client.
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("store error: {0}")]
    Store(String),

    #[error("store operation timed out after {attempts} attempts")]
    StoreTimeout { attempts: u32 },

    #[error("no active heuristic is published")]
    NoActiveHeuristic,

    #[error("cannot push heuristic: {stale_claims} claim(s) from the prior generation are still outstanding")]
    StaleClaimsOutstanding { stale_claims: usize },

    #[error("malformed manifest record: {reason}")]
    MalformedRecord { reason: String },

    #[error("unknown peer identity")]
    UnknownPeer,

    #[error("shard identity was not configured")]
    MissingShardIdentity,

    #[error("transport error: {0}")]
    Transport(#[from] atlas_transport::TransportError),
}

pub type AtlasResult<T> = Result<T, AtlasError>;
