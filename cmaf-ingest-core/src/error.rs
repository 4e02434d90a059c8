use thiserror::Error;

/// Main error type for the ingest core.
///
/// Variants map onto the error taxonomy used by the receiver to decide
/// HTTP status codes and by the channel consumer to decide whether to
/// drop a segment and keep going or log and suppress an MPD write.
#[derive(Error, Debug)]
pub enum Error {
    /// The request URL did not match any recognized upload pattern.
    #[error("unrecognized stream URL: {0}")]
    ClientFraming(String),

    /// The request body could not be parsed as a sequence of ISOBMFF boxes.
    #[error("chunk parse error: {0}")]
    Parse(String),

    /// Basic-Auth credentials were missing or did not match the channel's configuration.
    #[error("authentication failed for channel {0}")]
    Authentication(String),

    /// A standard I/O error, usually while writing a segment or manifest.
    #[error("storage IO error: {0}")]
    StorageIo(#[from] std::io::Error),

    /// A segment was rejected for a reason that does not abort ingest of the stream:
    /// duplicate/out-of-order sequence number, unsupported sample entry, or a
    /// timescale mismatch against an existing adaptation set.
    #[error("protocol semantic error: {0}")]
    ProtocolSemantic(String),

    /// A sliding-window or timeline-generator invariant was violated.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// A channel name did not resolve to any known or configurable channel.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// An item with a seqNr <= the buffer's last seqNr was offered to `SegDataBuffer::add`.
    #[error("duplicate or out-of-order seqNr {seq_nr} (last was {last_seq_nr})")]
    DuplicateOrOutOfOrder { seq_nr: u32, last_seq_nr: u32 },

    /// A `SegDataBuffer`/`SeqCounter` was constructed or resized with capacity 0.
    #[error("buffer capacity must be greater than zero")]
    BufferCapacityZero,

    /// An ISOBMFF box of a recognized type had a payload too short or otherwise
    /// structurally unusable (e.g. a `trun` that claims more samples than it has
    /// room for the declared flags).
    #[error("malformed {0} box")]
    MalformedBox(&'static str),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;
