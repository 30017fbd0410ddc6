use thiserror::Error;

/// Errors surfaced by the I/O service, the data transports and the packet codec.
///
/// Setup code (configuration, transport construction) reports through `anyhow`; this enum is
///  for the conditions a caller may want to match on.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link cannot provide {requested} frames: {reserved} of {available} are already reserved")]
    Resource {
        requested: usize,
        reserved: usize,
        available: usize,
    },

    #[error("link is not attached to this I/O service")]
    LinkNotAttached,

    #[error("link still has {0} connected client(s)")]
    LinkInUse(usize),

    #[error("I/O service worker is no longer running")]
    ServiceStopped,

    #[error("bad CHDR header or invalid packet length: {0}")]
    MalformedPacket(String),

    #[error("invalid CHDR packet type {0}")]
    InvalidPacketType(u8),

    #[error("no converter from {otw} to {cpu}")]
    UnsupportedConversion {
        otw: String,
        cpu: String,
    },

    #[error("streamer has {expected} channel(s), but {actual} buffer(s) were passed")]
    ChannelMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("buffer of {available} bytes is too small for {required} bytes")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
