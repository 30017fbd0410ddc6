//! Sample streamers turn the packet interface of the data transports into contiguous,
//!  converted sample buffers, one buffer per channel.

use crate::time_spec::TimeSpec;

mod rx_zero_copy;
pub mod rx_streamer;
pub mod tx_streamer;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RxErrorCode {
    #[default]
    None,
    /// no packet arrived within the timeout
    Timeout,
    /// a timed command arrived after its time
    LateCommand,
    /// expected another stream command
    BrokenChain,
    /// samples were lost, either because the device overran or because packets went missing
    ///  on the way
    Overflow,
    /// multi-channel packets could not be aligned by their timestamps
    Alignment,
    /// a packet could not be parsed
    BadPacket,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RxMetadata {
    pub has_time_spec: bool,
    /// time of the first sample returned
    pub time_spec: TimeSpec,

    /// the returned samples are part of a packet, and the rest of it comes with the next call
    pub more_fragments: bool,
    /// offset of the first returned sample within its packet
    pub fragment_offset: usize,

    /// always false on receive
    pub start_of_burst: bool,
    pub end_of_burst: bool,

    /// sample positions (relative to the start of the returned buffers) just past each packet
    ///  that ended a vector
    pub eov_positions: Vec<usize>,

    pub out_of_sequence: bool,
    pub error_code: RxErrorCode,
}

impl RxMetadata {
    pub fn is_error(&self) -> bool {
        self.error_code != RxErrorCode::None
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TxMetadata {
    pub has_time_spec: bool,
    /// time of the first sample sent
    pub time_spec: TimeSpec,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
}

/// Holds error metadata from a receive call that had already delivered samples, to be
///  reported by the next call. Timeouts are not held: a caller sees them as a short read.
#[derive(Default)]
pub(crate) struct ErrorMetadataCache {
    cached: Option<RxMetadata>,
}

impl ErrorMetadataCache {
    pub(crate) fn store(&mut self, metadata: RxMetadata) {
        if metadata.error_code != RxErrorCode::Timeout {
            self.cached = Some(metadata);
        }
    }

    pub(crate) fn take(&mut self) -> Option<RxMetadata> {
        self.cached.take()
    }
}
