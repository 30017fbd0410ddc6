use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::rx_data_xport::{RecvPacket, RxDataXport};
use crate::streamer::{RxErrorCode, RxMetadata};
use crate::time_spec::TimeSpec;

/// Give up aligning channels after this many rounds of dropping stale packets
const MAX_ALIGNMENT_ATTEMPTS: usize = 1000;

/// Gathers one packet per channel, aligned by timestamp, and holds them while the caller
///  reads their payload in place.
pub(crate) struct RxZeroCopy {
    xports: Vec<RxDataXport>,
    held: Vec<Option<RecvPacket>>,
    bytes_per_item: usize,
    tick_rate: f64,
    samp_rate: f64,
    /// time of the first sample after the most recently gathered packets
    next_time: Option<TimeSpec>,
    stopped_due_to_overrun: bool,
    stopped_due_to_late_command: bool,
}

impl RxZeroCopy {
    pub(crate) fn new(xports: Vec<RxDataXport>, bytes_per_item: usize, tick_rate: f64, samp_rate: f64) -> RxZeroCopy {
        let held = xports.iter().map(|_| None).collect();
        RxZeroCopy {
            xports,
            held,
            bytes_per_item,
            tick_rate,
            samp_rate,
            next_time: None,
            stopped_due_to_overrun: false,
            stopped_due_to_late_command: false,
        }
    }

    pub(crate) fn num_channels(&self) -> usize {
        self.xports.len()
    }

    pub(crate) fn set_stopped_due_to_overrun(&mut self) {
        self.stopped_due_to_overrun = true;
    }

    pub(crate) fn set_stopped_due_to_late_command(&mut self) {
        self.stopped_due_to_late_command = true;
    }

    /// Waits up to `timeout` for a packet on every channel. Returns the number of samples per
    ///  channel, with the packets' properties in `metadata`, or 0 with `metadata.error_code`
    ///  set.
    pub(crate) async fn get_recv_buffs(&mut self, metadata: &mut RxMetadata, timeout: Duration) -> usize {
        *metadata = RxMetadata::default();
        let deadline = Instant::now() + timeout;

        for _ in 0..MAX_ALIGNMENT_ATTEMPTS {
            if !self.fill(metadata, deadline).await {
                return 0;
            }

            if self.take_seq_error() {
                metadata.error_code = RxErrorCode::Overflow;
                metadata.out_of_sequence = true;
                if let Some(next_time) = self.next_time {
                    metadata.has_time_spec = true;
                    metadata.time_spec = next_time;
                }
                return 0;
            }

            if self.drop_stale_packets() {
                continue;
            }
            return self.describe_held(metadata);
        }

        warn!("could not align {} channels by timestamp", self.xports.len());
        self.release_all();
        metadata.error_code = RxErrorCode::Alignment;
        0
    }

    /// Fetches a packet for every channel that does not hold one yet. On failure the error is
    ///  recorded in `metadata`, and packets already held stay held for the next attempt.
    async fn fill(&mut self, metadata: &mut RxMetadata, deadline: Instant) -> bool {
        for (xport, held) in self.xports.iter_mut().zip(self.held.iter_mut()) {
            if held.is_some() {
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match xport.get_recv_buff(remaining).await {
                Ok(Some(packet)) => *held = Some(packet),
                Ok(None) => {
                    metadata.error_code = if std::mem::take(&mut self.stopped_due_to_overrun) {
                        RxErrorCode::Overflow
                    }
                    else if std::mem::take(&mut self.stopped_due_to_late_command) {
                        RxErrorCode::LateCommand
                    }
                    else {
                        RxErrorCode::Timeout
                    };
                    return false;
                }
                Err(e) => {
                    debug!("bad packet on stream {}: {}", xport.epids().dst, e);
                    metadata.error_code = RxErrorCode::BadPacket;
                    return false;
                }
            }
        }
        true
    }

    /// Reports a sequence error at most once per packet. The packet itself stays held.
    fn take_seq_error(&mut self) -> bool {
        let mut result = false;
        for packet in self.held.iter_mut().flatten() {
            result |= std::mem::take(&mut packet.seq_error);
        }
        result
    }

    /// Releases packets whose timestamp is older than the newest one. Returns whether any
    ///  were released.
    fn drop_stale_packets(&mut self) -> bool {
        if self.held.len() < 2 {
            return false;
        }

        let mut newest = None;
        for packet in self.held.iter().flatten() {
            if !packet.info.has_tsf {
                return false;
            }
            newest = newest.max(Some(packet.info.tsf));
        }
        let Some(newest) = newest else {
            return false;
        };

        let mut dropped = false;
        for (xport, held) in self.xports.iter_mut().zip(self.held.iter_mut()) {
            if held.as_ref().is_some_and(|p| p.info.tsf < newest) {
                if let Some(packet) = held.take() {
                    trace!("dropping packet at {} to align with {}", packet.info.tsf, newest);
                    xport.release_recv_buff(packet.buff);
                    dropped = true;
                }
            }
        }
        dropped
    }

    fn describe_held(&mut self, metadata: &mut RxMetadata) -> usize {
        let mut num_samps = usize::MAX;
        for packet in self.held.iter().flatten() {
            num_samps = num_samps.min(packet.info.payload_bytes / self.bytes_per_item);
            metadata.end_of_burst |= packet.info.eob;
        }
        if num_samps == usize::MAX {
            return 0;
        }

        if let Some(first) = self.held.first().and_then(|p| p.as_ref()) {
            if first.info.has_tsf {
                metadata.has_time_spec = true;
                metadata.time_spec = TimeSpec::from_ticks(first.info.tsf as i64, self.tick_rate);
            }
            else if let Some(next_time) = self.next_time {
                metadata.has_time_spec = true;
                metadata.time_spec = next_time;
            }
        }
        if metadata.has_time_spec {
            self.next_time = Some(metadata.time_spec + TimeSpec::from_ticks(num_samps as i64, self.samp_rate));
        }
        num_samps
    }

    /// The payload of the packet held for a channel, empty if there is none
    pub(crate) fn payload(&self, chan: usize) -> &[u8] {
        match self.held.get(chan) {
            Some(Some(packet)) => packet.info.payload(&packet.buff),
            _ => &[],
        }
    }

    pub(crate) fn end_of_vector(&self) -> bool {
        self.held.iter().flatten().any(|p| p.info.eov)
    }

    pub(crate) fn release_all(&mut self) {
        for (xport, held) in self.xports.iter_mut().zip(self.held.iter_mut()) {
            if let Some(packet) = held.take() {
                xport.release_recv_buff(packet.buff);
            }
        }
    }
}

impl Drop for RxZeroCopy {
    fn drop(&mut self) {
        self.release_all();
    }
}
