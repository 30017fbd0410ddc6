use std::time::Duration;
use anyhow::bail;
use crate::chdr::{ChdrWidth, Endianness};
use crate::convert::{CpuFormat, OtwFormat};
use crate::flow_control::StreamBuffParams;

pub struct RxXportConfig {
    /// This is the buffer space the receiving end declares to the sender, i.e. how much the
    ///  sender may have in flight. It should cover the link's round trip at the intended rate,
    ///  and it must not exceed what the receiving end can actually hold: with a capacity that
    ///  is too big, the link overruns.
    pub capacity: StreamBuffParams,

    /// How much may be released by the application before a status response must be sent.
    ///  Smaller values mean more status traffic, bigger values mean the sender stalls longer
    ///  waiting for credit. The peer can change this at runtime with an STRC INIT.
    pub fc_freq: StreamBuffParams,

    /// A status response is sent no later than when the sender's remaining credit has shrunk
    ///  to this margin, regardless of `fc_freq`
    pub fc_headroom: StreamBuffParams,

    pub num_recv_frames: usize,
    /// frames reserved on the link that carries status responses back to the sender
    pub num_send_frames: usize,

    pub chdr_w: ChdrWidth,
    pub endianness: Endianness,
}

impl RxXportConfig {
    pub fn new(capacity: StreamBuffParams) -> RxXportConfig {
        RxXportConfig {
            capacity,
            fc_freq: StreamBuffParams::new(capacity.bytes / 8, (capacity.packets / 8).max(1)),
            fc_headroom: StreamBuffParams::ZERO,
            num_recv_frames: 32,
            num_send_frames: 2,
            chdr_w: ChdrWidth::W64,
            endianness: Endianness::Big,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity.bytes == 0 || self.capacity.packets == 0 {
            bail!("RX capacity must be non-zero: {:?}", self.capacity);
        }
        if self.fc_freq.bytes == 0 || self.fc_freq.packets == 0 {
            bail!("flow control response frequency must be non-zero: {:?}", self.fc_freq);
        }
        if !self.fc_headroom.fits_into(&self.capacity) || self.fc_headroom == self.capacity {
            bail!("flow control headroom {:?} leaves no room in capacity {:?}", self.fc_headroom, self.capacity);
        }
        if self.num_recv_frames == 0 {
            bail!("at least one receive frame is required");
        }
        if self.num_send_frames == 0 {
            bail!("at least one send frame is required for status responses");
        }
        Ok(())
    }
}

pub struct TxXportConfig {
    /// The receiving end's declared buffer capacity
    pub dest_capacity: StreamBuffParams,

    /// Set for links that may drop packets. Inconsistent status from the peer then leads to a
    ///  resync request rather than just a warning.
    pub lossy_xport: bool,

    pub num_send_frames: usize,
    /// frames reserved on the link that carries status packets from the receiving end
    pub num_recv_frames: usize,

    pub chdr_w: ChdrWidth,
    pub endianness: Endianness,

    /// Asynchronous events from the peer that were not picked up yet are dropped beyond this
    ///  number
    pub async_msg_queue_depth: usize,
}

impl TxXportConfig {
    pub fn new(dest_capacity: StreamBuffParams) -> TxXportConfig {
        TxXportConfig {
            dest_capacity,
            lossy_xport: false,
            num_send_frames: 32,
            num_recv_frames: 2,
            chdr_w: ChdrWidth::W64,
            endianness: Endianness::Big,
            async_msg_queue_depth: 1000,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dest_capacity.bytes == 0 || self.dest_capacity.packets == 0 {
            bail!("destination capacity must be non-zero: {:?}", self.dest_capacity);
        }
        if self.num_send_frames == 0 {
            bail!("at least one send frame is required");
        }
        if self.num_recv_frames == 0 {
            bail!("at least one receive frame is required for status packets");
        }
        if self.async_msg_queue_depth == 0 {
            bail!("async message queue depth must be non-zero");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StreamArgs {
    pub cpu_format: CpuFormat,
    pub otw_format: OtwFormat,

    /// Samples per packet. The effective value is capped by what fits into a link frame.
    pub spp: usize,

    /// rate of the device's timestamp counter
    pub tick_rate: f64,
    pub samp_rate: f64,
}

impl StreamArgs {
    pub fn new(cpu_format: CpuFormat, otw_format: OtwFormat) -> StreamArgs {
        StreamArgs {
            cpu_format,
            otw_format,
            spp: usize::MAX,
            tick_rate: 200e6,
            samp_rate: 1e6,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.spp == 0 {
            bail!("samples per packet must be non-zero");
        }
        if !(self.tick_rate > 0.0) {
            bail!("tick rate must be positive: {}", self.tick_rate);
        }
        if !(self.samp_rate > 0.0) {
            bail!("sample rate must be positive: {}", self.samp_rate);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct OffloadConfig {
    /// How long the worker sleeps when none of its clients had work. This bounds the latency
    ///  of picking up new packets, and it is the interval at which waiting send clients
    ///  re-check for destination space.
    pub idle_poll_interval: Duration,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfig {
            idle_poll_interval: Duration::from_micros(100),
        }
    }
}

impl OffloadConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idle_poll_interval.is_zero() {
            bail!("idle poll interval must be non-zero");
        }
        Ok(())
    }
}
