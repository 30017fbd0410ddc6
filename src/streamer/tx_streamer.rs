use std::time::Duration;
use anyhow::bail;
use bytemuck::Pod;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::buffers::frame_buff::FrameBuff;
use crate::config::StreamArgs;
use crate::convert::{get_tx_converter, Converter};
use crate::error::{Result, TransportError};
use crate::streamer::TxMetadata;
use crate::time_spec::TimeSpec;
use crate::tx_data_xport::{AsyncEvent, TxDataXport, TxPacketInfo};

/// How often the transports are checked while waiting for an async message
const ASYNC_MSG_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// An [AsyncEvent] with the streamer channel it occurred on
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxAsyncMsg {
    pub channel: usize,
    pub event: AsyncEvent,
}

/// Sends samples for one or more channels, one TX transport per channel
pub struct TxStreamer {
    xports: Vec<TxDataXport>,
    converters: Vec<Box<dyn Converter>>,
    bytes_per_otw_item: usize,
    bytes_per_cpu_item: usize,
    tick_rate: f64,
    samp_rate: f64,
    spp: usize,
    /// metadata of a zero-sample start of burst, applied to the next send
    cached_metadata: Option<TxMetadata>,
}

impl TxStreamer {
    pub fn new(xports: Vec<TxDataXport>, args: &StreamArgs) -> anyhow::Result<TxStreamer> {
        args.validate()?;
        if xports.is_empty() {
            bail!("a streamer needs at least one channel");
        }

        let bytes_per_otw_item = args.otw_format.bytes_per_item();
        let mut spp = args.spp;
        let mut converters = Vec::with_capacity(xports.len());
        for xport in &xports {
            spp = spp.min(xport.max_payload_size() / bytes_per_otw_item);
            converters.push(get_tx_converter(args.cpu_format, args.otw_format, xport.endianness())?);
        }
        if spp == 0 {
            bail!("frames are too small for a single {} sample", args.otw_format);
        }
        debug!("TX streamer with {} channel(s), {} -> {}, {} samples per packet", xports.len(), args.cpu_format, args.otw_format, spp);

        Ok(TxStreamer {
            xports,
            converters,
            bytes_per_otw_item,
            bytes_per_cpu_item: args.cpu_format.bytes_per_item(),
            tick_rate: args.tick_rate,
            samp_rate: args.samp_rate,
            spp,
            cached_metadata: None,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.xports.len()
    }

    /// The number of samples in a full packet
    pub fn max_num_samps(&self) -> usize {
        self.spp
    }

    pub fn set_scale_factor(&mut self, chan: usize, scalar: f64) {
        if let Some(converter) = self.converters.get_mut(chan) {
            converter.set_scalar(scalar);
        }
    }

    /// Sends `nsamps` samples per channel from `buffs`, which hold one byte buffer per channel
    ///  in the streamer's CPU format. The samples are split into packets of at most
    ///  [TxStreamer::max_num_samps] samples. Returns the number of samples sent, which is less
    ///  than `nsamps` if no frame became available within `timeout`.
    ///
    /// A start of burst without samples is remembered and applied to the next call. An end of
    ///  burst without samples sends an empty packet to close the burst.
    pub async fn send(&mut self, buffs: &[&[u8]], nsamps: usize, metadata: &TxMetadata, timeout: Duration) -> Result<usize> {
        self.check_buffs(buffs, nsamps)?;

        if nsamps == 0 && metadata.start_of_burst {
            trace!("deferring start of burst to the next send");
            self.cached_metadata = Some(*metadata);
            return Ok(0);
        }
        let metadata = match self.cached_metadata.take() {
            Some(cached) => TxMetadata {
                end_of_burst: cached.end_of_burst || metadata.end_of_burst,
                ..cached
            },
            None => *metadata,
        };

        if nsamps == 0 {
            if metadata.end_of_burst {
                let info = self.packet_info(&metadata, 0, 0, true);
                self.send_packet(buffs, 0, &info, timeout).await?;
            }
            return Ok(0);
        }

        let mut num_sent = 0;
        while num_sent < nsamps {
            let num_samps = (nsamps - num_sent).min(self.spp);
            let last = num_sent + num_samps == nsamps;
            let info = self.packet_info(&metadata, num_sent, num_samps, last);

            if !self.send_packet(buffs, num_sent, &info, timeout).await? {
                debug!("timed out waiting for a send frame after {} of {} samples", num_sent, nsamps);
                break;
            }
            num_sent += num_samps;
        }
        Ok(num_sent)
    }

    /// [TxStreamer::send] from typed buffers, e.g. `[f32]` holding interleaved I/Q values for
    ///  the `fc32` format
    pub async fn send_from<T: Pod>(&mut self, buffs: &[&[T]], nsamps: usize, metadata: &TxMetadata, timeout: Duration) -> Result<usize> {
        let byte_buffs: Vec<&[u8]> = buffs.iter()
            .map(|b| bytemuck::cast_slice::<T, u8>(b))
            .collect();
        self.send(&byte_buffs, nsamps, metadata, timeout).await
    }

    /// Waits up to `timeout` for an error report from any channel's receiving end
    pub async fn recv_async_msg(&mut self, timeout: Duration) -> Option<TxAsyncMsg> {
        let deadline = Instant::now() + timeout;
        loop {
            for (channel, xport) in self.xports.iter_mut().enumerate() {
                if let Some(event) = xport.recv_async_msg(Duration::ZERO).await {
                    return Some(TxAsyncMsg { channel, event });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(ASYNC_MSG_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn check_buffs(&self, buffs: &[&[u8]], nsamps: usize) -> Result<()> {
        if buffs.len() != self.num_channels() {
            return Err(TransportError::ChannelMismatch { expected: self.num_channels(), actual: buffs.len() });
        }
        let required = nsamps * self.bytes_per_cpu_item;
        if let Some(short) = buffs.iter().find(|b| b.len() < required) {
            return Err(TransportError::BufferTooSmall { required, available: short.len() });
        }
        Ok(())
    }

    /// Header information for a packet starting `offset` samples into the request
    fn packet_info(&self, metadata: &TxMetadata, offset: usize, num_samps: usize, last: bool) -> TxPacketInfo {
        let tsf = if metadata.has_time_spec {
            let time = metadata.time_spec + TimeSpec::from_ticks(offset as i64, self.samp_rate);
            time.to_ticks(self.tick_rate) as u64
        }
        else {
            0
        };

        TxPacketInfo {
            eob: last && metadata.end_of_burst,
            eov: false,
            has_tsf: metadata.has_time_spec,
            tsf,
            payload_bytes: num_samps * self.bytes_per_otw_item,
        }
    }

    /// Sends one packet per channel, starting `offset` samples into `buffs`. Returns `false`
    ///  if a frame could not be had for every channel, in which case nothing is sent.
    async fn send_packet(&mut self, buffs: &[&[u8]], offset: usize, info: &TxPacketInfo, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        let mut frames: Vec<FrameBuff> = Vec::with_capacity(self.xports.len());
        for xport in self.xports.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match xport.get_send_buff(remaining).await {
                Some(frame) => frames.push(frame),
                None => {
                    self.return_unsent(frames).await;
                    return Ok(false);
                }
            }
        }

        let num_samps = info.payload_bytes / self.bytes_per_otw_item;
        let in_start = offset * self.bytes_per_cpu_item;
        let in_end = in_start + num_samps * self.bytes_per_cpu_item;
        let mut header_result = Ok(());
        for (chan, frame) in frames.iter_mut().enumerate() {
            match self.xports[chan].write_packet_header(frame, info) {
                Ok((payload_offset, _)) => {
                    let payload = &mut frame.data_mut()[payload_offset..payload_offset + info.payload_bytes];
                    self.converters[chan].convert(&buffs[chan][in_start..in_end], payload, num_samps);
                }
                Err(e) => {
                    header_result = Err(e);
                    break;
                }
            }
        }
        if let Err(e) = header_result {
            self.return_unsent(frames).await;
            return Err(e);
        }

        for (xport, frame) in self.xports.iter_mut().zip(frames) {
            xport.release_send_buff(frame).await;
        }
        Ok(true)
    }

    async fn return_unsent(&mut self, frames: Vec<FrameBuff>) {
        for (xport, mut frame) in self.xports.iter_mut().zip(frames) {
            frame.clear();
            xport.release_send_buff(frame).await;
        }
    }
}
