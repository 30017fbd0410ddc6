use std::time::Duration;
use anyhow::bail;
use bytemuck::Pod;
use tracing::{debug, trace};
use crate::config::StreamArgs;
use crate::convert::{get_rx_converter, Converter};
use crate::error::{Result, TransportError};
use crate::rx_data_xport::RxDataXport;
use crate::streamer::rx_zero_copy::RxZeroCopy;
use crate::streamer::{ErrorMetadataCache, RxErrorCode, RxMetadata};
use crate::time_spec::TimeSpec;

/// Receives samples for one or more channels, one RX transport per channel.
///
/// A packet that holds more samples than requested is delivered in fragments over several
///  calls. Errors that occur after samples were already gathered in a call are reported by
///  the next call, so that the samples are not lost; timeouts are the exception, the caller
///  sees them as a short read.
pub struct RxStreamer {
    zero_copy: RxZeroCopy,
    converters: Vec<Box<dyn Converter>>,
    bytes_per_otw_item: usize,
    bytes_per_cpu_item: usize,
    samp_rate: f64,
    spp: usize,

    /// samples per channel left in the packets currently held
    buff_samps_remaining: usize,
    /// samples per channel already taken from the packets currently held
    fragment_offset: usize,
    /// metadata of the packets currently held, as of their first sample
    packet_metadata: RxMetadata,

    error_cache: ErrorMetadataCache,
}

impl RxStreamer {
    pub fn new(xports: Vec<RxDataXport>, args: &StreamArgs) -> anyhow::Result<RxStreamer> {
        args.validate()?;
        if xports.is_empty() {
            bail!("a streamer needs at least one channel");
        }

        let bytes_per_otw_item = args.otw_format.bytes_per_item();
        let mut spp = args.spp;
        let mut converters = Vec::with_capacity(xports.len());
        for xport in &xports {
            spp = spp.min(xport.max_payload_size() / bytes_per_otw_item);
            converters.push(get_rx_converter(args.otw_format, args.cpu_format, xport.endianness())?);
        }
        if spp == 0 {
            bail!("frames are too small for a single {} sample", args.otw_format);
        }
        debug!("RX streamer with {} channel(s), {} -> {}, {} samples per packet", xports.len(), args.otw_format, args.cpu_format, spp);

        Ok(RxStreamer {
            zero_copy: RxZeroCopy::new(xports, bytes_per_otw_item, args.tick_rate, args.samp_rate),
            converters,
            bytes_per_otw_item,
            bytes_per_cpu_item: args.cpu_format.bytes_per_item(),
            samp_rate: args.samp_rate,
            spp,
            buff_samps_remaining: 0,
            fragment_offset: 0,
            packet_metadata: RxMetadata::default(),
            error_cache: ErrorMetadataCache::default(),
        })
    }

    pub fn num_channels(&self) -> usize {
        self.zero_copy.num_channels()
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

    /// The stream was stopped because the device overran: the next timeout is reported as
    ///  [RxErrorCode::Overflow]
    pub fn set_stopped_due_to_overrun(&mut self) {
        self.zero_copy.set_stopped_due_to_overrun();
    }

    /// The stream was stopped because a timed command was late: the next timeout is reported
    ///  as [RxErrorCode::LateCommand]
    pub fn set_stopped_due_to_late_command(&mut self) {
        self.zero_copy.set_stopped_due_to_late_command();
    }

    /// Receives up to `nsamps` samples per channel into `buffs`, which hold one byte buffer
    ///  per channel in the streamer's CPU format. Returns the number of samples per channel
    ///  and the metadata of the first of them.
    ///
    /// With `one_packet`, the call returns after the first packet. It also returns early at
    ///  the end of a burst, or on an error or timeout. A request for zero samples does not
    ///  wait: it only checks for pending stream errors.
    pub async fn recv(&mut self, buffs: &mut [&mut [u8]], nsamps: usize, timeout: Duration, one_packet: bool) -> Result<(usize, RxMetadata)> {
        self.check_buffs(buffs, nsamps)?;

        if let Some(metadata) = self.error_cache.take() {
            trace!("reporting deferred error {:?}", metadata.error_code);
            return Ok((0, metadata));
        }

        let mut metadata = RxMetadata::default();
        let mut total = self.recv_one_packet(buffs, nsamps, &mut metadata, timeout, 0).await;
        if one_packet || metadata.end_of_burst || metadata.is_error() {
            return Ok((total, metadata));
        }

        while total < nsamps {
            let mut loop_metadata = RxMetadata::default();
            let num_samps = self.recv_one_packet(buffs, nsamps - total, &mut loop_metadata, timeout, total).await;

            if loop_metadata.is_error() {
                if total == 0 {
                    return Ok((0, loop_metadata));
                }
                self.error_cache.store(loop_metadata);
                break;
            }

            total += num_samps;
            metadata.eov_positions.extend(loop_metadata.eov_positions);
            if loop_metadata.end_of_burst {
                metadata.end_of_burst = true;
                break;
            }
        }
        metadata.more_fragments = self.buff_samps_remaining != 0;

        Ok((total, metadata))
    }

    /// [RxStreamer::recv] into typed buffers, e.g. `[f32]` holding interleaved I/Q values for
    ///  the `fc32` format
    pub async fn recv_into<T: Pod>(&mut self, buffs: &mut [&mut [T]], nsamps: usize, timeout: Duration, one_packet: bool) -> Result<(usize, RxMetadata)> {
        let mut byte_buffs: Vec<&mut [u8]> = buffs.iter_mut()
            .map(|b| bytemuck::cast_slice_mut::<T, u8>(b))
            .collect();
        self.recv(&mut byte_buffs, nsamps, timeout, one_packet).await
    }

    fn check_buffs(&self, buffs: &[&mut [u8]], nsamps: usize) -> Result<()> {
        if buffs.len() != self.num_channels() {
            return Err(TransportError::ChannelMismatch { expected: self.num_channels(), actual: buffs.len() });
        }
        let required = nsamps * self.bytes_per_cpu_item;
        if let Some(short) = buffs.iter().find(|b| b.len() < required) {
            return Err(TransportError::BufferTooSmall { required, available: short.len() });
        }
        Ok(())
    }

    /// Receives from one set of packets, starting at `buff_offset` samples into `buffs`
    async fn recv_one_packet(&mut self, buffs: &mut [&mut [u8]], nsamps: usize, metadata: &mut RxMetadata, timeout: Duration, buff_offset: usize) -> usize {
        if nsamps == 0 {
            if self.buff_samps_remaining == 0 {
                let num_samps = self.zero_copy.get_recv_buffs(metadata, Duration::ZERO).await;
                if num_samps > 0 {
                    self.start_packet(num_samps, metadata);
                    *metadata = RxMetadata::default();
                }
                else if !metadata.is_error() {
                    self.zero_copy.release_all();
                }
            }
            if metadata.error_code == RxErrorCode::Timeout {
                metadata.error_code = RxErrorCode::None;
            }
            return 0;
        }

        if self.buff_samps_remaining == 0 {
            let num_samps = self.zero_copy.get_recv_buffs(metadata, timeout).await;
            if num_samps == 0 {
                if !metadata.is_error() {
                    // empty packets, e.g. a bare end of burst
                    self.zero_copy.release_all();
                }
                return 0;
            }
            self.start_packet(num_samps, metadata);
        }

        *metadata = self.packet_metadata.clone();
        if metadata.has_time_spec {
            metadata.time_spec += TimeSpec::from_ticks(self.fragment_offset as i64, self.samp_rate);
        }

        let num_samps = nsamps.min(self.buff_samps_remaining);
        let in_start = self.fragment_offset * self.bytes_per_otw_item;
        let in_end = in_start + num_samps * self.bytes_per_otw_item;
        let out_start = buff_offset * self.bytes_per_cpu_item;
        let out_end = out_start + num_samps * self.bytes_per_cpu_item;
        for (chan, buff) in buffs.iter_mut().enumerate() {
            let payload = self.zero_copy.payload(chan);
            self.converters[chan].convert(&payload[in_start..in_end], &mut buff[out_start..out_end], num_samps);
        }

        self.buff_samps_remaining -= num_samps;
        metadata.fragment_offset = self.fragment_offset;
        metadata.more_fragments = self.buff_samps_remaining != 0;

        if metadata.more_fragments {
            self.fragment_offset += num_samps;
            // the burst or vector ends with the packet's last fragment
            metadata.end_of_burst = false;
        }
        else {
            if self.zero_copy.end_of_vector() {
                metadata.eov_positions.push(buff_offset + num_samps);
            }
            self.zero_copy.release_all();
        }
        num_samps
    }

    fn start_packet(&mut self, num_samps: usize, metadata: &RxMetadata) {
        self.buff_samps_remaining = num_samps;
        self.fragment_offset = 0;
        self.packet_metadata = metadata.clone();
    }
}
