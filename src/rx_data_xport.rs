//! The receiving end of a data stream: hands out data packets one by one, runs RX flow control
//!  and detects lost packets by their sequence numbers.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};
use crate::buffers::frame_buff::FrameBuff;
use crate::chdr::control_messages::{StrcOpCode, StrsPayload, StrsStatus};
use crate::chdr::header::PacketType;
use crate::chdr::packet::ChdrPacketCodec;
use crate::chdr::{EpidPair, Endianness};
use crate::config::RxXportConfig;
use crate::error::Result;
use crate::flow_control::rx_state::RxFlowCtrlState;
use crate::flow_control::StreamBuffParams;
use crate::io_service::{IoService, RecvAction, RecvCallback, RecvClientHandler, RecvIo};
use crate::link::{RecvLink, SendLink};
use crate::seq_num::SeqNum;

/// What the header of a data packet says
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketInfo {
    pub eob: bool,
    pub eov: bool,
    pub has_tsf: bool,
    pub tsf: u64,
    pub payload_bytes: usize,
    pub payload_offset: usize,
}

impl PacketInfo {
    pub fn payload<'a>(&self, buff: &'a FrameBuff) -> &'a [u8] {
        &buff.as_ref()[self.payload_offset..self.payload_offset + self.payload_bytes]
    }
}

/// A data packet, handed out by [RxDataXport::get_recv_buff]. The buffer must be given back
///  through [RxDataXport::release_recv_buff].
#[derive(Debug)]
pub struct RecvPacket {
    pub buff: FrameBuff,
    pub info: PacketInfo,
    /// true if packets were lost before this one
    pub seq_error: bool,
}

/// The I/O callbacks of an RX transport. `epids.dst` is this end of the stream, `epids.src` the
///  peer that sends the data and receives the status responses.
struct RxFlowCtrlHandler {
    epids: EpidPair,
    codec: ChdrPacketCodec,
    fc_state: RxFlowCtrlState,
    /// sequence number of the next status response
    strs_seq: SeqNum,
}

impl RxFlowCtrlHandler {
    /// Sends a status response with the current transfer counts. Returns whether it was sent.
    fn send_strs(&mut self, send_link: Option<&dyn SendLink>) -> bool {
        let Some(send_link) = send_link else {
            warn!("no link to send flow control status on");
            return false;
        };
        let Some(mut buff) = send_link.try_get_send_buff() else {
            warn!("no free frame for flow control status - skipping response");
            return false;
        };

        let capacity = self.fc_state.capacity();
        let counts = self.fc_state.get_xfer_counts();
        let strs = StrsPayload {
            src_epid: self.epids.dst,
            status: StrsStatus::Okay,
            capacity_bytes: capacity.bytes,
            capacity_pkts: capacity.packets,
            xfer_count_pkts: counts.packets.into(),
            xfer_count_bytes: counts.bytes,
            buff_info: 0,
            status_info: 0,
        };

        match self.codec.write_strs(&mut buff, self.epids.src, self.strs_seq.to_raw(), &strs) {
            Ok(_) => {
                trace!("sending flow control status #{}: {:?}", self.strs_seq, counts);
                send_link.release_send_buff(buff);
                self.strs_seq = self.strs_seq.next();
                true
            }
            Err(e) => {
                warn!("failed to write flow control status: {}", e);
                buff.clear();
                send_link.release_send_buff(buff);
                false
            }
        }
    }

    fn send_strs_if_due(&mut self, send_link: Option<&dyn SendLink>) {
        if self.fc_state.fc_resp_due() && self.send_strs(send_link) {
            self.fc_state.fc_resp_sent();
        }
    }

    fn on_strc(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>) -> RecvAction {
        let packet_size = buff.packet_size();
        let strc = match self.codec.parse_strc(&buff) {
            Ok((_, strc)) => strc,
            Err(e) => {
                warn!("dropping malformed stream command: {}", e);
                recv_link.release_recv_buff(buff);
                return RecvAction::Consumed;
            }
        };
        recv_link.release_recv_buff(buff);

        match strc.op_code {
            StrcOpCode::Resync => {
                // the counts are from before the command itself
                self.fc_state.resynchronize(strc.counts());
                self.fc_state.data_received(packet_size);
                self.fc_state.xfer_done(packet_size);
                self.send_strs_if_due(send_link);
            }
            StrcOpCode::Init => {
                debug!("stream command INIT from {}: response frequency {:?}", strc.src_epid, strc.counts());
                self.fc_state.initialize(strc.counts());
                self.send_strs(send_link);
                self.fc_state.reset_counts();
            }
            StrcOpCode::Ping => {
                trace!("stream command PING from {}", strc.src_epid);
                self.send_strs(send_link);
            }
        }
        RecvAction::Consumed
    }
}

impl RecvCallback for RxFlowCtrlHandler {
    fn on_recv(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>) -> RecvAction {
        let header = match self.codec.parse_header(&buff) {
            Ok(header) => header,
            Err(_) => return RecvAction::NotMine(buff),
        };
        if header.dst_epid != self.epids.dst {
            return RecvAction::NotMine(buff);
        }

        match header.pkt_type {
            PacketType::Strc => self.on_strc(buff, recv_link, send_link),
            PacketType::DataNoTs | PacketType::DataWithTs => {
                self.fc_state.data_received(buff.packet_size());
                RecvAction::Deliver(buff)
            }
            _ => RecvAction::NotMine(buff),
        }
    }
}

impl RecvClientHandler for RxFlowCtrlHandler {
    fn on_release(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>) {
        let packet_size = buff.packet_size();
        recv_link.release_recv_buff(buff);
        self.fc_state.xfer_done(packet_size);
        self.send_strs_if_due(send_link);
    }
}


pub struct RxDataXport {
    recv_io: Box<dyn RecvIo>,
    handler: Arc<Mutex<RxFlowCtrlHandler>>,
    codec: ChdrPacketCodec,
    epids: EpidPair,
    expected_seq: SeqNum,
    max_payload_size: usize,
}

impl RxDataXport {
    /// Connects to the I/O service, receiving data on `recv_link` and sending status responses
    ///  on `send_link`. Both links must be attached to the service.
    pub fn new(
        io_srv: &dyn IoService,
        recv_link: Arc<dyn RecvLink>,
        send_link: Arc<dyn SendLink>,
        epids: EpidPair,
        config: &RxXportConfig,
    ) -> anyhow::Result<RxDataXport> {
        config.validate()?;

        let codec = ChdrPacketCodec::new(config.chdr_w, config.endianness);
        let max_payload_size = codec.max_payload_len(recv_link.recv_frame_size(), PacketType::DataWithTs);

        let mut fc_state = RxFlowCtrlState::new(config.chdr_w, config.capacity, config.fc_headroom);
        fc_state.initialize(config.fc_freq);

        let handler = Arc::new(Mutex::new(RxFlowCtrlHandler {
            epids,
            codec,
            fc_state,
            strs_seq: SeqNum::ZERO,
        }));

        let recv_io = io_srv.make_recv_client(recv_link, config.num_recv_frames, handler.clone(), Some(send_link), config.num_send_frames)?;
        debug!("RX transport {} <- {} created with capacity {:?}", epids.dst, epids.src, config.capacity);

        Ok(RxDataXport {
            recv_io,
            handler,
            codec,
            epids,
            expected_seq: SeqNum::ZERO,
            max_payload_size,
        })
    }

    pub fn epids(&self) -> EpidPair {
        self.epids
    }

    /// byte order of the packets, which is also the byte order of the samples they carry
    pub fn endianness(&self) -> Endianness {
        self.codec.endianness()
    }

    /// The largest payload a data packet on this transport can carry
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Waits up to `timeout` for the next data packet. Returns `Ok(None)` on timeout.
    ///
    /// A packet whose header does not match its size is released and reported as
    ///  [crate::error::TransportError::MalformedPacket].
    pub async fn get_recv_buff(&mut self, timeout: Duration) -> Result<Option<RecvPacket>> {
        let Some(buff) = self.recv_io.get_recv_buff(timeout).await else {
            return Ok(None);
        };

        let packet = match self.codec.parse(&buff) {
            Ok(packet) => packet,
            Err(e) => {
                self.recv_io.release_recv_buff(buff);
                return Err(e);
            }
        };

        let seq_num = SeqNum::from_raw(packet.header.seq_num);
        let seq_error = seq_num != self.expected_seq;
        if seq_error {
            debug!("sequence error on stream {} <- {}: expected {}, got {}", self.epids.dst, self.epids.src, self.expected_seq, seq_num);
        }
        self.expected_seq = seq_num.next();

        let info = PacketInfo {
            eob: packet.header.eob,
            eov: packet.header.eov,
            has_tsf: packet.tsf.is_some(),
            tsf: packet.tsf.unwrap_or(0),
            payload_bytes: packet.payload_len,
            payload_offset: packet.payload_offset,
        };
        trace!("received data packet #{}: {:?}", seq_num, info);

        Ok(Some(RecvPacket { buff, info, seq_error }))
    }

    /// Hands a data packet's buffer back, possibly triggering a status response
    pub fn release_recv_buff(&mut self, buff: FrameBuff) {
        self.recv_io.release_recv_buff(buff);
    }

    /// The flow control counts as (received, released)
    pub fn fc_counts(&self) -> (StreamBuffParams, StreamBuffParams) {
        let handler = self.handler.lock().unwrap();
        (handler.fc_state.get_recv_counts(), handler.fc_state.get_xfer_counts())
    }
}
