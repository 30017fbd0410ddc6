//! The sending end of a data stream. Data packets are admitted only while the destination has
//!  room for them; stream status packets from the peer release credit and may carry error
//!  reports, which are queued as [AsyncEvent]s.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::buffers::frame_buff::FrameBuff;
use crate::chdr::control_messages::{StrcOpCode, StrcPayload, StrsStatus};
use crate::chdr::header::PacketType;
use crate::chdr::packet::ChdrPacketCodec;
use crate::chdr::{EpidPair, Endianness};
use crate::config::TxXportConfig;
use crate::error::Result;
use crate::flow_control::tx_state::TxFlowCtrlState;
use crate::flow_control::StreamBuffParams;
use crate::io_service::{IoService, RecvAction, RecvCallback, SendClientHandler, SendIo};
use crate::link::{RecvLink, SendLink};
use crate::seq_num::SeqNum;

/// What goes into the header of a data packet
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxPacketInfo {
    pub eob: bool,
    pub eov: bool,
    pub has_tsf: bool,
    pub tsf: u64,
    pub payload_bytes: usize,
}

/// An error reported by the receiving end of the stream
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AsyncEvent {
    /// the endpoint that reported it
    pub epid: u16,
    pub status: StrsStatus,
    pub status_info: u64,
    pub xfer_counts: StreamBuffParams,
}

/// The I/O callbacks of a TX transport. `epids.src` is this end of the stream, `epids.dst` the
///  peer that receives the data and sends status packets.
struct TxFlowCtrlHandler {
    epids: EpidPair,
    codec: ChdrPacketCodec,
    fc_state: TxFlowCtrlState,
    strc_seq: SeqNum,
    async_msgs: mpsc::Sender<AsyncEvent>,
}

impl TxFlowCtrlHandler {
    fn send_strc_resync(&mut self, send_link: &dyn SendLink) -> bool {
        let Some(mut buff) = send_link.try_get_send_buff() else {
            debug!("no free frame for resync request - retrying with the next packet");
            return false;
        };

        let counts = self.fc_state.get_xfer_counts();
        let strc = StrcPayload::new(self.epids.src, StrcOpCode::Resync, counts);
        match self.codec.write_strc(&mut buff, self.epids.dst, self.strc_seq.to_raw(), &strc) {
            Ok(_) => {
                debug!("sending resync request #{} to {}: {:?}", self.strc_seq, self.epids.dst, counts);
                send_link.release_send_buff(buff);
                self.strc_seq = self.strc_seq.next();
                true
            }
            Err(e) => {
                warn!("failed to write resync request: {}", e);
                buff.clear();
                send_link.release_send_buff(buff);
                false
            }
        }
    }
}

impl RecvCallback for TxFlowCtrlHandler {
    fn on_recv(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, _send_link: Option<&dyn SendLink>) -> RecvAction {
        match self.codec.parse_header(&buff) {
            Ok(header) if header.dst_epid == self.epids.src && header.pkt_type == PacketType::Strs => {}
            _ => return RecvAction::NotMine(buff),
        }

        let parsed = self.codec.parse_strs(&buff);
        recv_link.release_recv_buff(buff);
        let strs = match parsed {
            Ok((_, strs)) => strs,
            Err(e) => {
                warn!("dropping malformed stream status: {}", e);
                return RecvAction::Consumed;
            }
        };

        trace!("stream status from {}: {:?}", strs.src_epid, strs);
        self.fc_state.update_dest_recv_count(strs.xfer_counts());

        if strs.status != StrsStatus::Okay {
            warn!("stream {} -> {} reported {:?} (info {:#x})", self.epids.src, self.epids.dst, strs.status, strs.status_info);
            if strs.status == StrsStatus::SeqErr {
                self.fc_state.request_resync();
            }

            let event = AsyncEvent {
                epid: strs.src_epid,
                status: strs.status,
                status_info: strs.status_info,
                xfer_counts: strs.xfer_counts(),
            };
            if let Err(e) = self.async_msgs.try_send(event) {
                warn!("async message queue is full - dropping {:?}", e.into_inner());
            }
        }
        RecvAction::Consumed
    }
}

impl SendClientHandler for TxFlowCtrlHandler {
    fn on_send(&mut self, buff: FrameBuff, send_link: &dyn SendLink) -> Option<FrameBuff> {
        let packet_size = buff.packet_size();
        if !self.fc_state.can_send(packet_size) {
            return Some(buff);
        }

        send_link.release_send_buff(buff);
        self.fc_state.data_sent(packet_size);

        let strc_len = self.codec.strc_packet_len();
        if self.fc_state.get_fc_resync_req_pending()
            && self.fc_state.can_send(strc_len)
            && self.send_strc_resync(send_link)
        {
            self.fc_state.clear_fc_resync_req_pending();
            self.fc_state.data_sent(strc_len);
        }
        None
    }

    fn dest_has_space(&self, num_bytes: usize) -> bool {
        self.fc_state.dest_has_space(num_bytes)
    }

    fn reserve_dest_space(&mut self, num_bytes: usize) {
        self.fc_state.reserve(num_bytes);
    }

    fn release_dest_space(&mut self, num_bytes: usize) {
        self.fc_state.release_reservation(num_bytes);
    }
}


pub struct TxDataXport {
    send_io: Box<dyn SendIo>,
    handler: Arc<Mutex<TxFlowCtrlHandler>>,
    codec: ChdrPacketCodec,
    epids: EpidPair,
    data_seq: SeqNum,
    async_msgs: mpsc::Receiver<AsyncEvent>,
    frame_size: usize,
    max_payload_size: usize,
}

impl TxDataXport {
    /// Connects to the I/O service, sending data on `send_link` and receiving status packets
    ///  on `recv_link`. Both links must be attached to the service.
    pub fn new(
        io_srv: &dyn IoService,
        send_link: Arc<dyn SendLink>,
        recv_link: Arc<dyn RecvLink>,
        epids: EpidPair,
        config: &TxXportConfig,
    ) -> anyhow::Result<TxDataXport> {
        config.validate()?;

        let codec = ChdrPacketCodec::new(config.chdr_w, config.endianness);
        let frame_size = send_link.send_frame_size();
        let max_payload_size = codec.max_payload_len(frame_size, PacketType::DataWithTs);

        let (msg_sender, async_msgs) = mpsc::channel(config.async_msg_queue_depth);
        let handler = Arc::new(Mutex::new(TxFlowCtrlHandler {
            epids,
            codec,
            fc_state: TxFlowCtrlState::new(config.chdr_w, config.dest_capacity, config.lossy_xport),
            strc_seq: SeqNum::ZERO,
            async_msgs: msg_sender,
        }));

        let send_io = io_srv.make_send_client(send_link, config.num_send_frames, handler.clone(), Some(recv_link), config.num_recv_frames)?;
        debug!("TX transport {} -> {} created with destination capacity {:?}", epids.src, epids.dst, config.dest_capacity);

        Ok(TxDataXport {
            send_io,
            handler,
            codec,
            epids,
            data_seq: SeqNum::ZERO,
            async_msgs,
            frame_size,
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

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Waits up to `timeout` until the destination has room for a full frame, and then for a
    ///  free frame. Returns `None` on timeout.
    pub async fn get_send_buff(&mut self, timeout: Duration) -> Option<FrameBuff> {
        let deadline = Instant::now() + timeout;
        if !self.send_io.wait_for_dest_ready(self.frame_size, timeout).await {
            trace!("no room at destination {}", self.epids.dst);
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.send_io.get_send_buff(remaining).await
    }

    /// Writes a data packet header with the next sequence number. Returns the payload offset
    ///  and the packet length, which is also the buffer's new packet size.
    pub fn write_packet_header(&mut self, buff: &mut FrameBuff, info: &TxPacketInfo) -> Result<(usize, usize)> {
        let mut header = self.codec.data_header(self.epids.dst, self.data_seq.to_raw(), info.has_tsf, info.payload_bytes)?;
        header.eob = info.eob;
        header.eov = info.eov;

        let payload_offset = self.codec.write_header(buff, &header, info.has_tsf.then_some(info.tsf))?;
        self.data_seq = self.data_seq.next();
        Ok((payload_offset, buff.packet_size()))
    }

    /// Sends a buffer filled via [TxDataXport::write_packet_header]. A buffer with a packet
    ///  size of 0 is returned to the link unsent.
    pub async fn release_send_buff(&mut self, buff: FrameBuff) {
        self.send_io.release_send_buff(buff).await;
    }

    /// Waits up to `timeout` for an error report from the peer
    pub async fn recv_async_msg(&mut self, timeout: Duration) -> Option<AsyncEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(event) = self.async_msgs.try_recv() {
                return Some(event);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.send_io.process_status(remaining).await {
                // status is handled elsewhere, or nothing arrived in time
                return tokio::time::timeout_at(deadline, self.async_msgs.recv()).await.ok().flatten();
            }
        }
    }

    /// Replaces the destination's buffer capacity, e.g. after the peer was reconfigured
    pub fn set_dest_capacity(&mut self, capacity: StreamBuffParams) {
        self.handler.lock().unwrap().fc_state.set_dest_capacity(capacity);
    }

    /// The flow control counts as (sent, acknowledged by the peer). With an offloading I/O
    ///  service they are updated by the worker task, so this is a snapshot.
    pub fn fc_counts(&self) -> (StreamBuffParams, StreamBuffParams) {
        let handler = self.handler.lock().unwrap();
        (handler.fc_state.get_xfer_counts(), handler.fc_state.get_recv_counts())
    }
}
