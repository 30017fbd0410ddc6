//! Packet builders and callback handlers shared by the unit tests

use std::sync::Arc;
use crate::buffers::frame_buff::FrameBuff;
use crate::chdr::control_messages::{StrcPayload, StrsPayload};
use crate::chdr::header::{ChdrHeader, PacketType};
use crate::chdr::packet::ChdrPacketCodec;
use crate::chdr::EpidPair;
use crate::config::{RxXportConfig, TxXportConfig};
use crate::flow_control::StreamBuffParams;
use crate::io_service::inline::InlineIoService;
use crate::io_service::{IoService, RecvAction, RecvCallback, RecvClientHandler, SendClientHandler};
use crate::link::{RecvLink, SendLink};
use crate::rx_data_xport::RxDataXport;
use crate::sim_link::{PacketReceiver, SimRecvLink, SimSendLink};
use crate::tx_data_xport::TxDataXport;

/// A data packet's wire bytes
pub fn data_packet(codec: &ChdrPacketCodec, dst_epid: u16, seq_num: u16, tsf: Option<u64>, eob: bool, payload: &[u8]) -> Vec<u8> {
    let mut header = codec.data_header(dst_epid, seq_num, tsf.is_some(), payload.len()).unwrap();
    header.eob = eob;

    let mut buff = FrameBuff::new(header.length as usize);
    let payload_offset = codec.write_header(&mut buff, &header, tsf).unwrap();
    buff.data_mut()[payload_offset..payload_offset + payload.len()].copy_from_slice(payload);
    buff.as_ref().to_vec()
}

/// A data packet carrying `num_samps` sc16 samples whose I and Q components both hold the
///  sample's index plus `first`
pub fn sc16_packet(codec: &ChdrPacketCodec, dst_epid: u16, seq_num: u16, tsf: Option<u64>, eob: bool, first: i16, num_samps: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(num_samps * 4);
    for i in 0..num_samps {
        let value = first + i as i16;
        codec.endianness().put_i16(&mut payload, value);
        codec.endianness().put_i16(&mut payload, value);
    }
    data_packet(codec, dst_epid, seq_num, tsf, eob, &payload)
}

pub fn strs_packet(codec: &ChdrPacketCodec, dst_epid: u16, strs: &StrsPayload) -> Vec<u8> {
    let mut buff = FrameBuff::new(codec.strs_packet_len());
    codec.write_strs(&mut buff, dst_epid, 0, strs).unwrap();
    buff.as_ref().to_vec()
}

pub fn strc_packet(codec: &ChdrPacketCodec, dst_epid: u16, strc: &StrcPayload) -> Vec<u8> {
    let mut buff = FrameBuff::new(codec.strc_packet_len());
    codec.write_strc(&mut buff, dst_epid, 0, strc).unwrap();
    buff.as_ref().to_vec()
}

/// A packet of a type the transports do not handle
pub fn ctrl_packet(codec: &ChdrPacketCodec, dst_epid: u16) -> Vec<u8> {
    let mut header = ChdrHeader::new(PacketType::Ctrl, dst_epid);
    header.length = codec.packet_len(PacketType::Ctrl, 0, 8) as u16;

    let mut buff = FrameBuff::new(header.length as usize);
    codec.write_header(&mut buff, &header, None).unwrap();
    buff.as_ref().to_vec()
}

pub fn parse_strs(codec: &ChdrPacketCodec, packet: &[u8]) -> (ChdrHeader, StrsPayload) {
    codec.parse_strs(&FrameBuff::from_slice(packet.len(), packet)).unwrap()
}

pub fn parse_strc(codec: &ChdrPacketCodec, packet: &[u8]) -> (ChdrHeader, StrcPayload) {
    codec.parse_strc(&FrameBuff::from_slice(packet.len(), packet)).unwrap()
}


/// Delivers packets whose first byte is its tag
pub struct TagHandler {
    tag: u8,
}

impl TagHandler {
    pub fn new(tag: u8) -> TagHandler {
        TagHandler { tag }
    }
}

impl RecvCallback for TagHandler {
    fn on_recv(&mut self, buff: FrameBuff, _recv_link: &dyn RecvLink, _send_link: Option<&dyn SendLink>) -> RecvAction {
        if buff.as_ref().first() == Some(&self.tag) {
            RecvAction::Deliver(buff)
        }
        else {
            RecvAction::NotMine(buff)
        }
    }
}

impl RecvClientHandler for TagHandler {
    fn on_release(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, _send_link: Option<&dyn SendLink>) {
        recv_link.release_recv_buff(buff);
    }
}

pub const CREDIT_TAG: u8 = 0xcc;

/// Sends one packet per credit. Packets starting with [CREDIT_TAG] grant a credit. Admission
///  treats every reservation as holding one.
pub struct CreditHandler {
    pub credits: usize,
    pub reserved: usize,
    pub num_sent: usize,
}

impl CreditHandler {
    pub fn new(credits: usize) -> CreditHandler {
        CreditHandler { credits, reserved: 0, num_sent: 0 }
    }
}

impl RecvCallback for CreditHandler {
    fn on_recv(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, _send_link: Option<&dyn SendLink>) -> RecvAction {
        if buff.as_ref().first() != Some(&CREDIT_TAG) {
            return RecvAction::NotMine(buff);
        }
        self.credits += 1;
        recv_link.release_recv_buff(buff);
        RecvAction::Consumed
    }
}

impl SendClientHandler for CreditHandler {
    fn on_send(&mut self, buff: FrameBuff, send_link: &dyn SendLink) -> Option<FrameBuff> {
        if self.credits == 0 {
            return Some(buff);
        }
        self.credits -= 1;
        self.num_sent += 1;
        send_link.release_send_buff(buff);
        None
    }

    fn dest_has_space(&self, _num_bytes: usize) -> bool {
        self.credits > self.reserved
    }

    fn reserve_dest_space(&mut self, _num_bytes: usize) {
        self.reserved += 1;
    }

    fn release_dest_space(&mut self, _num_bytes: usize) {
        self.reserved -= 1;
    }
}


/// The far end of the streams created by [rx_xport] and [tx_xport]
pub const STREAM_PEER: u16 = 1;

/// An RX transport receiving from [STREAM_PEER] on a fresh link of 8 frames. It never sends
///  status responses.
pub fn rx_xport(srv: &InlineIoService, own_epid: u16, frame_size: usize) -> (RxDataXport, Arc<SimRecvLink>) {
    let data_link = Arc::new(SimRecvLink::new(frame_size, 8));
    let (status_link, _) = SimSendLink::capturing(64, 1);
    let status_link = Arc::new(status_link);
    srv.attach_recv_link(data_link.clone());
    srv.attach_send_link(status_link.clone());

    let mut config = RxXportConfig::new(StreamBuffParams::new(1 << 20, 1024));
    config.fc_freq = StreamBuffParams::new(u64::MAX, u32::MAX);
    config.num_recv_frames = 8;
    config.num_send_frames = 1;

    let xport = RxDataXport::new(srv, data_link.clone(), status_link, EpidPair::new(STREAM_PEER, own_epid), &config).unwrap();
    (xport, data_link)
}

/// A TX transport sending to [STREAM_PEER] on a fresh link of 8 frames, with a destination
///  capacity that is never exhausted in a test
pub fn tx_xport(srv: &InlineIoService, own_epid: u16, frame_size: usize) -> (TxDataXport, PacketReceiver, Arc<SimRecvLink>) {
    let (data_link, sent) = SimSendLink::capturing(frame_size, 8);
    let data_link = Arc::new(data_link);
    let status_link = Arc::new(SimRecvLink::new(64, 1));
    srv.attach_send_link(data_link.clone());
    srv.attach_recv_link(status_link.clone());

    let mut config = TxXportConfig::new(StreamBuffParams::new(1 << 30, 1 << 20));
    config.num_send_frames = 8;
    config.num_recv_frames = 1;

    let xport = TxDataXport::new(srv, data_link, status_link.clone(), EpidPair::new(own_epid, STREAM_PEER), &config).unwrap();
    (xport, sent, status_link)
}

// converter output lands in plain byte vectors without alignment guarantees, so no casting

pub fn i16s(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|c| i16::from_ne_bytes(c.try_into().unwrap())).collect()
}

pub fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_ne_bytes(c.try_into().unwrap())).collect()
}

pub fn f64s(bytes: &[u8]) -> Vec<f64> {
    bytes.chunks_exact(8).map(|c| f64::from_ne_bytes(c.try_into().unwrap())).collect()
}
