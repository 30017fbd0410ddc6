use crate::buffers::frame_buff::FrameBuff;
use crate::chdr::control_messages::{StrcPayload, StrsPayload};
use crate::chdr::header::{ChdrHeader, PacketType};
use crate::chdr::{ChdrWidth, Endianness};
use crate::error::{Result, TransportError};
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// The location of everything inside a parsed packet
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChdrPacket {
    pub header: ChdrHeader,
    pub tsf: Option<u64>,
    pub payload_offset: usize,
    pub payload_len: usize,
}

/// Reads and writes CHDR packets in frame buffers for a given bus width and byte order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChdrPacketCodec {
    chdr_w: ChdrWidth,
    endianness: Endianness,
}

impl ChdrPacketCodec {
    const HEADER_LEN: usize = size_of::<u64>();
    const TIMESTAMP_OFFSET: usize = size_of::<u64>();

    pub fn new(chdr_w: ChdrWidth, endianness: Endianness) -> ChdrPacketCodec {
        ChdrPacketCodec { chdr_w, endianness }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// For a 64-bit bus, the timestamp occupies a line of its own. For wider buses it shares
    ///  the first line with the header.
    pub fn payload_offset(&self, pkt_type: PacketType, num_mdata: u8) -> usize {
        let mdata_len = usize::from(num_mdata) * self.chdr_w.bytes();
        match self.chdr_w {
            ChdrWidth::W64 if pkt_type.has_timestamp() => 2 * Self::HEADER_LEN + mdata_len,
            ChdrWidth::W64 => Self::HEADER_LEN + mdata_len,
            _ => self.chdr_w.bytes() + mdata_len,
        }
    }

    pub fn packet_len(&self, pkt_type: PacketType, num_mdata: u8, payload_len: usize) -> usize {
        self.payload_offset(pkt_type, num_mdata) + payload_len
    }

    /// The largest payload that fits into a frame of the given size without metadata
    pub fn max_payload_len(&self, frame_size: usize, pkt_type: PacketType) -> usize {
        frame_size.saturating_sub(self.payload_offset(pkt_type, 0))
            .min(u16::MAX as usize - self.payload_offset(pkt_type, 0))
    }

    pub fn strs_packet_len(&self) -> usize {
        self.packet_len(PacketType::Strs, 0, StrsPayload::SERIALIZED_LEN)
    }

    pub fn strc_packet_len(&self) -> usize {
        self.packet_len(PacketType::Strc, 0, StrcPayload::SERIALIZED_LEN)
    }

    pub fn parse_header(&self, buff: &FrameBuff) -> Result<ChdrHeader> {
        let mut b = buff.as_ref();
        let raw = self.endianness.try_get_u64(&mut b)?;
        ChdrHeader::unpack(raw)
    }

    /// Parses the header and locates timestamp and payload, verifying that the declared length
    ///  is consistent with what was actually received.
    pub fn parse(&self, buff: &FrameBuff) -> Result<ChdrPacket> {
        let header = self.parse_header(buff)?;
        let length: usize = header.length.safe_cast();
        if length > buff.packet_size() {
            return Err(TransportError::MalformedPacket(format!("declared length {} exceeds the {} bytes received", length, buff.packet_size())));
        }

        let payload_offset = self.payload_offset(header.pkt_type, header.num_mdata);
        if payload_offset > length {
            return Err(TransportError::MalformedPacket(format!("declared length {} is shorter than the {} bytes of header and metadata", length, payload_offset)));
        }

        let tsf = if header.pkt_type.has_timestamp() {
            let mut b = &buff.as_ref()[Self::TIMESTAMP_OFFSET..];
            Some(self.endianness.try_get_u64(&mut b)?)
        }
        else {
            None
        };

        Ok(ChdrPacket {
            header,
            tsf,
            payload_offset,
            payload_len: length - payload_offset,
        })
    }

    /// Writes header and (if the packet type requires it) timestamp to the start of the frame,
    ///  and sets the frame's packet size to the header's length. Returns the payload offset.
    pub fn write_header(&self, buff: &mut FrameBuff, header: &ChdrHeader, tsf: Option<u64>) -> Result<usize> {
        let length: usize = header.length.safe_cast();
        let payload_offset = self.payload_offset(header.pkt_type, header.num_mdata);
        if length > buff.capacity() {
            return Err(TransportError::BufferTooSmall { required: length, available: buff.capacity() });
        }
        if length < payload_offset {
            return Err(TransportError::MalformedPacket(format!("length {} is shorter than the {} bytes of header and metadata", length, payload_offset)));
        }

        {
            let mut b = &mut buff.data_mut()[..];
            self.endianness.put_u64(&mut b, header.pack());
        }
        if header.pkt_type.has_timestamp() {
            let mut b = &mut buff.data_mut()[Self::TIMESTAMP_OFFSET..];
            self.endianness.put_u64(&mut b, tsf.unwrap_or(0));
        }
        buff.set_packet_size(length);
        Ok(payload_offset)
    }

    /// Builds a complete data packet header for a payload of the given size
    pub fn data_header(&self, dst_epid: u16, seq_num: u16, has_tsf: bool, payload_len: usize) -> Result<ChdrHeader> {
        let pkt_type = PacketType::data(has_tsf);
        let length = self.packet_len(pkt_type, 0, payload_len);
        if length > u16::MAX as usize {
            return Err(TransportError::BufferTooSmall { required: length, available: u16::MAX as usize });
        }

        let mut header = ChdrHeader::new(pkt_type, dst_epid);
        header.seq_num = seq_num;
        header.length = length.prechecked_cast();
        Ok(header)
    }

    pub fn write_strs(&self, buff: &mut FrameBuff, dst_epid: u16, seq_num: u16, strs: &StrsPayload) -> Result<usize> {
        let mut header = ChdrHeader::new(PacketType::Strs, dst_epid);
        header.seq_num = seq_num;
        header.length = self.strs_packet_len().prechecked_cast();

        let payload_offset = self.write_header(buff, &header, None)?;
        let mut b = &mut buff.data_mut()[payload_offset..];
        strs.ser(&mut b, self.endianness);
        Ok(self.strs_packet_len())
    }

    pub fn write_strc(&self, buff: &mut FrameBuff, dst_epid: u16, seq_num: u16, strc: &StrcPayload) -> Result<usize> {
        let mut header = ChdrHeader::new(PacketType::Strc, dst_epid);
        header.seq_num = seq_num;
        header.length = self.strc_packet_len().prechecked_cast();

        let payload_offset = self.write_header(buff, &header, None)?;
        let mut b = &mut buff.data_mut()[payload_offset..];
        strc.ser(&mut b, self.endianness);
        Ok(self.strc_packet_len())
    }

    pub fn parse_strs(&self, buff: &FrameBuff) -> Result<(ChdrHeader, StrsPayload)> {
        let packet = self.parse(buff)?;
        let mut b = &buff.as_ref()[packet.payload_offset..packet.payload_offset + packet.payload_len];
        Ok((packet.header, StrsPayload::deser(&mut b, self.endianness)?))
    }

    pub fn parse_strc(&self, buff: &FrameBuff) -> Result<(ChdrHeader, StrcPayload)> {
        let packet = self.parse(buff)?;
        let mut b = &buff.as_ref()[packet.payload_offset..packet.payload_offset + packet.payload_len];
        Ok((packet.header, StrcPayload::deser(&mut b, self.endianness)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::chdr::control_messages::{StrcOpCode, StrsStatus};

    #[rstest]
    #[case::w64_no_ts(ChdrWidth::W64, PacketType::DataNoTs, 0, 8)]
    #[case::w64_ts(ChdrWidth::W64, PacketType::DataWithTs, 0, 16)]
    #[case::w64_ts_mdata(ChdrWidth::W64, PacketType::DataWithTs, 2, 32)]
    #[case::w128_no_ts(ChdrWidth::W128, PacketType::DataNoTs, 0, 16)]
    #[case::w128_ts(ChdrWidth::W128, PacketType::DataWithTs, 0, 16)]
    #[case::w256_mdata(ChdrWidth::W256, PacketType::DataWithTs, 1, 64)]
    #[case::w512_strs(ChdrWidth::W512, PacketType::Strs, 0, 64)]
    fn test_payload_offset(#[case] chdr_w: ChdrWidth, #[case] pkt_type: PacketType, #[case] num_mdata: u8, #[case] expected: usize) {
        let codec = ChdrPacketCodec::new(chdr_w, Endianness::Big);
        assert_eq!(codec.payload_offset(pkt_type, num_mdata), expected);
    }

    #[rstest]
    #[case::w64(ChdrWidth::W64, 40, 24)]
    #[case::w128(ChdrWidth::W128, 48, 32)]
    #[case::w512(ChdrWidth::W512, 96, 80)]
    fn test_control_packet_len(#[case] chdr_w: ChdrWidth, #[case] strs_len: usize, #[case] strc_len: usize) {
        let codec = ChdrPacketCodec::new(chdr_w, Endianness::Big);
        assert_eq!(codec.strs_packet_len(), strs_len);
        assert_eq!(codec.strc_packet_len(), strc_len);
    }

    #[rstest]
    #[case::w64_be(ChdrWidth::W64, Endianness::Big, Some(0x1122334455667788))]
    #[case::w64_le(ChdrWidth::W64, Endianness::Little, None)]
    #[case::w128_ts(ChdrWidth::W128, Endianness::Big, Some(17))]
    #[case::w256_le_ts(ChdrWidth::W256, Endianness::Little, Some(u64::MAX))]
    fn test_write_parse_data(#[case] chdr_w: ChdrWidth, #[case] endianness: Endianness, #[case] tsf: Option<u64>) {
        let codec = ChdrPacketCodec::new(chdr_w, endianness);
        let mut buff = FrameBuff::new(256);

        let mut header = codec.data_header(9, 42, tsf.is_some(), 20).unwrap();
        header.eob = true;
        let payload_offset = codec.write_header(&mut buff, &header, tsf).unwrap();
        buff.data_mut()[payload_offset..payload_offset + 20].copy_from_slice(&[3; 20]);

        let packet = codec.parse(&buff).unwrap();
        assert_eq!(packet.header, header);
        assert_eq!(packet.tsf, tsf);
        assert_eq!(packet.payload_offset, payload_offset);
        assert_eq!(packet.payload_len, 20);
        assert_eq!(buff.packet_size(), payload_offset + 20);
        assert_eq!(&buff.as_ref()[payload_offset..], &[3; 20]);
    }

    #[test]
    fn test_wire_bytes() {
        let codec = ChdrPacketCodec::new(ChdrWidth::W64, Endianness::Big);
        let mut buff = FrameBuff::new(64);
        let header = codec.data_header(2, 1, true, 4).unwrap();
        codec.write_header(&mut buff, &header, Some(0x0102)).unwrap();

        assert_eq!(buff.as_ref(), &[
            0x00,0xe0, 0x00,0x01, 0x00,0x14, 0x00,0x02,
            0,0,0,0, 0,0,0x01,0x02,
            0,0,0,0,
        ]);
    }

    #[rstest]
    #[case::length_exceeds_received(40, 24)]
    #[case::length_below_header(4, 24)]
    fn test_parse_malformed(#[case] declared_len: u16, #[case] received: usize) {
        let codec = ChdrPacketCodec::new(ChdrWidth::W64, Endianness::Big);
        let mut header = ChdrHeader::new(PacketType::DataNoTs, 1);
        header.length = declared_len;

        let mut buff = FrameBuff::new(64);
        let raw = header.pack().to_be_bytes();
        buff.data_mut()[..8].copy_from_slice(&raw);
        buff.set_packet_size(received);

        assert!(matches!(codec.parse(&buff), Err(TransportError::MalformedPacket(_))));
    }

    #[test]
    fn test_parse_too_short_for_header() {
        let codec = ChdrPacketCodec::new(ChdrWidth::W64, Endianness::Big);
        let buff = FrameBuff::from_slice(64, &[1, 2, 3]);
        assert!(matches!(codec.parse(&buff), Err(TransportError::MalformedPacket(_))));
    }

    #[test]
    fn test_write_header_too_small() {
        let codec = ChdrPacketCodec::new(ChdrWidth::W64, Endianness::Big);
        let mut buff = FrameBuff::new(16);
        let header = codec.data_header(1, 0, false, 20).unwrap();
        assert!(matches!(codec.write_header(&mut buff, &header, None), Err(TransportError::BufferTooSmall { required: 28, available: 16 })));
    }

    #[rstest]
    #[case(ChdrWidth::W64)]
    #[case(ChdrWidth::W256)]
    fn test_strs_packet(#[case] chdr_w: ChdrWidth) {
        let codec = ChdrPacketCodec::new(chdr_w, Endianness::Big);
        let strs = StrsPayload { src_epid: 5, status: StrsStatus::Okay, capacity_bytes: 4096, capacity_pkts: 4, xfer_count_pkts: 1, xfer_count_bytes: 64, buff_info: 0, status_info: 0 };

        let mut buff = FrameBuff::new(128);
        let len = codec.write_strs(&mut buff, 6, 3, &strs).unwrap();
        assert_eq!(len, buff.packet_size());

        let (header, parsed) = codec.parse_strs(&buff).unwrap();
        assert_eq!(header.pkt_type, PacketType::Strs);
        assert_eq!(header.dst_epid, 6);
        assert_eq!(header.seq_num, 3);
        assert_eq!(parsed, strs);
    }

    #[test]
    fn test_strc_packet() {
        let codec = ChdrPacketCodec::new(ChdrWidth::W64, Endianness::Little);
        let strc = StrcPayload { src_epid: 1, op_code: StrcOpCode::Resync, op_data: 0, num_pkts: 10, num_bytes: 1000 };

        let mut buff = FrameBuff::new(64);
        codec.write_strc(&mut buff, 2, 0, &strc).unwrap();

        let (header, parsed) = codec.parse_strc(&buff).unwrap();
        assert_eq!(header.pkt_type, PacketType::Strc);
        assert_eq!(header.length, 24);
        assert_eq!(parsed, strc);
    }

    #[rstest]
    #[case::w64_ts(ChdrWidth::W64, 1024, PacketType::DataWithTs, 1008)]
    #[case::w64_no_ts(ChdrWidth::W64, 1024, PacketType::DataNoTs, 1016)]
    #[case::w128(ChdrWidth::W128, 1024, PacketType::DataWithTs, 1008)]
    #[case::jumbo(ChdrWidth::W64, 9000, PacketType::DataWithTs, 8984)]
    #[case::capped_by_length_field(ChdrWidth::W64, 100_000, PacketType::DataNoTs, 65527)]
    fn test_max_payload_len(#[case] chdr_w: ChdrWidth, #[case] frame_size: usize, #[case] pkt_type: PacketType, #[case] expected: usize) {
        let codec = ChdrPacketCodec::new(chdr_w, Endianness::Big);
        assert_eq!(codec.max_payload_len(frame_size, pkt_type), expected);
    }
}
