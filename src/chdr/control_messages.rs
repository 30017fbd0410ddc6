use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::chdr::Endianness;
use crate::error::{Result, TransportError};
use crate::flow_control::StreamBuffParams;

const MASK_4: u64 = 0xf;
const MASK_16: u64 = 0xffff;
const MASK_24: u64 = 0xff_ffff;
const MASK_40: u64 = 0xff_ffff_ffff;
const MASK_48: u64 = 0xffff_ffff_ffff;

/// Status code carried in a stream status packet
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StrsStatus {
    Okay = 0,
    /// command error
    CmdErr = 1,
    /// sequence error, i.e. the peer detected a gap in data packet sequence numbers
    SeqErr = 2,
    /// data error
    DataErr = 3,
    /// routing error
    RtErr = 4,
}

/// Stream status (STRS): sent by the receiving end of a stream to report how much it has
///  consumed. This is what releases credit on the sending side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StrsPayload {
    pub src_epid: u16,
    pub status: StrsStatus,
    /// 40 bits
    pub capacity_bytes: u64,
    /// 24 bits
    pub capacity_pkts: u32,
    /// 40 bits
    pub xfer_count_pkts: u64,
    pub xfer_count_bytes: u64,
    pub buff_info: u16,
    /// 48 bits
    pub status_info: u64,
}

impl StrsPayload {
    pub const SERIALIZED_LEN: usize = 4 * size_of::<u64>();

    pub fn ser(&self, buf: &mut impl BufMut, endianness: Endianness) {
        endianness.put_u64(buf,
            (self.src_epid as u64)
                | ((u8::from(self.status) as u64 & MASK_4) << 16)
                | ((self.capacity_bytes & MASK_40) << 24));
        endianness.put_u64(buf,
            (self.capacity_pkts as u64 & MASK_24)
                | ((self.xfer_count_pkts & MASK_40) << 24));
        endianness.put_u64(buf, self.xfer_count_bytes);
        endianness.put_u64(buf,
            (self.buff_info as u64)
                | ((self.status_info & MASK_48) << 16));
    }

    pub fn deser(buf: &mut impl Buf, endianness: Endianness) -> Result<StrsPayload> {
        let w0 = endianness.try_get_u64(buf)?;
        let w1 = endianness.try_get_u64(buf)?;
        let w2 = endianness.try_get_u64(buf)?;
        let w3 = endianness.try_get_u64(buf)?;

        let raw_status = ((w0 >> 16) & MASK_4) as u8;
        let status = StrsStatus::try_from(raw_status)
            .map_err(|_| TransportError::MalformedPacket(format!("invalid STRS status {}", raw_status)))?;

        Ok(StrsPayload {
            src_epid: (w0 & MASK_16) as u16,
            status,
            capacity_bytes: (w0 >> 24) & MASK_40,
            capacity_pkts: (w1 & MASK_24) as u32,
            xfer_count_pkts: (w1 >> 24) & MASK_40,
            xfer_count_bytes: w2,
            buff_info: (w3 & MASK_16) as u16,
            status_info: (w3 >> 16) & MASK_48,
        })
    }

    /// The transfer counts as flow control parameters. Packet counts beyond 32 bits wrap, which
    ///  is consistent with the wrapping arithmetic of the flow control counters.
    pub fn xfer_counts(&self) -> StreamBuffParams {
        StreamBuffParams {
            bytes: self.xfer_count_bytes,
            packets: self.xfer_count_pkts as u32,
        }
    }
}


#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StrcOpCode {
    /// (re-)initialize flow control, carrying the response frequency in the counts
    Init = 0,
    /// request an immediate status response
    Ping = 1,
    /// re-baseline the receiver's counters to the counts in this packet
    Resync = 2,
}

/// Stream command (STRC): sent by the sending end of a stream to the receiving end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StrcPayload {
    pub src_epid: u16,
    pub op_code: StrcOpCode,
    /// 4 bits
    pub op_data: u8,
    /// 40 bits
    pub num_pkts: u64,
    pub num_bytes: u64,
}

impl StrcPayload {
    pub const SERIALIZED_LEN: usize = 2 * size_of::<u64>();

    pub fn new(src_epid: u16, op_code: StrcOpCode, counts: StreamBuffParams) -> StrcPayload {
        StrcPayload {
            src_epid,
            op_code,
            op_data: 0,
            num_pkts: counts.packets as u64,
            num_bytes: counts.bytes,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut, endianness: Endianness) {
        endianness.put_u64(buf,
            (self.src_epid as u64)
                | ((u8::from(self.op_code) as u64 & MASK_4) << 16)
                | ((self.op_data as u64 & MASK_4) << 20)
                | ((self.num_pkts & MASK_40) << 24));
        endianness.put_u64(buf, self.num_bytes);
    }

    pub fn deser(buf: &mut impl Buf, endianness: Endianness) -> Result<StrcPayload> {
        let w0 = endianness.try_get_u64(buf)?;
        let w1 = endianness.try_get_u64(buf)?;

        let raw_op_code = ((w0 >> 16) & MASK_4) as u8;
        let op_code = StrcOpCode::try_from(raw_op_code)
            .map_err(|_| TransportError::MalformedPacket(format!("invalid STRC op code {}", raw_op_code)))?;

        Ok(StrcPayload {
            src_epid: (w0 & MASK_16) as u16,
            op_code,
            op_data: ((w0 >> 20) & MASK_4) as u8,
            num_pkts: (w0 >> 24) & MASK_40,
            num_bytes: w1,
        })
    }

    pub fn counts(&self) -> StreamBuffParams {
        StreamBuffParams {
            bytes: self.num_bytes,
            packets: self.num_pkts as u32,
        }
    }
}
