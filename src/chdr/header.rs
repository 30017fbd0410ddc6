use std::fmt::{Debug, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::{Result, TransportError};

#[derive(Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Mgmt = 0,
    Strs = 1,
    Strc = 2,
    Ctrl = 4,
    DataNoTs = 6,
    DataWithTs = 7,
}

impl Debug for PacketType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Mgmt => write!(f, "MGMT"),
            PacketType::Strs => write!(f, "STRS"),
            PacketType::Strc => write!(f, "STRC"),
            PacketType::Ctrl => write!(f, "CTRL"),
            PacketType::DataNoTs => write!(f, "DATA_NO_TS"),
            PacketType::DataWithTs => write!(f, "DATA_WITH_TS"),
        }
    }
}

impl PacketType {
    pub fn is_data(self) -> bool {
        matches!(self, PacketType::DataNoTs | PacketType::DataWithTs)
    }

    pub fn has_timestamp(self) -> bool {
        self == PacketType::DataWithTs
    }

    pub fn data(has_timestamp: bool) -> PacketType {
        if has_timestamp {
            PacketType::DataWithTs
        }
        else {
            PacketType::DataNoTs
        }
    }
}

/// The 64-bit header word that starts every CHDR packet
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChdrHeader {
    /// virtual channel, 6 bits
    pub vc: u8,
    /// end of burst
    pub eob: bool,
    /// end of vector
    pub eov: bool,
    pub pkt_type: PacketType,
    /// number of metadata lines, 5 bits
    pub num_mdata: u8,
    pub seq_num: u16,
    /// total packet length in bytes, including header, timestamp and metadata
    pub length: u16,
    pub dst_epid: u16,
}

impl ChdrHeader {
    const VC_OFFSET: u32 = 58;
    const EOB_OFFSET: u32 = 57;
    const EOV_OFFSET: u32 = 56;
    const PKT_TYPE_OFFSET: u32 = 53;
    const NUM_MDATA_OFFSET: u32 = 48;
    const SEQ_NUM_OFFSET: u32 = 32;
    const LENGTH_OFFSET: u32 = 16;
    const DST_EPID_OFFSET: u32 = 0;

    const VC_MASK: u64 = 0x3f;
    const PKT_TYPE_MASK: u64 = 0x7;
    const NUM_MDATA_MASK: u64 = 0x1f;
    const U16_MASK: u64 = 0xffff;

    pub fn new(pkt_type: PacketType, dst_epid: u16) -> ChdrHeader {
        ChdrHeader {
            vc: 0,
            eob: false,
            eov: false,
            pkt_type,
            num_mdata: 0,
            seq_num: 0,
            length: 0,
            dst_epid,
        }
    }

    pub fn pack(&self) -> u64 {
        ((self.vc as u64 & Self::VC_MASK) << Self::VC_OFFSET)
            | ((self.eob as u64) << Self::EOB_OFFSET)
            | ((self.eov as u64) << Self::EOV_OFFSET)
            | ((u8::from(self.pkt_type) as u64 & Self::PKT_TYPE_MASK) << Self::PKT_TYPE_OFFSET)
            | ((self.num_mdata as u64 & Self::NUM_MDATA_MASK) << Self::NUM_MDATA_OFFSET)
            | ((self.seq_num as u64) << Self::SEQ_NUM_OFFSET)
            | ((self.length as u64) << Self::LENGTH_OFFSET)
            | ((self.dst_epid as u64) << Self::DST_EPID_OFFSET)
    }

    pub fn unpack(raw: u64) -> Result<ChdrHeader> {
        let raw_pkt_type = ((raw >> Self::PKT_TYPE_OFFSET) & Self::PKT_TYPE_MASK) as u8;
        let pkt_type = PacketType::try_from(raw_pkt_type)
            .map_err(|_| TransportError::InvalidPacketType(raw_pkt_type))?;

        Ok(ChdrHeader {
            vc: ((raw >> Self::VC_OFFSET) & Self::VC_MASK) as u8,
            eob: (raw >> Self::EOB_OFFSET) & 1 != 0,
            eov: (raw >> Self::EOV_OFFSET) & 1 != 0,
            pkt_type,
            num_mdata: ((raw >> Self::NUM_MDATA_OFFSET) & Self::NUM_MDATA_MASK) as u8,
            seq_num: ((raw >> Self::SEQ_NUM_OFFSET) & Self::U16_MASK) as u16,
            length: ((raw >> Self::LENGTH_OFFSET) & Self::U16_MASK) as u16,
            dst_epid: ((raw >> Self::DST_EPID_OFFSET) & Self::U16_MASK) as u16,
        })
    }
}
