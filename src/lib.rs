//! Host side of a CHDR data plane: moving sample streams to and from radio devices over links
//!  that carry fixed-size frames.
//!
//! The layers, bottom up:
//! * [link] and [buffers] - links hand out and take back [buffers::frame_buff::FrameBuff]s
//! * [io_service] - shares links between transports, with credit based flow control callbacks
//! * [rx_data_xport] and [tx_data_xport] - one sample stream each, with sequence checking and
//!   stream status (STRS) / stream command (STRC) handling
//! * [streamer] - converted, contiguous sample buffers across one or more channels
//!
//! ## Packet layout
//!
//! All fields are in the link's byte order, packed into 64-bit words. The header word is padded
//!  to the CHDR width, as is every other line.
//!
//! ```ascii
//! CHDR header
//!  63      58  57  56  55  53 52   48 47          32 31           16 15            0
//! +----------+---+---+------+-------+--------------+---------------+---------------+
//! |    VC    |EOB|EOV| type | mdata |   seq num    |    length     |   dst EPID    |
//! +----------+---+---+------+-------+--------------+---------------+---------------+
//! | timestamp (DATA_WITH_TS only; own line at 64 bits, else in the header line)     |
//! +--------------------------------------------------------------------------------+
//! | metadata (mdata lines) ...                                                      |
//! +--------------------------------------------------------------------------------+
//! | payload ...                                                                     |
//! +--------------------------------------------------------------------------------+
//!
//! STRS payload
//!  63                              24 23      20 19      16 15                     0
//! +----------------------------------+----------+----------+-----------------------+
//! |        capacity (bytes, 40)      |  (rsvd)  |  status  |       src EPID        |
//! +----------------------------------+----------+----------+-----------------------+
//! |     xfer count (packets, 40)     |          capacity (packets, 24)             |
//! +----------------------------------+---------------------------------------------+
//! |                          xfer count (bytes, 64)                                |
//! +----------------------------------------------------------+---------------------+
//! |                  status info (48)                        |     buff info       |
//! +----------------------------------------------------------+---------------------+
//!
//! STRC payload
//!  63                              24 23      20 19      16 15                     0
//! +----------------------------------+----------+----------+-----------------------+
//! |       num packets (40)           | op data  | op code  |       src EPID        |
//! +----------------------------------+----------+----------+-----------------------+
//! |                            num bytes (64)                                      |
//! +--------------------------------------------------------------------------------+
//! ```

pub mod buffers;
pub mod chdr;
pub mod config;
pub mod convert;
pub mod error;
pub mod flow_control;
pub mod io_service;
pub mod link;
pub mod rx_data_xport;
pub mod safe_converter;
pub mod seq_num;
pub mod sim_link;
pub mod streamer;
pub mod time_spec;
pub mod tx_data_xport;

#[cfg(test)]
mod test_util;
