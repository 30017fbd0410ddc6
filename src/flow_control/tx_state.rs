use tracing::{debug, warn};
use crate::chdr::ChdrWidth;
use crate::flow_control::StreamBuffParams;
use crate::safe_converter::SafeCast;
use crate::seq_num::is_newer;

/// Flow control bookkeeping of the sending end of a stream.
///
/// A packet may be sent only while everything sent but not yet acknowledged by the peer, plus
///  the packet itself, fits into the destination's capacity.
///
/// Packets that were admitted but are still queued for sending can hold a reservation, which
///  counts against the capacity just like packets in flight.
pub struct TxFlowCtrlState {
    chdr_w: ChdrWidth,
    lossy_xport: bool,
    dest_capacity: StreamBuffParams,
    reserved: StreamBuffParams,
    xfer_counts: StreamBuffParams,
    recv_counts: StreamBuffParams,
    fc_resync_req_pending: bool,
}

impl TxFlowCtrlState {
    pub fn new(chdr_w: ChdrWidth, dest_capacity: StreamBuffParams, lossy_xport: bool) -> TxFlowCtrlState {
        TxFlowCtrlState {
            chdr_w,
            lossy_xport,
            dest_capacity,
            reserved: StreamBuffParams::ZERO,
            xfer_counts: StreamBuffParams::ZERO,
            recv_counts: StreamBuffParams::ZERO,
            fc_resync_req_pending: false,
        }
    }

    pub fn set_dest_capacity(&mut self, dest_capacity: StreamBuffParams) {
        debug!("destination capacity set to {:?}", dest_capacity);
        self.dest_capacity = dest_capacity;
    }

    pub fn get_dest_capacity(&self) -> StreamBuffParams {
        self.dest_capacity
    }

    fn rounded(&self, size_bytes: usize) -> StreamBuffParams {
        StreamBuffParams::new(self.chdr_w.round_up(size_bytes).safe_cast(), 1)
    }

    /// sent, but not yet acknowledged by the peer
    pub fn in_flight(&self) -> StreamBuffParams {
        self.xfer_counts - self.recv_counts
    }

    /// Whether a new packet can be admitted: reserved space counts as taken
    pub fn dest_has_space(&self, num_bytes: usize) -> bool {
        self.fits(self.in_flight() + self.reserved, num_bytes)
    }

    /// Whether a packet can go out right now. Only what is in flight counts, since reservations
    ///  are held by packets queued behind this one.
    pub fn can_send(&self, num_bytes: usize) -> bool {
        self.fits(self.in_flight(), num_bytes)
    }

    fn fits(&self, taken: StreamBuffParams, num_bytes: usize) -> bool {
        let packet = self.rounded(num_bytes);

        taken.bytes.checked_add(packet.bytes).is_some_and(|b| b <= self.dest_capacity.bytes)
            && taken.packets.checked_add(packet.packets).is_some_and(|p| p <= self.dest_capacity.packets)
    }

    /// Holds destination space for an admitted packet that has not been sent yet
    pub fn reserve(&mut self, size_bytes: usize) {
        self.reserved += self.rounded(size_bytes);
    }

    /// Gives back space held by [TxFlowCtrlState::reserve]
    pub fn release_reservation(&mut self, size_bytes: usize) {
        self.reserved = self.reserved.saturating_sub(self.rounded(size_bytes));
    }

    pub fn get_reserved(&self) -> StreamBuffParams {
        self.reserved
    }

    pub fn data_sent(&mut self, size_bytes: usize) {
        self.xfer_counts += self.rounded(size_bytes);
    }

    /// Applies the transfer counts from a status packet. Counts that go backwards or claim more
    ///  than was ever sent cannot be applied - on a lossy link this means the two ends disagree,
    ///  and a resync is requested.
    pub fn update_dest_recv_count(&mut self, counts: StreamBuffParams) {
        let regressed = is_newer(self.recv_counts.bytes, counts.bytes)
            || is_newer(self.recv_counts.packets, counts.packets);
        let overshot = is_newer(counts.bytes, self.xfer_counts.bytes)
            || is_newer(counts.packets, self.xfer_counts.packets);

        if regressed || overshot {
            if self.lossy_xport {
                debug!("peer reported {:?} while {:?} was sent and {:?} acknowledged: requesting resync", counts, self.xfer_counts, self.recv_counts);
                self.fc_resync_req_pending = true;
            }
            else {
                warn!("ignoring inconsistent flow control status: peer reported {:?} while {:?} was sent and {:?} acknowledged", counts, self.xfer_counts, self.recv_counts);
            }
            return;
        }

        self.recv_counts = counts;
    }

    pub fn request_resync(&mut self) {
        if self.lossy_xport {
            self.fc_resync_req_pending = true;
        }
    }

    pub fn get_fc_resync_req_pending(&self) -> bool {
        self.fc_resync_req_pending
    }

    pub fn clear_fc_resync_req_pending(&mut self) {
        self.fc_resync_req_pending = false;
    }

    /// what was sent so far - this is what a resync request carries
    pub fn get_xfer_counts(&self) -> StreamBuffParams {
        self.xfer_counts
    }

    /// what the peer acknowledged most recently
    pub fn get_recv_counts(&self) -> StreamBuffParams {
        self.recv_counts
    }
}
