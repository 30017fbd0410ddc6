use tracing::debug;
use crate::chdr::ChdrWidth;
use crate::flow_control::StreamBuffParams;
use crate::safe_converter::SafeCast;

/// Flow control bookkeeping of the receiving end of a stream.
///
/// `recv_counts` grows when a packet arrives from the link, `xfer_counts` when the application
///  has released it again. The difference is what currently occupies the declared capacity.
///  Status responses report `xfer_counts` to the sender.
pub struct RxFlowCtrlState {
    chdr_w: ChdrWidth,
    capacity: StreamBuffParams,
    headroom: StreamBuffParams,
    fc_freq: StreamBuffParams,
    recv_counts: StreamBuffParams,
    xfer_counts: StreamBuffParams,
    last_resp_counts: StreamBuffParams,
}

impl RxFlowCtrlState {
    pub fn new(chdr_w: ChdrWidth, capacity: StreamBuffParams, headroom: StreamBuffParams) -> RxFlowCtrlState {
        RxFlowCtrlState {
            chdr_w,
            capacity,
            headroom,
            fc_freq: capacity,
            recv_counts: StreamBuffParams::ZERO,
            xfer_counts: StreamBuffParams::ZERO,
            last_resp_counts: StreamBuffParams::ZERO,
        }
    }

    /// Sets the response frequency, i.e. how much may be released before a status response
    ///  becomes due
    pub fn initialize(&mut self, fc_freq: StreamBuffParams) {
        debug!("initializing RX flow control with response frequency {:?}", fc_freq);
        self.fc_freq = fc_freq;
    }

    pub fn capacity(&self) -> StreamBuffParams {
        self.capacity
    }

    /// The threshold at which a response is due: the configured frequency, but no later than
    ///  the point where the sender's remaining credit has shrunk to the headroom
    pub fn effective_fc_freq(&self) -> StreamBuffParams {
        let latest = self.capacity.saturating_sub(self.headroom);
        StreamBuffParams {
            bytes: self.fc_freq.bytes.min(latest.bytes),
            packets: self.fc_freq.packets.min(latest.packets),
        }
    }

    fn rounded(&self, size_bytes: usize) -> StreamBuffParams {
        StreamBuffParams::new(self.chdr_w.round_up(size_bytes).safe_cast(), 1)
    }

    pub fn data_received(&mut self, size_bytes: usize) {
        self.recv_counts += self.rounded(size_bytes);
    }

    pub fn xfer_done(&mut self, size_bytes: usize) {
        self.xfer_counts += self.rounded(size_bytes);
    }

    pub fn fc_resp_due(&self) -> bool {
        let accumulated = self.xfer_counts - self.last_resp_counts;
        let threshold = self.effective_fc_freq();
        accumulated.bytes >= threshold.bytes || accumulated.packets >= threshold.packets
    }

    pub fn fc_resp_sent(&mut self) {
        self.last_resp_counts = self.xfer_counts;
    }

    /// Re-baselines the received counts to what the peer says it has sent. Whatever the peer
    ///  sent that never arrived is credited as transferred, since it will never be released
    ///  by the application.
    pub fn resynchronize(&mut self, counts: StreamBuffParams) {
        if counts != self.recv_counts {
            let dropped = counts - self.recv_counts;
            debug!("flow control resync: peer sent {:?}, received {:?}, crediting {:?}", counts, self.recv_counts, dropped);
            self.xfer_counts += dropped;
            self.recv_counts = counts;
        }
    }

    pub fn reset_counts(&mut self) {
        self.recv_counts = StreamBuffParams::ZERO;
        self.xfer_counts = StreamBuffParams::ZERO;
        self.last_resp_counts = StreamBuffParams::ZERO;
    }

    pub fn get_xfer_counts(&self) -> StreamBuffParams {
        self.xfer_counts
    }

    pub fn get_recv_counts(&self) -> StreamBuffParams {
        self.recv_counts
    }

    /// received but not yet released
    pub fn in_use(&self) -> StreamBuffParams {
        self.recv_counts - self.xfer_counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn state() -> RxFlowCtrlState {
        RxFlowCtrlState::new(ChdrWidth::W64, StreamBuffParams::new(4096, 4), StreamBuffParams::ZERO)
    }

    #[rstest]
    #[case::aligned(1024, 1024)]
    #[case::rounded(1025, 1032)]
    #[case::tiny(1, 8)]
    fn test_rounding(#[case] size: usize, #[case] expected: u64) {
        let mut fc = state();
        fc.data_received(size);
        assert_eq!(fc.get_recv_counts(), StreamBuffParams::new(expected, 1));
        fc.xfer_done(size);
        assert_eq!(fc.get_xfer_counts(), StreamBuffParams::new(expected, 1));
        assert_eq!(fc.in_use(), StreamBuffParams::ZERO);
    }

    #[test]
    fn test_rounding_wide_bus() {
        let mut fc = RxFlowCtrlState::new(ChdrWidth::W256, StreamBuffParams::new(4096, 4), StreamBuffParams::ZERO);
        fc.data_received(33);
        assert_eq!(fc.get_recv_counts(), StreamBuffParams::new(64, 1));
    }

    #[test]
    fn test_conservation() {
        let mut fc = state();
        let sizes = [100, 1024, 8, 900, 333, 1024, 17];

        // keep at most 3 packets outstanding, releasing in arrival order
        let mut outstanding = std::collections::VecDeque::new();
        for size in sizes {
            fc.data_received(size);
            outstanding.push_back(size);
            if outstanding.len() == 3 {
                fc.xfer_done(outstanding.pop_front().unwrap());
            }

            let in_use = fc.in_use();
            assert!(fc.get_xfer_counts().bytes <= fc.get_recv_counts().bytes);
            assert!(in_use.fits_into(&fc.capacity()));
        }
        while let Some(size) = outstanding.pop_front() {
            fc.xfer_done(size);
        }
        assert_eq!(fc.in_use(), StreamBuffParams::ZERO);
    }

    #[rstest]
    #[case::nothing(StreamBuffParams::new(1024, 2), vec![], false)]
    #[case::below(StreamBuffParams::new(1024, 2), vec![512], false)]
    #[case::bytes_reached(StreamBuffParams::new(1024, 2), vec![1024], true)]
    #[case::packets_reached(StreamBuffParams::new(1024, 2), vec![8, 8], true)]
    #[case::every_packet(StreamBuffParams::new(u64::MAX, 1), vec![8], true)]
    fn test_fc_resp_due(#[case] fc_freq: StreamBuffParams, #[case] released: Vec<usize>, #[case] expected: bool) {
        let mut fc = state();
        fc.initialize(fc_freq);
        for &size in &released {
            fc.data_received(size);
            fc.xfer_done(size);
        }
        assert_eq!(fc.fc_resp_due(), expected);
    }

    #[test]
    fn test_fc_resp_sent() {
        let mut fc = state();
        fc.initialize(StreamBuffParams::new(1024, 1));
        fc.data_received(64);
        fc.xfer_done(64);
        assert!(fc.fc_resp_due());

        fc.fc_resp_sent();
        assert!(!fc.fc_resp_due());

        fc.data_received(64);
        fc.xfer_done(64);
        assert!(fc.fc_resp_due());
    }

    #[rstest]
    #[case::no_headroom(StreamBuffParams::ZERO, StreamBuffParams::new(4096, 4))]
    #[case::headroom(StreamBuffParams::new(1024, 1), StreamBuffParams::new(3072, 3))]
    #[case::headroom_exceeds_capacity(StreamBuffParams::new(8192, 8), StreamBuffParams::ZERO)]
    fn test_effective_fc_freq(#[case] headroom: StreamBuffParams, #[case] expected: StreamBuffParams) {
        let fc = RxFlowCtrlState::new(ChdrWidth::W64, StreamBuffParams::new(4096, 4), headroom);
        assert_eq!(fc.effective_fc_freq(), expected);
    }

    #[test]
    fn test_resynchronize_credits_lost_data() {
        let mut fc = state();
        fc.data_received(64);
        fc.xfer_done(64);

        // peer sent two more packets of 64 bytes that were lost
        fc.resynchronize(StreamBuffParams::new(192, 3));
        assert_eq!(fc.get_recv_counts(), StreamBuffParams::new(192, 3));
        assert_eq!(fc.get_xfer_counts(), StreamBuffParams::new(192, 3));
        assert_eq!(fc.in_use(), StreamBuffParams::ZERO);
    }

    #[test]
    fn test_resynchronize_preserves_outstanding() {
        let mut fc = state();
        fc.data_received(64);
        fc.data_received(64);
        fc.xfer_done(64);

        fc.resynchronize(StreamBuffParams::new(256, 4));
        assert_eq!(fc.in_use(), StreamBuffParams::new(64, 1));
        assert_eq!(fc.get_xfer_counts(), StreamBuffParams::new(192, 3));
    }

    #[test]
    fn test_resynchronize_in_agreement() {
        let mut fc = state();
        fc.data_received(64);
        fc.resynchronize(StreamBuffParams::new(64, 1));
        assert_eq!(fc.get_xfer_counts(), StreamBuffParams::ZERO);
    }

    #[test]
    fn test_reset_counts() {
        let mut fc = state();
        fc.data_received(64);
        fc.xfer_done(64);
        fc.fc_resp_sent();
        fc.reset_counts();
        assert_eq!(fc.get_recv_counts(), StreamBuffParams::ZERO);
        assert_eq!(fc.get_xfer_counts(), StreamBuffParams::ZERO);
    }
}
