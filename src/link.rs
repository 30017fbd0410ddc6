use std::time::Duration;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use crate::buffers::frame_buff::FrameBuff;

/// The receive side of a physical or simulated channel. A link owns a fixed number of frames;
///  it fills free frames with incoming packets and hands them out, and takes them back when
///  the packet is consumed.
///
/// `release_recv_buff` is called from I/O callbacks, so it must return without waiting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecvLink: Send + Sync + 'static {
    /// Waits up to `timeout` for a packet. `None` means that no packet arrived in time.
    async fn get_recv_buff(&self, timeout: Duration) -> Option<FrameBuff>;

    fn release_recv_buff(&self, buff: FrameBuff);

    fn num_recv_frames(&self) -> usize;

    fn recv_frame_size(&self) -> usize;
}

/// The send side of a physical or simulated channel.
///
/// `try_get_send_buff` and `release_send_buff` are called from I/O callbacks, so they must
///  return without waiting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendLink: Send + Sync + 'static {
    /// Waits up to `timeout` for a free frame
    async fn get_send_buff(&self, timeout: Duration) -> Option<FrameBuff>;

    /// Returns a free frame if one is available right now
    fn try_get_send_buff(&self) -> Option<FrameBuff>;

    /// Sends the frame's packet and recycles the frame. A frame with a packet size of zero is
    ///  recycled without sending anything.
    fn release_send_buff(&self, buff: FrameBuff);

    fn num_send_frames(&self) -> usize;

    fn send_frame_size(&self) -> usize;
}
