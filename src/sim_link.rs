//! In-memory links. A [SimSendLink] delivers each sent packet to a channel, which can be read
//!  directly or feed a [SimRecvLink] to form a loopback. A drop filter on the send side models a
//!  lossy medium.

use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use bytes::BufMut;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::buffers::frame_buff::FrameBuff;
use crate::buffers::frame_pool::FramePool;
use crate::link::{RecvLink, SendLink};

pub type PacketSender = mpsc::UnboundedSender<Vec<u8>>;
pub type PacketReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Decides per packet whether it is lost; `true` drops the packet
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;


pub struct SimRecvLink {
    pool: FramePool,
    injector: PacketSender,
    incoming: tokio::sync::Mutex<PacketReceiver>,
}

impl SimRecvLink {
    pub fn new(frame_size: usize, num_frames: usize) -> SimRecvLink {
        let (injector, incoming) = mpsc::unbounded_channel();
        SimRecvLink {
            pool: FramePool::new(frame_size, num_frames),
            injector,
            incoming: tokio::sync::Mutex::new(incoming),
        }
    }

    /// A handle for feeding packets into this link, e.g. from a [SimSendLink]
    pub fn injector(&self) -> PacketSender {
        self.injector.clone()
    }

    pub fn push_packet(&self, packet: &[u8]) {
        // the receiver lives as long as self, so this cannot fail
        let _ = self.injector.send(packet.to_vec());
    }

    pub fn num_free_frames(&self) -> usize {
        self.pool.num_free()
    }
}

#[async_trait]
impl RecvLink for SimRecvLink {
    async fn get_recv_buff(&self, timeout: Duration) -> Option<FrameBuff> {
        let deadline = Instant::now() + timeout;
        let mut incoming = self.incoming.lock().await;

        loop {
            if self.pool.num_free() == 0 {
                trace!("no free receive frame");
                return None;
            }

            let packet = match tokio::time::timeout_at(deadline, incoming.recv()).await {
                Ok(Some(packet)) => packet,
                Ok(None) | Err(_) => return None,
            };

            if packet.len() > self.pool.frame_size() {
                warn!("dropping packet of {} bytes exceeding the frame size of {} bytes", packet.len(), self.pool.frame_size());
                continue;
            }

            let mut frame = self.pool.get_from_pool()?;
            frame.put_slice(&packet);
            trace!("received packet of {} bytes", packet.len());
            return Some(frame);
        }
    }

    fn release_recv_buff(&self, buff: FrameBuff) {
        self.pool.return_to_pool(buff);
    }

    fn num_recv_frames(&self) -> usize {
        self.pool.num_frames()
    }

    fn recv_frame_size(&self) -> usize {
        self.pool.frame_size()
    }
}


pub struct SimSendLink {
    pool: FramePool,
    frame_returned: Notify,
    sink: PacketSender,
    drop_filter: Mutex<Option<DropFilter>>,
}

impl SimSendLink {
    pub fn new(frame_size: usize, num_frames: usize, sink: PacketSender) -> SimSendLink {
        SimSendLink {
            pool: FramePool::new(frame_size, num_frames),
            frame_returned: Notify::new(),
            sink,
            drop_filter: Mutex::new(None),
        }
    }

    /// A link whose sent packets can be read from the returned receiver
    pub fn capturing(frame_size: usize, num_frames: usize) -> (SimSendLink, PacketReceiver) {
        let (sink, captured) = mpsc::unbounded_channel();
        (SimSendLink::new(frame_size, num_frames, sink), captured)
    }

    pub fn set_drop_filter(&self, filter: DropFilter) {
        *self.drop_filter.lock().unwrap() = Some(filter);
    }

    pub fn num_free_frames(&self) -> usize {
        self.pool.num_free()
    }
}

#[async_trait]
impl SendLink for SimSendLink {
    async fn get_send_buff(&self, timeout: Duration) -> Option<FrameBuff> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.frame_returned.notified();
            if let Some(frame) = self.pool.get_from_pool() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn try_get_send_buff(&self) -> Option<FrameBuff> {
        self.pool.get_from_pool()
    }

    fn release_send_buff(&self, buff: FrameBuff) {
        if buff.packet_size() > 0 {
            let dropped = match self.drop_filter.lock().unwrap().as_mut() {
                Some(filter) => filter(buff.as_ref()),
                None => false,
            };

            if dropped {
                debug!("simulating loss of a packet of {} bytes", buff.packet_size());
            }
            else if self.sink.send(buff.as_ref().to_vec()).is_err() {
                debug!("receiving end of simulated link is closed - discarding packet");
            }
        }

        self.pool.return_to_pool(buff);
        self.frame_returned.notify_one();
    }

    fn num_send_frames(&self) -> usize {
        self.pool.num_frames()
    }

    fn send_frame_size(&self) -> usize {
        self.pool.frame_size()
    }
}
