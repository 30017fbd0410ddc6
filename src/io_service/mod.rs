//! The I/O service moves frame buffers between links and the clients that use them. Clients
//!  never touch a link directly: they ask the service for buffers, and the service runs the
//!  client's callbacks on every packet that passes through.
//!
//! ## Callback contract
//!
//! Callbacks run on whatever task happens to service the link: the client's own call in the
//!  inline model, the worker task in the offload model. A callback may therefore never block or
//!  sleep - with several clients multiplexed on one link, a stalled callback stalls them all.
//!  This is why callbacks are synchronous, and why the link methods they may call
//!  (`release_recv_buff`, `try_get_send_buff`, `release_send_buff`) do not wait.
//!
//! A buffer passed to a callback is owned by it. A callback that does not consume the buffer
//!  hands it back as part of its result, so there is no way to both keep and return it.
//!
//! ## Scheduling models
//!
//! * [inline::InlineIoService] does all work synchronously inside the client's call. The only
//!   suspension point is the link's own wait, bounded by the caller's timeout.
//! * [offload::OffloadIoService] runs link access and callbacks on a dedicated worker task;
//!   clients exchange buffers with it through bounded queues.
//!
//! Both hand out the same [RecvIo] / [SendIo] client interfaces.
//!
//! ## Shared handler state
//!
//! A client's handler sits behind an `Arc<Mutex<..>>` that the client keeps a clone of. In the
//!  offload model this is the one piece of state the client task and the worker share: the
//!  worker locks it to run callbacks, and the client locks it for admission checks
//!  (`dest_has_space`), reservations and reads of its counters. Every lock is held for a single
//!  synchronous call and never across an await, so the mutex serializes all access to the
//!  handler's state.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::buffers::frame_buff::FrameBuff;
use crate::error::Result;
use crate::link::{RecvLink, SendLink};

pub mod inline;
pub mod offload;
mod recv_mux;

/// What a receive callback did with a buffer
#[derive(Debug)]
pub enum RecvAction {
    /// The packet is not for this client, offer it to the next one
    NotMine(FrameBuff),
    /// The packet was for this client and was fully handled by the callback (e.g. a flow
    ///  control packet) - the buffer was released to the link
    Consumed,
    /// The packet is for this client and should be handed out by its `get_recv_buff`
    Deliver(FrameBuff),
}

/// Classifies a packet arriving on a receive link. See the module documentation for the
///  constraints on callbacks.
pub trait RecvCallback: Send {
    fn on_recv(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>) -> RecvAction;
}

/// The callbacks of a receive-oriented client
pub trait RecvClientHandler: RecvCallback {
    /// Called when the client releases a buffer it got from `get_recv_buff`. The handler must
    ///  return the buffer to `recv_link`, possibly after sending a response on `send_link`.
    fn on_release(&mut self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>);
}

/// The callbacks of a send-oriented client. Its `on_recv` sees the packets arriving on the
///  client's associated receive link, typically flow control status.
pub trait SendClientHandler: RecvCallback {
    /// Sends the buffer on `send_link` if possible. Returns the buffer if it can not be sent
    ///  yet, e.g. because the destination has no room for it. Space reserved through
    ///  `reserve_dest_space` is held for packets queued behind this one and does not count.
    fn on_send(&mut self, buff: FrameBuff, send_link: &dyn SendLink) -> Option<FrameBuff>;

    /// Whether the destination currently has room for a packet of the given size, counting
    ///  reserved space as taken
    fn dest_has_space(&self, num_bytes: usize) -> bool;

    /// Holds destination space for an admitted packet that is queued for `on_send` but not sent
    ///  yet
    fn reserve_dest_space(&mut self, num_bytes: usize);

    /// Gives back space held by `reserve_dest_space`
    fn release_dest_space(&mut self, num_bytes: usize);
}

/// The registration of a client's callbacks on a receive link. The handler is shared with the
///  client, see "Shared handler state" above.
#[derive(Clone)]
pub(crate) enum RecvTarget {
    Recv(Arc<Mutex<dyn RecvClientHandler>>),
    Send(Arc<Mutex<dyn SendClientHandler>>),
}

impl RecvTarget {
    pub(crate) fn on_recv(&self, buff: FrameBuff, recv_link: &dyn RecvLink, send_link: Option<&dyn SendLink>) -> RecvAction {
        match self {
            RecvTarget::Recv(handler) => handler.lock().unwrap().on_recv(buff, recv_link, send_link),
            RecvTarget::Send(handler) => handler.lock().unwrap().on_recv(buff, recv_link, send_link),
        }
    }
}

/// Handle to a client's receive path
#[async_trait]
pub trait RecvIo: Send {
    /// Waits up to `timeout` for a packet destined for this client
    async fn get_recv_buff(&mut self, timeout: Duration) -> Option<FrameBuff>;

    /// Hands a buffer from `get_recv_buff` back, running the client's release callback
    fn release_recv_buff(&mut self, buff: FrameBuff);

    fn num_recv_frames(&self) -> usize;

    fn num_send_frames(&self) -> usize;
}

/// Handle to a client's send path
#[async_trait]
pub trait SendIo: Send {
    /// Waits up to `timeout` for an empty frame
    async fn get_send_buff(&mut self, timeout: Duration) -> Option<FrameBuff>;

    /// Waits up to `timeout` for the destination to have room for `num_bytes`, processing
    ///  status packets while waiting
    async fn wait_for_dest_ready(&mut self, num_bytes: usize, timeout: Duration) -> bool;

    /// Sends a filled buffer through the client's send callback
    async fn release_send_buff(&mut self, buff: FrameBuff);

    /// Handles a packet arriving on the associated receive link, waiting up to `timeout` for
    ///  one. Returns `false` if nothing was handled, or if packets are handled elsewhere and
    ///  the caller should not wait on this.
    async fn process_status(&mut self, timeout: Duration) -> bool;

    fn num_send_frames(&self) -> usize;

    fn num_recv_frames(&self) -> usize;
}

pub trait IoService: Send + Sync {
    fn attach_recv_link(&self, link: Arc<dyn RecvLink>);

    fn attach_send_link(&self, link: Arc<dyn SendLink>);

    fn detach_recv_link(&self, link: &Arc<dyn RecvLink>) -> Result<()>;

    fn detach_send_link(&self, link: &Arc<dyn SendLink>) -> Result<()>;

    /// Connects a receive-oriented client, reserving `num_recv_frames` on `data_link` and
    ///  `num_send_frames` on `fc_link` (if any). Fails if the links can not provide them.
    fn make_recv_client(
        &self,
        data_link: Arc<dyn RecvLink>,
        num_recv_frames: usize,
        handler: Arc<Mutex<dyn RecvClientHandler>>,
        fc_link: Option<Arc<dyn SendLink>>,
        num_send_frames: usize,
    ) -> Result<Box<dyn RecvIo>>;

    /// Connects a send-oriented client, reserving `num_send_frames` on `send_link` and
    ///  `num_recv_frames` on `recv_link` (if any). Fails if the links can not provide them.
    fn make_send_client(
        &self,
        send_link: Arc<dyn SendLink>,
        num_send_frames: usize,
        handler: Arc<Mutex<dyn SendClientHandler>>,
        recv_link: Option<Arc<dyn RecvLink>>,
        num_recv_frames: usize,
    ) -> Result<Box<dyn SendIo>>;
}

/// Identity of a link as a key for the service's tables
pub(crate) fn link_key<T: ?Sized>(link: &Arc<T>) -> usize {
    Arc::as_ptr(link) as *const () as usize
}
