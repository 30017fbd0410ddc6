//! Inline scheduling: all link access and all callbacks run synchronously inside the client's
//!  own calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::buffers::frame_buff::FrameBuff;
use crate::error::{Result, TransportError};
use crate::io_service::recv_mux::{ClientId, ClientSlot, RecvDispatch};
use crate::io_service::{link_key, IoService, RecvClientHandler, RecvIo, RecvTarget, SendClientHandler, SendIo};
use crate::link::{RecvLink, SendLink};

/// Upper bound for waiting on status between attempts to send a packet the destination has no
///  room for
const STATUS_RETRY_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct RecvLinkEntry {
    pub link: Arc<dyn RecvLink>,
    state: Mutex<RecvLinkState>,
    /// signalled when a packet was queued for some client, so that clients waiting on the
    ///  link re-check their queues
    queued: Notify,
}

struct RecvLinkState {
    reserved: usize,
    dispatch: RecvDispatch,
}

impl RecvLinkEntry {
    fn new(link: Arc<dyn RecvLink>) -> RecvLinkEntry {
        RecvLinkEntry {
            link,
            state: Mutex::new(RecvLinkState {
                reserved: 0,
                dispatch: RecvDispatch::Idle,
            }),
            queued: Notify::new(),
        }
    }

    fn connect(&self, slot: ClientSlot) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let available = self.link.num_recv_frames();
        if state.reserved + slot.num_frames > available {
            return Err(TransportError::Resource {
                requested: slot.num_frames,
                reserved: state.reserved,
                available,
            });
        }
        state.reserved += slot.num_frames;
        state.dispatch.connect(slot, available);
        Ok(())
    }

    fn disconnect(&self, id: ClientId, num_frames: usize) {
        let mut state = self.state.lock().unwrap();
        state.dispatch.disconnect(id, self.link.as_ref());
        state.reserved -= num_frames;
    }

    fn num_clients(&self) -> usize {
        self.state.lock().unwrap().dispatch.num_clients()
    }

    /// Waits up to `timeout` for one packet on the link and runs it through the registered
    ///  callbacks. Packets already queued for `id` are handed out first.
    async fn poll(&self, id: ClientId, timeout: Duration) -> LinkPoll {
        let queued_for_someone = self.queued.notified();

        let own = self.state.lock().unwrap().dispatch.pop_queued(id);
        if let Some(buff) = own {
            return LinkPoll::Delivered(buff);
        }

        let buff = tokio::select! {
            buff = self.link.get_recv_buff(timeout) => buff,
            _ = queued_for_someone => return LinkPoll::Dispatched,
        };
        let Some(buff) = buff else {
            return LinkPoll::Idle;
        };

        let (delivered, muxed) = {
            let mut state = self.state.lock().unwrap();
            let delivered = state.dispatch.dispatch(id, buff, self.link.as_ref());
            (delivered, state.dispatch.is_muxed())
        };

        match delivered {
            Some(buff) => LinkPoll::Delivered(buff),
            None => {
                if muxed {
                    self.queued.notify_waiters();
                }
                LinkPoll::Dispatched
            }
        }
    }
}

/// The outcome of servicing a receive link once
enum LinkPoll {
    /// a packet for the calling client
    Delivered(FrameBuff),
    /// a packet was handled by a callback, queued for another client or dropped
    Dispatched,
    /// nothing arrived before the timeout
    Idle,
}

pub(crate) struct SendLinkEntry {
    pub link: Arc<dyn SendLink>,
    reserved: Mutex<usize>,
}

impl SendLinkEntry {
    fn reserve(&self, num_frames: usize) -> Result<()> {
        let mut reserved = self.reserved.lock().unwrap();
        let available = self.link.num_send_frames();
        if *reserved + num_frames > available {
            return Err(TransportError::Resource {
                requested: num_frames,
                reserved: *reserved,
                available,
            });
        }
        *reserved += num_frames;
        Ok(())
    }

    fn unreserve(&self, num_frames: usize) {
        *self.reserved.lock().unwrap() -= num_frames;
    }
}

#[derive(Default)]
struct InlineState {
    recv_links: Mutex<FxHashMap<usize, Arc<RecvLinkEntry>>>,
    send_links: Mutex<FxHashMap<usize, Arc<SendLinkEntry>>>,
    next_client_id: AtomicU64,
}

impl InlineState {
    fn recv_entry(&self, link: &Arc<dyn RecvLink>) -> Result<Arc<RecvLinkEntry>> {
        self.recv_links.lock().unwrap()
            .get(&link_key(link))
            .cloned()
            .ok_or(TransportError::LinkNotAttached)
    }

    fn send_entry(&self, link: &Arc<dyn SendLink>) -> Result<Arc<SendLinkEntry>> {
        self.send_links.lock().unwrap()
            .get(&link_key(link))
            .cloned()
            .ok_or(TransportError::LinkNotAttached)
    }

    fn new_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// An I/O service without threads of its own. Every client call services the links it needs
///  until its own request is satisfied or its timeout expires.
#[derive(Clone, Default)]
pub struct InlineIoService {
    inner: Arc<InlineState>,
}

impl InlineIoService {
    pub fn new() -> InlineIoService {
        InlineIoService::default()
    }

    /// [IoService::make_recv_client] with the concrete client type
    pub fn connect_recv_client(
        &self,
        data_link: Arc<dyn RecvLink>,
        num_recv_frames: usize,
        handler: Arc<Mutex<dyn RecvClientHandler>>,
        fc_link: Option<Arc<dyn SendLink>>,
        num_send_frames: usize,
    ) -> Result<InlineRecvIo> {
        let recv_entry = self.inner.recv_entry(&data_link)?;
        let fc_entry = fc_link.as_ref()
            .map(|l| self.inner.send_entry(l))
            .transpose()?;

        if let Some(fc_entry) = &fc_entry {
            fc_entry.reserve(num_send_frames)?;
        }

        let id = self.inner.new_client_id();
        let slot = ClientSlot {
            id,
            target: RecvTarget::Recv(handler.clone()),
            send_link: fc_link,
            num_frames: num_recv_frames,
        };
        if let Err(e) = recv_entry.connect(slot) {
            if let Some(fc_entry) = &fc_entry {
                fc_entry.unreserve(num_send_frames);
            }
            return Err(e);
        }

        debug!("connected receive client {} with {} receive / {} send frames", id, num_recv_frames, num_send_frames);
        Ok(InlineRecvIo {
            id,
            recv_entry,
            fc_entry,
            handler,
            num_recv_frames,
            num_send_frames,
        })
    }

    /// [IoService::make_send_client] with the concrete client type
    pub fn connect_send_client(
        &self,
        send_link: Arc<dyn SendLink>,
        num_send_frames: usize,
        handler: Arc<Mutex<dyn SendClientHandler>>,
        recv_link: Option<Arc<dyn RecvLink>>,
        num_recv_frames: usize,
    ) -> Result<InlineSendIo> {
        let send_entry = self.inner.send_entry(&send_link)?;
        let recv_entry = recv_link.as_ref()
            .map(|l| self.inner.recv_entry(l))
            .transpose()?;

        send_entry.reserve(num_send_frames)?;

        let id = self.inner.new_client_id();
        if let Some(recv_entry) = &recv_entry {
            let slot = ClientSlot {
                id,
                target: RecvTarget::Send(handler.clone()),
                send_link: Some(send_link),
                num_frames: num_recv_frames,
            };
            if let Err(e) = recv_entry.connect(slot) {
                send_entry.unreserve(num_send_frames);
                return Err(e);
            }
        }

        debug!("connected send client {} with {} send / {} receive frames", id, num_send_frames, num_recv_frames);
        Ok(InlineSendIo {
            id,
            send_entry,
            recv_entry,
            handler,
            num_send_frames,
            num_recv_frames,
        })
    }
}

impl IoService for InlineIoService {
    fn attach_recv_link(&self, link: Arc<dyn RecvLink>) {
        self.inner.recv_links.lock().unwrap()
            .entry(link_key(&link))
            .or_insert_with(|| Arc::new(RecvLinkEntry::new(link)));
    }

    fn attach_send_link(&self, link: Arc<dyn SendLink>) {
        self.inner.send_links.lock().unwrap()
            .entry(link_key(&link))
            .or_insert_with(|| Arc::new(SendLinkEntry {
                link,
                reserved: Mutex::new(0),
            }));
    }

    fn detach_recv_link(&self, link: &Arc<dyn RecvLink>) -> Result<()> {
        let mut links = self.inner.recv_links.lock().unwrap();
        let key = link_key(link);
        let entry = links.get(&key).ok_or(TransportError::LinkNotAttached)?;
        match entry.num_clients() {
            0 => {
                links.remove(&key);
                Ok(())
            }
            n => Err(TransportError::LinkInUse(n)),
        }
    }

    fn detach_send_link(&self, link: &Arc<dyn SendLink>) -> Result<()> {
        let mut links = self.inner.send_links.lock().unwrap();
        let key = link_key(link);
        let entry = links.get(&key).ok_or(TransportError::LinkNotAttached)?;

        // every client reserves at least one frame on its send link
        let reserved = *entry.reserved.lock().unwrap();
        if reserved > 0 {
            return Err(TransportError::LinkInUse(reserved));
        }
        links.remove(&key);
        Ok(())
    }

    fn make_recv_client(
        &self,
        data_link: Arc<dyn RecvLink>,
        num_recv_frames: usize,
        handler: Arc<Mutex<dyn RecvClientHandler>>,
        fc_link: Option<Arc<dyn SendLink>>,
        num_send_frames: usize,
    ) -> Result<Box<dyn RecvIo>> {
        Ok(Box::new(self.connect_recv_client(data_link, num_recv_frames, handler, fc_link, num_send_frames)?))
    }

    fn make_send_client(
        &self,
        send_link: Arc<dyn SendLink>,
        num_send_frames: usize,
        handler: Arc<Mutex<dyn SendClientHandler>>,
        recv_link: Option<Arc<dyn RecvLink>>,
        num_recv_frames: usize,
    ) -> Result<Box<dyn SendIo>> {
        Ok(Box::new(self.connect_send_client(send_link, num_send_frames, handler, recv_link, num_recv_frames)?))
    }
}


pub struct InlineRecvIo {
    id: ClientId,
    recv_entry: Arc<RecvLinkEntry>,
    fc_entry: Option<Arc<SendLinkEntry>>,
    handler: Arc<Mutex<dyn RecvClientHandler>>,
    num_recv_frames: usize,
    num_send_frames: usize,
}

#[async_trait]
impl RecvIo for InlineRecvIo {
    async fn get_recv_buff(&mut self, timeout: Duration) -> Option<FrameBuff> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_entry.poll(self.id, remaining).await {
                LinkPoll::Delivered(buff) => return Some(buff),
                LinkPoll::Dispatched => continue,
                LinkPoll::Idle => return None,
            }
        }
    }

    fn release_recv_buff(&mut self, buff: FrameBuff) {
        let fc_link = self.fc_entry.as_ref().map(|e| e.link.as_ref());
        self.handler.lock().unwrap()
            .on_release(buff, self.recv_entry.link.as_ref(), fc_link);
    }

    fn num_recv_frames(&self) -> usize {
        self.num_recv_frames
    }

    fn num_send_frames(&self) -> usize {
        self.num_send_frames
    }
}

impl Drop for InlineRecvIo {
    fn drop(&mut self) {
        debug!("disconnecting receive client {}", self.id);
        self.recv_entry.disconnect(self.id, self.num_recv_frames);
        if let Some(fc_entry) = &self.fc_entry {
            fc_entry.unreserve(self.num_send_frames);
        }
    }
}


pub struct InlineSendIo {
    id: ClientId,
    send_entry: Arc<SendLinkEntry>,
    recv_entry: Option<Arc<RecvLinkEntry>>,
    handler: Arc<Mutex<dyn SendClientHandler>>,
    num_send_frames: usize,
    num_recv_frames: usize,
}

impl InlineSendIo {
    fn dest_has_space(&self, num_bytes: usize) -> bool {
        self.handler.lock().unwrap().dest_has_space(num_bytes)
    }

    /// Services the associated receive link once, waiting up to `timeout`. Returns `false` if
    ///  there is no receive link or nothing arrived.
    pub(crate) async fn poll_recv_link(&self, timeout: Duration) -> bool {
        let Some(recv_entry) = &self.recv_entry else {
            return false;
        };

        match recv_entry.poll(self.id, timeout).await {
            LinkPoll::Delivered(buff) => {
                // the send handler's callback asked for delivery, but a send client has
                //  nobody to deliver to
                debug!("send client {} got a packet for delivery - discarding", self.id);
                recv_entry.link.release_recv_buff(buff);
                true
            }
            LinkPoll::Dispatched => true,
            LinkPoll::Idle => false,
        }
    }

    pub(crate) fn has_status_link(&self) -> bool {
        self.recv_entry.is_some()
    }

    /// Offers a packet to the send callback once. The packet's destination space must have been
    ///  reserved through the handler; the reservation is given back once the packet is sent.
    pub(crate) fn try_send_reserved(&self, buff: FrameBuff) -> Option<FrameBuff> {
        let num_bytes = buff.packet_size();
        if num_bytes == 0 {
            self.send_entry.link.release_send_buff(buff);
            return None;
        }

        let mut handler = self.handler.lock().unwrap();
        let rejected = handler.on_send(buff, self.send_entry.link.as_ref());
        if rejected.is_none() {
            handler.release_dest_space(num_bytes);
        }
        rejected
    }

    /// Returns a packet from [InlineSendIo::try_send_reserved] to the link unsent, along with
    ///  its reservation
    pub(crate) fn discard_reserved(&self, mut buff: FrameBuff) {
        let num_bytes = buff.packet_size();
        if num_bytes > 0 {
            self.handler.lock().unwrap().release_dest_space(num_bytes);
        }
        buff.clear();
        self.send_entry.link.release_send_buff(buff);
    }
}

#[async_trait]
impl SendIo for InlineSendIo {
    async fn get_send_buff(&mut self, timeout: Duration) -> Option<FrameBuff> {
        self.send_entry.link.get_send_buff(timeout).await
    }

    async fn wait_for_dest_ready(&mut self, num_bytes: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.dest_has_space(num_bytes) {
                return true;
            }
            if self.recv_entry.is_none() {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                // process whatever status arrived in the meantime, but do not wait for more
                while self.poll_recv_link(Duration::ZERO).await {}
                return self.dest_has_space(num_bytes);
            }
            self.poll_recv_link(deadline - now).await;
        }
    }

    async fn release_send_buff(&mut self, buff: FrameBuff) {
        if buff.packet_size() == 0 {
            trace!("returning unused send frame");
            self.send_entry.link.release_send_buff(buff);
            return;
        }

        let mut buff = buff;
        loop {
            let rejected = self.handler.lock().unwrap()
                .on_send(buff, self.send_entry.link.as_ref());
            let Some(mut rejected) = rejected else {
                return;
            };

            if self.recv_entry.is_none() {
                warn!("send client {} can not make progress without a status link - discarding packet", self.id);
                rejected.clear();
                self.send_entry.link.release_send_buff(rejected);
                return;
            }

            // bounded wait for status before the next attempt
            self.poll_recv_link(STATUS_RETRY_INTERVAL).await;
            buff = rejected;
        }
    }

    async fn process_status(&mut self, timeout: Duration) -> bool {
        self.poll_recv_link(timeout).await
    }

    fn num_send_frames(&self) -> usize {
        self.num_send_frames
    }

    fn num_recv_frames(&self) -> usize {
        self.num_recv_frames
    }
}

impl Drop for InlineSendIo {
    fn drop(&mut self) {
        debug!("disconnecting send client {}", self.id);
        self.send_entry.unreserve(self.num_send_frames);
        if let Some(recv_entry) = &self.recv_entry {
            recv_entry.disconnect(self.id, self.num_recv_frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::link::MockRecvLink;
    use crate::sim_link::{SimRecvLink, SimSendLink};
    use crate::test_util::{CreditHandler, TagHandler, CREDIT_TAG};

    fn sim_recv_link(num_frames: usize) -> Arc<SimRecvLink> {
        Arc::new(SimRecvLink::new(64, num_frames))
    }

    fn recv_client(srv: &InlineIoService, link: &Arc<SimRecvLink>, tag: u8, num_frames: usize) -> Result<InlineRecvIo> {
        let handler: Arc<Mutex<dyn RecvClientHandler>> = Arc::new(Mutex::new(TagHandler::new(tag)));
        srv.connect_recv_client(link.clone(), num_frames, handler, None, 0)
    }

    #[tokio::test]
    async fn test_link_not_attached() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        assert!(matches!(recv_client(&srv, &link, 1, 1), Err(TransportError::LinkNotAttached)));
    }

    #[rstest]
    #[case::fits(3, 1, true)]
    #[case::exact(2, 2, true)]
    #[case::over(3, 2, false)]
    fn test_reservation(#[case] first: usize, #[case] second: usize, #[case] expect_ok: bool) {
        let mut link = MockRecvLink::new();
        link.expect_num_recv_frames().return_const(4usize);
        let link: Arc<dyn RecvLink> = Arc::new(link);

        let srv = InlineIoService::new();
        srv.attach_recv_link(link.clone());

        let handler: Arc<Mutex<dyn RecvClientHandler>> = Arc::new(Mutex::new(TagHandler::new(1)));
        let _a = srv.connect_recv_client(link.clone(), first, handler.clone(), None, 0).unwrap();
        let b = srv.connect_recv_client(link.clone(), second, handler, None, 0);

        match b {
            Ok(_) => assert!(expect_ok),
            Err(TransportError::Resource { requested, reserved, available }) => {
                assert!(!expect_ok);
                assert_eq!((requested, reserved, available), (second, first, 4));
            }
            Err(e) => panic!("unexpected error {}", e),
        }
    }

    #[tokio::test]
    async fn test_reservation_freed_on_drop() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        srv.attach_recv_link(link.clone());

        let a = recv_client(&srv, &link, 1, 4).unwrap();
        assert!(recv_client(&srv, &link, 2, 1).is_err());
        drop(a);
        assert!(recv_client(&srv, &link, 2, 4).is_ok());
    }

    #[tokio::test]
    async fn test_send_reservation_rolled_back() {
        let srv = InlineIoService::new();
        let recv_link = sim_recv_link(2);
        let (send_link, _captured) = SimSendLink::capturing(64, 2);
        let send_link = Arc::new(send_link);
        srv.attach_recv_link(recv_link.clone());
        srv.attach_send_link(send_link.clone());

        let handler: Arc<Mutex<dyn RecvClientHandler>> = Arc::new(Mutex::new(TagHandler::new(1)));
        assert!(srv.connect_recv_client(recv_link.clone(), 3, handler.clone(), Some(send_link.clone()), 2).is_err());
        assert!(srv.connect_recv_client(recv_link.clone(), 2, handler, Some(send_link.clone()), 2).is_ok());
    }

    #[tokio::test]
    async fn test_single_client() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        srv.attach_recv_link(link.clone());
        let mut client = recv_client(&srv, &link, 1, 4).unwrap();

        link.push_packet(&[1, 10]);
        let buff = client.get_recv_buff(Duration::ZERO).await.unwrap();
        assert_eq!(buff.as_ref(), &[1, 10]);
        assert_eq!(link.num_free_frames(), 3);

        client.release_recv_buff(buff);
        assert_eq!(link.num_free_frames(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        srv.attach_recv_link(link.clone());
        let mut client = recv_client(&srv, &link, 1, 4).unwrap();

        let start = Instant::now();
        assert!(client.get_recv_buff(Duration::from_millis(20)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_mux_fan_out() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(8);
        srv.attach_recv_link(link.clone());
        let mut a = recv_client(&srv, &link, 1, 4).unwrap();
        let mut b = recv_client(&srv, &link, 2, 4).unwrap();

        for packet in [[2, 1], [2, 2], [1, 1], [2, 3]] {
            link.push_packet(&packet);
        }

        // a services the link until its own packet arrives, queueing b's packets on the way
        let buff = a.get_recv_buff(Duration::ZERO).await.unwrap();
        assert_eq!(buff.as_ref(), &[1, 1]);
        a.release_recv_buff(buff);

        for expected in [[2, 1], [2, 2], [2, 3]] {
            let buff = b.get_recv_buff(Duration::ZERO).await.unwrap();
            assert_eq!(buff.as_ref(), &expected);
            b.release_recv_buff(buff);
        }
        assert!(b.get_recv_buff(Duration::ZERO).await.is_none());
        assert_eq!(link.num_free_frames(), 8);
    }

    #[tokio::test]
    async fn test_unclaimed_packet_dropped() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        srv.attach_recv_link(link.clone());
        let mut a = recv_client(&srv, &link, 1, 2).unwrap();
        let _b = recv_client(&srv, &link, 2, 2).unwrap();

        link.push_packet(&[9, 9]);
        assert!(a.get_recv_buff(Duration::ZERO).await.is_none());
        assert_eq!(link.num_free_frames(), 4);
    }

    #[tokio::test]
    async fn test_drop_returns_queued_frames() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        srv.attach_recv_link(link.clone());
        let mut a = recv_client(&srv, &link, 1, 2).unwrap();
        let b = recv_client(&srv, &link, 2, 2).unwrap();

        link.push_packet(&[2, 1]);
        link.push_packet(&[2, 2]);
        assert!(a.get_recv_buff(Duration::ZERO).await.is_none());
        assert_eq!(link.num_free_frames(), 2);

        drop(b);
        assert_eq!(link.num_free_frames(), 4);
    }

    #[tokio::test]
    async fn test_mux_queues_beyond_reservation() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(8);
        srv.attach_recv_link(link.clone());
        let mut a = recv_client(&srv, &link, 1, 2).unwrap();
        let mut b = recv_client(&srv, &link, 2, 2).unwrap();

        for i in 0..3 {
            link.push_packet(&[2, i]);
        }
        assert!(a.get_recv_buff(Duration::ZERO).await.is_none());
        assert_eq!(link.num_free_frames(), 5);

        for i in 0..3 {
            let buff = b.get_recv_buff(Duration::ZERO).await.unwrap();
            assert_eq!(buff.as_ref(), &[2, i]);
            b.release_recv_buff(buff);
        }
        assert_eq!(link.num_free_frames(), 8);
    }

    #[tokio::test]
    async fn test_mux_conserves_frames() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(8);
        srv.attach_recv_link(link.clone());
        let mut a = recv_client(&srv, &link, 1, 3).unwrap();
        let mut b = recv_client(&srv, &link, 2, 3).unwrap();
        let mut c = recv_client(&srv, &link, 3, 2).unwrap();

        for round in 0..4u8 {
            for tag in [2, 9, 1, 3] {
                link.push_packet(&[tag, round]);
            }

            // b's packet is queued, the unclaimed one released, and c's still waits on the link
            let for_a = a.get_recv_buff(Duration::ZERO).await.unwrap();
            assert_eq!(link.num_free_frames(), 8 - 3, "round {}", round);

            let for_b = b.get_recv_buff(Duration::ZERO).await.unwrap();
            let for_c = c.get_recv_buff(Duration::ZERO).await.unwrap();
            assert_eq!((for_a.as_ref(), for_b.as_ref(), for_c.as_ref()), (&[1, round][..], &[2, round][..], &[3, round][..]));
            assert_eq!(link.num_free_frames(), 8 - 3);

            a.release_recv_buff(for_a);
            b.release_recv_buff(for_b);
            c.release_recv_buff(for_c);
            assert_eq!(link.num_free_frames(), 8, "round {}", round);
        }
    }

    #[tokio::test]
    async fn test_detach() {
        let srv = InlineIoService::new();
        let link = sim_recv_link(4);
        let dyn_link: Arc<dyn RecvLink> = link.clone();
        srv.attach_recv_link(dyn_link.clone());

        let client = recv_client(&srv, &link, 1, 2).unwrap();
        assert!(matches!(srv.detach_recv_link(&dyn_link), Err(TransportError::LinkInUse(1))));
        drop(client);
        assert!(srv.detach_recv_link(&dyn_link).is_ok());
        assert!(matches!(srv.detach_recv_link(&dyn_link), Err(TransportError::LinkNotAttached)));
    }

    struct SendFixture {
        status_link: Arc<SimRecvLink>,
        handler: Arc<Mutex<CreditHandler>>,
        client: InlineSendIo,
        captured: crate::sim_link::PacketReceiver,
    }

    fn send_fixture(credits: usize) -> SendFixture {
        let srv = InlineIoService::new();
        let status_link = sim_recv_link(2);
        let (send_link, captured) = SimSendLink::capturing(64, 2);
        let send_link = Arc::new(send_link);
        srv.attach_recv_link(status_link.clone());
        srv.attach_send_link(send_link.clone());

        let handler = Arc::new(Mutex::new(CreditHandler::new(credits)));
        let client = srv.connect_send_client(send_link, 2, handler.clone(), Some(status_link.clone()), 2).unwrap();
        SendFixture { status_link, handler, client, captured }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_dest_ready() {
        let mut f = send_fixture(0);

        assert!(!f.client.wait_for_dest_ready(8, Duration::from_millis(10)).await);

        f.status_link.push_packet(&[CREDIT_TAG]);
        assert!(f.client.wait_for_dest_ready(8, Duration::from_millis(10)).await);
        assert_eq!(f.status_link.num_free_frames(), 2);
    }

    #[tokio::test]
    async fn test_release_send_buff() {
        let mut f = send_fixture(1);

        let mut buff = f.client.get_send_buff(Duration::ZERO).await.unwrap();
        bytes::BufMut::put_slice(&mut buff, &[5, 6]);
        f.client.release_send_buff(buff).await;
        assert_eq!(f.captured.try_recv().unwrap(), vec![5, 6]);

        // no credit left: the packet is held until a status packet grants more
        f.status_link.push_packet(&[CREDIT_TAG]);
        let mut buff = f.client.get_send_buff(Duration::ZERO).await.unwrap();
        bytes::BufMut::put_slice(&mut buff, &[7]);
        f.client.release_send_buff(buff).await;
        assert_eq!(f.captured.try_recv().unwrap(), vec![7]);
        assert_eq!(f.handler.lock().unwrap().num_sent, 2);
    }

    #[tokio::test]
    async fn test_release_empty_send_buff() {
        let mut f = send_fixture(0);
        let buff = f.client.get_send_buff(Duration::ZERO).await.unwrap();
        f.client.release_send_buff(buff).await;
        assert!(f.captured.try_recv().is_err());
        assert_eq!(f.handler.lock().unwrap().num_sent, 0);
    }
}
