use std::collections::VecDeque;
use std::sync::Arc;
use rustc_hash::FxHashMap;
use tracing::debug;
use crate::buffers::frame_buff::FrameBuff;
use crate::io_service::{RecvAction, RecvTarget};
use crate::link::{RecvLink, SendLink};

pub(crate) type ClientId = u64;

/// A client's registration on a receive link
pub(crate) struct ClientSlot {
    pub id: ClientId,
    pub target: RecvTarget,
    /// the send link the client's callbacks may respond on
    pub send_link: Option<Arc<dyn SendLink>>,
    pub num_frames: usize,
}

impl ClientSlot {
    fn on_recv(&self, buff: FrameBuff, recv_link: &dyn RecvLink) -> RecvAction {
        self.target.on_recv(buff, recv_link, self.send_link.as_deref())
    }
}

/// Per-client queues for packets that arrived on a shared link while another client was
///  servicing it.
///
/// A peer is free to send more packets for one client than that client reserved frames for,
///  so every queue is sized for all of the link's frames. A queue can therefore never overflow,
///  and every queued packet is eventually released through its owner's handler.
pub(crate) struct RecvMux {
    clients: Vec<ClientSlot>,
    queues: FxHashMap<ClientId, VecDeque<FrameBuff>>,
    link_frames: usize,
}

impl RecvMux {
    fn new(link_frames: usize) -> RecvMux {
        RecvMux {
            clients: Vec::new(),
            queues: FxHashMap::default(),
            link_frames,
        }
    }

    fn add(&mut self, slot: ClientSlot) {
        self.queues.insert(slot.id, VecDeque::with_capacity(self.link_frames));
        self.clients.push(slot);
    }

    fn enqueue(&mut self, id: ClientId, buff: FrameBuff) {
        let link_frames = self.link_frames;
        self.queues.entry(id)
            .or_insert_with(|| VecDeque::with_capacity(link_frames))
            .push_back(buff);
    }
}

/// How packets on a receive link are distributed to clients. The mux is only set up when a
///  second client connects to a link.
pub(crate) enum RecvDispatch {
    Idle,
    Exclusive(ClientSlot),
    Mux(RecvMux),
}

impl RecvDispatch {
    pub fn num_clients(&self) -> usize {
        match self {
            RecvDispatch::Idle => 0,
            RecvDispatch::Exclusive(_) => 1,
            RecvDispatch::Mux(mux) => mux.clients.len(),
        }
    }

    pub fn is_muxed(&self) -> bool {
        matches!(self, RecvDispatch::Mux(_))
    }

    /// `link_frames` is the total number of frames the receive link has
    pub fn connect(&mut self, slot: ClientSlot, link_frames: usize) {
        *self = match std::mem::replace(self, RecvDispatch::Idle) {
            RecvDispatch::Idle => RecvDispatch::Exclusive(slot),
            RecvDispatch::Exclusive(existing) => {
                debug!("second client on receive link: setting up mux");
                let mut mux = RecvMux::new(link_frames);
                mux.add(existing);
                mux.add(slot);
                RecvDispatch::Mux(mux)
            }
            RecvDispatch::Mux(mut mux) => {
                mux.add(slot);
                RecvDispatch::Mux(mux)
            }
        }
    }

    /// Removes a client, returning any packets still queued for it to the link
    pub fn disconnect(&mut self, id: ClientId, recv_link: &dyn RecvLink) {
        match self {
            RecvDispatch::Idle => {}
            RecvDispatch::Exclusive(slot) => {
                if slot.id == id {
                    *self = RecvDispatch::Idle;
                }
            }
            RecvDispatch::Mux(mux) => {
                mux.clients.retain(|c| c.id != id);
                if let Some(queue) = mux.queues.remove(&id) {
                    for buff in queue {
                        recv_link.release_recv_buff(buff);
                    }
                }
                if mux.clients.is_empty() {
                    *self = RecvDispatch::Idle;
                }
            }
        }
    }

    pub fn pop_queued(&mut self, id: ClientId) -> Option<FrameBuff> {
        match self {
            RecvDispatch::Mux(mux) => mux.queues.get_mut(&id)?.pop_front(),
            _ => None,
        }
    }

    /// Offers a packet that arrived on the link to the registered clients. Returns the buffer if
    ///  it is destined for `caller`; buffers for other clients are queued for them, and buffers
    ///  nobody claims are released to the link.
    pub fn dispatch(&mut self, caller: ClientId, buff: FrameBuff, recv_link: &dyn RecvLink) -> Option<FrameBuff> {
        match self {
            RecvDispatch::Idle => {
                debug!("dropping packet on receive link without clients");
                recv_link.release_recv_buff(buff);
                None
            }
            RecvDispatch::Exclusive(slot) => {
                match slot.on_recv(buff, recv_link) {
                    RecvAction::Consumed => None,
                    RecvAction::Deliver(buff) if slot.id == caller => Some(buff),
                    RecvAction::Deliver(buff) | RecvAction::NotMine(buff) => {
                        debug!("dropping packet with no receiver");
                        recv_link.release_recv_buff(buff);
                        None
                    }
                }
            }
            RecvDispatch::Mux(mux) => {
                let mut buff = buff;
                let mut claimed_by = None;
                for slot in &mux.clients {
                    match slot.on_recv(buff, recv_link) {
                        RecvAction::NotMine(b) => buff = b,
                        RecvAction::Consumed => return None,
                        RecvAction::Deliver(b) => {
                            buff = b;
                            claimed_by = Some(slot.id);
                            break;
                        }
                    }
                }

                match claimed_by {
                    Some(id) if id == caller => Some(buff),
                    Some(id) => {
                        mux.enqueue(id, buff);
                        None
                    }
                    None => {
                        debug!("dropping packet with no receiver");
                        recv_link.release_recv_buff(buff);
                        None
                    }
                }
            }
        }
    }
}
