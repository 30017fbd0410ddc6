//! Offloaded scheduling: a dedicated worker task performs all link access and runs all
//!  callbacks. Clients exchange frame buffers with the worker through bounded queues, so a
//!  client call never touches a link.
//!
//! Internally the worker drives an [InlineIoService]: every client is represented by an inline
//!  client ("port") owned by the worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::buffers::frame_buff::FrameBuff;
use crate::config::OffloadConfig;
use crate::error::{Result, TransportError};
use crate::io_service::inline::{InlineIoService, InlineRecvIo, InlineSendIo};
use crate::io_service::{IoService, RecvClientHandler, RecvIo, SendClientHandler, SendIo};
use crate::link::{RecvLink, SendLink};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum PortStatus {
    Busy,
    Idle,
    Disconnected,
}

/// The worker's end of a receive client
struct RecvPort {
    io: InlineRecvIo,
    to_client: mpsc::Sender<FrameBuff>,
    released: mpsc::UnboundedReceiver<FrameBuff>,
    /// frames currently handed to the client
    outstanding: usize,
}

impl RecvPort {
    async fn do_work(&mut self) -> PortStatus {
        let mut busy = false;

        loop {
            match self.released.try_recv() {
                Ok(buff) => {
                    self.io.release_recv_buff(buff);
                    self.outstanding -= 1;
                    busy = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.outstanding > 0 {
                        warn!("receive client disconnected without returning {} frame(s)", self.outstanding);
                    }
                    return PortStatus::Disconnected;
                }
            }
        }

        while self.outstanding < self.io.num_recv_frames() && self.to_client.capacity() > 0 {
            let Some(buff) = self.io.get_recv_buff(Duration::ZERO).await else {
                break;
            };
            match self.to_client.try_send(buff) {
                Ok(()) => {
                    self.outstanding += 1;
                    busy = true;
                }
                Err(e) => {
                    let buff = e.into_inner();
                    self.io.release_recv_buff(buff);
                    break;
                }
            }
        }

        if busy { PortStatus::Busy } else { PortStatus::Idle }
    }
}

/// The worker's end of a send client
struct SendPort {
    io: InlineSendIo,
    to_client: mpsc::Sender<FrameBuff>,
    filled: mpsc::UnboundedReceiver<FrameBuff>,
    /// filled frames waiting for room at the destination, oldest first. Each holds a
    ///  reservation made by the client when it handed the frame over.
    pending: VecDeque<FrameBuff>,
    /// free frames currently handed to the client
    outstanding: usize,
}

impl SendPort {
    async fn do_work(&mut self) -> PortStatus {
        let mut busy = false;

        loop {
            match self.filled.try_recv() {
                Ok(buff) => {
                    self.pending.push_back(buff);
                    self.outstanding -= 1;
                    busy = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.outstanding > 0 {
                        warn!("send client disconnected without returning {} frame(s)", self.outstanding);
                    }
                    self.discard_pending();
                    return PortStatus::Disconnected;
                }
            }
        }

        // one attempt per pass: a packet without room stays pending so the other ports
        //  get their turn
        while let Some(buff) = self.pending.pop_front() {
            match self.io.try_send_reserved(buff) {
                None => busy = true,
                Some(buff) => {
                    self.pending.push_front(buff);
                    if !self.io.has_status_link() {
                        warn!("send client can not make progress without a status link - discarding {} packet(s)", self.pending.len());
                        self.discard_pending();
                    }
                    break;
                }
            }
        }

        while self.outstanding + self.pending.len() < self.io.num_send_frames() && self.to_client.capacity() > 0 {
            let Some(buff) = self.io.get_send_buff(Duration::ZERO).await else {
                break;
            };
            match self.to_client.try_send(buff) {
                Ok(()) => {
                    self.outstanding += 1;
                    busy = true;
                }
                Err(e) => {
                    self.io.discard_reserved(e.into_inner());
                    break;
                }
            }
        }

        while self.io.poll_recv_link(Duration::ZERO).await {
            busy = true;
        }

        if busy { PortStatus::Busy } else { PortStatus::Idle }
    }

    fn discard_pending(&mut self) {
        for buff in self.pending.drain(..) {
            self.io.discard_reserved(buff);
        }
    }
}

enum ClientPort {
    Recv(RecvPort),
    Send(SendPort),
}

impl ClientPort {
    async fn do_work(&mut self) -> PortStatus {
        match self {
            ClientPort::Recv(port) => port.do_work().await,
            ClientPort::Send(port) => port.do_work().await,
        }
    }
}

async fn run_worker(mut new_ports: mpsc::UnboundedReceiver<ClientPort>, config: OffloadConfig) {
    debug!("offload worker started");

    let mut ports: Vec<ClientPort> = Vec::new();
    let mut accepting = true;
    loop {
        while accepting {
            match new_ports.try_recv() {
                Ok(port) => ports.push(port),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => accepting = false,
            }
        }

        if ports.is_empty() {
            if !accepting {
                break;
            }
            match new_ports.recv().await {
                Some(port) => ports.push(port),
                None => break,
            }
        }

        let mut busy = false;
        for mut port in std::mem::take(&mut ports) {
            match port.do_work().await {
                PortStatus::Busy => {
                    busy = true;
                    ports.push(port);
                }
                PortStatus::Idle => ports.push(port),
                PortStatus::Disconnected => debug!("offload worker dropping disconnected client"),
            }
        }

        if busy {
            tokio::task::yield_now().await;
        }
        else {
            tokio::time::sleep(config.idle_poll_interval).await;
        }
    }

    debug!("offload worker stopped");
}

/// An I/O service with a worker task of its own. Creating it spawns the worker, so it must be
///  created inside a tokio runtime.
pub struct OffloadIoService {
    inline: InlineIoService,
    new_ports: mpsc::UnboundedSender<ClientPort>,
    config: OffloadConfig,
}

impl OffloadIoService {
    pub fn new(config: OffloadConfig) -> anyhow::Result<OffloadIoService> {
        config.validate()?;

        let (new_ports, port_receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(port_receiver, config.clone()));

        Ok(OffloadIoService {
            inline: InlineIoService::new(),
            new_ports,
            config,
        })
    }

    fn register(&self, port: ClientPort) -> Result<()> {
        self.new_ports.send(port)
            .map_err(|_| TransportError::ServiceStopped)
    }
}

impl IoService for OffloadIoService {
    fn attach_recv_link(&self, link: Arc<dyn RecvLink>) {
        self.inline.attach_recv_link(link);
    }

    fn attach_send_link(&self, link: Arc<dyn SendLink>) {
        self.inline.attach_send_link(link);
    }

    fn detach_recv_link(&self, link: &Arc<dyn RecvLink>) -> Result<()> {
        self.inline.detach_recv_link(link)
    }

    fn detach_send_link(&self, link: &Arc<dyn SendLink>) -> Result<()> {
        self.inline.detach_send_link(link)
    }

    fn make_recv_client(
        &self,
        data_link: Arc<dyn RecvLink>,
        num_recv_frames: usize,
        handler: Arc<Mutex<dyn RecvClientHandler>>,
        fc_link: Option<Arc<dyn SendLink>>,
        num_send_frames: usize,
    ) -> Result<Box<dyn RecvIo>> {
        let io = self.inline.connect_recv_client(data_link, num_recv_frames, handler, fc_link, num_send_frames)?;

        let (to_client, from_worker) = mpsc::channel(num_recv_frames.max(1));
        let (to_worker, released) = mpsc::unbounded_channel();
        self.register(ClientPort::Recv(RecvPort {
            io,
            to_client,
            released,
            outstanding: 0,
        }))?;

        Ok(Box::new(OffloadRecvIo {
            from_worker,
            to_worker,
            num_recv_frames,
            num_send_frames,
        }))
    }

    fn make_send_client(
        &self,
        send_link: Arc<dyn SendLink>,
        num_send_frames: usize,
        handler: Arc<Mutex<dyn SendClientHandler>>,
        recv_link: Option<Arc<dyn RecvLink>>,
        num_recv_frames: usize,
    ) -> Result<Box<dyn SendIo>> {
        let io = self.inline.connect_send_client(send_link, num_send_frames, handler.clone(), recv_link, num_recv_frames)?;

        let (to_client, from_worker) = mpsc::channel(num_send_frames.max(1));
        let (to_worker, filled) = mpsc::unbounded_channel();
        self.register(ClientPort::Send(SendPort {
            io,
            to_client,
            filled,
            pending: VecDeque::new(),
            outstanding: 0,
        }))?;

        Ok(Box::new(OffloadSendIo {
            from_worker,
            to_worker,
            handler,
            poll_interval: self.config.idle_poll_interval,
            num_send_frames,
            num_recv_frames,
        }))
    }
}


pub struct OffloadRecvIo {
    from_worker: mpsc::Receiver<FrameBuff>,
    to_worker: mpsc::UnboundedSender<FrameBuff>,
    num_recv_frames: usize,
    num_send_frames: usize,
}

#[async_trait]
impl RecvIo for OffloadRecvIo {
    async fn get_recv_buff(&mut self, timeout: Duration) -> Option<FrameBuff> {
        match tokio::time::timeout(timeout, self.from_worker.recv()).await {
            Ok(Some(buff)) => Some(buff),
            Ok(None) => {
                warn!("offload worker is gone");
                None
            }
            Err(_) => None,
        }
    }

    fn release_recv_buff(&mut self, buff: FrameBuff) {
        if self.to_worker.send(buff).is_err() {
            warn!("offload worker is gone - discarding released frame");
        }
    }

    fn num_recv_frames(&self) -> usize {
        self.num_recv_frames
    }

    fn num_send_frames(&self) -> usize {
        self.num_send_frames
    }
}

impl Drop for OffloadRecvIo {
    fn drop(&mut self) {
        // frames prefetched for this client go back through the worker
        self.from_worker.close();
        while let Ok(buff) = self.from_worker.try_recv() {
            if self.to_worker.send(buff).is_err() {
                break;
            }
        }
    }
}


pub struct OffloadSendIo {
    from_worker: mpsc::Receiver<FrameBuff>,
    to_worker: mpsc::UnboundedSender<FrameBuff>,
    handler: Arc<Mutex<dyn SendClientHandler>>,
    poll_interval: Duration,
    num_send_frames: usize,
    num_recv_frames: usize,
}

#[async_trait]
impl SendIo for OffloadSendIo {
    async fn get_send_buff(&mut self, timeout: Duration) -> Option<FrameBuff> {
        match tokio::time::timeout(timeout, self.from_worker.recv()).await {
            Ok(Some(buff)) => Some(buff),
            Ok(None) => {
                warn!("offload worker is gone");
                None
            }
            Err(_) => None,
        }
    }

    /// The worker processes status packets; this only watches the handler's state. Packets
    ///  handed to the worker but not sent yet hold reservations, so they count as taken.
    async fn wait_for_dest_ready(&mut self, num_bytes: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.handler.lock().unwrap().dest_has_space(num_bytes) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn release_send_buff(&mut self, buff: FrameBuff) {
        let num_bytes = buff.packet_size();
        trace!("handing {} byte packet to offload worker", num_bytes);

        // reserved before the hand-off, so that the next admission check sees it
        if num_bytes > 0 {
            self.handler.lock().unwrap().reserve_dest_space(num_bytes);
        }
        if self.to_worker.send(buff).is_err() {
            warn!("offload worker is gone - discarding packet");
            if num_bytes > 0 {
                self.handler.lock().unwrap().release_dest_space(num_bytes);
            }
        }
    }

    /// status packets are the worker's business
    async fn process_status(&mut self, _timeout: Duration) -> bool {
        false
    }

    fn num_send_frames(&self) -> usize {
        self.num_send_frames
    }

    fn num_recv_frames(&self) -> usize {
        self.num_recv_frames
    }
}

impl Drop for OffloadSendIo {
    fn drop(&mut self) {
        self.from_worker.close();
        while let Ok(mut buff) = self.from_worker.try_recv() {
            buff.clear();
            if self.to_worker.send(buff).is_err() {
                break;
            }
        }
    }
}
