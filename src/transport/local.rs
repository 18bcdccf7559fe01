//!  In-process transport
//!
//!  Simulates a network of nodes inside one process, so that protocol logic can be tested without sockets.
//!  Each node is an actor: a dedicated thread which exclusively owns the routing table of the node.
//!  Callers never touch the table, they post requests into bounded `crossbeam_channel` queues and block on the
//!  reply channel carried by each request, so no lock guards the table.
//!
//! # Queues of a node
//!
//!  * `requests` - assign peers, send to one peer, broadcast, disconnect; posted by the owner of the transport
//!  * `unregister` - removal of a peer from the routing table; posted by peers which disconnect
//!  * `stop` - closed when the transport stops
//!  * `mailbox` - inbound payloads; filled by peers, read via [`consume`]
//!
//!  All queues hold $` n^2 `$ items, enough for an all-to-all broadcast burst of `n` nodes.
//!  The actor never blocks on another node: deliveries use non-blocking sends and report a full mailbox as an error.
//!  Hence a stop request is observed within one iteration of the loop.
//!
//! # Disconnection
//!
//!  A node which disconnects empties its own table and posts an unregister request to every former peer.
//!  The caller returns once each live peer has processed the request, so afterwards sends fail with
//!  [`TransportError::Disconnected`] in both directions.
//!
//! [`consume`]: struct.LocalTransport.html#method.consume
//! [`TransportError::Disconnected`]: ../enum.TransportError.html#variant.Disconnected
use crate::transport::{PeerId, Transport, TransportError};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Routing table of a local node
pub type RoutingTable<M> = BTreeMap<PeerId, PeerHandle<M>>;

/// Handle used by other nodes to reach a local node
pub struct PeerHandle<M> {
    id: PeerId,
    mailbox: Sender<M>,
    unregister: Sender<Unregister>,
    stopped: Arc<AtomicBool>,
    terminated: Receiver<()>,
}

impl<M> Clone for PeerHandle<M> {
    fn clone(&self) -> Self {
        PeerHandle {
            id: self.id,
            mailbox: self.mailbox.clone(),
            unregister: self.unregister.clone(),
            stopped: self.stopped.clone(),
            terminated: self.terminated.clone(),
        }
    }
}

impl<M> std::fmt::Debug for PeerHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<M> PeerHandle<M> {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Puts the message into the mailbox of the node, never blocks
    fn deliver(&self, message: M) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Unreachable { peer: self.id });
        }
        self.mailbox.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::MailboxFull { peer: self.id },
            TrySendError::Disconnected(_) => TransportError::Unreachable { peer: self.id },
        })
    }

    /// Asks the node to forget `peer`
    ///
    /// Returns the acknowledgement to wait for, if the request was posted.
    fn unregister(&self, peer: PeerId) -> Option<Acknowledgement> {
        let (ack, done) = bounded(1);
        match self.unregister.try_send(Unregister { peer, ack }) {
            Ok(()) => Some(Acknowledgement {
                done,
                terminated: self.terminated.clone(),
            }),
            Err(TrySendError::Full(_)) => {
                log::error!(
                    "transport {}: unregister queue is full, peer {} is not removed",
                    self.id,
                    peer
                );
                None
            }
            Err(TrySendError::Disconnected(_)) => None,
        }
    }
}

/// Request from a peer to drop it from the routing table
struct Unregister {
    peer: PeerId,
    ack: Sender<()>,
}

/// Pending confirmation of an unregister request
struct Acknowledgement {
    done: Receiver<()>,
    terminated: Receiver<()>,
}

impl Acknowledgement {
    /// Blocks until the peer processed the request or terminated
    fn wait(self) {
        crossbeam_channel::select! {
            recv(self.done) -> _ => (),
            recv(self.terminated) -> _ => (),
        }
    }
}

/// Requests served by the actor of a node
enum Request<M> {
    AssignPeers {
        peers: RoutingTable<M>,
        reply: Sender<()>,
    },
    SendToPeer {
        dest: PeerId,
        message: M,
        reply: Sender<Result<(), TransportError>>,
    },
    Broadcast {
        message: M,
        reply: Sender<Result<(), TransportError>>,
    },
    Disconnect {
        reply: Sender<Vec<Acknowledgement>>,
    },
}

/// State owned by the actor thread
struct Node<M> {
    id: PeerId,
    peers: RoutingTable<M>,
}

impl<M: Clone> Node<M> {
    fn serve(&mut self, request: Request<M>) {
        match request {
            Request::AssignPeers { peers, reply } => {
                log::trace!("transport {}: {} peers assigned", self.id, peers.len());
                self.peers = peers;
                let _ = reply.send(());
            }
            Request::SendToPeer {
                dest,
                message,
                reply,
            } => {
                let _ = reply.send(self.send_to_peer(dest, message));
            }
            Request::Broadcast { message, reply } => {
                let _ = reply.send(self.broadcast(message));
            }
            Request::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            }
        }
    }

    fn send_to_peer(&self, dest: PeerId, message: M) -> Result<(), TransportError> {
        match self.peers.get(&dest) {
            Some(peer) => peer.deliver(message),
            None => Err(TransportError::Disconnected { peer: dest }),
        }
    }

    /// Delivers to live peers in ascending order of ids, collects the ones which could not be reached
    fn broadcast(&self, message: M) -> Result<(), TransportError> {
        let unreachable = self
            .peers
            .values()
            .filter_map(|peer| match peer.deliver(message.clone()) {
                Ok(()) => None,
                Err(e) => {
                    log::debug!("transport {}: broadcast skipped: {}", self.id, e);
                    Some(peer.id())
                }
            })
            .collect::<Vec<_>>();

        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(TransportError::PartialBroadcast { unreachable })
        }
    }

    fn disconnect(&mut self) -> Vec<Acknowledgement> {
        let peers = std::mem::take(&mut self.peers);
        log::debug!("transport {}: disconnecting from {} peers", self.id, peers.len());
        peers
            .values()
            .filter(|peer| peer.id() != self.id)
            .filter_map(|peer| peer.unregister(self.id))
            .collect()
    }
}

/// The actor of a node: its state and the receiving ends of its queues
struct Actor<M> {
    node: Node<M>,
    requests: Receiver<Request<M>>,
    unregister: Receiver<Unregister>,
    stop: Receiver<()>,
    // dropped when the loop exits, which wakes up everyone waiting on the actor
    _terminated: Sender<()>,
}

impl<M: Clone> Actor<M> {
    /// Main loop, the only place where the routing table is read or written
    fn run(self) {
        let Actor {
            mut node,
            requests,
            unregister,
            stop,
            _terminated,
        } = self;
        log::trace!("transport {}: actor started", node.id);

        loop {
            // stop takes precedence over pending requests
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }

            let running = crossbeam_channel::select! {
                recv(stop) -> _ => false,
                recv(unregister) -> request => match request {
                    Ok(Unregister { peer, ack }) => {
                        node.peers.remove(&peer);
                        log::trace!("transport {}: peer {} unregistered", node.id, peer);
                        let _ = ack.send(());
                        true
                    }
                    Err(_) => false,
                },
                recv(requests) -> request => match request {
                    Ok(request) => {
                        node.serve(request);
                        true
                    }
                    Err(_) => false,
                },
            };
            if !running {
                break;
            }
        }

        log::debug!("transport {}: actor stopped", node.id);
    }
}

/// Thread of the actor together with the means to stop it
struct Worker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Node of the simulated network
///
/// Implements [`Transport`] over in-process queues. The payload type `M` is opaque, it is cloned for broadcasts.
///
/// [`Transport`]: ../trait.Transport.html
pub struct LocalTransport<M> {
    id: PeerId,
    handle: PeerHandle<M>,
    requests: Sender<Request<M>>,
    mailbox: Receiver<M>,
    terminated: Receiver<()>,
    worker: Mutex<Option<Worker>>,
}

impl<M> LocalTransport<M>
where
    M: Clone + Send + 'static,
{
    /// Creates node `id` of a network with `share_count` nodes and starts its actor
    pub fn new(share_count: usize, id: PeerId) -> Result<Self, TransportError> {
        let capacity = share_count.saturating_mul(share_count).max(1);
        let (mailbox_tx, mailbox) = bounded(capacity);
        let (requests_tx, requests) = bounded(capacity);
        let (unregister_tx, unregister) = bounded(capacity);
        let (stop_tx, stop) = bounded(0);
        let (terminated_tx, terminated) = bounded(0);

        let actor = Actor {
            node: Node {
                id,
                peers: BTreeMap::new(),
            },
            requests,
            unregister,
            stop,
            _terminated: terminated_tx,
        };
        let thread = thread::Builder::new()
            .name(format!("transport-{}", id))
            .spawn(move || actor.run())
            .map_err(|e| {
                log::error!("transport {}: cannot start actor: {}", id, e);
                TransportError::Stopped { id }
            })?;

        let handle = PeerHandle {
            id,
            mailbox: mailbox_tx,
            unregister: unregister_tx,
            stopped: Arc::new(AtomicBool::new(false)),
            terminated: terminated.clone(),
        };

        Ok(LocalTransport {
            id,
            handle,
            requests: requests_tx,
            mailbox,
            terminated,
            worker: Mutex::new(Some(Worker {
                stop: stop_tx,
                thread,
            })),
        })
    }
}

impl<M> LocalTransport<M> {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Handle for the routing tables of other nodes
    pub fn handle(&self) -> PeerHandle<M> {
        self.handle.clone()
    }

    /// True once [`stop`](#method.stop) was called
    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }

    /// True once the actor thread has exited
    pub fn is_terminated(&self) -> bool {
        matches!(self.terminated.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn stopped_error(&self) -> TransportError {
        TransportError::Stopped { id: self.id }
    }

    /// Posts the request to the actor and blocks until it is served
    ///
    /// Resolves to `Stopped` if the actor exits before serving the request.
    fn request<T>(
        &self,
        make_request: impl FnOnce(Sender<T>) -> Request<M>,
    ) -> Result<T, TransportError> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        let (reply, response) = bounded(1);
        self.requests
            .send(make_request(reply))
            .map_err(|_| self.stopped_error())?;

        crossbeam_channel::select! {
            recv(response) -> result => result.map_err(|_| self.stopped_error()),
            recv(self.terminated) -> _ => response.try_recv().map_err(|_| self.stopped_error()),
        }
    }

    fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(Worker { stop, thread }) = worker {
            self.handle.stopped.store(true, Ordering::Release);
            drop(stop);
            if thread.join().is_err() {
                log::error!("transport {}: actor panicked", self.id);
            }
            log::debug!("transport {}: stopped", self.id);
        }
    }
}

impl<M> Transport for LocalTransport<M>
where
    M: Clone + Send + 'static,
{
    type Message = M;
    type Peers = RoutingTable<M>;
    type Inbound = Receiver<M>;

    fn assign_peers(&self, peers: Self::Peers) -> Result<(), TransportError> {
        self.request(|reply| Request::AssignPeers { peers, reply })
    }

    /// No-op, peers of the simulated network are always reachable through their handles
    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let acknowledgements = self.request(|reply| Request::Disconnect { reply })?;
        acknowledgements.into_iter().for_each(Acknowledgement::wait);
        Ok(())
    }

    fn send_to_peer(&self, peer: PeerId, message: M) -> Result<(), TransportError> {
        let result = self
            .request(|reply| Request::SendToPeer {
                dest: peer,
                message,
                reply,
            })
            .and_then(|r| r);
        if let Err(e) = &result {
            log::warn!("transport {}: send to peer {} failed: {}", self.id, peer, e);
        }
        result
    }

    fn broadcast(&self, message: M) -> Result<(), TransportError> {
        let result = self
            .request(|reply| Request::Broadcast { message, reply })
            .and_then(|r| r);
        if let Err(e) = &result {
            log::warn!("transport {}: broadcast failed: {}", self.id, e);
        }
        result
    }

    /// Stops the actor and waits for its thread to exit
    ///
    /// Idempotent. Messages already in the mailbox remain available to [`consume`](#method.consume).
    fn stop(&self) {
        self.shutdown();
    }

    fn consume(&self) -> Receiver<M> {
        self.mailbox.clone()
    }
}

impl<M> Drop for LocalTransport<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds a fully connected simulated network of nodes `1..=share_count`
///
/// Every node gets the routing table of the whole network, itself included.
pub fn network<M>(share_count: usize) -> Result<BTreeMap<PeerId, LocalTransport<M>>, TransportError>
where
    M: Clone + Send + 'static,
{
    let transports = (1..=share_count)
        .map(|id| LocalTransport::new(share_count, id).map(|t| (id, t)))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let table = transports
        .iter()
        .map(|(&id, t)| (id, t.handle()))
        .collect::<RoutingTable<M>>();
    for transport in transports.values() {
        transport.assign_peers(table.clone())?;
        transport.connect()?;
    }

    log::debug!("local network of {} nodes is up", share_count);
    Ok(transports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn send_one() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(2)?;
        let (peer1, peer2) = (&transports[&1], &transports[&2]);

        // data flow: peer1 -> peer2
        peer1.send_to_peer(2, "Hello".to_owned())?;
        let consumer = peer2.consume();
        assert_eq!(consumer.recv()?, "Hello");
        assert!(consumer.try_recv().is_err());

        peer1.stop();
        peer2.stop();
        Ok(())
    }

    #[test]
    fn send_to_myself() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<&'static str>(1)?;
        let peer1 = &transports[&1];

        peer1.send_to_peer(1, "Hello")?;
        assert_eq!(peer1.consume().recv()?, "Hello");
        peer1.stop();
        Ok(())
    }

    #[test]
    fn disconnect_is_bidirectional() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(3)?;
        let (peer1, peer2, peer3) = (&transports[&1], &transports[&2], &transports[&3]);

        peer1.send_to_peer(2, "Hello".to_owned())?;
        assert_eq!(peer2.consume().recv()?, "Hello");

        peer1.disconnect()?;

        assert_eq!(
            peer1.send_to_peer(2, "again".to_owned()),
            Err(TransportError::Disconnected { peer: 2 })
        );
        assert_eq!(
            peer2.send_to_peer(1, "back".to_owned()),
            Err(TransportError::Disconnected { peer: 1 })
        );
        assert_eq!(
            peer3.send_to_peer(1, "back".to_owned()),
            Err(TransportError::Disconnected { peer: 1 })
        );
        // links between other nodes survive
        peer2.send_to_peer(3, "still linked".to_owned())?;
        assert_eq!(peer3.consume().recv()?, "still linked");

        // a broadcast of a node which forgot its peers reaches nobody and fails nobody
        peer1.broadcast("into the void".to_owned())?;
        assert!(peer2.consume().try_recv().is_err());
        Ok(())
    }

    #[test]
    fn broadcast_reaches_everyone() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(5)?;

        transports[&1].broadcast("Hello".to_owned())?;
        for peer in transports.values() {
            assert_eq!(peer.consume().recv()?, "Hello");
            peer.stop();
        }
        Ok(())
    }

    #[test]
    fn broadcast_skips_stopped_peer() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(4)?;
        transports[&3].stop();

        assert_eq!(
            transports[&1].broadcast("Hello".to_owned()),
            Err(TransportError::PartialBroadcast {
                unreachable: vec![3]
            })
        );
        for id in &[1, 2, 4] {
            assert_eq!(transports[id].consume().recv()?, "Hello");
        }
        assert!(transports[&3].consume().try_recv().is_err());
        Ok(())
    }

    #[test]
    fn messages_arrive_in_order() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<usize>(2)?;
        let consumer = transports[&2].consume();

        // mailbox holds n^2 = 4 messages
        for round in 0..25 {
            for k in 0..4 {
                transports[&1].send_to_peer(2, round * 4 + k)?;
            }
            for k in 0..4 {
                assert_eq!(consumer.recv()?, round * 4 + k);
            }
        }
        Ok(())
    }

    #[test]
    fn concurrent_senders_keep_their_order() -> anyhow::Result<()> {
        init_logger();
        let mut transports = network::<(PeerId, usize)>(4)?;
        let receiver = transports.remove(&4).expect("node 4");
        let consumer = receiver.consume();

        let senders = transports
            .into_iter()
            .map(|(id, transport)| {
                thread::spawn(move || -> Result<(), TransportError> {
                    for seq in 0..5 {
                        transport.send_to_peer(4, (id, seq))?;
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        for sender in senders {
            sender.join().expect("sender thread")?;
        }

        let mut next = BTreeMap::new();
        for (id, seq) in consumer.try_iter() {
            let expected = next.entry(id).or_insert(0);
            assert_eq!(seq, *expected);
            *expected += 1;
        }
        assert_eq!(next.values().copied().collect::<Vec<_>>(), vec![5, 5, 5]);
        Ok(())
    }

    #[test]
    fn full_mailbox_is_reported() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<u8>(1)?;
        transports[&1].send_to_peer(1, 1)?;
        assert_eq!(
            transports[&1].send_to_peer(1, 2),
            Err(TransportError::MailboxFull { peer: 1 })
        );
        Ok(())
    }

    #[test]
    fn stopped_node_keeps_its_mailbox() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(2)?;
        let (peer1, peer2) = (&transports[&1], &transports[&2]);

        peer2.send_to_peer(1, "before".to_owned())?;
        peer1.stop();
        peer1.stop();

        assert!(peer1.is_stopped());
        assert_eq!(
            peer1.send_to_peer(2, "from the dead".to_owned()),
            Err(TransportError::Stopped { id: 1 })
        );
        assert_eq!(peer1.broadcast("x".to_owned()), Err(TransportError::Stopped { id: 1 }));
        assert_eq!(peer1.disconnect(), Err(TransportError::Stopped { id: 1 }));
        assert_eq!(
            peer2.send_to_peer(1, "after".to_owned()),
            Err(TransportError::Unreachable { peer: 1 })
        );

        let consumer = peer1.consume();
        assert_eq!(consumer.try_recv()?, "before");
        assert!(consumer.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn stop_races_with_sends() -> anyhow::Result<()> {
        init_logger();
        let mut transports = network::<usize>(2)?;
        let peer1 = Arc::new(transports.remove(&1).expect("node 1"));

        let sender = {
            let peer1 = peer1.clone();
            thread::spawn(move || (0..200).map(|i| peer1.send_to_peer(2, i)).collect::<Vec<_>>())
        };
        peer1.stop();
        let results = sender.join().expect("sender thread");

        // once stopped, the node refuses every request instead of hanging
        let stopped = Err(TransportError::Stopped { id: 1 });
        let first_stop = results
            .iter()
            .position(|r| *r == stopped)
            .unwrap_or_else(|| results.len());
        assert!(results[first_stop..].iter().all(|r| *r == stopped));
        assert!(peer1.is_terminated());
        assert_eq!(transports[&2].consume().try_iter().count(), first_stop.min(4));
        Ok(())
    }

    #[test]
    fn stop_leaves_no_actor_running() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(7)?;
        transports[&2].broadcast("last words".to_owned())?;
        transports[&5].disconnect()?;

        for transport in transports.values() {
            assert!(!transport.is_terminated());
            transport.stop();
        }
        assert!(transports.values().all(|t| t.is_stopped() && t.is_terminated()));
        Ok(())
    }

    #[test]
    fn routing_table_can_be_replaced() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<&'static str>(3)?;
        let only_third = transports
            .iter()
            .filter(|&(&id, _)| id == 3)
            .map(|(&id, t)| (id, t.handle()))
            .collect::<RoutingTable<_>>();

        transports[&1].assign_peers(only_third)?;
        assert_eq!(
            transports[&1].send_to_peer(2, "gone"),
            Err(TransportError::Disconnected { peer: 2 })
        );
        transports[&1].broadcast("only to 3")?;
        assert_eq!(transports[&3].consume().recv()?, "only to 3");
        assert!(transports[&2].consume().try_recv().is_err());
        Ok(())
    }

    /// Protocol code written against the interface
    fn ping<T: Transport<Message = String, Inbound = Receiver<String>>>(
        from: &T,
        to: &T,
        to_id: PeerId,
    ) -> anyhow::Result<String> {
        from.send_to_peer(to_id, "ping".to_owned())?;
        Ok(to.consume().recv()?)
    }

    #[test]
    fn usable_through_the_interface() -> anyhow::Result<()> {
        init_logger();
        let transports = network::<String>(2)?;
        assert_eq!(ping(&transports[&2], &transports[&1], 1)?, "ping");
        Ok(())
    }
}
