//!  Peer communication
//!
//!  The consensus layer talks to other nodes only through the [`Transport`] interface, so the same protocol code runs
//!  against the in-process simulator in [`local`] and against a socket based network. A backend is chosen when the
//!  transport is constructed.
//!
//!  Payloads are opaque to the transport, it never inspects or serializes them.
//!
//! [`Transport`]: trait.Transport.html
//! [`local`]: local/index.html
use thiserror::Error;

pub mod local;

pub use local::{LocalTransport, PeerHandle};

/// Identifier of a node in the network
///
/// Abstract identifier whose binding to a network address has to be defined by the transport.
pub type PeerId = usize;

/// Enumerates errors returned by transport operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// the destination is not in the routing table, or the link to it was removed
    #[error("peer {peer} is disconnected")]
    Disconnected { peer: PeerId },
    /// the destination has stopped
    #[error("peer {peer} is unreachable")]
    Unreachable { peer: PeerId },
    /// the message was delivered to all live peers except these
    #[error("broadcast did not reach peers {unreachable:?}")]
    PartialBroadcast { unreachable: Vec<PeerId> },
    /// the destination mailbox is at capacity
    #[error("mailbox of peer {peer} is full")]
    MailboxFull { peer: PeerId },
    /// this transport has stopped and does not serve requests anymore
    #[error("transport {id} is stopped")]
    Stopped { id: PeerId },
}

/// Capability set of a peer communication backend
pub trait Transport {
    /// Payload type, opaque to the transport
    type Message;
    /// Routing table handed to [`assign_peers`](#tymethod.assign_peers)
    type Peers;
    /// Stream of inbound messages returned by [`consume`](#tymethod.consume)
    type Inbound;

    /// Installs the routing table, replacing the previous one
    fn assign_peers(&self, peers: Self::Peers) -> Result<(), TransportError>;

    /// Establishes connections to the peers of the routing table
    fn connect(&self) -> Result<(), TransportError>;

    /// Removes links to all peers in both directions
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Sends the message to a single peer
    fn send_to_peer(&self, peer: PeerId, message: Self::Message) -> Result<(), TransportError>;

    /// Sends the message to every peer of the routing table
    fn broadcast(&self, message: Self::Message) -> Result<(), TransportError>;

    /// Stops the transport, irreversibly
    fn stop(&self);

    /// Returns the ordered stream of inbound messages
    fn consume(&self) -> Self::Inbound;
}
