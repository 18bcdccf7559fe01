//! The crate contains two building blocks of a Byzantine fault tolerant protocol.
//!
//! * A threshold BLS signature scheme on the BLS12-381 curve. A key shared among `n` nodes lets any quorum of `t`
//!   nodes jointly sign a message, where $` f = \lfloor (n-1)/3 \rfloor `$ and `t` is either `f+1` or `2f+1`.
//!   Each node produces a partial signature, every other node can verify it, and `t` valid partial signatures
//!   combine into an ordinary BLS signature of the group.
//! * A peer communication interface together with an in-process implementation, which simulates a network
//!   of nodes with actors and channels, so that protocol logic can be tested without sockets.
//!
//! The two parts do not depend on each other, a consensus protocol holds one provider and one transport per node.
//!
//! Threshold signatures are implemented by [`tbls`](./tbls/index.html) module.
//! Polynomial arithmetic and hashing to the curve can be found in [`algorithms`](./algorithms/index.html) module.
//! The transport interface and the simulated network are implemented in [`transport`](./transport/index.html) module.
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc, // remove at some point
)]
pub mod algorithms;
pub mod tbls;
pub mod transport;

#[macro_use]
extern crate strum_macros;

pub use tbls::{CryptoProvider, ThresholdParams, TblsProvider};
pub use transport::{LocalTransport, Transport};
