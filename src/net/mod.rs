//! Networking for the round-synchronous engine.
//!
//! Protocols never touch a socket. During a round they talk to a [`Network`],
//! which only queues outgoing messages and hands out the messages that arrived
//! for the current round. Between two rounds the scheduler pushes everything
//! that was queued through a [`Transport`], which is the only place where
//! waiting happens.
//!
//! Parties are addressed by 1-based [`PartyId`]s.

use std::fmt;

use futures::Future;
use thiserror::Error;
use tokio_util::bytes::Bytes;

use crate::net::connection::ConnectionError;

pub mod connection;
pub mod mesh;
pub mod round;

/// Identity of a party, counting from one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PartyId(pub usize);

impl PartyId {
    /// Position of the party in zero-based collections.
    pub const fn index(self) -> usize {
        self.0 - 1
    }

    /// Position of the party, if it belongs to a session of `parties`.
    pub fn checked_index(self, parties: usize) -> Option<usize> {
        self.0.checked_sub(1).filter(|&i| i < parties)
    }

    pub const fn from_index(index: usize) -> Self {
        PartyId(index + 1)
    }

    /// All party ids of a session with `parties` members.
    pub fn all(parties: usize) -> impl Iterator<Item = PartyId> {
        (1..=parties).map(PartyId)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Per-round messaging as seen from inside a protocol.
///
/// Sends are buffered until the round ends. Receives return messages that
/// were sent to us in the previous round, in the order they were sent.
/// Sending to all includes ourselves, so `receive_from_all` always yields one
/// message per party, indexed by party.
pub trait Network {
    fn send(&mut self, to: PartyId, msg: Bytes);

    fn send_to_all(&mut self, msg: Bytes);

    fn receive(&mut self, from: PartyId) -> Result<Bytes, NetworkError>;

    fn receive_from_all(&mut self) -> Result<Vec<Bytes>, NetworkError>;

    fn my_id(&self) -> PartyId;

    fn parties(&self) -> usize;
}

/// Moves one round worth of messages between all parties.
///
/// `outgoing[i]` holds the messages for the party with index `i` (the slot
/// for ourselves is ignored). The result is laid out the same way and holds
/// what every peer sent us during the round. An implementation must deliver
/// in lock-step: the call returns only after every peer's round has arrived.
pub trait Transport {
    fn exchange(
        &mut self,
        outgoing: Vec<Vec<Bytes>>,
    ) -> impl Future<Output = Result<Vec<Vec<Bytes>>, NetworkError>> + Send;
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("No message from {0} in this round")]
    MissingMessage(PartyId),
    #[error("Error communicating with {id}: {source}")]
    Connection { id: PartyId, source: ConnectionError },
    #[error("Transport delivered {got} slots for a session of {expected} parties")]
    WrongArity { expected: usize, got: usize },
}
