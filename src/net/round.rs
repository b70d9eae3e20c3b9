use std::collections::VecDeque;

use tokio_util::bytes::Bytes;

use crate::net::{Network, NetworkError, PartyId};

/// The [`Network`] handed to protocols during a round.
///
/// Outgoing messages are queued per receiver, incoming ones are queued per
/// sender. Messages to ourselves are looped back when the round is delivered.
#[derive(Debug)]
pub struct RoundBuffer {
    me: PartyId,
    outbox: Vec<Vec<Bytes>>,
    inbox: Vec<VecDeque<Bytes>>,
    touched: bool,
}

impl RoundBuffer {
    pub fn new(me: PartyId, parties: usize) -> Self {
        Self {
            me,
            outbox: vec![Vec::new(); parties],
            inbox: vec![VecDeque::new(); parties],
            touched: false,
        }
    }

    /// Whether anything was sent or received since the last call.
    pub fn take_activity(&mut self) -> bool {
        std::mem::take(&mut self.touched)
    }

    pub fn has_outgoing(&self) -> bool {
        self.outbox.iter().any(|msgs| !msgs.is_empty())
    }

    /// Drain the queued messages, split into the ones for peers and the ones
    /// we sent to ourselves.
    pub fn take_outgoing(&mut self) -> (Vec<Vec<Bytes>>, Vec<Bytes>) {
        let parties = self.outbox.len();
        let mut outgoing = std::mem::replace(&mut self.outbox, vec![Vec::new(); parties]);
        let own = std::mem::take(&mut outgoing[self.me.index()]);
        (outgoing, own)
    }

    /// Make the messages of the finished round available for receiving.
    pub fn deliver(
        &mut self,
        mut incoming: Vec<Vec<Bytes>>,
        own: Vec<Bytes>,
    ) -> Result<(), NetworkError> {
        if incoming.len() != self.inbox.len() {
            return Err(NetworkError::WrongArity {
                expected: self.inbox.len(),
                got: incoming.len(),
            });
        }
        incoming[self.me.index()] = own;
        for (queue, msgs) in self.inbox.iter_mut().zip(incoming) {
            queue.extend(msgs);
        }
        Ok(())
    }

    /// First party that still has unread messages queued.
    pub fn leftover(&self) -> Option<PartyId> {
        self.inbox
            .iter()
            .position(|queue| !queue.is_empty())
            .map(PartyId::from_index)
    }

    pub fn clear(&mut self) {
        self.outbox.iter_mut().for_each(Vec::clear);
        self.inbox.iter_mut().for_each(VecDeque::clear);
        self.touched = false;
    }
}

impl Network for RoundBuffer {
    fn send(&mut self, to: PartyId, msg: Bytes) {
        self.touched = true;
        self.outbox[to.index()].push(msg);
    }

    fn send_to_all(&mut self, msg: Bytes) {
        self.touched = true;
        for queue in &mut self.outbox {
            queue.push(msg.clone());
        }
    }

    fn receive(&mut self, from: PartyId) -> Result<Bytes, NetworkError> {
        self.touched = true;
        self.inbox
            .get_mut(from.index())
            .and_then(VecDeque::pop_front)
            .ok_or(NetworkError::MissingMessage(from))
    }

    fn receive_from_all(&mut self) -> Result<Vec<Bytes>, NetworkError> {
        PartyId::all(self.parties())
            .map(|id| self.receive(id))
            .collect()
    }

    fn my_id(&self) -> PartyId {
        self.me
    }

    fn parties(&self) -> usize {
        self.outbox.len()
    }
}
