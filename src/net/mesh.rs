use std::{collections::BTreeMap, time::Duration};

use futures::future;
use futures::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::bytes::Bytes;

use crate::net::{
    connection::{ConnectionError, Link},
    NetworkError, PartyId, Transport,
};

/// Fully connected peer-2-peer network
///
/// This acts as a single waypoint to all other parties in the session.
///
/// * `links`: One link per peer, sorted by their id, skipping our own.
/// * `me`: My own id
/// * `round`: Number of rounds exchanged so far
/// * `timeout`: How long to wait for a peer's round before giving up
pub struct Mesh<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    links: Vec<Link<R, W>>,
    me: PartyId,
    round: u64,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Mesh<R, W> {
    pub fn my_id(&self) -> PartyId {
        self.me
    }

    /// Number of parties, counting ourselves.
    pub fn parties(&self) -> usize {
        self.links.len() + 1
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound the size of a single round sent to or received from any peer.
    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        for link in &mut self.links {
            link.set_max_frame_length(max);
        }
        self
    }

    fn peer_id(&self, link: usize) -> PartyId {
        if link < self.me.index() {
            PartyId::from_index(link)
        } else {
            PartyId::from_index(link + 1)
        }
    }
}

impl<R, W> Transport for Mesh<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    #[tracing::instrument(skip_all, fields(party = %self.me, round = self.round))]
    async fn exchange(
        &mut self,
        outgoing: Vec<Vec<Bytes>>,
    ) -> Result<Vec<Vec<Bytes>>, NetworkError> {
        let parties = self.parties();
        if outgoing.len() != parties {
            return Err(NetworkError::WrongArity {
                expected: parties,
                got: outgoing.len(),
            });
        }
        let me = self.me.index();
        let frames: Vec<Vec<Bytes>> = outgoing
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != me)
            .map(|(_, msgs)| msgs)
            .collect();
        let ids: Vec<PartyId> = (0..self.links.len()).map(|i| self.peer_id(i)).collect();
        let timeout = self.timeout;
        let round = self.round;
        self.round += 1;

        let (mut rx, mut tx): (Vec<_>, Vec<_>) = self.links.iter_mut().map(Link::split).unzip();

        let sends = tx
            .iter_mut()
            .zip(&frames)
            .zip(&ids)
            .map(|((link, frame), &id)| {
                link.send_round(round, frame)
                    .map_err(move |source| NetworkError::Connection { id, source })
            });

        let receives = rx.iter_mut().zip(&ids).map(|(link, &id)| async move {
            let frame = tokio::time::timeout(timeout, link.recv_round(round))
                .await
                .map_err(|elapsed| NetworkError::Connection {
                    id,
                    source: ConnectionError::TimeOut(elapsed),
                })?
                .map_err(|source| NetworkError::Connection { id, source })?;
            Ok::<_, NetworkError>(frame)
        });

        // The first failing link fails the round without waiting on the rest.
        let (_, mut incoming) =
            futures::try_join!(future::try_join_all(sends), future::try_join_all(receives))?;
        incoming.insert(me, Vec::new());
        tracing::trace!(messages = incoming.iter().map(Vec::len).sum::<usize>(), "Round delivered");
        Ok(incoming)
    }
}

/// Mesh containing only duplex connections.
/// Used for local testing and simulation.
pub type InMemoryMesh = Mesh<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl InMemoryMesh {
    /// Construct a list of meshes, one for each party, ordered by party id.
    ///
    /// * `player_count`: Size of the network in terms of parties.
    pub fn in_memory(player_count: usize) -> Vec<Self> {
        let mut internet = BTreeMap::new();
        for i in 0..player_count {
            for j in 0..i {
                let (c1, c2) = Link::in_memory();
                internet.insert((i, j), c1);
                internet.insert((j, i), c2);
            }
        }

        (0..player_count)
            .map(|i| {
                let links = (0..player_count)
                    .filter(|&j| j != i)
                    .filter_map(|j| internet.remove(&(i, j)))
                    .collect();
                Mesh {
                    links,
                    me: PartyId::from_index(i),
                    round: 0,
                    timeout: Duration::from_secs(5),
                }
            })
            .collect()
    }
}
