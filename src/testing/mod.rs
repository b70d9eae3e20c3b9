//! Tools for running a whole session of parties inside one test.

use std::{future::Future, time::Duration};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::task::JoinError;

use crate::{
    algebra::Element32,
    config::SpdzConfig,
    engine::Session,
    net::{mesh::InMemoryMesh, PartyId},
    schemes::spdz::{preprocessing::DummyDataSupplier, SpdzResourcePool, SpdzSuite},
};

pub type TestSession = Session<SpdzSuite<Element32>, InMemoryMesh>;

/// A set of parties connected over in-memory channels, each running in its
/// own tokio task.
pub struct Cluster<A = ()> {
    parties: usize,
    seed: u64,
    max_pending_openings: usize,
    round_timeout: Duration,
    max_frame_length: usize,
    args: Vec<A>,
}

impl Cluster {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            seed: 0xC0FFEE,
            max_pending_openings: SpdzConfig::DEFAULT_MAX_PENDING_OPENINGS,
            round_timeout: Duration::from_millis(SpdzConfig::DEFAULT_ROUND_TIMEOUT_MS),
            max_frame_length: SpdzConfig::DEFAULT_MAX_FRAME_LENGTH,
            args: vec![(); parties],
        }
    }
}

impl<A: Send + 'static> Cluster<A> {
    /// Give each party an argument, in order of party id.
    pub fn with_args<B>(self, args: impl IntoIterator<Item = B>) -> Cluster<B> {
        let args: Vec<B> = args.into_iter().collect();
        assert_eq!(args.len(), self.parties, "One argument per party");
        Cluster {
            parties: self.parties,
            seed: self.seed,
            max_pending_openings: self.max_pending_openings,
            round_timeout: self.round_timeout,
            max_frame_length: self.max_frame_length,
            args,
        }
    }

    pub fn with_max_pending_openings(mut self, max: usize) -> Self {
        self.max_pending_openings = max;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    fn sessions(&self) -> Vec<TestSession> {
        InMemoryMesh::in_memory(self.parties)
            .into_iter()
            .enumerate()
            .map(|(i, mesh)| {
                let id = PartyId::from_index(i);
                let config = SpdzConfig::new(id, self.parties)
                    .with_max_pending_openings(self.max_pending_openings)
                    .with_round_timeout(self.round_timeout)
                    .with_max_frame_length(self.max_frame_length);
                let supplier =
                    DummyDataSupplier::new(id, self.parties, self.seed).expect("valid party");
                let pool = SpdzResourcePool::from_config(&config, supplier)
                    .expect("valid config")
                    .with_rng(ChaCha20Rng::seed_from_u64(self.seed + i as u64));
                let mesh = mesh
                    .with_timeout(config.round_timeout())
                    .with_max_frame_length(config.max_frame_length);
                Session::new(SpdzSuite::new(), pool, mesh, &config).expect("valid config")
            })
            .collect()
    }

    pub async fn run_with_args<T, P, F>(self, prg: P) -> Result<Vec<T>, JoinError>
    where
        T: Send + 'static,
        P: Fn(TestSession, A) -> F,
        F: Future<Output = T> + Send + 'static,
    {
        let sessions = self.sessions();
        let handles: Vec<_> = sessions
            .into_iter()
            .zip(self.args)
            .map(|(session, arg)| tokio::spawn(prg(session, arg)))
            .collect();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .collect()
    }

    pub async fn run<T, P, F>(self, prg: P) -> Result<Vec<T>, JoinError>
    where
        T: Send + 'static,
        P: Fn(TestSession) -> F,
        F: Future<Output = T> + Send + 'static,
    {
        self.run_with_args(|session, _| prg(session)).await
    }
}

#[cfg(test)]
mod test {
    use crate::{net::PartyId, protocols::ResourcePool, testing::Cluster};

    #[tokio::test]
    async fn parties_know_who_they_are() {
        let ids = Cluster::new(4)
            .run(|session| async move { session.pool().my_id() })
            .await
            .unwrap();
        assert_eq!(ids, PartyId::all(4).collect::<Vec<_>>());
    }
}
