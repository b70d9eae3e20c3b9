//! Commitments and broadcast validation.
//!
//! A commitment is `H(value || randomness)` with SHA-256 and 32 bytes of fresh
//! randomness. The protocols here commit, open and emulate a reliable
//! broadcast over point-to-point channels: with three or more parties every
//! received broadcast is followed by a round where everyone publishes a digest
//! of what they got, and a differing digest aborts the session.
//!
//! None of this depends on a particular secret-sharing scheme.

use digest::Digest;
use ff::PrimeField;
use rand::RngCore;
use sha2::Sha256;
use tokio_util::bytes::Bytes;

use crate::{
    error::{MaliciousActivity, SpdzError, UsageError},
    net::{Network, PartyId},
    protocols::{ready, Computation, EvaluationStatus, NativeProtocol, Nested, ResourcePool},
    serializer::{self, FieldSerializer},
};

pub type CommitmentHash = Sha256;

pub const RANDOMNESS_BYTES: usize = 32;

/// A value sealed under a hash until it is opened.
///
/// Deliberately not `Clone`: a commitment is opened once and then discarded.
#[derive(Debug)]
pub struct Commitment<F> {
    value: F,
    randomness: [u8; RANDOMNESS_BYTES],
    digest: Bytes,
}

impl<F: PrimeField> Commitment<F> {
    pub fn new(value: F, rng: &mut impl RngCore) -> Self {
        let mut randomness = [0u8; RANDOMNESS_BYTES];
        rng.fill_bytes(&mut randomness);
        let digest = hash_opening(&FieldSerializer::new().serialize(&value), &randomness);
        Self {
            value,
            randomness,
            digest,
        }
    }

    pub fn value(&self) -> F {
        self.value
    }

    pub fn digest(&self) -> &Bytes {
        &self.digest
    }

    /// Wire form of the opening: the value followed by the randomness.
    pub fn opening(&self) -> Bytes {
        let value = FieldSerializer::new().to_canonical(&self.value);
        serializer::encode(&(value, &self.randomness[..]))
    }

    /// Check an opening against a digest, returning the committed value.
    ///
    /// Returns `None` both for malformed openings and for openings that do
    /// not hash to `digest`.
    pub fn verify(digest: &[u8], opening: Bytes) -> Option<F> {
        let serializer = FieldSerializer::<F>::new();
        let (value, randomness): (Vec<u8>, Vec<u8>) = serializer::decode(&opening).ok()?;
        let value = serializer.from_canonical(&value).ok()?;
        if randomness.len() != RANDOMNESS_BYTES {
            return None;
        }
        let recomputed = hash_opening(&serializer.serialize(&value), &randomness);
        (recomputed.as_ref() == digest).then_some(value)
    }
}

fn hash_opening(value: &[u8], randomness: &[u8]) -> Bytes {
    let digest = CommitmentHash::new()
        .chain_update(value)
        .chain_update(randomness)
        .finalize();
    Bytes::copy_from_slice(&digest)
}

/// Checks that everybody received the same broadcast.
///
/// Round 0 sends a digest over all `messages`, round 1 compares every
/// party's digest with ours.
#[derive(Debug)]
pub struct BroadcastValidation {
    messages: Vec<Bytes>,
    digest: Option<Bytes>,
}

impl BroadcastValidation {
    pub fn new(messages: Vec<Bytes>) -> Self {
        Self {
            messages,
            digest: None,
        }
    }

    fn digest_messages(&self) -> Bytes {
        let mut hash = CommitmentHash::new();
        for msg in &self.messages {
            hash.update((msg.len() as u64).to_be_bytes());
            hash.update(msg);
        }
        Bytes::copy_from_slice(&hash.finalize())
    }
}

impl<P: ResourcePool> NativeProtocol<P> for BroadcastValidation {
    fn evaluate(
        &mut self,
        round: usize,
        _pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            let digest = self.digest_messages();
            network.send_to_all(serializer::serialize_bytes(&digest));
            self.digest = Some(digest);
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let own = ready(&self.digest)?;
        for (i, bytes) in network.receive_from_all()?.into_iter().enumerate() {
            let party = PartyId::from_index(i);
            let theirs = serializer::deserialize_bytes(bytes)?;
            if theirs != own {
                tracing::warn!(%party, "Broadcast digests differ");
                return Err(MaliciousActivity::BroadcastDigestMismatch { party }.into());
            }
        }
        Ok(EvaluationStatus::IsDone)
    }
}

/// Every party broadcasts one message, validated when there are three or
/// more parties. The result holds all messages indexed by party.
#[derive(Debug)]
pub struct Broadcast {
    own: Option<Bytes>,
    received: Option<Vec<Bytes>>,
    validation: Option<Nested<BroadcastValidation>>,
    done: bool,
}

impl Broadcast {
    pub fn new(msg: Bytes) -> Self {
        Self {
            own: Some(msg),
            received: None,
            validation: None,
            done: false,
        }
    }
}

impl<P: ResourcePool> NativeProtocol<P> for Broadcast {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        match round {
            0 => {
                if let Some(msg) = self.own.take() {
                    network.send_to_all(msg);
                }
                Ok(EvaluationStatus::HasMoreRounds)
            }
            1 => {
                let messages = network.receive_from_all()?;
                if pool.parties() < 3 {
                    self.received = Some(messages);
                    self.done = true;
                    return Ok(EvaluationStatus::IsDone);
                }
                let mut validation = Nested::new(BroadcastValidation::new(messages.clone()));
                validation.step(pool, network)?;
                self.received = Some(messages);
                self.validation = Some(validation);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            _ => {
                if let Some(validation) = &mut self.validation {
                    validation.step(pool, network)?;
                }
                self.done = true;
                Ok(EvaluationStatus::IsDone)
            }
        }
    }
}

impl<P: ResourcePool> Computation<P> for Broadcast {
    type Output = Vec<Bytes>;

    fn out(&self) -> Result<Vec<Bytes>, SpdzError> {
        if !self.done {
            return ready(&None);
        }
        ready(&self.received)
    }
}

/// Commit to a value towards all parties.
///
/// The result is every party's digest, indexed by party. The commitment
/// itself stays here until it is taken for opening.
#[derive(Debug)]
pub struct Commit<F> {
    value: F,
    commitment: Option<Commitment<F>>,
    broadcast: Option<Nested<Broadcast>>,
    digests: Option<Vec<Bytes>>,
}

impl<F: PrimeField> Commit<F> {
    pub fn new(value: F) -> Self {
        Self {
            value,
            commitment: None,
            broadcast: None,
            digests: None,
        }
    }

    pub fn take_commitment(&mut self) -> Option<Commitment<F>> {
        self.commitment.take()
    }
}

impl<F: PrimeField, P: ResourcePool> NativeProtocol<P> for Commit<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            let commitment = Commitment::new(self.value, pool.rng());
            self.broadcast = Some(Nested::new(Broadcast::new(serializer::serialize_bytes(
                commitment.digest(),
            ))));
            self.commitment = Some(commitment);
        }
        let Some(broadcast) = &mut self.broadcast else {
            return ready(&None);
        };
        if broadcast.step(pool, network)? == EvaluationStatus::HasMoreRounds {
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let digests = Computation::<P>::out(broadcast.inner())?
            .into_iter()
            .map(serializer::deserialize_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        self.digests = Some(digests);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField, P: ResourcePool> Computation<P> for Commit<F> {
    type Output = Vec<Bytes>;

    fn out(&self) -> Result<Vec<Bytes>, SpdzError> {
        ready(&self.digests)
    }
}

/// Open a commitment and check every other party's opening against the
/// digest they committed to. The result is all opened values by party.
#[derive(Debug)]
pub struct OpenCommitment<F> {
    commitment: Option<Commitment<F>>,
    digests: Vec<Bytes>,
    broadcast: Option<Nested<Broadcast>>,
    values: Option<Vec<F>>,
}

impl<F: PrimeField> OpenCommitment<F> {
    pub fn new(commitment: Commitment<F>, digests: Vec<Bytes>) -> Self {
        Self {
            commitment: Some(commitment),
            digests,
            broadcast: None,
            values: None,
        }
    }
}

impl<F: PrimeField, P: ResourcePool> NativeProtocol<P> for OpenCommitment<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            if let Some(commitment) = self.commitment.take() {
                self.broadcast = Some(Nested::new(Broadcast::new(commitment.opening())));
            }
        }
        let Some(broadcast) = &mut self.broadcast else {
            return ready(&None);
        };
        if broadcast.step(pool, network)? == EvaluationStatus::HasMoreRounds {
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let openings = Computation::<P>::out(broadcast.inner())?;
        if openings.len() != self.digests.len() {
            return Err(MaliciousActivity::MalformedMessage.into());
        }
        let values = openings
            .into_iter()
            .zip(&self.digests)
            .enumerate()
            .map(|(i, (opening, digest))| {
                Commitment::verify(digest, opening).ok_or_else(|| {
                    let party = PartyId::from_index(i);
                    tracing::warn!(%party, "Opening does not match commitment");
                    MaliciousActivity::CommitmentMismatch { party }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.values = Some(values);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField, P: ResourcePool> Computation<P> for OpenCommitment<F> {
    type Output = Vec<F>;

    fn out(&self) -> Result<Vec<F>, SpdzError> {
        ready(&self.values)
    }
}

#[derive(Debug)]
enum Phase<F> {
    Commit(Nested<Commit<F>>),
    Open(Nested<OpenCommitment<F>>),
    Done(Vec<F>),
}

/// Commit to a value, then open it once everybody has committed.
///
/// The opening starts in the same round the last commitment arrives.
#[derive(Debug)]
pub struct CommitReveal<F> {
    phase: Phase<F>,
}

impl<F: PrimeField> CommitReveal<F> {
    pub fn new(value: F) -> Self {
        Self {
            phase: Phase::Commit(Nested::new(Commit::new(value))),
        }
    }
}

impl<F: PrimeField, P: ResourcePool> NativeProtocol<P> for CommitReveal<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        loop {
            match &mut self.phase {
                Phase::Commit(commit) => {
                    if commit.step(pool, network)? == EvaluationStatus::HasMoreRounds {
                        return Ok(EvaluationStatus::HasMoreRounds);
                    }
                    let digests = Computation::<P>::out(commit.inner())?;
                    let commitment = commit
                        .inner_mut()
                        .take_commitment()
                        .ok_or(UsageError::NotDone)?;
                    self.phase = Phase::Open(Nested::new(OpenCommitment::new(commitment, digests)));
                }
                Phase::Open(open) => {
                    if open.step(pool, network)? == EvaluationStatus::HasMoreRounds {
                        return Ok(EvaluationStatus::HasMoreRounds);
                    }
                    let values = Computation::<P>::out(open.inner())?;
                    self.phase = Phase::Done(values);
                }
                Phase::Done(_) => return Ok(EvaluationStatus::IsDone),
            }
        }
    }
}

impl<F: PrimeField, P: ResourcePool> Computation<P> for CommitReveal<F> {
    type Output = Vec<F>;

    fn out(&self) -> Result<Vec<F>, SpdzError> {
        match &self.phase {
            Phase::Done(values) => Ok(values.clone()),
            _ => ready(&None),
        }
    }
}

/// Jointly sample a field element no coalition short of everyone can bias:
/// every party commits to a random element, all are opened and summed.
#[derive(Debug)]
pub struct CoinToss<F> {
    reveal: Option<CommitReveal<F>>,
    seed: Option<F>,
}

impl<F: PrimeField> CoinToss<F> {
    pub fn new() -> Self {
        Self {
            reveal: None,
            seed: None,
        }
    }
}

impl<F: PrimeField> Default for CoinToss<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField, P: ResourcePool> NativeProtocol<P> for CoinToss<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        let reveal = self
            .reveal
            .get_or_insert_with(|| CommitReveal::new(F::random(&mut *pool.rng())));
        if reveal.evaluate(round, pool, network)? == EvaluationStatus::HasMoreRounds {
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let values = Computation::<P>::out(&*reveal)?;
        self.seed = Some(values.into_iter().sum());
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField, P: ResourcePool> Computation<P> for CoinToss<F> {
    type Output = F;

    fn out(&self) -> Result<F, SpdzError> {
        ready(&self.seed)
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{
        algebra::Element32,
        net::round::RoundBuffer,
        schemes::spdz::{preprocessing::DummyDataSupplier, SpdzResourcePool},
        testing::Cluster,
    };

    type Pool = SpdzResourcePool<Element32>;

    fn local_parties(n: usize) -> (Vec<Pool>, Vec<RoundBuffer>) {
        PartyId::all(n)
            .map(|id| {
                let pool = Pool::new(id, n, DummyDataSupplier::new(id, n, 0).unwrap()).unwrap();
                (pool, RoundBuffer::new(id, n))
            })
            .unzip()
    }

    /// Move one round of messages between local buffers.
    fn exchange(buffers: &mut [RoundBuffer]) {
        let outgoing: Vec<_> = buffers.iter_mut().map(RoundBuffer::take_outgoing).collect();
        for (j, buffer) in buffers.iter_mut().enumerate() {
            let incoming = outgoing.iter().map(|(out, _)| out[j].clone()).collect();
            buffer.deliver(incoming, outgoing[j].1.clone()).unwrap();
        }
    }

    #[test]
    fn inconsistent_broadcast_is_detected() {
        let (mut pools, mut buffers) = local_parties(3);
        let honest = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        let mut validations: Vec<_> = (0..3)
            .map(|i| {
                let mut seen = honest.clone();
                if i == 2 {
                    seen[0] = Bytes::from_static(b"c");
                }
                BroadcastValidation::new(seen)
            })
            .collect();
        for ((v, pool), net) in validations.iter_mut().zip(&mut pools).zip(&mut buffers) {
            assert_eq!(v.evaluate(0, pool, net).unwrap(), EvaluationStatus::HasMoreRounds);
        }
        exchange(&mut buffers);
        let results: Vec<_> = validations
            .iter_mut()
            .zip(&mut pools)
            .zip(&mut buffers)
            .map(|((v, pool), net)| v.evaluate(1, pool, net))
            .collect();
        for (i, res) in results.into_iter().enumerate() {
            let culprit = if i == 2 { PartyId(1) } else { PartyId(3) };
            assert!(matches!(
                res,
                Err(SpdzError::Malicious(MaliciousActivity::BroadcastDigestMismatch { party })) if party == culprit
            ));
        }
    }

    #[tokio::test]
    async fn coin_toss_agrees() {
        let res = Cluster::new(3)
            .run(|mut session| async move {
                let mut toss = CoinToss::<Element32>::new();
                let rounds = session.run(&mut [&mut toss]).await.unwrap();
                (rounds, Computation::<Pool>::out(&toss).unwrap())
            })
            .await
            .unwrap();
        // Commit, validate, open, validate: the phases overlap by one round.
        assert!(res.iter().all(|&(rounds, _)| rounds == 5));
        assert!(res.iter().all(|&(_, seed)| seed == res[0].1));
    }

    #[tokio::test]
    async fn commit_reveal_returns_every_value() {
        let res = Cluster::new(2)
            .run(|mut session| async move {
                let me = session.pool().my_id().0 as u64;
                let mut reveal = CommitReveal::new(Element32::from(100 + me));
                let rounds = session.run(&mut [&mut reveal]).await.unwrap();
                (rounds, Computation::<Pool>::out(&reveal).unwrap())
            })
            .await
            .unwrap();
        for (rounds, values) in res {
            assert_eq!(rounds, 3);
            assert_eq!(values, vec![Element32::from(101u64), Element32::from(102u64)]);
        }
    }

    #[test]
    fn commitment_opens_to_its_value() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let value = Element32::from(1234u64);
        let commitment = Commitment::new(value, &mut rng);
        let opened = Commitment::<Element32>::verify(commitment.digest(), commitment.opening());
        assert_eq!(opened, Some(value));
    }

    #[test]
    fn commitment_is_binding() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        for i in 0..200u64 {
            let commitment = Commitment::new(Element32::from(i), &mut rng);

            let forged_value = Commitment {
                value: Element32::from(i + 1),
                randomness: commitment.randomness,
                digest: commitment.digest.clone(),
            };
            assert_eq!(
                Commitment::<Element32>::verify(commitment.digest(), forged_value.opening()),
                None
            );

            let mut randomness = commitment.randomness;
            randomness[(i as usize) % RANDOMNESS_BYTES] ^= 1;
            let forged_randomness = Commitment {
                value: commitment.value,
                randomness,
                digest: commitment.digest.clone(),
            };
            assert_eq!(
                Commitment::<Element32>::verify(commitment.digest(), forged_randomness.opening()),
                None
            );
        }
    }

    #[test]
    fn commitment_hides_behind_randomness() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let value = Element32::from(42u64);
        let c1 = Commitment::new(value, &mut rng);
        let c2 = Commitment::new(value, &mut rng);
        assert_ne!(c1.digest(), c2.digest());
    }

    #[test]
    fn garbage_opening_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let commitment = Commitment::new(Element32::from(9u64), &mut rng);
        let garbage = Bytes::from_static(&[0, 0, 0, 1, 7]);
        assert_eq!(
            Commitment::<Element32>::verify(commitment.digest(), garbage),
            None
        );
    }
}
