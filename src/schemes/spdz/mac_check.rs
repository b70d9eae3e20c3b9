//! Batched MAC check of everything opened so far.
//!
//! The parties toss a common seed, expand it into one coefficient per opened
//! value and check a random linear combination of the openings against the
//! same combination of MAC shares. Each party commits to its share of the
//! difference `delta = sum(r_i mac_i) - alpha_i sum(r_i v_i)`, and the opened
//! deltas must sum to zero. A single check covers any number of openings
//! and lets a forgery through with probability about `1/|F|`.

use digest::Digest;
use ff::PrimeField;
use sha2::Sha256;

use crate::{
    error::{MaliciousActivity, SpdzError, UsageError},
    net::Network,
    protocols::{
        commitments::{CoinToss, CommitReveal},
        Computation, EvaluationStatus, NativeProtocol, Nested,
    },
    schemes::spdz::{Share, SpdzResourcePool},
    serializer::FieldSerializer,
};

type Pool<F> = SpdzResourcePool<F>;

/// Expand a seed into `count` coefficients by hashing it over and over.
pub fn coefficients<F: PrimeField>(seed: F, count: usize) -> Vec<F> {
    let mut state = Sha256::digest(FieldSerializer::new().serialize(&seed));
    (0..count)
        .map(|_| {
            state = Sha256::digest(state);
            let mut low = [0u8; 16];
            low.copy_from_slice(&state[..16]);
            F::from_u128(u128::from_le_bytes(low))
        })
        .collect()
}

#[derive(Debug)]
enum Phase<F: PrimeField> {
    Seed(Nested<CoinToss<F>>),
    Delta(Nested<CommitReveal<F>>),
    Done,
}

#[derive(Debug)]
pub struct MacCheck<F: PrimeField> {
    shares: Vec<Share<F>>,
    opened: Vec<F>,
    phase: Phase<F>,
}

impl<F: PrimeField> MacCheck<F> {
    pub fn new() -> Self {
        Self {
            shares: Vec::new(),
            opened: Vec::new(),
            phase: Phase::Seed(Nested::new(CoinToss::new())),
        }
    }

    fn delta(&self, seed: F, mac_key_share: F) -> F {
        let r = coefficients(seed, self.opened.len());
        let a: F = r.iter().zip(&self.opened).map(|(&r, &v)| r * v).sum();
        let gamma: F = r.iter().zip(&self.shares).map(|(&r, s)| r * s.mac).sum();
        gamma - mac_key_share * a
    }
}

impl<F: PrimeField> Default for MacCheck<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for MacCheck<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            (self.shares, self.opened) = pool.store_mut().drain();
            tracing::debug!(pending = self.opened.len(), "Starting MAC check");
        }
        loop {
            match &mut self.phase {
                Phase::Seed(toss) => {
                    if toss.step(pool, network)? == EvaluationStatus::HasMoreRounds {
                        return Ok(EvaluationStatus::HasMoreRounds);
                    }
                    let seed = Computation::<Pool<F>>::out(toss.inner())?;
                    let delta = self.delta(seed, pool.mac_key_share());
                    self.phase = Phase::Delta(Nested::new(CommitReveal::new(delta)));
                }
                Phase::Delta(reveal) => {
                    if reveal.step(pool, network)? == EvaluationStatus::HasMoreRounds {
                        return Ok(EvaluationStatus::HasMoreRounds);
                    }
                    let deltas = Computation::<Pool<F>>::out(reveal.inner())?;
                    let checked = self.opened.len();
                    if deltas.into_iter().sum::<F>() != F::ZERO {
                        tracing::error!(checked, "MAC check failed");
                        return Err(MaliciousActivity::MacCheckFailed { checked }.into());
                    }
                    tracing::debug!(checked, "MAC check passed");
                    self.shares.clear();
                    self.opened.clear();
                    self.phase = Phase::Done;
                }
                Phase::Done => return Ok(EvaluationStatus::IsDone),
            }
        }
    }
}

impl<F: PrimeField> Computation<Pool<F>> for MacCheck<F> {
    type Output = ();

    fn out(&self) -> Result<(), SpdzError> {
        match self.phase {
            Phase::Done => Ok(()),
            _ => Err(UsageError::NotDone.into()),
        }
    }
}
