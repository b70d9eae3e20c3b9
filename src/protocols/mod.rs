//! The native-protocol contract.
//!
//! A native protocol is a state machine that is polled once per round. In
//! every round it may receive what was sent to it in the previous round,
//! compute, and queue messages for the next one. It then reports whether it
//! needs another round or is done. Nothing blocks inside `evaluate`; the
//! scheduler moves the queued messages between rounds, so many protocols can
//! share a single network round-trip.

use rand_chacha::ChaCha20Rng;

use crate::{
    error::{SpdzError, UsageError},
    net::{Network, PartyId},
};

pub mod commitments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStatus {
    HasMoreRounds,
    IsDone,
}

/// Session-wide resources a protocol can draw on while evaluating.
pub trait ResourcePool {
    fn my_id(&self) -> PartyId;

    fn parties(&self) -> usize;

    /// Local randomness, e.g. for commitments.
    fn rng(&mut self) -> &mut ChaCha20Rng;

    /// Opened values still awaiting their MAC audit.
    fn pending_openings(&self) -> usize;
}

pub trait NativeProtocol<P> {
    /// Run round `round` of the protocol, counting from zero.
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError>;

    /// Whether the result reveals something that must be backed by a MAC
    /// check before it is trusted.
    fn requires_mac_check(&self) -> bool {
        false
    }
}

/// Lets boxed computations be handed to the scheduler.
pub trait AsNative<P> {
    fn as_native(&mut self) -> &mut (dyn NativeProtocol<P> + Send + '_);
}

impl<P, T: NativeProtocol<P> + Send> AsNative<P> for T {
    fn as_native(&mut self) -> &mut (dyn NativeProtocol<P> + Send + '_) {
        self
    }
}

/// A native protocol with a result.
pub trait Computation<P>: NativeProtocol<P> + AsNative<P> {
    type Output;

    /// The result, available once `evaluate` has reported `IsDone`.
    fn out(&self) -> Result<Self::Output, SpdzError>;
}

pub(crate) fn ready<T: Clone>(slot: &Option<T>) -> Result<T, SpdzError> {
    slot.clone().ok_or_else(|| UsageError::NotDone.into())
}

/// A protocol run inside another one, with its own round counter.
#[derive(Debug)]
pub(crate) struct Nested<T> {
    inner: T,
    round: usize,
}

impl<T> Nested<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, round: 0 }
    }

    pub fn step<P>(
        &mut self,
        pool: &mut P,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError>
    where
        T: NativeProtocol<P>,
    {
        let status = self.inner.evaluate(self.round, pool, network)?;
        self.round += 1;
        Ok(status)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
