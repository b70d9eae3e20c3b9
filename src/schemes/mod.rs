pub mod spdz;

use crate::{
    error::UsageError,
    net::PartyId,
    protocols::{Computation, ResourcePool},
};

/// A native protocol with its result type, ready to hand to a session.
pub type Boxed<P, T> = Box<dyn Computation<P, Output = T> + Send>;

/// The capabilities a secret-sharing scheme offers to the scheduler.
///
/// Each method builds the native protocol for one operation; nothing runs
/// until the protocol is evaluated by a session. The scheduler only ever
/// talks to a scheme through this trait.
pub trait ProtocolSuite {
    /// Plaintext values.
    type Value;
    /// Shared values.
    type Secret;
    type Pool: ResourcePool;

    fn known(&self, value: Self::Value) -> Boxed<Self::Pool, Self::Secret>;

    fn add(&self, left: Self::Secret, right: Self::Secret) -> Boxed<Self::Pool, Self::Secret>;

    fn sub(&self, left: Self::Secret, right: Self::Secret) -> Boxed<Self::Pool, Self::Secret>;

    fn add_known(&self, secret: Self::Secret, value: Self::Value)
        -> Boxed<Self::Pool, Self::Secret>;

    fn mult_known(
        &self,
        secret: Self::Secret,
        value: Self::Value,
    ) -> Boxed<Self::Pool, Self::Secret>;

    fn mult(&self, left: Self::Secret, right: Self::Secret) -> Boxed<Self::Pool, Self::Secret>;

    /// Share a value held by `owner`. Only the owner passes `Some`.
    fn input(&self, owner: PartyId, value: Option<Self::Value>)
        -> Boxed<Self::Pool, Self::Secret>;

    fn open(&self, secret: Self::Secret) -> Boxed<Self::Pool, Self::Value>;

    /// Reveal a value to `to` only; everybody else gets `None`.
    fn open_to(&self, secret: Self::Secret, to: PartyId)
        -> Boxed<Self::Pool, Option<Self::Value>>;

    fn random_element(&self) -> Boxed<Self::Pool, Self::Secret>;

    fn random_bit(&self) -> Boxed<Self::Pool, Self::Secret>;

    fn truncation_pair(&self, precision: usize)
        -> Boxed<Self::Pool, (Self::Secret, Self::Secret)>;

    fn and(
        &self,
        left: Vec<Self::Secret>,
        right: Vec<Self::Secret>,
    ) -> Result<Boxed<Self::Pool, Vec<Self::Secret>>, UsageError>;

    fn or(&self, bits: Vec<Self::Secret>) -> Boxed<Self::Pool, Self::Secret>;

    fn not(&self, bits: Vec<Self::Secret>) -> Boxed<Self::Pool, Vec<Self::Secret>>;

    fn xor_known(
        &self,
        bits: Vec<Self::Secret>,
        known: Vec<Self::Value>,
    ) -> Result<Boxed<Self::Pool, Vec<Self::Secret>>, UsageError>;

    fn and_known(
        &self,
        bits: Vec<Self::Secret>,
        known: Vec<Self::Value>,
    ) -> Result<Boxed<Self::Pool, Vec<Self::Secret>>, UsageError>;

    /// One level of carry computation on `(propagate, generate)` pairs.
    fn carry(
        &self,
        pairs: Vec<(Self::Secret, Self::Secret)>,
    ) -> Boxed<Self::Pool, Vec<(Self::Secret, Self::Secret)>>;

    /// Audit every value opened since the last check.
    fn mac_check(&self) -> Boxed<Self::Pool, ()>;
}
