//! SPDZ with a dealer standing in for the offline phase.
//!
//! Every value is additively shared together with a share of its MAC under a
//! global key that is itself additively shared and never reconstructed.
//! Openings are not checked as they happen: they are recorded in the
//! [`OpenedValueStore`] and audited in batches by the MAC check.
//!
//! The protocols are round-driven state machines, see [`crate::protocols`].

use std::marker::PhantomData;

use derive_more::{Add, AddAssign, Sub, SubAssign};
use ff::PrimeField;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{
    config::SpdzConfig,
    error::{MaliciousActivity, SpdzError, UsageError},
    net::{Network, PartyId},
    protocols::ResourcePool,
    schemes::{spdz::preprocessing::DataSupplier, Boxed, ProtocolSuite},
    serializer::FieldSerializer,
};

pub mod arithmetic;
pub mod boolean;
pub mod mac_check;
pub mod preprocessing;
pub mod store;

pub use store::OpenedValueStore;

/// The party that adds public constants to its value share.
pub const ANCHOR: PartyId = PartyId(1);

#[derive(
    Debug,
    Clone,
    Copy,
    Add,
    Sub,
    AddAssign,
    SubAssign,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
)]
pub struct Share<F: PrimeField> {
    pub(crate) val: F,
    pub(crate) mac: F,
}

mod ops {
    use std::ops::{Mul, Neg};

    use ff::PrimeField;

    use super::{Share, SpdzResourcePool};

    // Scaling by a public value needs no MAC key.
    impl<F: PrimeField> Mul<F> for Share<F> {
        type Output = Share<F>;

        fn mul(self, rhs: F) -> Self::Output {
            Share {
                val: self.val * rhs,
                mac: self.mac * rhs,
            }
        }
    }

    impl<F: PrimeField> Neg for Share<F> {
        type Output = Share<F>;

        fn neg(self) -> Self::Output {
            Share {
                val: -self.val,
                mac: -self.mac,
            }
        }
    }

    impl<F: PrimeField> Share<F> {
        #[must_use]
        pub fn add_public(self, val: F, pool: &SpdzResourcePool<F>) -> Self {
            self + pool.known(val)
        }

        #[must_use]
        pub fn sub_public(self, val: F, pool: &SpdzResourcePool<F>) -> Self {
            self - pool.known(val)
        }
    }
}

impl<F: PrimeField> Share<F> {
    pub fn new(val: F, mac: F) -> Self {
        Self { val, mac }
    }

    pub fn val(&self) -> F {
        self.val
    }

    pub fn mac(&self) -> F {
        self.mac
    }
}

/// Everything a SPDZ protocol needs besides the network.
///
/// One pool lives for the whole session and is threaded through every
/// evaluation, so there is no global state.
pub struct SpdzResourcePool<F: PrimeField> {
    my_id: PartyId,
    parties: usize,
    supplier: Box<dyn DataSupplier<F> + Send>,
    store: OpenedValueStore<F>,
    serializer: FieldSerializer<F>,
    rng: ChaCha20Rng,
}

impl<F: PrimeField> std::fmt::Debug for SpdzResourcePool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdzResourcePool")
            .field("my_id", &self.my_id)
            .field("parties", &self.parties)
            .field("pending_openings", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl<F: PrimeField> SpdzResourcePool<F> {
    pub fn new(
        my_id: PartyId,
        parties: usize,
        supplier: impl DataSupplier<F> + Send + 'static,
    ) -> Result<Self, UsageError> {
        if my_id.0 == 0 || my_id.0 > parties {
            return Err(UsageError::UnknownParty {
                party: my_id,
                parties,
            });
        }
        Ok(Self {
            my_id,
            parties,
            supplier: Box::new(supplier),
            store: OpenedValueStore::new(),
            serializer: FieldSerializer::new(),
            rng: ChaCha20Rng::from_entropy(),
        })
    }

    pub fn from_config(
        config: &SpdzConfig,
        supplier: impl DataSupplier<F> + Send + 'static,
    ) -> Result<Self, UsageError> {
        config.validate()?;
        Self::new(config.my_id, config.parties, supplier)
    }

    /// Replace the local randomness, e.g. with a seeded generator in tests.
    pub fn with_rng(mut self, rng: ChaCha20Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn is_anchor(&self) -> bool {
        self.my_id == ANCHOR
    }

    pub fn mac_key_share(&self) -> F {
        self.supplier.mac_key_share()
    }

    /// Load a public constant as a shared value without communication.
    pub fn known(&self, value: F) -> Share<F> {
        Share {
            val: if self.is_anchor() { value } else { F::ZERO },
            mac: value * self.mac_key_share(),
        }
    }

    pub fn supplier(&mut self) -> &mut (dyn DataSupplier<F> + Send) {
        self.supplier.as_mut()
    }

    pub fn store(&self) -> &OpenedValueStore<F> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut OpenedValueStore<F> {
        &mut self.store
    }

    pub fn serializer(&self) -> &FieldSerializer<F> {
        &self.serializer
    }

    pub(crate) fn check_party(&self, party: PartyId) -> Result<(), UsageError> {
        if party.0 == 0 || party.0 > self.parties {
            Err(UsageError::UnknownParty {
                party,
                parties: self.parties,
            })
        } else {
            Ok(())
        }
    }
}

impl<F: PrimeField> ResourcePool for SpdzResourcePool<F> {
    fn my_id(&self) -> PartyId {
        self.my_id
    }

    fn parties(&self) -> usize {
        self.parties
    }

    fn rng(&mut self) -> &mut ChaCha20Rng {
        &mut self.rng
    }

    fn pending_openings(&self) -> usize {
        self.store.len()
    }
}

/// Send our value shares of `shares` to everybody.
///
/// The first half of a partial opening; [`receive_opening`] completes it
/// one round later.
pub(crate) fn send_opening<F: PrimeField>(
    pool: &SpdzResourcePool<F>,
    network: &mut dyn Network,
    shares: &[Share<F>],
) {
    let values: Vec<F> = shares.iter().map(|s| s.val).collect();
    network.send_to_all(pool.serializer().serialize_list(&values));
}

/// Sum everybody's value shares of `shares` and record the openings.
pub(crate) fn receive_opening<F: PrimeField>(
    pool: &mut SpdzResourcePool<F>,
    network: &mut dyn Network,
    shares: &[Share<F>],
) -> Result<Vec<F>, SpdzError> {
    let mut opened = vec![F::ZERO; shares.len()];
    for (i, msg) in network.receive_from_all()?.into_iter().enumerate() {
        let values = pool.serializer().deserialize_list(msg)?;
        if values.len() != shares.len() {
            let party = PartyId::from_index(i);
            tracing::warn!(%party, expected = shares.len(), actual = values.len(), "Wrong number of shares");
            return Err(MaliciousActivity::UnexpectedLength {
                party,
                expected: shares.len(),
                actual: values.len(),
            }
            .into());
        }
        for (sum, value) in opened.iter_mut().zip(values) {
            *sum += value;
        }
    }
    pool.store_mut()
        .extend(shares.iter().copied().zip(opened.iter().copied()));
    Ok(opened)
}

/// The SPDZ protocol suite over the field `F`.
#[derive(Debug, Clone, Copy)]
pub struct SpdzSuite<F> {
    _field: PhantomData<F>,
}

impl<F> SpdzSuite<F> {
    pub const fn new() -> Self {
        Self {
            _field: PhantomData,
        }
    }
}

impl<F> Default for SpdzSuite<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> ProtocolSuite for SpdzSuite<F> {
    type Value = F;
    type Secret = Share<F>;
    type Pool = SpdzResourcePool<F>;

    fn known(&self, value: F) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::KnownValue::new(value))
    }

    fn add(&self, left: Share<F>, right: Share<F>) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::Add::new(left, right))
    }

    fn sub(&self, left: Share<F>, right: Share<F>) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::Sub::new(left, right))
    }

    fn add_known(&self, secret: Share<F>, value: F) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::AddKnown::new(secret, value))
    }

    fn mult_known(&self, secret: Share<F>, value: F) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::MultKnown::new(secret, value))
    }

    fn mult(&self, left: Share<F>, right: Share<F>) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::Multiply::new(left, right))
    }

    fn input(&self, owner: PartyId, value: Option<F>) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::Input::new(owner, value))
    }

    fn open(&self, secret: Share<F>) -> Boxed<Self::Pool, F> {
        Box::new(arithmetic::OutputToAll::new(secret))
    }

    fn open_to(&self, secret: Share<F>, to: PartyId) -> Boxed<Self::Pool, Option<F>> {
        Box::new(arithmetic::OutputToParty::new(secret, to))
    }

    fn random_element(&self) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::RandomElement::new())
    }

    fn random_bit(&self) -> Boxed<Self::Pool, Share<F>> {
        Box::new(arithmetic::RandomBit::new())
    }

    fn truncation_pair(&self, precision: usize) -> Boxed<Self::Pool, (Share<F>, Share<F>)> {
        Box::new(arithmetic::Truncation::new(precision))
    }

    fn and(
        &self,
        left: Vec<Share<F>>,
        right: Vec<Share<F>>,
    ) -> Result<Boxed<Self::Pool, Vec<Share<F>>>, UsageError> {
        Ok(Box::new(boolean::AndBatch::new(left, right)?))
    }

    fn or(&self, bits: Vec<Share<F>>) -> Boxed<Self::Pool, Share<F>> {
        Box::new(boolean::OrList::new(bits))
    }

    fn not(&self, bits: Vec<Share<F>>) -> Boxed<Self::Pool, Vec<Share<F>>> {
        Box::new(boolean::Not::new(bits))
    }

    fn xor_known(
        &self,
        bits: Vec<Share<F>>,
        known: Vec<F>,
    ) -> Result<Boxed<Self::Pool, Vec<Share<F>>>, UsageError> {
        Ok(Box::new(boolean::XorKnown::new(bits, known)?))
    }

    fn and_known(
        &self,
        bits: Vec<Share<F>>,
        known: Vec<F>,
    ) -> Result<Boxed<Self::Pool, Vec<Share<F>>>, UsageError> {
        Ok(Box::new(boolean::AndKnown::new(bits, known)?))
    }

    fn carry(
        &self,
        pairs: Vec<(Share<F>, Share<F>)>,
    ) -> Boxed<Self::Pool, Vec<(Share<F>, Share<F>)>> {
        Box::new(boolean::CarryPropagation::new(pairs))
    }

    fn mac_check(&self) -> Boxed<Self::Pool, ()> {
        Box::new(mac_check::MacCheck::new())
    }
}

#[cfg(test)]
mod test {
    use ff::Field;

    use super::*;
    use crate::{algebra::Element32, schemes::spdz::preprocessing::DummyDataSupplier};

    type F = Element32;

    fn pools(parties: usize) -> Vec<SpdzResourcePool<F>> {
        PartyId::all(parties)
            .map(|id| {
                let supplier = DummyDataSupplier::new(id, parties, 1).unwrap();
                SpdzResourcePool::new(id, parties, supplier).unwrap()
            })
            .collect()
    }

    fn reconstruct(shares: &[Share<F>]) -> (F, F) {
        shares
            .iter()
            .fold((F::ZERO, F::ZERO), |(v, m), s| (v + s.val, m + s.mac))
    }

    fn global_key(pools: &[SpdzResourcePool<F>]) -> F {
        pools.iter().map(|p| p.mac_key_share()).sum()
    }

    #[test]
    fn known_value_is_authenticated() {
        let pools = pools(3);
        let value = F::from(1337u64);
        let shares: Vec<_> = pools.iter().map(|p| p.known(value)).collect();
        assert_eq!(shares[1].val, F::ZERO);
        assert_eq!(shares[2].val, F::ZERO);
        let (val, mac) = reconstruct(&shares);
        assert_eq!(val, value);
        assert_eq!(mac, value * global_key(&pools));
    }

    #[test]
    fn linear_operations_keep_macs_valid() {
        let mut pools = pools(2);
        let x: Vec<_> = pools
            .iter_mut()
            .map(|p| p.supplier().next_random_element().unwrap())
            .collect();
        let key = global_key(&pools);
        let k = F::from(7u64);
        let shares: Vec<_> = x
            .iter()
            .zip(&pools)
            .map(|(s, p)| (*s * k).add_public(F::from(3u64), p).sub_public(F::ONE, p))
            .collect();
        let (x_val, _) = reconstruct(&x);
        let (val, mac) = reconstruct(&shares);
        assert_eq!(val, x_val * k + F::from(2u64));
        assert_eq!(mac, val * key);

        let negated: Vec<_> = shares.iter().map(|s| -*s).collect();
        let (val, mac) = reconstruct(&negated);
        assert_eq!(val, -(x_val * k + F::from(2u64)));
        assert_eq!(mac, val * key);
    }

    #[test]
    fn unknown_party_is_rejected() {
        let supplier = DummyDataSupplier::new(PartyId(1), 2, 0).unwrap();
        let res = SpdzResourcePool::<F>::new(PartyId(3), 2, supplier);
        assert_eq!(
            res.unwrap_err(),
            UsageError::UnknownParty {
                party: PartyId(3),
                parties: 2
            }
        );
    }
}
