// Preprocessing

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
};

use ff::PrimeField;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{error::UsageError, net::PartyId, schemes::spdz::Share};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreProcError {
    #[error("Not enough preprocessed triplets")]
    MissingTriplet,
    #[error("No input masks left for {0}")]
    MissingInputMask(PartyId),
    #[error("Not enough random elements")]
    MissingRandomElement,
    #[error("Not enough random bits")]
    MissingBit,
    #[error("No truncation pairs left for precision {0}")]
    MissingTruncationPair(usize),
    #[error("Truncating {0} bits does not fit the field")]
    UnsupportedPrecision(usize),
}

/// Source of the correlated randomness the online phase consumes.
///
/// Everything handed out is used exactly once. Triples, masks and pairs are
/// not `Clone` and are taken by value, so they cannot be reused by accident.
/// All parties must request values in the same order.
pub trait DataSupplier<F: PrimeField> {
    fn next_triple(&mut self) -> Result<MultiplicationTriple<F>, PreProcError>;

    /// The next mask for inputs by `owner`. Only the owner learns its value.
    fn next_input_mask(&mut self, owner: PartyId) -> Result<InputMask<F>, PreProcError>;

    fn next_random_element(&mut self) -> Result<Share<F>, PreProcError>;

    /// A random element that is either zero or one.
    fn next_bit(&mut self) -> Result<Share<F>, PreProcError>;

    fn next_truncation_pair(&mut self, precision: usize)
        -> Result<TruncationPair<F>, PreProcError>;

    /// Our share of the global MAC key.
    fn mac_key_share(&self) -> F;
}

/// Shares of `(a, b, c)` with `c = a * b`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct MultiplicationTriple<F: PrimeField> {
    a: Share<F>,
    b: Share<F>,
    c: Share<F>,
}

impl<F: PrimeField> MultiplicationTriple<F> {
    pub fn new(a: Share<F>, b: Share<F>, c: Share<F>) -> Self {
        Self { a, b, c }
    }

    pub fn into_shares(self) -> (Share<F>, Share<F>, Share<F>) {
        (self.a, self.b, self.c)
    }
}

/// A shared random mask, with its plaintext if we own it.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct InputMask<F: PrimeField> {
    mask: Share<F>,
    real_value: Option<F>,
}

impl<F: PrimeField> InputMask<F> {
    pub fn new(mask: Share<F>, real_value: Option<F>) -> Self {
        Self { mask, real_value }
    }

    pub fn into_parts(self) -> (Share<F>, Option<F>) {
        (self.mask, self.real_value)
    }
}

/// Shares of a random `r_prime` below a power of two and of
/// `r = r_prime >> precision`.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TruncationPair<F: PrimeField> {
    r_prime: Share<F>,
    r: Share<F>,
}

impl<F: PrimeField> TruncationPair<F> {
    pub fn into_shares(self) -> (Share<F>, Share<F>) {
        (self.r_prime, self.r)
    }
}

/// Values only a dealer knows. Handy for testing, never handed to parties.
pub struct SecretValues<F> {
    pub mac_key: F,
}

/// Trusted dealer producing full sharings from a seeded generator.
#[derive(Debug)]
struct Dealer<F: PrimeField> {
    rng: ChaCha20Rng,
    mac_keys: Vec<F>,
    mac_key: F,
}

impl<F: PrimeField> Dealer<F> {
    fn new(seed: u64, parties: usize) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mac_keys: Vec<F> = (0..parties).map(|_| F::random(&mut rng)).collect();
        let mac_key = mac_keys.iter().sum();
        Self {
            rng,
            mac_keys,
            mac_key,
        }
    }

    fn parties(&self) -> usize {
        self.mac_keys.len()
    }

    /// Additive sharing of `value` with matching MAC shares, one per party.
    fn share(&mut self, value: F) -> Vec<Share<F>> {
        let n = self.parties();
        let mut val = value;
        let mut mac = value * self.mac_key;
        let mut shares = Vec::with_capacity(n);
        for _ in 0..n - 1 {
            let val_i = F::random(&mut self.rng);
            let mac_i = F::random(&mut self.rng);
            val -= val_i;
            mac -= mac_i;
            shares.push(Share {
                val: val_i,
                mac: mac_i,
            });
        }
        shares.push(Share { val, mac });
        shares
    }

    fn triples(&mut self) -> Vec<MultiplicationTriple<F>> {
        let a = F::random(&mut self.rng);
        let b = F::random(&mut self.rng);
        let c = a * b;
        let (a, b, c) = (self.share(a), self.share(b), self.share(c));
        itertools::izip!(a, b, c)
            .map(|(a, b, c)| MultiplicationTriple::new(a, b, c))
            .collect()
    }

    fn input_masks(&mut self, owner: PartyId) -> Vec<InputMask<F>> {
        let r = F::random(&mut self.rng);
        let owner = owner.checked_index(self.parties());
        self.share(r)
            .into_iter()
            .enumerate()
            .map(|(i, mask)| {
                let real_value = (owner == Some(i)).then_some(r);
                InputMask::new(mask, real_value)
            })
            .collect()
    }

    fn random_elements(&mut self) -> Vec<Share<F>> {
        let r = F::random(&mut self.rng);
        self.share(r)
    }

    fn bits(&mut self) -> Vec<Share<F>> {
        let bit = if self.rng.gen::<bool>() {
            F::ONE
        } else {
            F::ZERO
        };
        self.share(bit)
    }

    fn truncation_pairs(&mut self, precision: usize) -> Result<Vec<TruncationPair<F>>, PreProcError> {
        // Leave headroom so r_prime is small compared to the modulus.
        let bits = (F::NUM_BITS as usize).saturating_sub(2).min(63);
        if precision >= bits {
            return Err(PreProcError::UnsupportedPrecision(precision));
        }
        let r_prime: u64 = self.rng.gen_range(0..1u64 << bits);
        let r = r_prime >> precision;
        let pairs = self
            .share(F::from(r_prime))
            .into_iter()
            .zip(self.share(F::from(r)))
            .map(|(r_prime, r)| TruncationPair { r_prime, r })
            .collect();
        Ok(pairs)
    }
}

fn take_own<T>(all: Vec<T>, me: PartyId, err: PreProcError) -> Result<T, PreProcError> {
    me.checked_index(all.len())
        .and_then(|i| all.into_iter().nth(i))
        .ok_or(err)
}

/// Unlimited supply for testing and benchmarking.
///
/// Every party runs the same dealer from a shared seed and keeps only its own
/// share of each value. This is of course not secure: anyone holding the seed
/// knows everything.
#[derive(Debug)]
pub struct DummyDataSupplier<F: PrimeField> {
    me: PartyId,
    mac_key_share: F,
    dealer: Dealer<F>,
}

impl<F: PrimeField> DummyDataSupplier<F> {
    pub fn new(me: PartyId, parties: usize, seed: u64) -> Result<Self, UsageError> {
        let index = me
            .checked_index(parties)
            .ok_or(UsageError::UnknownParty { party: me, parties })?;
        let dealer = Dealer::new(seed, parties);
        Ok(Self {
            me,
            mac_key_share: dealer.mac_keys[index],
            dealer,
        })
    }

    /// The reconstructed MAC key. Only for tests.
    pub fn secret_values(&self) -> SecretValues<F> {
        SecretValues {
            mac_key: self.dealer.mac_key,
        }
    }
}

impl<F: PrimeField> DataSupplier<F> for DummyDataSupplier<F> {
    fn next_triple(&mut self) -> Result<MultiplicationTriple<F>, PreProcError> {
        take_own(self.dealer.triples(), self.me, PreProcError::MissingTriplet)
    }

    fn next_input_mask(&mut self, owner: PartyId) -> Result<InputMask<F>, PreProcError> {
        if owner.checked_index(self.dealer.parties()).is_none() {
            return Err(PreProcError::MissingInputMask(owner));
        }
        take_own(
            self.dealer.input_masks(owner),
            self.me,
            PreProcError::MissingInputMask(owner),
        )
    }

    fn next_random_element(&mut self) -> Result<Share<F>, PreProcError> {
        take_own(
            self.dealer.random_elements(),
            self.me,
            PreProcError::MissingRandomElement,
        )
    }

    fn next_bit(&mut self) -> Result<Share<F>, PreProcError> {
        take_own(self.dealer.bits(), self.me, PreProcError::MissingBit)
    }

    fn next_truncation_pair(
        &mut self,
        precision: usize,
    ) -> Result<TruncationPair<F>, PreProcError> {
        take_own(
            self.dealer.truncation_pairs(precision)?,
            self.me,
            PreProcError::MissingTruncationPair(precision),
        )
    }

    fn mac_key_share(&self) -> F {
        self.mac_key_share
    }
}

/// How much of each kind of randomness `dealer_preproc` hands out.
#[derive(Debug, Clone, Default)]
pub struct PreprocessingCounts {
    pub triples: usize,
    /// Input masks per inputting party.
    pub input_masks: usize,
    pub random_elements: usize,
    pub bits: usize,
    pub truncation_pairs: usize,
    pub precision: usize,
}

/// Fuel tanks of one party, dealt up front.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct PreprocessedValues<F: PrimeField> {
    me: PartyId,
    mac_key_share: F,
    triples: Vec<MultiplicationTriple<F>>,
    input_masks: Vec<Vec<InputMask<F>>>,
    random_elements: Vec<Share<F>>,
    bits: Vec<Share<F>>,
    truncation_pairs: BTreeMap<usize, Vec<TruncationPair<F>>>,
}

impl<F: PrimeField> PreprocessedValues<F> {
    fn empty(me: PartyId, parties: usize, mac_key_share: F) -> Self {
        Self {
            me,
            mac_key_share,
            triples: Vec::new(),
            input_masks: (0..parties).map(|_| Vec::new()).collect(),
            random_elements: Vec::new(),
            bits: Vec::new(),
            truncation_pairs: BTreeMap::new(),
        }
    }

    pub fn me(&self) -> PartyId {
        self.me
    }

    pub fn triples_left(&self) -> usize {
        self.triples.len()
    }
}

impl<F: PrimeField + Serialize + DeserializeOwned> PreprocessedValues<F> {
    pub fn to_file(&self, file: File) -> Result<(), bincode::Error> {
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush().map_err(Into::into)
    }

    pub fn from_file(file: File) -> Result<Self, bincode::Error> {
        bincode::deserialize_from(BufReader::new(file))
    }
}

impl<F: PrimeField> DataSupplier<F> for PreprocessedValues<F> {
    fn next_triple(&mut self) -> Result<MultiplicationTriple<F>, PreProcError> {
        self.triples.pop().ok_or(PreProcError::MissingTriplet)
    }

    fn next_input_mask(&mut self, owner: PartyId) -> Result<InputMask<F>, PreProcError> {
        owner
            .0
            .checked_sub(1)
            .and_then(|i| self.input_masks.get_mut(i))
            .and_then(Vec::pop)
            .ok_or(PreProcError::MissingInputMask(owner))
    }

    fn next_random_element(&mut self) -> Result<Share<F>, PreProcError> {
        self.random_elements
            .pop()
            .ok_or(PreProcError::MissingRandomElement)
    }

    fn next_bit(&mut self) -> Result<Share<F>, PreProcError> {
        self.bits.pop().ok_or(PreProcError::MissingBit)
    }

    fn next_truncation_pair(
        &mut self,
        precision: usize,
    ) -> Result<TruncationPair<F>, PreProcError> {
        self.truncation_pairs
            .get_mut(&precision)
            .and_then(Vec::pop)
            .ok_or(PreProcError::MissingTruncationPair(precision))
    }

    fn mac_key_share(&self) -> F {
        self.mac_key_share
    }
}

/// Deal finite preprocessing for `parties` parties.
///
/// The returned secret values must not be given to anyone taking part.
pub fn dealer_preproc<F: PrimeField>(
    seed: u64,
    parties: usize,
    counts: &PreprocessingCounts,
) -> Result<(Vec<PreprocessedValues<F>>, SecretValues<F>), PreProcError> {
    let mut dealer = Dealer::<F>::new(seed, parties);
    let mut tanks: Vec<_> = PartyId::all(parties)
        .zip(&dealer.mac_keys)
        .map(|(id, &key)| PreprocessedValues::empty(id, parties, key))
        .collect();

    for _ in 0..counts.triples {
        for (tank, triple) in tanks.iter_mut().zip(dealer.triples()) {
            tank.triples.push(triple);
        }
    }
    for owner in PartyId::all(parties) {
        for _ in 0..counts.input_masks {
            for (tank, mask) in tanks.iter_mut().zip(dealer.input_masks(owner)) {
                tank.input_masks[owner.index()].push(mask);
            }
        }
    }
    for _ in 0..counts.random_elements {
        for (tank, r) in tanks.iter_mut().zip(dealer.random_elements()) {
            tank.random_elements.push(r);
        }
    }
    for _ in 0..counts.bits {
        for (tank, bit) in tanks.iter_mut().zip(dealer.bits()) {
            tank.bits.push(bit);
        }
    }
    for _ in 0..counts.truncation_pairs {
        for (tank, pair) in tanks
            .iter_mut()
            .zip(dealer.truncation_pairs(counts.precision)?)
        {
            tank.truncation_pairs
                .entry(counts.precision)
                .or_default()
                .push(pair);
        }
    }

    let secret_values = SecretValues {
        mac_key: dealer.mac_key,
    };
    Ok((tanks, secret_values))
}
