//! Arithmetic on shared values.
//!
//! Linear operations are local and finish in round 0. Multiplication opens
//! the difference to a Beaver triple and takes two rounds, input and output
//! take two (three when the input broadcast must be validated).

use ff::PrimeField;
use tokio_util::bytes::Bytes;

use crate::{
    error::{SpdzError, UsageError},
    net::{Network, PartyId},
    protocols::{
        commitments::BroadcastValidation, ready, Computation, EvaluationStatus, NativeProtocol,
        Nested, ResourcePool,
    },
    schemes::spdz::{
        preprocessing::{MultiplicationTriple, PreProcError},
        receive_opening, send_opening, Share, SpdzResourcePool,
    },
};

type Pool<F> = SpdzResourcePool<F>;

/// Local protocols computing their result in round 0 from the pool alone.
macro_rules! local_protocol {
    ($name:ident<$f:ident> { $($field:ident: $ty:ty),* } -> $out:ty, |$this:ident, $pool:ident| $body:expr) => {
        #[derive(Debug)]
        pub struct $name<$f: PrimeField> {
            $($field: $ty,)*
            result: Option<$out>,
        }

        impl<$f: PrimeField> $name<$f> {
            pub fn new($($field: $ty),*) -> Self {
                Self { $($field,)* result: None }
            }
        }

        impl<$f: PrimeField> NativeProtocol<Pool<$f>> for $name<$f> {
            fn evaluate(
                &mut self,
                _round: usize,
                $pool: &mut Pool<$f>,
                _network: &mut dyn Network,
            ) -> Result<EvaluationStatus, SpdzError> {
                let $this = &*self;
                let result = $body;
                self.result = Some(result);
                Ok(EvaluationStatus::IsDone)
            }
        }

        impl<$f: PrimeField> Computation<Pool<$f>> for $name<$f> {
            type Output = $out;

            fn out(&self) -> Result<$out, SpdzError> {
                ready(&self.result)
            }
        }
    };
}

local_protocol!(KnownValue<F> { value: F } -> Share<F>, |this, pool| pool.known(this.value));

local_protocol!(Add<F> { left: Share<F>, right: Share<F> } -> Share<F>, |this, _pool| this.left + this.right);

local_protocol!(Sub<F> { left: Share<F>, right: Share<F> } -> Share<F>, |this, _pool| this.left - this.right);

local_protocol!(AddKnown<F> { secret: Share<F>, value: F } -> Share<F>, |this, pool| this.secret.add_public(this.value, pool));

local_protocol!(MultKnown<F> { secret: Share<F>, value: F } -> Share<F>, |this, _pool| this.secret * this.value);

/// One multiplication in flight: the triple it consumed and the masked
/// operands being opened.
#[derive(Debug)]
pub(crate) struct BeaverStep<F: PrimeField> {
    a: Share<F>,
    b: Share<F>,
    c: Share<F>,
    epsilon: Share<F>,
    delta: Share<F>,
}

impl<F: PrimeField> BeaverStep<F> {
    fn new(triple: MultiplicationTriple<F>, left: Share<F>, right: Share<F>) -> Self {
        let (a, b, c) = triple.into_shares();
        Self {
            a,
            b,
            c,
            epsilon: left - a,
            delta: right - b,
        }
    }

    /// `x * y = (a + e)(b + d) = c + b e + a d + e d`
    fn product(&self, e: F, d: F, pool: &Pool<F>) -> Share<F> {
        (self.c + self.b * e + self.a * d).add_public(e * d, pool)
    }
}

/// A batch of multiplications sharing one round trip.
///
/// All masked operands travel in a single message per party.
#[derive(Debug)]
pub(crate) struct BeaverBatch<F: PrimeField> {
    steps: Vec<BeaverStep<F>>,
}

impl<F: PrimeField> BeaverBatch<F> {
    pub fn start(
        pool: &mut Pool<F>,
        network: &mut dyn Network,
        pairs: impl IntoIterator<Item = (Share<F>, Share<F>)>,
    ) -> Result<Self, SpdzError> {
        let steps = pairs
            .into_iter()
            .map(|(x, y)| Ok(BeaverStep::new(pool.supplier().next_triple()?, x, y)))
            .collect::<Result<Vec<_>, PreProcError>>()?;
        let batch = Self { steps };
        send_opening(pool, network, &batch.masked());
        Ok(batch)
    }

    fn masked(&self) -> Vec<Share<F>> {
        self.steps
            .iter()
            .flat_map(|step| [step.epsilon, step.delta])
            .collect()
    }

    pub fn finish(
        self,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<Vec<Share<F>>, SpdzError> {
        let opened = receive_opening(pool, network, &self.masked())?;
        let products = self
            .steps
            .iter()
            .zip(opened.chunks_exact(2))
            .map(|(step, ed)| step.product(ed[0], ed[1], pool))
            .collect();
        Ok(products)
    }
}

/// Multiplication of two shared values using one Beaver triple.
#[derive(Debug)]
pub struct Multiply<F: PrimeField> {
    left: Share<F>,
    right: Share<F>,
    pending: Option<BeaverBatch<F>>,
    result: Option<Share<F>>,
}

impl<F: PrimeField> Multiply<F> {
    pub fn new(left: Share<F>, right: Share<F>) -> Self {
        Self {
            left,
            right,
            pending: None,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for Multiply<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            let batch = BeaverBatch::start(pool, network, [(self.left, self.right)])?;
            self.pending = Some(batch);
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let batch = self.pending.take().ok_or(UsageError::NotDone)?;
        let product = batch.finish(pool, network)?;
        self.result = product.into_iter().next();
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for Multiply<F> {
    type Output = Share<F>;

    fn out(&self) -> Result<Share<F>, SpdzError> {
        ready(&self.result)
    }
}

/// Secret-share a value held by `owner`.
///
/// The owner broadcasts its value minus a preprocessed mask it alone knows;
/// everybody adds that public difference to their share of the mask. With
/// three or more parties the difference is validated so the owner cannot
/// give peers different inputs.
#[derive(Debug)]
pub struct Input<F: PrimeField> {
    owner: PartyId,
    value: Option<F>,
    mask: Option<Share<F>>,
    validation: Option<Nested<BroadcastValidation>>,
    unvalidated: Option<Share<F>>,
    result: Option<Share<F>>,
}

impl<F: PrimeField> Input<F> {
    pub fn new(owner: PartyId, value: Option<F>) -> Self {
        Self {
            owner,
            value,
            mask: None,
            validation: None,
            unvalidated: None,
            result: None,
        }
    }

    fn round_zero(
        &mut self,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<(), SpdzError> {
        pool.check_party(self.owner)?;
        let is_owner = network.my_id() == self.owner;
        if is_owner && self.value.is_none() {
            return Err(UsageError::MissingInput(self.owner).into());
        }
        let (mask, real_value) = pool.supplier().next_input_mask(self.owner)?.into_parts();
        if let (true, Some(value)) = (is_owner, self.value) {
            let real_value = real_value.ok_or(PreProcError::MissingInputMask(self.owner))?;
            network.send_to_all(pool.serializer().serialize(&(value - real_value)));
        }
        self.mask = Some(mask);
        Ok(())
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for Input<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        match round {
            0 => {
                self.round_zero(pool, network)?;
                Ok(EvaluationStatus::HasMoreRounds)
            }
            1 => {
                let msg: Bytes = network.receive(self.owner)?;
                let diff = pool.serializer().deserialize(msg.clone())?;
                let mask = self.mask.take().ok_or(UsageError::NotDone)?;
                let share = mask.add_public(diff, pool);
                if pool.parties() < 3 {
                    self.result = Some(share);
                    return Ok(EvaluationStatus::IsDone);
                }
                let mut validation = Nested::new(BroadcastValidation::new(vec![msg]));
                validation.step(pool, network)?;
                self.validation = Some(validation);
                self.unvalidated = Some(share);
                Ok(EvaluationStatus::HasMoreRounds)
            }
            _ => {
                if let Some(validation) = &mut self.validation {
                    validation.step(pool, network)?;
                }
                self.result = self.unvalidated.take();
                Ok(EvaluationStatus::IsDone)
            }
        }
    }
}

impl<F: PrimeField> Computation<Pool<F>> for Input<F> {
    type Output = Share<F>;

    fn out(&self) -> Result<Share<F>, SpdzError> {
        ready(&self.result)
    }
}

/// Open a shared value to every party.
///
/// The opening is recorded for the MAC check, and the result must not be
/// trusted before that check has passed.
#[derive(Debug)]
pub struct OutputToAll<F: PrimeField> {
    secret: Share<F>,
    result: Option<F>,
}

impl<F: PrimeField> OutputToAll<F> {
    pub fn new(secret: Share<F>) -> Self {
        Self {
            secret,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for OutputToAll<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            send_opening(pool, network, &[self.secret]);
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let opened = receive_opening(pool, network, &[self.secret])?;
        self.result = opened.into_iter().next();
        Ok(EvaluationStatus::IsDone)
    }

    fn requires_mac_check(&self) -> bool {
        true
    }
}

impl<F: PrimeField> Computation<Pool<F>> for OutputToAll<F> {
    type Output = F;

    fn out(&self) -> Result<F, SpdzError> {
        ready(&self.result)
    }
}

/// Open a shared value to a single party.
///
/// Everybody opens the value minus a mask whose plaintext only the receiver
/// knows, so only the receiver learns the value. Other parties get `None`.
#[derive(Debug)]
pub struct OutputToParty<F: PrimeField> {
    secret: Share<F>,
    to: PartyId,
    masked: Option<(Share<F>, Option<F>)>,
    result: Option<Option<F>>,
}

impl<F: PrimeField> OutputToParty<F> {
    pub fn new(secret: Share<F>, to: PartyId) -> Self {
        Self {
            secret,
            to,
            masked: None,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for OutputToParty<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            pool.check_party(self.to)?;
            let (mask, real_value) = pool.supplier().next_input_mask(self.to)?.into_parts();
            let masked = self.secret - mask;
            send_opening(pool, network, &[masked]);
            self.masked = Some((masked, real_value));
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let (masked, real_value) = self.masked.take().ok_or(UsageError::NotDone)?;
        let opened = receive_opening(pool, network, &[masked])?;
        let value = if network.my_id() == self.to {
            let real_value = real_value.ok_or(PreProcError::MissingInputMask(self.to))?;
            opened.first().map(|&diff| diff + real_value)
        } else {
            None
        };
        self.result = Some(value);
        Ok(EvaluationStatus::IsDone)
    }

    fn requires_mac_check(&self) -> bool {
        true
    }
}

impl<F: PrimeField> Computation<Pool<F>> for OutputToParty<F> {
    type Output = Option<F>;

    fn out(&self) -> Result<Option<F>, SpdzError> {
        ready(&self.result)
    }
}

#[derive(Debug)]
pub struct RandomElement<F: PrimeField> {
    result: Option<Share<F>>,
}

impl<F: PrimeField> RandomElement<F> {
    pub fn new() -> Self {
        Self { result: None }
    }
}

impl<F: PrimeField> Default for RandomElement<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for RandomElement<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        self.result = Some(pool.supplier().next_random_element()?);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for RandomElement<F> {
    type Output = Share<F>;

    fn out(&self) -> Result<Share<F>, SpdzError> {
        ready(&self.result)
    }
}

#[derive(Debug)]
pub struct RandomBit<F: PrimeField> {
    result: Option<Share<F>>,
}

impl<F: PrimeField> RandomBit<F> {
    pub fn new() -> Self {
        Self { result: None }
    }
}

impl<F: PrimeField> Default for RandomBit<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for RandomBit<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        self.result = Some(pool.supplier().next_bit()?);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for RandomBit<F> {
    type Output = Share<F>;

    fn out(&self) -> Result<Share<F>, SpdzError> {
        ready(&self.result)
    }
}

/// Fetch a truncation pair `(r_prime, r)` for the given precision.
#[derive(Debug)]
pub struct Truncation<F: PrimeField> {
    precision: usize,
    result: Option<(Share<F>, Share<F>)>,
}

impl<F: PrimeField> Truncation<F> {
    pub fn new(precision: usize) -> Self {
        Self {
            precision,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for Truncation<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        let pair = pool.supplier().next_truncation_pair(self.precision)?;
        self.result = Some(pair.into_shares());
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for Truncation<F> {
    type Output = (Share<F>, Share<F>);

    fn out(&self) -> Result<(Share<F>, Share<F>), SpdzError> {
        ready(&self.result)
    }
}
