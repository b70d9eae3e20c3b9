//! Boolean operations on shared bits.
//!
//! Bits are field elements that are either zero or one. Nothing here checks
//! that; feeding anything else gives meaningless results.

use ff::PrimeField;

use crate::{
    error::{SpdzError, UsageError},
    net::Network,
    protocols::{ready, Computation, EvaluationStatus, NativeProtocol},
    schemes::spdz::{arithmetic::BeaverBatch, Share, SpdzResourcePool},
};

type Pool<F> = SpdzResourcePool<F>;

fn check_lengths(left: usize, right: usize) -> Result<(), UsageError> {
    if left != right {
        return Err(UsageError::LengthMismatch { left, right });
    }
    Ok(())
}

/// Pairwise AND of two equal-length lists, in a single round trip.
#[derive(Debug)]
pub struct AndBatch<F: PrimeField> {
    left: Vec<Share<F>>,
    right: Vec<Share<F>>,
    pending: Option<BeaverBatch<F>>,
    result: Option<Vec<Share<F>>>,
}

impl<F: PrimeField> AndBatch<F> {
    pub fn new(left: Vec<Share<F>>, right: Vec<Share<F>>) -> Result<Self, UsageError> {
        check_lengths(left.len(), right.len())?;
        Ok(Self {
            left,
            right,
            pending: None,
            result: None,
        })
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for AndBatch<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            if self.left.is_empty() {
                self.result = Some(Vec::new());
                return Ok(EvaluationStatus::IsDone);
            }
            let pairs = self.left.iter().copied().zip(self.right.iter().copied());
            self.pending = Some(BeaverBatch::start(pool, network, pairs)?);
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let batch = self.pending.take().ok_or(UsageError::NotDone)?;
        self.result = Some(batch.finish(pool, network)?);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for AndBatch<F> {
    type Output = Vec<Share<F>>;

    fn out(&self) -> Result<Vec<Share<F>>, SpdzError> {
        ready(&self.result)
    }
}

/// One level of carry computation over `(propagate, generate)` pairs.
///
/// The pairs are ordered from least significant. Neighbours `lo, hi` are
/// merged into `(p_lo p_hi, g_hi + p_hi g_lo)`, which takes two triples per
/// merge and a single round trip for the whole level. An odd last pair is
/// carried over as is.
#[derive(Debug)]
pub struct CarryPropagation<F: PrimeField> {
    pairs: Vec<(Share<F>, Share<F>)>,
    pending: Option<BeaverBatch<F>>,
    result: Option<Vec<(Share<F>, Share<F>)>>,
}

impl<F: PrimeField> CarryPropagation<F> {
    pub fn new(pairs: Vec<(Share<F>, Share<F>)>) -> Self {
        Self {
            pairs,
            pending: None,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for CarryPropagation<F> {
    fn evaluate(
        &mut self,
        round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if round == 0 {
            if self.pairs.len() < 2 {
                self.result = Some(self.pairs.clone());
                return Ok(EvaluationStatus::IsDone);
            }
            let products = self.pairs.chunks_exact(2).flat_map(|chunk| {
                let ((p_lo, g_lo), (p_hi, _)) = (chunk[0], chunk[1]);
                [(p_lo, p_hi), (p_hi, g_lo)]
            });
            self.pending = Some(BeaverBatch::start(pool, network, products)?);
            return Ok(EvaluationStatus::HasMoreRounds);
        }
        let batch = self.pending.take().ok_or(UsageError::NotDone)?;
        let products = batch.finish(pool, network)?;
        let mut merged: Vec<_> = self
            .pairs
            .chunks_exact(2)
            .zip(products.chunks_exact(2))
            .map(|(chunk, prod)| {
                let (_, g_hi) = chunk[1];
                (prod[0], g_hi + prod[1])
            })
            .collect();
        if self.pairs.len() % 2 == 1 {
            merged.extend(self.pairs.last().copied());
        }
        self.result = Some(merged);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for CarryPropagation<F> {
    type Output = Vec<(Share<F>, Share<F>)>;

    fn out(&self) -> Result<Vec<(Share<F>, Share<F>)>, SpdzError> {
        ready(&self.result)
    }
}

#[derive(Debug)]
struct OrLevel<F: PrimeField> {
    sums: Vec<Share<F>>,
    tail: Option<Share<F>>,
    batch: BeaverBatch<F>,
}

/// OR of all bits in a list.
///
/// Neighbours are combined as `a + b - a b` level by level. The next level
/// starts in the round the previous one is opened, so `k` levels take `k + 1`
/// rounds. Empty input gives a shared zero and a single bit is returned as
/// is; neither needs any communication.
#[derive(Debug)]
pub struct OrList<F: PrimeField> {
    current: Vec<Share<F>>,
    level: Option<OrLevel<F>>,
    result: Option<Share<F>>,
}

impl<F: PrimeField> OrList<F> {
    pub fn new(bits: Vec<Share<F>>) -> Self {
        Self {
            current: bits,
            level: None,
            result: None,
        }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for OrList<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        if let Some(level) = self.level.take() {
            let products = level.batch.finish(pool, network)?;
            self.current = level
                .sums
                .into_iter()
                .zip(products)
                .map(|(sum, prod)| sum - prod)
                .chain(level.tail)
                .collect();
        }
        match self.current.as_slice() {
            [] => {
                self.result = Some(pool.known(F::ZERO));
                Ok(EvaluationStatus::IsDone)
            }
            [bit] => {
                self.result = Some(*bit);
                Ok(EvaluationStatus::IsDone)
            }
            bits => {
                let pairs: Vec<_> = bits
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect();
                let tail = (bits.len() % 2 == 1).then(|| bits[bits.len() - 1]);
                let sums = pairs.iter().map(|&(a, b)| a + b).collect();
                let batch = BeaverBatch::start(pool, network, pairs)?;
                self.level = Some(OrLevel { sums, tail, batch });
                Ok(EvaluationStatus::HasMoreRounds)
            }
        }
    }
}

impl<F: PrimeField> Computation<Pool<F>> for OrList<F> {
    type Output = Share<F>;

    fn out(&self) -> Result<Share<F>, SpdzError> {
        ready(&self.result)
    }
}

/// `1 - x` for every bit.
#[derive(Debug)]
pub struct Not<F: PrimeField> {
    bits: Vec<Share<F>>,
    result: Option<Vec<Share<F>>>,
}

impl<F: PrimeField> Not<F> {
    pub fn new(bits: Vec<Share<F>>) -> Self {
        Self { bits, result: None }
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for Not<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        let one = pool.known(F::ONE);
        self.result = Some(self.bits.iter().map(|&x| one - x).collect());
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for Not<F> {
    type Output = Vec<Share<F>>;

    fn out(&self) -> Result<Vec<Share<F>>, SpdzError> {
        ready(&self.result)
    }
}

/// `x + k - 2 k x` for every bit `x` and public bit `k`.
#[derive(Debug)]
pub struct XorKnown<F: PrimeField> {
    bits: Vec<Share<F>>,
    known: Vec<F>,
    result: Option<Vec<Share<F>>>,
}

impl<F: PrimeField> XorKnown<F> {
    pub fn new(bits: Vec<Share<F>>, known: Vec<F>) -> Result<Self, UsageError> {
        check_lengths(bits.len(), known.len())?;
        Ok(Self {
            bits,
            known,
            result: None,
        })
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for XorKnown<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        let xored = self
            .bits
            .iter()
            .zip(&self.known)
            .map(|(&x, &k)| (x * (F::ONE - k.double())).add_public(k, pool))
            .collect();
        self.result = Some(xored);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for XorKnown<F> {
    type Output = Vec<Share<F>>;

    fn out(&self) -> Result<Vec<Share<F>>, SpdzError> {
        ready(&self.result)
    }
}

/// `x k` for every bit `x` and public bit `k`.
#[derive(Debug)]
pub struct AndKnown<F: PrimeField> {
    bits: Vec<Share<F>>,
    known: Vec<F>,
    result: Option<Vec<Share<F>>>,
}

impl<F: PrimeField> AndKnown<F> {
    pub fn new(bits: Vec<Share<F>>, known: Vec<F>) -> Result<Self, UsageError> {
        check_lengths(bits.len(), known.len())?;
        Ok(Self {
            bits,
            known,
            result: None,
        })
    }
}

impl<F: PrimeField> NativeProtocol<Pool<F>> for AndKnown<F> {
    fn evaluate(
        &mut self,
        _round: usize,
        _pool: &mut Pool<F>,
        _network: &mut dyn Network,
    ) -> Result<EvaluationStatus, SpdzError> {
        let anded = self
            .bits
            .iter()
            .zip(&self.known)
            .map(|(&x, &k)| x * k)
            .collect();
        self.result = Some(anded);
        Ok(EvaluationStatus::IsDone)
    }
}

impl<F: PrimeField> Computation<Pool<F>> for AndKnown<F> {
    type Output = Vec<Share<F>>;

    fn out(&self) -> Result<Vec<Share<F>>, SpdzError> {
        ready(&self.result)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use ff::Field;

    use super::*;
    use crate::{
        algebra::Element32,
        error::SpdzError,
        net::{connection::ConnectionError, NetworkError, PartyId},
        protocols::AsNative,
        schemes::{spdz::SpdzSuite, ProtocolSuite},
        testing::{Cluster, TestSession},
    };

    type F = Element32;

    fn bit(b: bool) -> F {
        if b {
            F::ONE
        } else {
            F::ZERO
        }
    }

    /// Let the first party input `values`.
    async fn share_bits(session: &mut TestSession, values: &[bool]) -> Vec<Share<F>> {
        let suite = SpdzSuite::<F>::new();
        let mine = session.pool().is_anchor();
        let inputs = values
            .iter()
            .map(|&b| suite.input(PartyId(1), mine.then_some(bit(b))))
            .collect();
        session.eval_all(inputs).await.unwrap()
    }

    async fn open_all(session: &mut TestSession, shares: Vec<Share<F>>) -> Vec<F> {
        let suite = SpdzSuite::<F>::new();
        let opens = shares.into_iter().map(|s| suite.open(s)).collect();
        session.eval_all(opens).await.unwrap()
    }

    #[test]
    fn mismatched_lengths_fail_up_front() {
        let one = Share::new(Element32::ONE, Element32::ONE);
        let err = AndBatch::new(vec![one; 3], vec![one; 2]).unwrap_err();
        assert_eq!(err, UsageError::LengthMismatch { left: 3, right: 2 });

        let err = XorKnown::new(vec![one], vec![]).unwrap_err();
        assert_eq!(err, UsageError::LengthMismatch { left: 1, right: 0 });
    }

    #[tokio::test]
    async fn and_for_all_lengths() {
        const N: usize = 9;
        let res = Cluster::new(2)
            .run(|mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let mut results = Vec::new();
                for len in 0..=N {
                    let left: Vec<bool> = (0..len).map(|i| i % 2 == 0).collect();
                    let right: Vec<bool> = (0..len).map(|i| i % 3 == 0).collect();
                    let l = share_bits(&mut session, &left).await;
                    let r = share_bits(&mut session, &right).await;
                    let mut and = suite.and(l, r).unwrap();
                    let rounds = session.run(&mut [and.as_native()]).await.unwrap();
                    let opened = open_all(&mut session, and.out().unwrap()).await;
                    results.push((rounds, opened));
                }
                results
            })
            .await
            .unwrap();

        for results in res {
            for (len, (rounds, opened)) in results.into_iter().enumerate() {
                assert_eq!(rounds, if len == 0 { 0 } else { 2 });
                let expected: Vec<F> = (0..len).map(|i| bit(i % 2 == 0 && i % 3 == 0)).collect();
                assert_eq!(opened, expected);
            }
        }
    }

    #[tokio::test]
    async fn or_of_lists() {
        let cases: [(&[bool], bool, usize); 6] = [
            (&[false, false, true, false], true, 3),
            (&[false, false, false, false], false, 3),
            (&[true, false, true], true, 3),
            (&[false, false, false, false, false, true, false], true, 4),
            (&[true], true, 0),
            (&[], false, 0),
        ];
        let res = Cluster::new(2)
            .run(move |mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let mut results = Vec::new();
                for (bits, _, _) in cases {
                    let shares = share_bits(&mut session, bits).await;
                    let mut or = suite.or(shares);
                    let rounds = session.run(&mut [or.as_native()]).await.unwrap();
                    let opened = open_all(&mut session, vec![or.out().unwrap()]).await;
                    results.push((rounds, opened[0]));
                }
                results
            })
            .await
            .unwrap();

        for results in res {
            for ((rounds, opened), (_, expected, expected_rounds)) in results.into_iter().zip(cases) {
                assert_eq!(opened, bit(expected));
                assert_eq!(rounds, expected_rounds);
            }
        }
    }

    #[tokio::test]
    async fn carry_merges_neighbours() {
        // (propagate, generate), least significant first.
        let pairs = [(true, false), (true, true), (false, true), (true, false), (false, false)];
        let res = Cluster::new(3)
            .run(move |mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let flat: Vec<bool> = pairs.iter().flat_map(|&(p, g)| [p, g]).collect();
                let shares = share_bits(&mut session, &flat).await;
                let shared_pairs = shares.chunks_exact(2).map(|c| (c[0], c[1])).collect();
                let mut carry = suite.carry(shared_pairs);
                let rounds = session.run(&mut [carry.as_native()]).await.unwrap();
                let merged = carry.out().unwrap();
                let flat = merged.into_iter().flat_map(|(p, g)| [p, g]).collect();
                (rounds, open_all(&mut session, flat).await)
            })
            .await
            .unwrap();

        for (rounds, opened) in res {
            assert_eq!(rounds, 2);
            // (1,0)(1,1) -> (1,1), (0,1)(1,0) -> (0,1), (0,0) passes through.
            let expected = [
                bit(true),
                bit(true),
                bit(false),
                bit(true),
                bit(false),
                bit(false),
            ];
            assert_eq!(opened, expected);
        }
    }

    #[tokio::test]
    async fn local_gates() {
        let res = Cluster::new(2)
            .run(|mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let x = share_bits(&mut session, &[false, true, true, false]).await;
                let known = vec![bit(true), bit(true), bit(false), bit(false)];
                let mut ops = vec![
                    suite.not(x.clone()),
                    suite.xor_known(x.clone(), known.clone()).unwrap(),
                    suite.and_known(x, known).unwrap(),
                ];
                let mut batch: Vec<_> = ops.iter_mut().map(|op| op.as_native()).collect();
                let rounds = session.run(&mut batch).await.unwrap();
                drop(batch);
                let mut opened = Vec::new();
                for op in ops {
                    opened.push(open_all(&mut session, op.out().unwrap()).await);
                }
                (rounds, opened)
            })
            .await
            .unwrap();

        for (rounds, opened) in res {
            assert_eq!(rounds, 0);
            let bits = |b: [bool; 4]| b.map(bit).to_vec();
            assert_eq!(opened[0], bits([true, false, false, true]));
            assert_eq!(opened[1], bits([true, false, true, false]));
            assert_eq!(opened[2], bits([false, true, false, false]));
        }
    }

    /// Known bits on both sides of an AND, built locally.
    fn wide_operands(session: &TestSession, pairs: usize) -> (Vec<Share<F>>, Vec<Share<F>>) {
        let pool = session.pool();
        (0..pairs)
            .map(|i| (pool.known(bit(i % 2 == 0)), pool.known(bit(i % 3 == 0))))
            .unzip()
    }

    #[tokio::test]
    async fn wide_and_batches_exceed_default_codec_frames() {
        const PAIRS: usize = 360_000;
        let res = Cluster::new(2)
            .with_round_timeout(Duration::from_secs(120))
            .run(|mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let (left, right) = wide_operands(&session, PAIRS);
                let mut and = suite.and(left, right).unwrap();
                let rounds = session.run(&mut [and.as_native()]).await.unwrap();
                let head = and.out().unwrap()[..12].to_vec();
                let opened = open_all(&mut session, head).await;
                session.finish().await.unwrap();
                (rounds, opened)
            })
            .await
            .unwrap();

        let expected: Vec<F> = (0..12).map(|i| bit(i % 6 == 0)).collect();
        for (rounds, opened) in res {
            assert_eq!(rounds, 2);
            assert_eq!(opened, expected);
        }
    }

    #[tokio::test]
    async fn oversized_rounds_report_the_frame_limit() {
        let res = Cluster::new(2)
            .with_max_frame_length(1 << 16)
            .run(|mut session| async move {
                let suite = SpdzSuite::<F>::new();
                let (left, right) = wide_operands(&session, 10_000);
                let mut and = suite.and(left, right).unwrap();
                let err = session.run(&mut [and.as_native()]).await.unwrap_err();
                (err, session.is_aborted())
            })
            .await
            .unwrap();

        for (err, aborted) in res {
            assert!(
                matches!(
                    err,
                    SpdzError::Network(NetworkError::Connection {
                        source: ConnectionError::FrameTooLarge { max: 65536, .. },
                        ..
                    })
                ),
                "{err:?}"
            );
            assert!(aborted);
        }
    }
}
