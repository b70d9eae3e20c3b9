//! Round-synchronous evaluation of native protocols.
//!
//! A [`Session`] drives batches of protocols in lock-step with the other
//! parties: every pass evaluates each unfinished protocol once, then the
//! messages queued during the pass are exchanged over the transport. The
//! session also decides when opened values get audited:
//!
//! * before a batch that reveals outputs, pending openings are checked,
//! * after such a batch, its own openings are checked before returning,
//! * after any batch, once more than `max_pending_openings` are pending,
//! * on [`Session::finish`], whatever is left.
//!
//! A fatal error poisons the session and every later call fails with
//! [`SpdzError::Aborted`]. So does a usage error raised after the first
//! exchange of a batch, or one that only this party can have run into.

use crate::{
    config::SpdzConfig,
    error::{MaliciousActivity, SpdzError, UsageError},
    net::{round::RoundBuffer, Transport},
    protocols::{AsNative, Computation, EvaluationStatus, NativeProtocol, ResourcePool},
    schemes::{Boxed, ProtocolSuite},
};

pub struct Session<S: ProtocolSuite, T> {
    suite: S,
    pool: S::Pool,
    transport: T,
    buffer: RoundBuffer,
    max_pending_openings: usize,
    poisoned: bool,
}

impl<S, T> Session<S, T>
where
    S: ProtocolSuite,
    S::Pool: Send,
    T: Transport + Send,
{
    pub fn new(
        suite: S,
        pool: S::Pool,
        transport: T,
        config: &SpdzConfig,
    ) -> Result<Self, UsageError> {
        config.validate()?;
        if pool.my_id() != config.my_id || pool.parties() != config.parties {
            return Err(UsageError::InvalidConfig(
                "resource pool does not match the configuration",
            ));
        }
        let buffer = RoundBuffer::new(config.my_id, config.parties);
        Ok(Self {
            suite,
            pool,
            transport,
            buffer,
            max_pending_openings: config.max_pending_openings,
            poisoned: false,
        })
    }

    pub fn suite(&self) -> &S {
        &self.suite
    }

    pub fn pool(&self) -> &S::Pool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut S::Pool {
        &mut self.pool
    }

    pub fn is_aborted(&self) -> bool {
        self.poisoned
    }

    /// Evaluate a batch to completion and return the number of rounds that
    /// used the network.
    #[tracing::instrument(skip_all, fields(party = %self.pool.my_id(), protocols = batch.len()))]
    pub async fn run(
        &mut self,
        batch: &mut [&mut (dyn NativeProtocol<S::Pool> + Send)],
    ) -> Result<usize, SpdzError> {
        if self.poisoned {
            return Err(SpdzError::Aborted);
        }
        let reveals = batch.iter().any(|p| p.requires_mac_check());
        if reveals && self.pool.pending_openings() > 0 {
            self.audit().await?;
        }
        let rounds = self.drive(batch).await?;
        if reveals || self.pool.pending_openings() > self.max_pending_openings {
            self.audit().await?;
        }
        Ok(rounds)
    }

    /// Evaluate a single computation and return its result.
    pub async fn eval<O>(&mut self, mut protocol: Boxed<S::Pool, O>) -> Result<O, SpdzError> {
        self.run(&mut [protocol.as_native()]).await?;
        protocol.out()
    }

    /// Evaluate computations side by side and return their results in order.
    pub async fn eval_all<O>(
        &mut self,
        mut protocols: Vec<Boxed<S::Pool, O>>,
    ) -> Result<Vec<O>, SpdzError> {
        let mut batch: Vec<_> = protocols.iter_mut().map(|p| p.as_native()).collect();
        self.run(&mut batch).await?;
        drop(batch);
        protocols.iter().map(|p| p.out()).collect()
    }

    /// Audit all pending openings now.
    pub async fn mac_check(&mut self) -> Result<(), SpdzError> {
        if self.poisoned {
            return Err(SpdzError::Aborted);
        }
        self.audit().await
    }

    /// End the session, auditing whatever is still pending.
    pub async fn finish(mut self) -> Result<S::Pool, SpdzError> {
        if self.poisoned {
            return Err(SpdzError::Aborted);
        }
        if self.pool.pending_openings() > 0 {
            self.audit().await?;
        }
        Ok(self.pool)
    }

    async fn audit(&mut self) -> Result<(), SpdzError> {
        let mut check = self.suite.mac_check();
        self.drive(&mut [check.as_native()]).await?;
        check.out()
    }

    async fn drive(
        &mut self,
        batch: &mut [&mut (dyn NativeProtocol<S::Pool> + Send)],
    ) -> Result<usize, SpdzError> {
        let mut exchanged = false;
        let res = self.passes(batch, &mut exchanged).await;
        if let Err(err) = &res {
            self.buffer.clear();
            // Usage errors are only recoverable while nothing has left the party
            // and every peer stopped at the same point.
            if err.is_fatal() || exchanged || err.strands_peers() {
                tracing::error!(%err, "Aborting session");
                self.poisoned = true;
            }
        }
        res
    }

    async fn passes(
        &mut self,
        batch: &mut [&mut (dyn NativeProtocol<S::Pool> + Send)],
        exchanged: &mut bool,
    ) -> Result<usize, SpdzError> {
        let mut done = vec![false; batch.len()];
        let mut round = 0;
        let mut active = 0;
        loop {
            for (protocol, finished) in batch.iter_mut().zip(done.iter_mut()) {
                if *finished {
                    continue;
                }
                if protocol.evaluate(round, &mut self.pool, &mut self.buffer)?
                    == EvaluationStatus::IsDone
                {
                    *finished = true;
                }
            }
            if self.buffer.take_activity() {
                active += 1;
            }
            if done.iter().all(|&d| d) {
                if self.buffer.has_outgoing() {
                    return Err(UsageError::SentAfterDone.into());
                }
                break;
            }
            let (outgoing, own) = self.buffer.take_outgoing();
            *exchanged = true;
            let incoming = self.transport.exchange(outgoing).await?;
            self.buffer.deliver(incoming, own)?;
            round += 1;
        }
        if let Some(party) = self.buffer.leftover() {
            tracing::warn!(%party, "Unread messages after batch");
            return Err(MaliciousActivity::SuperfluousMessage { party }.into());
        }
        tracing::debug!(rounds = active, "Batch done");
        Ok(active)
    }
}
