//! Session configuration.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
    time::Duration,
};

use crate::{error::UsageError, net::PartyId};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SpdzConfig {
    pub my_id: PartyId,
    pub parties: usize,
    /// Audit the opened values once more than this many are pending.
    pub max_pending_openings: usize,
    /// How long to wait for a peer's round.
    pub round_timeout_ms: u64,
    /// Largest round frame a link sends or accepts, in bytes.
    pub max_frame_length: usize,
}

impl SpdzConfig {
    pub const DEFAULT_MAX_PENDING_OPENINGS: usize = 100_000;
    pub const DEFAULT_ROUND_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_MAX_FRAME_LENGTH: usize = 256 << 20;

    pub fn new(my_id: PartyId, parties: usize) -> Self {
        Self {
            my_id,
            parties,
            max_pending_openings: Self::DEFAULT_MAX_PENDING_OPENINGS,
            round_timeout_ms: Self::DEFAULT_ROUND_TIMEOUT_MS,
            max_frame_length: Self::DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    pub fn with_max_pending_openings(mut self, max: usize) -> Self {
        self.max_pending_openings = max;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), UsageError> {
        if self.parties < 2 {
            return Err(UsageError::InvalidConfig("a session needs at least two parties"));
        }
        if self.my_id.0 == 0 || self.my_id.0 > self.parties {
            return Err(UsageError::UnknownParty {
                party: self.my_id,
                parties: self.parties,
            });
        }
        if self.round_timeout_ms == 0 {
            return Err(UsageError::InvalidConfig("round timeout must be positive"));
        }
        if self.max_frame_length == 0 {
            return Err(UsageError::InvalidConfig("frame length limit must be positive"));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), bincode::Error> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, bincode::Error> {
        let reader = BufReader::new(File::open(path)?);
        bincode::deserialize_from(reader)
    }
}
