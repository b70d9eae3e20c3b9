//! Error taxonomy of the engine.
//!
//! Usage errors are raised locally, before any message leaves the party, and
//! can be recovered from by the caller as long as every party hits them alike.
//! A missing private input is only noticed by its owner, so it strands the
//! peers and ends the session like any other fatal error. Everything else is
//! fatal as well: a failed check signals an adversary, and a transport failure
//! cannot be told apart from one.

use thiserror::Error;

use crate::{
    net::{NetworkError, PartyId},
    schemes::spdz::preprocessing::PreProcError,
};

#[derive(Debug, Error)]
pub enum SpdzError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Malicious(#[from] MaliciousActivity),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Preprocessing(#[from] PreProcError),
    #[error("Session was aborted by an earlier failure")]
    Aborted,
}

impl SpdzError {
    /// Whether the error terminates the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SpdzError::Usage(_))
    }

    pub fn is_malicious(&self) -> bool {
        matches!(self, SpdzError::Malicious(_))
    }

    /// Whether only this party can have run into the error, leaving the
    /// others waiting on a round that never comes.
    pub fn strands_peers(&self) -> bool {
        matches!(self, SpdzError::Usage(err) if err.is_party_local())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Batch operands differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("Output requested before the protocol was done")]
    NotDone,
    #[error("{0} is the inputting party but has no input")]
    MissingInput(PartyId),
    #[error("{party} is not part of a session of {parties} parties")]
    UnknownParty { party: PartyId, parties: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("A protocol queued messages in the round it finished")]
    SentAfterDone,
}

impl UsageError {
    /// Raised on one party only, from data the others cannot see.
    pub fn is_party_local(&self) -> bool {
        matches!(self, UsageError::MissingInput(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaliciousActivity {
    #[error("Opening from {party} does not match its commitment")]
    CommitmentMismatch { party: PartyId },
    #[error("{party} saw a different broadcast than we did")]
    BroadcastDigestMismatch { party: PartyId },
    #[error("MAC check failed on {checked} opened values")]
    MacCheckFailed { checked: usize },
    #[error("Malformed message")]
    MalformedMessage,
    #[error("{party} sent {actual} elements, expected {expected}")]
    UnexpectedLength {
        party: PartyId,
        expected: usize,
        actual: usize,
    },
    #[error("{party} sent messages nobody asked for")]
    SuperfluousMessage { party: PartyId },
}
