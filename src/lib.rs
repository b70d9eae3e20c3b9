//! Online phase of SPDZ: actively secure multiparty computation on additively
//! shared values, with MACs audited in batches.
//!
//! Protocols are round-driven state machines (see [`protocols`]) built by a
//! [`schemes::ProtocolSuite`] and evaluated in lock-step by an
//! [`engine::Session`].

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod algebra;
pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod protocols;
pub mod schemes;
pub mod serializer;

#[cfg(test)]
mod testing;

pub use config::SpdzConfig;
pub use engine::Session;
pub use error::SpdzError;
