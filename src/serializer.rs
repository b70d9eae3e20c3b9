//! Byte codecs for field elements and digests, on top of bincode.
//!
//! An element travels as its canonical representation, a list as the
//! concatenation of those representations, and raw byte strings (digests,
//! commitment randomness) as they are. All of it goes through one fixed-width
//! bincode configuration that rejects trailing bytes, and elements are only
//! accepted in canonical form, so every value has exactly one wire form.

use std::marker::PhantomData;

use bincode::Options;
use ff::PrimeField;
use serde::{Deserialize, Serialize};
use tokio_util::bytes::Bytes;

use crate::error::MaliciousActivity;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode plain data: byte strings and tuples of them.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Bytes {
    // Sequences of known length never fail to encode without a size limit.
    Bytes::from(codec().serialize(value).expect("plain data always encodes"))
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, MaliciousActivity> {
    codec().deserialize(bytes).map_err(|err| {
        tracing::debug!(%err, "Undecodable message");
        MaliciousActivity::MalformedMessage
    })
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSerializer<F> {
    _field: PhantomData<F>,
}

impl<F> Default for FieldSerializer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> FieldSerializer<F> {
    pub const fn new() -> Self {
        Self {
            _field: PhantomData,
        }
    }
}

impl<F: PrimeField> FieldSerializer<F> {
    pub fn serialize(&self, value: &F) -> Bytes {
        encode(value.to_repr().as_ref())
    }

    pub fn deserialize(&self, bytes: Bytes) -> Result<F, MaliciousActivity> {
        let raw: Vec<u8> = decode(&bytes)?;
        self.from_canonical(&raw)
    }

    pub fn serialize_list(&self, values: &[F]) -> Bytes {
        let raw: Vec<u8> = values
            .iter()
            .flat_map(|value| value.to_repr().as_ref().to_vec())
            .collect();
        encode(&raw)
    }

    pub fn deserialize_list(&self, bytes: Bytes) -> Result<Vec<F>, MaliciousActivity> {
        let raw: Vec<u8> = decode(&bytes)?;
        let width = F::Repr::default().as_ref().len();
        if raw.len() % width != 0 {
            return Err(MaliciousActivity::MalformedMessage);
        }
        raw.chunks_exact(width)
            .map(|chunk| self.from_canonical(chunk))
            .collect()
    }

    /// Canonical representation of `value`, without any framing.
    pub fn to_canonical(&self, value: &F) -> Vec<u8> {
        value.to_repr().as_ref().to_vec()
    }

    /// Parse a bare representation, rejecting non-canonical ones.
    pub fn from_canonical(&self, raw: &[u8]) -> Result<F, MaliciousActivity> {
        let mut repr = F::Repr::default();
        if raw.len() != repr.as_ref().len() {
            return Err(MaliciousActivity::MalformedMessage);
        }
        repr.as_mut().copy_from_slice(raw);
        Option::from(F::from_repr(repr)).ok_or(MaliciousActivity::MalformedMessage)
    }
}

pub fn serialize_bytes(raw: &[u8]) -> Bytes {
    encode(raw)
}

pub fn deserialize_bytes(bytes: Bytes) -> Result<Bytes, MaliciousActivity> {
    let raw: Vec<u8> = decode(&bytes)?;
    Ok(Bytes::from(raw))
}

#[cfg(test)]
mod test {
    use ff::Field;

    use super::*;
    use crate::algebra::Element32;

    #[test]
    fn list_carries_its_length() {
        let serializer = FieldSerializer::<Element32>::new();
        let values: Vec<_> = (0..5u64).map(Element32::from).collect();
        let bytes = serializer.serialize_list(&values);
        assert_eq!(serializer.deserialize_list(bytes).unwrap(), values);

        let empty = serializer.serialize_list(&[]);
        assert!(serializer.deserialize_list(empty).unwrap().is_empty());
    }

    #[test]
    fn rejects_truncated_and_trailing_bytes() {
        let serializer = FieldSerializer::<Element32>::new();
        let bytes = serializer.serialize(&-Element32::ONE);
        let truncated = bytes.slice(..bytes.len() - 1);
        assert_eq!(
            serializer.deserialize(truncated),
            Err(MaliciousActivity::MalformedMessage)
        );

        let mut padded = bytes.to_vec();
        padded.push(0);
        assert_eq!(
            serializer.deserialize(Bytes::from(padded)),
            Err(MaliciousActivity::MalformedMessage)
        );
    }

    #[test]
    fn rejects_ragged_lists() {
        let serializer = FieldSerializer::<Element32>::new();
        let bytes = serialize_bytes(&[1u8; 12]);
        assert_eq!(
            serializer.deserialize_list(bytes),
            Err(MaliciousActivity::MalformedMessage)
        );
    }

    #[test]
    fn rejects_non_canonical_elements() {
        let serializer = FieldSerializer::<Element32>::new();
        // The modulus itself is not a canonical representative.
        let modulus: u64 = 4294967291;
        let bytes = serialize_bytes(&modulus.to_le_bytes());
        assert_eq!(
            serializer.deserialize(bytes),
            Err(MaliciousActivity::MalformedMessage)
        );

        let mut list = serializer.to_canonical(&Element32::ONE);
        list.extend_from_slice(&modulus.to_le_bytes());
        assert_eq!(
            serializer.deserialize_list(serialize_bytes(&list)),
            Err(MaliciousActivity::MalformedMessage)
        );
    }
}
