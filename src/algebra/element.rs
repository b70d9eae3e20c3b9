//! Concrete mathematical field used by the sessions in this crate.
//! Here we have a prime field that is very close to 2^32.
use ff::PrimeField;

#[derive(PrimeField, serde::Serialize, serde::Deserialize)]
#[PrimeFieldModulus = "4294967291"]
#[PrimeFieldGenerator = "2"]
#[PrimeFieldReprEndianness = "little"]
pub struct Element32([u64; 1]);

impl From<Element32> for u64 {
    /// Canonical integer representative of the element.
    fn from(val: Element32) -> Self {
        u64::from_le_bytes(val.to_repr().0)
    }
}

impl From<Element32> for u32 {
    fn from(val: Element32) -> Self {
        let arr = val.to_repr().0;
        u32::from_le_bytes([arr[0], arr[1], arr[2], arr[3]])
    }
}
