use ff::PrimeField;

use crate::schemes::spdz::Share;

/// Partially opened values waiting for their MAC check.
///
/// Every partial opening appends the shared value together with the
/// plaintext it opened to. Only the MAC check drains the store.
#[derive(Debug, Clone, Default)]
pub struct OpenedValueStore<F: PrimeField> {
    pub(crate) shares: Vec<Share<F>>,
    pub(crate) opened: Vec<F>,
}

impl<F: PrimeField> OpenedValueStore<F> {
    pub fn new() -> Self {
        Self {
            shares: Vec::new(),
            opened: Vec::new(),
        }
    }

    pub fn push(&mut self, share: Share<F>, opened: F) {
        self.shares.push(share);
        self.opened.push(opened);
    }

    pub fn len(&self) -> usize {
        self.opened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opened.is_empty()
    }

    /// Take every pending opening, leaving the store empty.
    pub fn drain(&mut self) -> (Vec<Share<F>>, Vec<F>) {
        (
            std::mem::take(&mut self.shares),
            std::mem::take(&mut self.opened),
        )
    }
}

impl<F: PrimeField> Extend<(Share<F>, F)> for OpenedValueStore<F> {
    fn extend<T: IntoIterator<Item = (Share<F>, F)>>(&mut self, iter: T) {
        for (share, opened) in iter {
            self.push(share, opened);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algebra::Element32;

    #[test]
    fn drain_empties_the_store() {
        let mut store = OpenedValueStore::new();
        let share = Share::new(Element32::from(1u64), Element32::from(2u64));
        store.push(share, Element32::from(3u64));
        store.extend([(share, Element32::from(4u64))]);
        assert_eq!(store.len(), 2);

        let (shares, opened) = store.drain();
        assert_eq!(shares, vec![share, share]);
        assert_eq!(opened, vec![Element32::from(3u64), Element32::from(4u64)]);
        assert!(store.is_empty());
    }
}
