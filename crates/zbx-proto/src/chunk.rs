//! Splitting item batches into bounded chunks.

use std::iter::FusedIterator;

use crate::error::{Error, Result};
use crate::item::ItemValue;

pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// A run of consecutive records sent in one round-trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk<'a> {
    /// 1-based position in the batch.
    pub number: usize,
    pub items: &'a [ItemValue],
}

impl Chunk<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pull-based cursor over the chunks of a batch.
///
/// Borrows the records, so only one chunk's worth of payload is ever built at
/// a time. Single pass: call [`chunk`] again to start over.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a [ItemValue],
    max_size: usize,
    next_number: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let take = self.max_size.min(self.rest.len());
        let (items, rest) = self.rest.split_at(take);
        self.rest = rest;

        let number = self.next_number;
        self.next_number += 1;

        Some(Chunk { number, items })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rest.len().div_ceil(self.max_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

impl FusedIterator for Chunks<'_> {}

/// Split `records` into chunks of at most `max_size`, preserving order.
///
/// # Errors
///
/// Returns `Error::Config` if `max_size` is zero.
pub fn chunk(records: &[ItemValue], max_size: usize) -> Result<Chunks<'_>> {
    if max_size == 0 {
        return Err(Error::config("chunk size must be a positive integer"));
    }

    Ok(Chunks {
        rest: records,
        max_size,
        next_number: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<ItemValue> {
        (0..n)
            .map(|i| ItemValue::new("host", format!("key.{i}"), i as i64).unwrap())
            .collect()
    }

    #[test]
    fn test_five_records_max_three() {
        let items = records(5);
        let chunks: Vec<_> = chunk(&items, 3).unwrap().collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[0].number, 1);
        assert_eq!(chunks[1].number, 2);
        assert_eq!(chunks[1].items[0].key(), "key.3");
    }

    #[test]
    fn test_zero_chunk_size_is_config_error() {
        let items = records(1);
        assert!(matches!(chunk(&items, 0), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_batch_yields_nothing() {
        let mut chunks = chunk(&[], DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks.len(), 0);
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_exact_multiple() {
        let items = records(500);
        let chunks = chunk(&items, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.clone().all(|c| c.len() == 250));
    }

    #[test]
    fn test_size_hint_tracks_progress() {
        let items = records(7);
        let mut chunks = chunk(&items, 2).unwrap();
        assert_eq!(chunks.len(), 4);
        chunks.next();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_iterator_is_fused() {
        let items = records(1);
        let mut chunks = chunk(&items, 1).unwrap();
        assert!(chunks.next().is_some());
        assert!(chunks.next().is_none());
        assert!(chunks.next().is_none());
    }
}

#[cfg(test)]
mod proptest_chunk_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn chunks_reassemble_input(m in 0usize..600, n in 1usize..300) {
            let items: Vec<ItemValue> = (0..m)
                .map(|i| ItemValue::new("h", format!("k{i}"), i as i64).unwrap())
                .collect();

            let chunks: Vec<_> = chunk(&items, n).unwrap().collect();

            let total: usize = chunks.iter().map(Chunk::len).sum();
            prop_assert_eq!(total, m);

            let rebuilt: Vec<ItemValue> = chunks.iter().flat_map(|c| c.items.iter().cloned()).collect();
            prop_assert_eq!(&rebuilt, &items);

            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.number, i + 1);
                prop_assert!(!c.is_empty());
                prop_assert!(c.len() <= n);
            }
        }
    }
}
