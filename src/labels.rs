//! Compact enumerations of clique label windows.

use bincode::{
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};
use hashbrown::HashMap;

use crate::errors::{ChaincrfError, Result};

/// An enumeration of the label windows observed at one clique order,
/// mapping each window to a compact integer id.
///
/// Weight rows for features of this clique order have one column per id.
/// The index is immutable for the duration of a training run.
#[derive(Clone, Debug, Default)]
pub struct LabelIndex {
    windows: Vec<Vec<usize>>,
    ids: HashMap<Vec<usize>, usize>,
}

impl LabelIndex {
    /// Creates an empty index.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index enumerating *every* window of `order` labels over
    /// `num_classes` classes, in mixed-radix order, so the compact id of a
    /// window equals its [`WindowIndex`](crate::WindowIndex) encoding.
    ///
    /// # Errors
    ///
    /// `num_classes` must not be 0 and `num_classes^order` must be
    /// representable.
    pub fn every_window(num_classes: usize, order: usize) -> Result<Self> {
        let codec = crate::WindowIndex::new(num_classes, order)?;
        let mut index = Self::new();
        for i in 0..codec.len() {
            index.add(codec.decode(i))?;
        }
        Ok(index)
    }

    /// Adds a window and returns its compact id. Adding a window twice
    /// returns the existing id.
    ///
    /// # Errors
    ///
    /// Every window in one index must have the same length.
    pub fn add(&mut self, window: Vec<usize>) -> Result<usize> {
        if let Some(first) = self.windows.first() {
            if first.len() != window.len() {
                return Err(ChaincrfError::dimension_mismatch(
                    "all windows in a label index must have the same order",
                ));
            }
        }
        if let Some(&id) = self.ids.get(&window) {
            return Ok(id);
        }
        let id = self.windows.len();
        self.ids.insert(window.clone(), id);
        self.windows.push(window);
        Ok(id)
    }

    /// Gets the compact id of a window, if present.
    #[inline(always)]
    #[must_use]
    pub fn index_of(&self, window: &[usize]) -> Option<usize> {
        self.ids.get(window).copied()
    }

    /// Gets the window for a compact id.
    ///
    /// # Panics
    ///
    /// `id` must be less than [`Self::len`].
    #[inline(always)]
    #[must_use]
    pub fn window(&self, id: usize) -> &[usize] {
        &self.windows[id]
    }

    /// Gets the number of indexed windows.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns `true` if the index holds no window.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Gets the window length shared by every entry, or 0 if empty.
    #[inline(always)]
    #[must_use]
    pub fn order(&self) -> usize {
        self.windows.first().map_or(0, Vec::len)
    }
}

impl<Context> Decode<Context> for LabelIndex {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let windows: Vec<Vec<usize>> = Decode::decode(decoder)?;
        let ids = windows
            .iter()
            .enumerate()
            .map(|(id, w)| (w.clone(), id))
            .collect();
        Ok(Self { windows, ids })
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for LabelIndex {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        <Self as Decode<Context>>::decode(decoder)
    }
}

impl Encode for LabelIndex {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&self.windows, encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_window_matches_mixed_radix() {
        let index = LabelIndex::every_window(3, 2).unwrap();
        assert_eq!(9, index.len());
        assert_eq!(2, index.order());
        assert_eq!(Some(5), index.index_of(&[1, 2]));
        assert_eq!(&[1, 2], index.window(5));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut index = LabelIndex::new();
        let a = index.add(vec![0, 1]).unwrap();
        let b = index.add(vec![0, 1]).unwrap();
        assert_eq!(a, b);
        assert_eq!(1, index.len());
    }

    #[test]
    fn test_add_rejects_mixed_orders() {
        let mut index = LabelIndex::new();
        index.add(vec![0, 1]).unwrap();
        assert!(index.add(vec![0]).is_err());
    }

    #[test]
    fn test_bincode_round_trip() {
        let index = LabelIndex::every_window(2, 2).unwrap();
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&index, config).unwrap();
        let (decoded, _): (LabelIndex, usize) =
            bincode::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(index.len(), decoded.len());
        for id in 0..index.len() {
            assert_eq!(index.window(id), decoded.window(id));
            assert_eq!(Some(id), decoded.index_of(index.window(id)));
        }
    }
}
