//! Dense log-domain potential tables over clique label windows.

use crate::errors::{ChaincrfError, Result};
use crate::math;

/// Mixed-radix codec between label windows and flat table indices.
///
/// A window of `window_size` labels, each in `0..num_classes`, maps to
/// `sum(label[i] * num_classes^(window_size - 1 - i))`, so the label at the
/// *end* of the window occupies the least-significant digit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WindowIndex {
    num_classes: usize,
    window_size: usize,
    len: usize,
}

impl WindowIndex {
    /// Creates a codec for windows of `window_size` labels over
    /// `num_classes` classes.
    ///
    /// # Errors
    ///
    /// `num_classes` must not be 0, and `num_classes^window_size` must be
    /// representable in a `usize`.
    pub fn new(num_classes: usize, window_size: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(ChaincrfError::invalid_argument("num_classes must not be 0"));
        }
        let window_size_u32 = u32::try_from(window_size)
            .map_err(|_| ChaincrfError::model_scale("window_size is too large"))?;
        let len = num_classes
            .checked_pow(window_size_u32)
            .ok_or(ChaincrfError::model_scale(
                "num_classes^window_size exceeds the representable index range",
            ))?;
        Ok(Self {
            num_classes,
            window_size,
            len,
        })
    }

    /// Gets the number of classes.
    #[inline(always)]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Gets the window size.
    #[inline(always)]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Gets the number of distinct windows, `num_classes^window_size`.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the codec addresses no window (never, since a
    /// zero-length window still has the single empty assignment).
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encodes a label window into its flat index.
    ///
    /// # Errors
    ///
    /// `labels` must have exactly `window_size` entries, each less than
    /// `num_classes`.
    pub fn encode(&self, labels: &[usize]) -> Result<usize> {
        if labels.len() != self.window_size {
            return Err(ChaincrfError::dimension_mismatch(
                "label window length does not match window_size",
            ));
        }
        let mut index = 0;
        for &label in labels {
            if label >= self.num_classes {
                return Err(ChaincrfError::dimension_mismatch(
                    "label id out of range for num_classes",
                ));
            }
            index = index * self.num_classes + label;
        }
        Ok(index)
    }

    /// Decodes a flat index back into its label window, the exact inverse
    /// of [`Self::encode`].
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    pub fn decode(&self, index: usize) -> Vec<usize> {
        assert!(index < self.len);
        let mut labels = vec![0; self.window_size];
        let mut rest = index;
        for slot in labels.iter_mut().rev() {
            *slot = rest % self.num_classes;
            rest /= self.num_classes;
        }
        labels
    }
}

/// A dense table of unnormalized log potentials over every assignment of
/// labels to one fixed-width clique window.
///
/// Entries are either finite or exactly `-inf` (an impossible assignment);
/// they are never NaN. All tables participating in one chain share the same
/// number of classes.
#[derive(Clone, Debug)]
pub struct FactorTable {
    index: WindowIndex,
    table: Vec<f64>,
}

impl FactorTable {
    /// Creates a table with every entry set to `-inf`.
    ///
    /// # Errors
    ///
    /// See [`WindowIndex::new`] for the argument requirements.
    pub fn new(num_classes: usize, window_size: usize) -> Result<Self> {
        let index = WindowIndex::new(num_classes, window_size)?;
        let table = vec![f64::NEG_INFINITY; index.len()];
        Ok(Self { index, table })
    }

    /// Gets the number of classes.
    #[inline(always)]
    pub const fn num_classes(&self) -> usize {
        self.index.num_classes()
    }

    /// Gets the window size.
    #[inline(always)]
    pub const fn window_size(&self) -> usize {
        self.index.window_size()
    }

    /// Gets the number of entries.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the table has no entries.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Gets the window codec of this table.
    #[inline(always)]
    pub const fn window_index(&self) -> &WindowIndex {
        &self.index
    }

    /// Encodes a label window into its flat index in this table.
    #[inline(always)]
    pub fn index_of(&self, labels: &[usize]) -> Result<usize> {
        self.index.encode(labels)
    }

    /// Decodes a flat index back into its label window.
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    #[inline(always)]
    pub fn labels_of(&self, index: usize) -> Vec<usize> {
        self.index.decode(index)
    }

    /// Gets the entry at a flat index.
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    #[inline(always)]
    pub fn value_at(&self, index: usize) -> f64 {
        self.table[index]
    }

    /// Sets the entry at a flat index.
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    #[inline(always)]
    pub fn set_value_at(&mut self, index: usize, value: f64) {
        self.table[index] = value;
    }

    /// Sets the entry for a label window.
    #[inline(always)]
    pub fn set_value(&mut self, labels: &[usize], value: f64) -> Result<()> {
        let i = self.index.encode(labels)?;
        self.table[i] = value;
        Ok(())
    }

    /// Adds `value` to the entry at a flat index.
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    #[inline(always)]
    pub fn increment_value_at(&mut self, index: usize, value: f64) {
        self.table[index] += value;
    }

    /// Log-adds `value` into the entry at a flat index, i.e. the entry
    /// becomes `logsumexp(entry, value)`.
    ///
    /// # Panics
    ///
    /// `index` must be less than [`Self::len`].
    #[inline(always)]
    pub fn log_increment_value_at(&mut self, index: usize, value: f64) {
        self.table[index] = math::logsumexp(self.table[index], value);
    }

    /// Computes the log-sum-exp over the whole table, the local partition
    /// contribution of this clique.
    #[must_use]
    pub fn total_mass(&self) -> f64 {
        math::logsumexp_all(&self.table)
    }

    /// Gets the unnormalized log potential of a full label window.
    #[inline(always)]
    pub fn unnormalized_log_prob(&self, labels: &[usize]) -> Result<f64> {
        Ok(self.table[self.index.encode(labels)?])
    }

    /// Gets the normalized log probability of a full label window under
    /// this table alone.
    #[inline(always)]
    pub fn log_prob(&self, labels: &[usize]) -> Result<f64> {
        Ok(self.unnormalized_log_prob(labels)? - self.total_mass())
    }

    /// Marginal unnormalized log mass of the entries whose *first*
    /// `labels.len()` window positions match `labels`.
    ///
    /// # Errors
    ///
    /// `labels` must not be longer than the window.
    pub fn unnormalized_log_prob_front(&self, labels: &[usize]) -> Result<f64> {
        if labels.len() > self.window_size() {
            return Err(ChaincrfError::dimension_mismatch(
                "front label window is wider than the table",
            ));
        }
        let front = WindowIndex::new(self.num_classes(), labels.len())?;
        let block = self.len() / front.len();
        let start = front.encode(labels)? * block;
        Ok(math::logsumexp_all(&self.table[start..start + block]))
    }

    /// Marginal unnormalized log mass of the entries whose *last*
    /// `labels.len()` window positions match `labels`.
    ///
    /// # Errors
    ///
    /// `labels` must not be longer than the window.
    pub fn unnormalized_log_prob_end(&self, labels: &[usize]) -> Result<f64> {
        if labels.len() > self.window_size() {
            return Err(ChaincrfError::dimension_mismatch(
                "end label window is wider than the table",
            ));
        }
        let end = WindowIndex::new(self.num_classes(), labels.len())?;
        let suffix = end.encode(labels)?;
        let mut mass = f64::NEG_INFINITY;
        let mut i = suffix;
        while i < self.len() {
            mass = math::logsumexp(mass, self.table[i]);
            i += end.len();
        }
        Ok(mass)
    }

    /// Normalized log marginal of a window prefix.
    #[inline(always)]
    pub fn log_prob_front(&self, labels: &[usize]) -> Result<f64> {
        Ok(self.unnormalized_log_prob_front(labels)? - self.total_mass())
    }

    /// Normalized log marginal of a window suffix.
    #[inline(always)]
    pub fn log_prob_end(&self, labels: &[usize]) -> Result<f64> {
        Ok(self.unnormalized_log_prob_end(labels)? - self.total_mass())
    }

    /// Log probability of the label `of` in the last window position, given
    /// the `window_size - 1` labels preceding it.
    ///
    /// # Errors
    ///
    /// `given` must hold exactly `window_size - 1` labels.
    pub fn conditional_log_prob_given_previous(&self, given: &[usize], of: usize) -> Result<f64> {
        if given.len() + 1 != self.window_size() {
            return Err(ChaincrfError::dimension_mismatch(
                "conditioning window must have window_size - 1 labels",
            ));
        }
        if of >= self.num_classes() {
            return Err(ChaincrfError::dimension_mismatch(
                "label id out of range for num_classes",
            ));
        }
        let prefix = WindowIndex::new(self.num_classes(), given.len())?;
        let base = prefix.encode(given)? * self.num_classes();
        let block = &self.table[base..base + self.num_classes()];
        Ok(block[of] - math::logsumexp_all(block))
    }

    /// Marginalizes out the first window variable, producing a table one
    /// variable narrower. Total mass is preserved exactly: the result sums
    /// the same entries in the same log-sum-exp order, only grouped.
    ///
    /// # Errors
    ///
    /// The window must hold at least one variable.
    pub fn sum_out_front(&self) -> Result<Self> {
        if self.window_size() == 0 {
            return Err(ChaincrfError::invalid_argument(
                "cannot marginalize an empty window",
            ));
        }
        let mut out = Self::new(self.num_classes(), self.window_size() - 1)?;
        let block = out.len();
        for (i, &v) in self.table.iter().enumerate() {
            out.table[i % block] = math::logsumexp(out.table[i % block], v);
        }
        Ok(out)
    }

    /// Marginalizes out the last window variable, producing a table one
    /// variable narrower.
    ///
    /// # Errors
    ///
    /// The window must hold at least one variable.
    pub fn sum_out_end(&self) -> Result<Self> {
        if self.window_size() == 0 {
            return Err(ChaincrfError::invalid_argument(
                "cannot marginalize an empty window",
            ));
        }
        let mut out = Self::new(self.num_classes(), self.window_size() - 1)?;
        for (j, slot) in out.table.iter_mut().enumerate() {
            let start = j * self.num_classes();
            *slot = math::logsumexp_all(&self.table[start..start + self.num_classes()]);
        }
        Ok(out)
    }

    /// Multiplies (log-adds) a narrower table into this one, aligned on the
    /// *front* of the window: entry `i` receives
    /// `other[i / num_classes^(window_size - other.window_size)]`.
    ///
    /// This is the forward-pass message incorporation of belief
    /// propagation.
    ///
    /// # Errors
    ///
    /// `other` must use the same number of classes and must not be wider
    /// than this table.
    pub fn multiply_in_front(&mut self, other: &Self) -> Result<()> {
        let divisor = self.broadcast_stride(other)?;
        for (i, v) in self.table.iter_mut().enumerate() {
            *v += other.table[i / divisor];
        }
        Ok(())
    }

    /// Multiplies (log-adds) a narrower table into this one, aligned on the
    /// *end* of the window: entry `i` receives
    /// `other[i % num_classes^other.window_size]`.
    ///
    /// This is the backward-pass message incorporation of belief
    /// propagation.
    ///
    /// # Errors
    ///
    /// `other` must use the same number of classes and must not be wider
    /// than this table.
    pub fn multiply_in_end(&mut self, other: &Self) -> Result<()> {
        self.broadcast_stride(other)?;
        let modulus = other.len();
        for (i, v) in self.table.iter_mut().enumerate() {
            *v += other.table[i % modulus];
        }
        Ok(())
    }

    /// Divides this table elementwise by another of identical shape,
    /// cancelling a previously multiplied-in message.
    ///
    /// `-inf - -inf` is defined as `-inf`: an assignment impossible on both
    /// sides stays impossible, never NaN.
    ///
    /// # Errors
    ///
    /// `other` must have the same number of classes and window size.
    pub fn divide_by(&mut self, other: &Self) -> Result<()> {
        if self.index != other.index {
            return Err(ChaincrfError::dimension_mismatch(
                "tables must have identical shapes to divide",
            ));
        }
        for (v, &d) in self.table.iter_mut().zip(&other.table) {
            if *v == f64::NEG_INFINITY && d == f64::NEG_INFINITY {
                *v = f64::NEG_INFINITY;
            } else {
                *v -= d;
            }
        }
        Ok(())
    }

    fn broadcast_stride(&self, other: &Self) -> Result<usize> {
        if self.num_classes() != other.num_classes() {
            return Err(ChaincrfError::dimension_mismatch(
                "tables must share num_classes",
            ));
        }
        if other.window_size() > self.window_size() {
            return Err(ChaincrfError::dimension_mismatch(
                "broadcast source must not be wider than the target",
            ));
        }
        Ok(self.len() / other.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::logsumexp;

    fn filled(num_classes: usize, window_size: usize, values: &[f64]) -> FactorTable {
        let mut t = FactorTable::new(num_classes, window_size).unwrap();
        for (i, &v) in values.iter().enumerate() {
            t.set_value_at(i, v);
        }
        t
    }

    #[test]
    fn test_encode_decode_inverse() {
        let idx = WindowIndex::new(3, 3).unwrap();
        assert_eq!(27, idx.len());
        for i in 0..idx.len() {
            let labels = idx.decode(i);
            assert_eq!(i, idx.encode(&labels).unwrap());
        }
        // end label in the least-significant digit
        assert_eq!(5, idx.encode(&[0, 1, 2]).unwrap());

        let t = FactorTable::new(3, 3).unwrap();
        assert_eq!(vec![0, 1, 2], t.labels_of(5));
        assert_eq!(5, t.index_of(&[0, 1, 2]).unwrap());
        assert_eq!(3, t.window_index().num_classes());
    }

    #[test]
    fn test_encode_rejects_bad_windows() {
        let idx = WindowIndex::new(2, 2).unwrap();
        assert!(idx.encode(&[0]).is_err());
        assert!(idx.encode(&[0, 2]).is_err());
    }

    #[test]
    fn test_window_index_overflow_guard() {
        assert!(WindowIndex::new(1_000_000, 20).is_err());
        assert!(WindowIndex::new(0, 2).is_err());
    }

    #[test]
    fn test_new_table_is_impossible_everywhere() {
        let t = FactorTable::new(2, 2).unwrap();
        assert_eq!(4, t.len());
        for i in 0..t.len() {
            assert_eq!(f64::NEG_INFINITY, t.value_at(i));
        }
        assert_eq!(f64::NEG_INFINITY, t.total_mass());
    }

    #[test]
    fn test_increment_and_log_increment() {
        let mut t = FactorTable::new(2, 1).unwrap();
        t.log_increment_value_at(0, 1.0);
        assert!((t.value_at(0) - 1.0).abs() < f64::EPSILON);
        t.log_increment_value_at(0, 1.0);
        assert!((t.value_at(0) - logsumexp!(1.0, 1.0)).abs() < f64::EPSILON);

        // plain increment adds in log space: an impossible entry stays
        // impossible, a finite one shifts
        t.increment_value_at(1, 2.0);
        assert_eq!(f64::NEG_INFINITY, t.value_at(1));
        t.set_value_at(1, 0.5);
        t.increment_value_at(1, 2.0);
        assert!((t.value_at(1) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_total_mass() {
        let t = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let expected = logsumexp!(1.0, 2.0, 3.0, 4.0);
        assert!((expected - t.total_mass()).abs() < 1e-12);
    }

    #[test]
    fn test_sum_out_front_values() {
        // entries indexed (prev, cur): [ (0,0)=1, (0,1)=2, (1,0)=3, (1,1)=4 ]
        let t = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let m = t.sum_out_front().unwrap();
        assert_eq!(1, m.window_size());
        assert!((logsumexp!(1.0, 3.0) - m.value_at(0)).abs() < 1e-12);
        assert!((logsumexp!(2.0, 4.0) - m.value_at(1)).abs() < 1e-12);
    }

    #[test]
    fn test_sum_out_end_values() {
        let t = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let m = t.sum_out_end().unwrap();
        assert!((logsumexp!(1.0, 2.0) - m.value_at(0)).abs() < 1e-12);
        assert!((logsumexp!(3.0, 4.0) - m.value_at(1)).abs() < 1e-12);
    }

    #[test]
    fn test_marginalization_preserves_mass() {
        let t = filled(3, 2, &[0.3, -1.0, 2.5, 0.0, 4.0, -0.5, 1.5, 2.0, -3.0]);
        let mass = t.total_mass();
        assert!((mass - t.sum_out_front().unwrap().total_mass()).abs() < 1e-12);
        assert!((mass - t.sum_out_end().unwrap().total_mass()).abs() < 1e-12);
    }

    #[test]
    fn test_message_round_trip() {
        let original = filled(2, 2, &[0.25, -0.5, 1.75, 3.0]);
        let message = filled(2, 2, &[0.5, -1.25, 0.0, 2.0]);

        let mut t = original.clone();
        t.multiply_in_front(&message).unwrap();
        t.divide_by(&message).unwrap();
        for i in 0..t.len() {
            assert!((original.value_at(i) - t.value_at(i)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_multiply_in_front_alignment() {
        let mut t = filled(2, 2, &[0.0, 0.0, 0.0, 0.0]);
        let m = filled(2, 1, &[1.0, 2.0]);
        t.multiply_in_front(&m).unwrap();
        // front variable = prev label: entries (0,*) get 1.0, (1,*) get 2.0
        assert_eq!([1.0, 1.0, 2.0, 2.0], [
            t.value_at(0),
            t.value_at(1),
            t.value_at(2),
            t.value_at(3)
        ]);
    }

    #[test]
    fn test_multiply_in_end_alignment() {
        let mut t = filled(2, 2, &[0.0, 0.0, 0.0, 0.0]);
        let m = filled(2, 1, &[1.0, 2.0]);
        t.multiply_in_end(&m).unwrap();
        // end variable = current label: entries (*,0) get 1.0, (*,1) get 2.0
        assert_eq!([1.0, 2.0, 1.0, 2.0], [
            t.value_at(0),
            t.value_at(1),
            t.value_at(2),
            t.value_at(3)
        ]);
    }

    #[test]
    fn test_divide_by_keeps_impossible_entries_impossible() {
        let mut t = FactorTable::new(2, 1).unwrap();
        let mut d = FactorTable::new(2, 1).unwrap();
        t.set_value_at(1, 2.0);
        d.set_value_at(1, 0.5);
        t.divide_by(&d).unwrap();
        assert_eq!(f64::NEG_INFINITY, t.value_at(0));
        assert!(!t.value_at(0).is_nan());
        assert!((1.5 - t.value_at(1)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_divide_by_shape_mismatch() {
        let mut t = FactorTable::new(2, 2).unwrap();
        let d = FactorTable::new(2, 1).unwrap();
        assert!(t.divide_by(&d).is_err());
    }

    #[test]
    fn test_front_end_marginals() {
        let t = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let front = t.unnormalized_log_prob_front(&[0]).unwrap();
        assert!((logsumexp!(1.0, 2.0) - front).abs() < 1e-12);
        let end = t.unnormalized_log_prob_end(&[1]).unwrap();
        assert!((logsumexp!(2.0, 4.0) - end).abs() < 1e-12);
        let whole = t.unnormalized_log_prob_end(&[1, 0]).unwrap();
        assert!((3.0 - whole).abs() < f64::EPSILON);
    }

    #[test]
    fn test_conditional_log_prob_given_previous() {
        let t = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let c0 = t.conditional_log_prob_given_previous(&[1], 0).unwrap();
        let c1 = t.conditional_log_prob_given_previous(&[1], 1).unwrap();
        assert!((c0 - (3.0 - logsumexp!(3.0, 4.0))).abs() < 1e-12);
        assert!((c1 - (4.0 - logsumexp!(3.0, 4.0))).abs() < 1e-12);
        // conditionals over the last variable must normalize
        assert!((c0.exp() + c1.exp() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_conditional_rejects_wrong_window() {
        let t = FactorTable::new(2, 2).unwrap();
        assert!(t.conditional_log_prob_given_previous(&[0, 1], 0).is_err());
        assert!(t.conditional_log_prob_given_previous(&[], 0).is_err());
    }
}
