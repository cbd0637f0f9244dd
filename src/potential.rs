//! Clique potential functions.

use crate::errors::{ChaincrfError, Result};

/// Strategy for scoring one clique labeling from its active features.
///
/// Implementations must be pure functions of their arguments and whatever
/// read-only state they close over: one instance is shared by every shard
/// task of a multi-threaded evaluation, hence the `Sync` bound.
pub trait CliquePotentialFunction: Sync {
    /// Computes the unnormalized log potential one clique contributes to a
    /// labeling.
    ///
    /// # Arguments
    ///
    /// * `clique_size` - the clique order (1 = node, 2 = edge, ...).
    /// * `label_index` - compact id of the clique labeling within the label
    ///   index of this order.
    /// * `feature_ids` - active features of this clique at this position.
    /// * `feature_vals` - optional parallel feature values; `None` means
    ///   1.0 throughout.
    /// * `position` - position in the sequence, for position-dependent
    ///   implementations.
    ///
    /// # Errors
    ///
    /// A feature id or label index outside the weight matrix is a
    /// dimension mismatch, surfaced during factor-table construction.
    fn compute_clique_potential(
        &self,
        clique_size: usize,
        label_index: usize,
        feature_ids: &[u32],
        feature_vals: Option<&[f64]>,
        position: usize,
    ) -> Result<f64>;
}

/// The log-linear potential: a dot product between the weight rows of the
/// active features and the clique labeling's column.
pub struct LinearCliquePotentialFunction<'a> {
    weights: Vec<&'a [f64]>,
}

impl<'a> LinearCliquePotentialFunction<'a> {
    /// Creates a linear potential over read-only weight rows, one row per
    /// feature id, one column per compact label id of the feature's clique
    /// order.
    #[inline(always)]
    #[must_use]
    pub fn new(weights: Vec<&'a [f64]>) -> Self {
        Self { weights }
    }

    /// Gets the weight row for a feature id.
    #[inline(always)]
    #[must_use]
    pub fn row(&self, feature_id: usize) -> Option<&[f64]> {
        self.weights.get(feature_id).copied()
    }
}

impl CliquePotentialFunction for LinearCliquePotentialFunction<'_> {
    fn compute_clique_potential(
        &self,
        _clique_size: usize,
        label_index: usize,
        feature_ids: &[u32],
        feature_vals: Option<&[f64]>,
        _position: usize,
    ) -> Result<f64> {
        let mut output = 0.0;
        for (m, &fid) in feature_ids.iter().enumerate() {
            let row = self
                .weights
                .get(fid as usize)
                .ok_or(ChaincrfError::dimension_mismatch(
                    "feature id outside the weight matrix",
                ))?;
            let w = row.get(label_index).ok_or(ChaincrfError::dimension_mismatch(
                "weight row shorter than the label index of its clique order",
            ))?;
            let value = feature_vals.map_or(1.0, |vals| vals[m]);
            output += w * value;
        }
        Ok(output)
    }
}
