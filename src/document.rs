//! Integer-encoded documents produced by an external feature pipeline.

use crate::errors::{ChaincrfError, Result};

/// One training or decoding document, already encoded to integers by the
/// external feature pipeline.
///
/// For each position the document carries, per clique order, the ids of the
/// active features, optionally a parallel array of real feature values
/// (absent means every value is 1.0), and the gold label.
#[derive(Clone, Debug)]
pub struct Document {
    features: Vec<Vec<Vec<u32>>>,
    feature_vals: Option<Vec<Vec<Vec<f64>>>>,
    labels: Vec<usize>,
}

impl Document {
    /// Creates a document from its encoded arrays.
    ///
    /// # Arguments
    ///
    /// * `features` - `features[pos][order][k]`: active feature ids at each
    ///   position, grouped by clique order (0 = node, 1 = edge, ...).
    /// * `feature_vals` - optional parallel values for every feature
    ///   occurrence; `None` means 1.0 throughout.
    /// * `labels` - gold label per position.
    ///
    /// # Errors
    ///
    /// The document must be non-empty, every position must list the same
    /// number of clique orders, `labels` must have one entry per position,
    /// and `feature_vals` (when present) must mirror the shape of
    /// `features` exactly.
    pub fn new(
        features: Vec<Vec<Vec<u32>>>,
        feature_vals: Option<Vec<Vec<Vec<f64>>>>,
        labels: Vec<usize>,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(ChaincrfError::invalid_argument("document must not be empty"));
        }
        if features.len() != labels.len() {
            return Err(ChaincrfError::dimension_mismatch(
                "documents need one gold label per position",
            ));
        }
        let orders = features[0].len();
        if features.iter().any(|pos| pos.len() != orders) {
            return Err(ChaincrfError::dimension_mismatch(
                "every position must list the same clique orders",
            ));
        }
        if let Some(vals) = &feature_vals {
            let mirrors = vals.len() == features.len()
                && vals.iter().zip(&features).all(|(vp, fp)| {
                    vp.len() == fp.len()
                        && vp.iter().zip(fp).all(|(vo, fo)| vo.len() == fo.len())
                });
            if !mirrors {
                return Err(ChaincrfError::dimension_mismatch(
                    "feature values must mirror the feature array shape",
                ));
            }
        }
        Ok(Self {
            features,
            feature_vals,
            labels,
        })
    }

    /// Gets the number of positions.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the document has no positions (never, by
    /// construction).
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Gets the number of clique orders encoded per position.
    #[inline(always)]
    #[must_use]
    pub fn num_orders(&self) -> usize {
        self.features[0].len()
    }

    /// Gets the active feature ids at one position and clique order.
    #[inline(always)]
    #[must_use]
    pub fn features_at(&self, position: usize, order: usize) -> &[u32] {
        &self.features[position][order]
    }

    /// Gets the feature values at one position and clique order, or `None`
    /// when every value is an implicit 1.0.
    #[inline(always)]
    #[must_use]
    pub fn feature_vals_at(&self, position: usize, order: usize) -> Option<&[f64]> {
        self.feature_vals
            .as_ref()
            .map(|vals| vals[position][order].as_slice())
    }

    /// Gets the gold labels.
    #[inline(always)]
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_shapes() {
        assert!(Document::new(vec![], None, vec![]).is_err());
        assert!(Document::new(vec![vec![vec![0], vec![]]], None, vec![0, 1]).is_err());
        assert!(
            Document::new(vec![vec![vec![0]], vec![vec![0], vec![1]]], None, vec![0, 0]).is_err()
        );
        // value shape must mirror features
        assert!(Document::new(
            vec![vec![vec![0, 1]]],
            Some(vec![vec![vec![1.0]]]),
            vec![0],
        )
        .is_err());
    }

    #[test]
    fn test_accessors() {
        let doc = Document::new(
            vec![
                vec![vec![0], vec![2]],
                vec![vec![1], vec![]],
            ],
            Some(vec![
                vec![vec![0.5], vec![1.0]],
                vec![vec![2.0], vec![]],
            ]),
            vec![1, 0],
        )
        .unwrap();
        assert_eq!(2, doc.len());
        assert_eq!(2, doc.num_orders());
        assert_eq!(&[2], doc.features_at(0, 1));
        assert_eq!(Some(&[2.0][..]), doc.feature_vals_at(1, 0));
        assert_eq!(&[1, 0], doc.labels());
    }
}
