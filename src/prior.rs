//! Regularization priors added to the negative log-likelihood.

use crate::errors::{ChaincrfError, Result};

/// Index sets handed to an L1-aware minimizer by the group-sparse prior.
///
/// The default grouping puts every weight dimension into a single group.
#[derive(Clone, Debug)]
pub struct FeatureGrouping {
    groups: Vec<Vec<usize>>,
}

impl FeatureGrouping {
    /// Creates a grouping from explicit index sets.
    #[inline(always)]
    #[must_use]
    pub fn new(groups: Vec<Vec<usize>>) -> Self {
        Self { groups }
    }

    /// Creates the default grouping: one group holding every dimension of
    /// a domain of `dimension` weights.
    #[must_use]
    pub fn uniform(dimension: usize) -> Self {
        Self {
            groups: vec![(0..dimension).collect()],
        }
    }

    /// Gets the index sets.
    #[inline(always)]
    #[must_use]
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Checks the grouping against a weight domain of `dimension` entries.
    ///
    /// # Errors
    ///
    /// Groups must be non-empty and every index must fall inside the
    /// domain.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        for group in &self.groups {
            if group.is_empty() {
                return Err(ChaincrfError::configuration(
                    "feature grouping contains an empty group",
                ));
            }
            if group.iter().any(|&i| i >= dimension) {
                return Err(ChaincrfError::configuration(
                    "feature grouping index outside the weight domain",
                ));
            }
        }
        Ok(())
    }
}

/// Regularization prior over the weight vector.
///
/// Each variant carries its own parameters and contributes a value and a
/// gradient term after the data term. The group-sparse variant contributes
/// nothing here: its penalty is applied by an L1-aware minimizer that
/// receives the [`FeatureGrouping`].
#[derive(Clone, Debug)]
pub enum Prior {
    /// No regularization.
    None,

    /// Gaussian prior: `sum(w^2) / (2 sigma^2)`.
    Quadratic {
        /// Standard deviation of the Gaussian.
        sigma: f64,
    },

    /// Huber prior: quadratic inside `|w| < epsilon`, linear beyond,
    /// continuous and differentiable at the boundary.
    Huber {
        /// Scale of the penalty.
        sigma: f64,
        /// Width of the quadratic region.
        epsilon: f64,
    },

    /// Quartic prior: `sum(w^4) / (2 sigma^4)`.
    Quartic {
        /// Scale of the penalty.
        sigma: f64,
    },

    /// Group-sparse prior, delegated to an external L1-aware minimizer.
    GroupSparse {
        /// L1 penalty strength handed to the minimizer.
        lambda: f64,
        /// Index sets over the weight domain.
        grouping: FeatureGrouping,
    },
}

impl Prior {
    /// Creates a prior from a configuration name.
    ///
    /// Recognized names: `none`, `quadratic`, `huber`, `quartic`,
    /// `group-sparse`. The group-sparse prior starts with the default
    /// uniform grouping over `dimension` weights.
    ///
    /// # Errors
    ///
    /// An unrecognized name is a configuration error.
    pub fn from_name(name: &str, sigma: f64, epsilon: f64, dimension: usize) -> Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "quadratic" => Ok(Self::Quadratic { sigma }),
            "huber" => Ok(Self::Huber { sigma, epsilon }),
            "quartic" => Ok(Self::Quartic { sigma }),
            "group-sparse" => Ok(Self::GroupSparse {
                lambda: 1.0 / (2.0 * sigma * sigma),
                grouping: FeatureGrouping::uniform(dimension),
            }),
            _ => Err(ChaincrfError::configuration("unrecognized prior name")),
        }
    }

    /// Value contribution of the prior, scaled by `scale` (1.0 for a
    /// full-batch evaluation, `batch / total` for a mini-batch).
    #[must_use]
    pub fn value(&self, x: &[f64], scale: f64) -> f64 {
        match self {
            Self::None | Self::GroupSparse { .. } => 0.0,
            Self::Quadratic { sigma } => {
                let sigma_sq = sigma * sigma;
                let mut value = 0.0;
                for &w in x {
                    value += w * w / (2.0 * sigma_sq);
                }
                value * scale
            }
            Self::Huber { sigma, epsilon } => {
                let sigma_sq = sigma * sigma;
                let mut value = 0.0;
                for &w in x {
                    let abs = w.abs();
                    if abs < *epsilon {
                        value += w * w / (2.0 * epsilon * sigma_sq);
                    } else {
                        value += (abs - epsilon / 2.0) / sigma_sq;
                    }
                }
                value * scale
            }
            Self::Quartic { sigma } => {
                let sigma_qu = sigma * sigma * sigma * sigma;
                let mut value = 0.0;
                for &w in x {
                    value += w * w * w * w / (2.0 * sigma_qu);
                }
                value * scale
            }
        }
    }

    /// Adds the gradient contribution of the prior into `gradient`,
    /// scaled by `scale`.
    ///
    /// # Panics
    ///
    /// `gradient` must have the same length as `x`.
    pub fn add_gradient(&self, x: &[f64], scale: f64, gradient: &mut [f64]) {
        assert_eq!(x.len(), gradient.len());
        match self {
            Self::None | Self::GroupSparse { .. } => {}
            Self::Quadratic { sigma } => {
                let sigma_sq = sigma * sigma;
                for (g, &w) in gradient.iter_mut().zip(x) {
                    *g += scale * w / sigma_sq;
                }
            }
            Self::Huber { sigma, epsilon } => {
                let sigma_sq = sigma * sigma;
                for (g, &w) in gradient.iter_mut().zip(x) {
                    if w.abs() < *epsilon {
                        *g += scale * w / (epsilon * sigma_sq);
                    } else {
                        *g += scale * w.signum() / sigma_sq;
                    }
                }
            }
            Self::Quartic { sigma } => {
                let sigma_qu = sigma * sigma * sigma * sigma;
                for (g, &w) in gradient.iter_mut().zip(x) {
                    *g += scale * 2.0 * w * w * w / sigma_qu;
                }
            }
        }
    }

    /// Returns `true` if the penalty is handled by an external L1-aware
    /// minimizer rather than by [`Self::value`] / [`Self::add_gradient`].
    #[inline(always)]
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::GroupSparse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_gradient(prior: &Prior, x: &[f64], i: usize) -> f64 {
        let h = 1e-6;
        let mut plus = x.to_vec();
        let mut minus = x.to_vec();
        plus[i] += h;
        minus[i] -= h;
        (prior.value(&plus, 1.0) - prior.value(&minus, 1.0)) / (2.0 * h)
    }

    #[test]
    fn test_quadratic_value_and_gradient() {
        let prior = Prior::Quadratic { sigma: 2.0 };
        let x = [1.0, -3.0];
        assert!((prior.value(&x, 1.0) - (1.0 + 9.0) / 8.0).abs() < 1e-12);
        let mut g = vec![0.0; 2];
        prior.add_gradient(&x, 1.0, &mut g);
        assert!((g[0] - 0.25).abs() < 1e-12);
        assert!((g[1] + 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_huber_is_continuous_and_differentiable_at_boundary() {
        let prior = Prior::Huber {
            sigma: 1.5,
            epsilon: 0.1,
        };
        let below = prior.value(&[0.1 - 1e-9], 1.0);
        let above = prior.value(&[0.1 + 1e-9], 1.0);
        assert!((below - above).abs() < 1e-8);

        for &w in &[0.05, 0.1 + 1e-3, -0.5, 2.0] {
            let x = [w];
            let mut g = vec![0.0];
            prior.add_gradient(&x, 1.0, &mut g);
            assert!((g[0] - numeric_gradient(&prior, &x, 0)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_quartic_gradient_matches_value() {
        let prior = Prior::Quartic { sigma: 1.2 };
        let x = [0.8, -1.4, 0.0];
        for i in 0..x.len() {
            let mut g = vec![0.0; x.len()];
            prior.add_gradient(&x, 1.0, &mut g);
            assert!((g[i] - numeric_gradient(&prior, &x, i)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_batch_scaling() {
        let prior = Prior::Quadratic { sigma: 1.0 };
        let x = [2.0];
        assert!((prior.value(&x, 0.25) - 0.25 * prior.value(&x, 1.0)).abs() < 1e-12);
        let mut g = vec![0.0];
        prior.add_gradient(&x, 0.25, &mut g);
        assert!((g[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_name() {
        assert!(matches!(
            Prior::from_name("none", 1.0, 0.1, 4).unwrap(),
            Prior::None
        ));
        assert!(matches!(
            Prior::from_name("quadratic", 1.0, 0.1, 4).unwrap(),
            Prior::Quadratic { .. }
        ));
        assert!(Prior::from_name("cubic", 1.0, 0.1, 4).is_err());
    }

    #[test]
    fn test_grouping_validation() {
        assert!(FeatureGrouping::uniform(3).validate(3).is_ok());
        assert!(FeatureGrouping::new(vec![vec![]]).validate(3).is_err());
        assert!(FeatureGrouping::new(vec![vec![3]]).validate(3).is_err());
    }

    #[test]
    fn test_group_sparse_contributes_nothing_inline() {
        let prior = Prior::GroupSparse {
            lambda: 0.5,
            grouping: FeatureGrouping::uniform(2),
        };
        assert!(prior.is_external());
        assert_eq!(0.0, prior.value(&[1.0, 2.0], 1.0));
        let mut g = vec![0.0; 2];
        prior.add_gradient(&[1.0, 2.0], 1.0, &mut g);
        assert_eq!(vec![0.0, 0.0], g);
    }
}
