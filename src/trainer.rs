//! Training front-end: wires the objective into argmin's L-BFGS solver.

use argmin::core::observers::ObserverMode;
use argmin::core::Executor;
use argmin::solver::linesearch::condition::ArmijoCondition;
use argmin::solver::linesearch::{BacktrackingLineSearch, MoreThuenteLineSearch};
use argmin::solver::quasinewton::LBFGS;
use argmin_observer_slog::SlogLogger;

use crate::document::Document;
use crate::errors::{ChaincrfError, Result};
use crate::labels::LabelIndex;
use crate::model::Model;
use crate::objective::CrfObjective;
use crate::prior::Prior;

/// Trainer for a linear-chain CRF.
///
/// Smooth priors run L-BFGS with a MoreThuente line search and keep their
/// penalty inside the objective; the group-sparse prior runs the solver's
/// built-in L1 mode with a backtracking Armijo line search instead.
pub struct Trainer {
    max_iter: u64,
    n_threads: usize,
    prior: Prior,
    seed: Option<u64>,
}

impl Trainer {
    /// Creates a new trainer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_iter: 100,
            n_threads: 1,
            prior: Prior::Quadratic { sigma: 1.0 },
            seed: None,
        }
    }

    /// Sets the maximum number of optimizer iterations.
    ///
    /// # Errors
    ///
    /// `max_iter` must not be 0.
    pub fn max_iter(mut self, max_iter: u64) -> Result<Self> {
        if max_iter == 0 {
            return Err(ChaincrfError::invalid_argument("max_iter must not be 0"));
        }
        self.max_iter = max_iter;
        Ok(self)
    }

    /// Sets the number of shard worker threads for gradient evaluation.
    ///
    /// # Errors
    ///
    /// `n_threads` must not be 0.
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(ChaincrfError::invalid_argument("n_threads must not be 0"));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    /// Sets the regularization prior.
    #[must_use]
    pub fn prior(mut self, prior: Prior) -> Self {
        self.prior = prior;
        self
    }

    /// Samples the initial weights from an explicitly seeded generator
    /// instead of starting at zero.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Trains a model on the given corpus.
    ///
    /// # Arguments
    ///
    /// * `documents` - the encoded corpus.
    /// * `label_indices` - one label index per clique order.
    /// * `feature_orders` - clique order of every feature id.
    /// * `num_classes` - number of label classes.
    /// * `background` - label assumed outside the sequence boundary.
    ///
    /// # Errors
    ///
    /// Corpus encoding and configuration problems are surfaced by the
    /// objective constructor; see [`CrfObjective::new`].
    pub fn train(
        &self,
        documents: &[Document],
        label_indices: Vec<LabelIndex>,
        feature_orders: Vec<usize>,
        num_classes: usize,
        background: usize,
    ) -> Result<Model> {
        if let Prior::GroupSparse { lambda, .. } = &self.prior {
            if *lambda <= 0.0 {
                return Err(ChaincrfError::configuration(
                    "group-sparse lambda must be positive",
                ));
            }
        }
        let objective = CrfObjective::new(
            documents,
            &label_indices,
            feature_orders.clone(),
            num_classes,
            background,
            self.prior.clone(),
        )?
        .n_threads(self.n_threads)?;
        let weights_init = match self.seed {
            Some(seed) => objective.initial_random(seed),
            None => objective.initial(),
        };

        let weights = match &self.prior {
            Prior::GroupSparse { lambda, .. } => {
                let linesearch = BacktrackingLineSearch::new(ArmijoCondition::new(1e-4).unwrap())
                    .rho(0.5)
                    .unwrap();
                let solver = LBFGS::new(linesearch, 7)
                    .with_l1_regularization(*lambda)
                    .unwrap();
                let res = Executor::new(objective, solver)
                    .configure(|state| state.param(weights_init).max_iters(self.max_iter))
                    .add_observer(SlogLogger::term(), ObserverMode::Always)
                    .run()
                    .unwrap();
                res.state.param.unwrap()
            }
            _ => {
                let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9).unwrap();
                let solver = LBFGS::new(linesearch, 7);
                let res = Executor::new(objective, solver)
                    .configure(|state| state.param(weights_init).max_iters(self.max_iter))
                    .add_observer(SlogLogger::term(), ObserverMode::Always)
                    .run()
                    .unwrap();
                res.state.param.unwrap()
            }
        };

        let mut rows = Vec::with_capacity(feature_orders.len());
        let mut offset = 0;
        for &j in &feature_orders {
            let row_len = label_indices[j].len();
            rows.push(weights[offset..offset + row_len].to_vec());
            offset += row_len;
        }
        Model::new(rows, label_indices, num_classes, background)
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::every_window_indices;

    // 2 classes, node feature 0 marks class-1 positions, edge feature 1
    // fires everywhere. Both documents are separable by those features.
    fn corpus() -> Vec<Document> {
        vec![
            Document::new(
                vec![
                    vec![vec![], vec![1]],
                    vec![vec![0], vec![1]],
                    vec![vec![], vec![1]],
                ],
                None,
                vec![0, 1, 0],
            )
            .unwrap(),
            Document::new(
                vec![
                    vec![vec![0], vec![1]],
                    vec![vec![], vec![1]],
                ],
                None,
                vec![1, 0],
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_training_recovers_separable_labels() {
        let documents = corpus();
        let trainer = Trainer::new()
            .max_iter(100)
            .unwrap()
            .prior(Prior::Quadratic { sigma: 1.0 });
        let model = trainer
            .train(
                &documents,
                every_window_indices(2, 2),
                vec![0, 1],
                2,
                0,
            )
            .unwrap();
        for doc in &documents {
            assert_eq!(doc.labels(), model.best_sequence(doc).unwrap());
        }
    }

    #[test]
    fn test_builder_validation() {
        assert!(Trainer::new().max_iter(0).is_err());
        assert!(Trainer::new().n_threads(0).is_err());
    }

    #[test]
    fn test_seeded_initialization_is_reproducible() {
        let documents = corpus();
        let train = |seed| {
            Trainer::new()
                .max_iter(20)
                .unwrap()
                .seed(seed)
                .train(
                    &documents,
                    every_window_indices(2, 2),
                    vec![0, 1],
                    2,
                    0,
                )
                .unwrap()
        };
        let a = train(11);
        let b = train(11);
        for (row_a, row_b) in a.weight_rows().iter().zip(b.weight_rows()) {
            for (wa, wb) in row_a.iter().zip(row_b.iter()) {
                assert!((wa - wb).abs() < 1e-12);
            }
        }
    }
}
