//! The negative log-likelihood objective over a corpus of documents.

use std::ops::Range;
use std::thread;

use argmin::core::{CostFunction, Gradient};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clique_tree::CliqueTree;
use crate::document::Document;
use crate::errors::{ChaincrfError, Result};
use crate::labels::LabelIndex;
use crate::potential::LinearCliquePotentialFunction;
use crate::prior::Prior;

/// Partial sums owned by one shard worker: its slice of the corpus
/// log-likelihood and, when requested, private expected and empirical
/// count matrices. No two workers ever touch the same partial; the calling
/// thread merges them after the join, so the reduction is commutative and
/// independent of shard count.
struct ShardPartial {
    log_likelihood: f64,
    expected: Vec<Vec<f64>>,
    empirical: Vec<Vec<f64>>,
}

impl ShardPartial {
    fn merge(&mut self, other: Self) {
        self.log_likelihood += other.log_likelihood;
        for (row, other_row) in self.expected.iter_mut().zip(other.expected) {
            for (v, o) in row.iter_mut().zip(other_row) {
                *v += o;
            }
        }
        for (row, other_row) in self.empirical.iter_mut().zip(other.empirical) {
            for (v, o) in row.iter_mut().zip(other_row) {
                *v += o;
            }
        }
    }
}

/// Negative log-likelihood of a linear-chain CRF over a document corpus,
/// with its gradient, evaluated by calibrating one clique tree per
/// document and reducing expected-minus-empirical feature counts.
///
/// The upstream optimizer contract is [`Self::domain_dimension`],
/// [`Self::initial`], and [`Self::calculate`] (full batch), plus the
/// stochastic variants restricted to a caller-supplied document subset.
/// The [`CostFunction`] and [`Gradient`] impls expose the same quantities
/// to `argmin` solvers.
pub struct CrfObjective<'a> {
    documents: &'a [Document],
    label_indices: &'a [LabelIndex],
    feature_orders: Vec<usize>,
    num_classes: usize,
    background: usize,
    prior: Prior,
    n_threads: usize,
    row_offsets: Vec<usize>,
    value: f64,
    derivative: Vec<f64>,
    expected: Vec<Vec<f64>>,
    empirical: Vec<Vec<f64>>,
}

impl<'a> CrfObjective<'a> {
    /// Creates the objective and validates the corpus encoding up front.
    ///
    /// # Arguments
    ///
    /// * `documents` - the encoded corpus; immutable for the run.
    /// * `label_indices` - one label index per clique order; their count is
    ///   the clique window size.
    /// * `feature_orders` - clique order of every feature id; weight rows
    ///   are sized by the label index of that order.
    /// * `num_classes` - number of label classes.
    /// * `background` - label assumed outside the sequence boundary.
    /// * `prior` - regularization prior.
    ///
    /// # Errors
    ///
    /// Unknown feature or label ids, a feature listed under a clique order
    /// other than its own, or shape disagreements are dimension
    /// mismatches; a non-positive prior scale or malformed feature
    /// grouping is a configuration error. All of these indicate an
    /// upstream encoding bug and are fatal.
    pub fn new(
        documents: &'a [Document],
        label_indices: &'a [LabelIndex],
        feature_orders: Vec<usize>,
        num_classes: usize,
        background: usize,
        prior: Prior,
    ) -> Result<Self> {
        let window_size = label_indices.len();
        if window_size == 0 {
            return Err(ChaincrfError::invalid_argument(
                "at least one clique order is required",
            ));
        }
        if num_classes == 0 {
            return Err(ChaincrfError::invalid_argument("num_classes must not be 0"));
        }
        if background >= num_classes {
            return Err(ChaincrfError::dimension_mismatch(
                "background label out of range for num_classes",
            ));
        }
        for (j, label_index) in label_indices.iter().enumerate() {
            if !label_index.is_empty() && label_index.order() != j + 1 {
                return Err(ChaincrfError::dimension_mismatch(
                    "label index order does not match its clique order",
                ));
            }
        }
        if feature_orders.iter().any(|&j| j >= window_size) {
            return Err(ChaincrfError::dimension_mismatch(
                "feature assigned to a clique order outside the window",
            ));
        }
        for doc in documents {
            if doc.num_orders() != window_size {
                return Err(ChaincrfError::dimension_mismatch(
                    "document clique orders do not match the label indices",
                ));
            }
            if doc.labels().iter().any(|&label| label >= num_classes) {
                return Err(ChaincrfError::dimension_mismatch(
                    "gold label out of range for num_classes",
                ));
            }
            for position in 0..doc.len() {
                for j in 0..window_size {
                    for &fid in doc.features_at(position, j) {
                        match feature_orders.get(fid as usize) {
                            None => {
                                return Err(ChaincrfError::dimension_mismatch(
                                    "unknown feature id in a document",
                                ))
                            }
                            Some(&order) if order != j => {
                                return Err(ChaincrfError::dimension_mismatch(
                                    "feature listed under a clique order other than its own",
                                ))
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }

        match &prior {
            Prior::Quadratic { sigma } | Prior::Quartic { sigma } => {
                if *sigma <= 0.0 {
                    return Err(ChaincrfError::configuration("prior sigma must be positive"));
                }
            }
            Prior::Huber { sigma, epsilon } => {
                if *sigma <= 0.0 || *epsilon <= 0.0 {
                    return Err(ChaincrfError::configuration(
                        "prior sigma and epsilon must be positive",
                    ));
                }
            }
            Prior::None | Prior::GroupSparse { .. } => {}
        }

        let mut row_offsets = Vec::with_capacity(feature_orders.len() + 1);
        let mut offset = 0;
        for &j in &feature_orders {
            row_offsets.push(offset);
            offset += label_indices[j].len();
        }
        row_offsets.push(offset);

        if let Prior::GroupSparse { grouping, .. } = &prior {
            grouping.validate(offset)?;
        }

        Ok(Self {
            documents,
            label_indices,
            feature_orders,
            num_classes,
            background,
            prior,
            n_threads: 1,
            row_offsets,
            value: 0.0,
            derivative: vec![],
            expected: vec![],
            empirical: vec![],
        })
    }

    /// Sets the number of shard worker threads.
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

    /// Gets the number of weight dimensions: one per feature and compact
    /// label id of its clique order.
    #[inline(always)]
    #[must_use]
    pub fn domain_dimension(&self) -> usize {
        *self.row_offsets.last().unwrap_or(&0)
    }

    /// Gets the configured prior.
    #[inline(always)]
    #[must_use]
    pub const fn prior(&self) -> &Prior {
        &self.prior
    }

    /// Gets the all-zero initial weight vector.
    #[must_use]
    pub fn initial(&self) -> Vec<f64> {
        vec![0.0; self.domain_dimension()]
    }

    /// Gets a small random initial weight vector drawn from an explicitly
    /// seeded generator, so repeated runs are reproducible.
    #[must_use]
    pub fn initial_random(&self, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..self.domain_dimension())
            .map(|_| rng.gen_range(-0.1..0.1))
            .collect()
    }

    /// Gets the value set by the last `calculate` call.
    #[inline(always)]
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Gets the derivative set by the last `calculate` call.
    #[inline(always)]
    #[must_use]
    pub fn derivative(&self) -> &[f64] {
        &self.derivative
    }

    /// Gets the expected counts of the last `calculate` call, one row per
    /// feature.
    #[inline(always)]
    #[must_use]
    pub fn expected_counts(&self) -> &[Vec<f64>] {
        &self.expected
    }

    /// Gets the empirical counts of the last `calculate` call, one row per
    /// feature.
    #[inline(always)]
    #[must_use]
    pub fn empirical_counts(&self) -> &[Vec<f64>] {
        &self.empirical
    }

    /// Evaluates value and derivative over the whole corpus and caches
    /// them, together with the expected and empirical count matrices.
    ///
    /// # Errors
    ///
    /// A non-finite aggregate log-likelihood aborts the evaluation; see
    /// [`Self::new`] for the shape errors shard workers can surface.
    pub fn calculate(&mut self, x: &[f64]) -> Result<()> {
        let batch: Vec<usize> = (0..self.documents.len()).collect();
        let acc = self.run_shards(x, &batch, true)?;
        self.value = -acc.log_likelihood + self.prior.value(x, 1.0);
        let mut derivative = self.count_difference(&acc.expected, &acc.empirical);
        self.prior.add_gradient(x, 1.0, &mut derivative);
        self.derivative = derivative;
        self.expected = acc.expected;
        self.empirical = acc.empirical;
        Ok(())
    }

    /// Value restricted to a document batch, evaluated at `x * x_scale`,
    /// with the prior scaled by `batch.len() / documents.len()` to keep
    /// regularization strength comparable to a full-batch evaluation.
    pub fn value_at(&self, x: &[f64], x_scale: f64, batch: &[usize]) -> Result<f64> {
        let x = Self::scaled(x, x_scale);
        let acc = self.run_shards(&x, batch, false)?;
        Ok(-acc.log_likelihood + self.prior.value(&x, self.batch_scale(batch)))
    }

    /// Derivative restricted to a document batch; caches value and
    /// derivative like [`Self::calculate`].
    pub fn calculate_stochastic_gradient(&mut self, x: &[f64], batch: &[usize]) -> Result<()> {
        let acc = self.run_shards(x, batch, true)?;
        let scale = self.batch_scale(batch);
        self.value = -acc.log_likelihood + self.prior.value(x, scale);
        let mut derivative = self.count_difference(&acc.expected, &acc.empirical);
        self.prior.add_gradient(x, scale, &mut derivative);
        self.derivative = derivative;
        self.expected = acc.expected;
        self.empirical = acc.empirical;
        Ok(())
    }

    /// Evaluates the batch gradient at `x * x_scale` and applies it to `x`
    /// in place, `x -= grad_scale * g`. Returns the batch value at the
    /// scaled point.
    pub fn calculate_stochastic_update(
        &mut self,
        x: &mut [f64],
        x_scale: f64,
        batch: &[usize],
        grad_scale: f64,
    ) -> Result<f64> {
        let point = Self::scaled(x, x_scale);
        self.calculate_stochastic_gradient(&point, batch)?;
        for (w, g) in x.iter_mut().zip(&self.derivative) {
            *w -= grad_scale * g;
        }
        Ok(self.value)
    }

    fn scaled(x: &[f64], x_scale: f64) -> Vec<f64> {
        x.iter().map(|&v| v * x_scale).collect()
    }

    fn batch_scale(&self, batch: &[usize]) -> f64 {
        batch.len() as f64 / self.documents.len() as f64
    }

    fn weight_rows<'x>(&self, x: &'x [f64]) -> Result<Vec<&'x [f64]>> {
        if x.len() != self.domain_dimension() {
            return Err(ChaincrfError::dimension_mismatch(
                "weight vector length does not match the domain dimension",
            ));
        }
        Ok(self
            .row_offsets
            .windows(2)
            .map(|pair| &x[pair[0]..pair[1]])
            .collect())
    }

    fn empty_counts(&self) -> Vec<Vec<f64>> {
        self.feature_orders
            .iter()
            .map(|&j| vec![0.0; self.label_indices[j].len()])
            .collect()
    }

    fn count_difference(&self, expected: &[Vec<f64>], empirical: &[Vec<f64>]) -> Vec<f64> {
        let mut derivative = Vec::with_capacity(self.domain_dimension());
        for (e_row, ehat_row) in expected.iter().zip(empirical) {
            for (e, ehat) in e_row.iter().zip(ehat_row) {
                derivative.push(e - ehat);
            }
        }
        derivative
    }

    /// Splits `batch` into contiguous shards, dispatches them over a
    /// channel to scoped workers, and merges the partials after all
    /// workers join. A single thread degenerates to one shard through the
    /// same code path.
    fn run_shards(&self, x: &[f64], batch: &[usize], want_counts: bool) -> Result<ShardPartial> {
        if batch.iter().any(|&doc_id| doc_id >= self.documents.len()) {
            return Err(ChaincrfError::invalid_argument(
                "batch contains a document id outside the corpus",
            ));
        }
        let rows = self.weight_rows(x)?;
        let (s, r) = crossbeam_channel::unbounded();
        for shard in Self::shard_ranges(batch.len(), self.n_threads) {
            s.send(shard).unwrap();
        }
        drop(s);

        let acc = thread::scope(|scope| -> Result<ShardPartial> {
            let mut workers = vec![];
            for _ in 0..self.n_threads {
                let worker = scope.spawn(|| -> Result<ShardPartial> {
                    let potential = LinearCliquePotentialFunction::new(rows.clone());
                    let mut partial = ShardPartial {
                        log_likelihood: 0.0,
                        expected: if want_counts { self.empty_counts() } else { vec![] },
                        empirical: if want_counts { self.empty_counts() } else { vec![] },
                    };
                    while let Ok(shard) = r.try_recv() {
                        for &doc_id in &batch[shard] {
                            self.accumulate_document(&potential, doc_id, want_counts, &mut partial)?;
                        }
                    }
                    Ok(partial)
                });
                workers.push(worker);
            }
            let mut acc = ShardPartial {
                log_likelihood: 0.0,
                expected: if want_counts { self.empty_counts() } else { vec![] },
                empirical: if want_counts { self.empty_counts() } else { vec![] },
            };
            for worker in workers {
                acc.merge(worker.join().unwrap()?);
            }
            Ok(acc)
        })?;

        if !acc.log_likelihood.is_finite() {
            return Err(ChaincrfError::numeric_instability(
                "aggregate log-likelihood is not finite; a document may be too long for \
                 log-domain inference or the weight vector corrupt",
            ));
        }
        Ok(acc)
    }

    fn accumulate_document(
        &self,
        potential: &LinearCliquePotentialFunction,
        doc_id: usize,
        want_counts: bool,
        partial: &mut ShardPartial,
    ) -> Result<()> {
        let doc = &self.documents[doc_id];
        let window_size = self.label_indices.len();
        let tree = CliqueTree::calibrated(
            doc,
            self.label_indices,
            self.num_classes,
            self.background,
            potential,
        )?;

        partial.log_likelihood += tree.log_prob_start_pos();
        let mut given = vec![self.background; window_size - 1];
        for (position, &gold) in doc.labels().iter().enumerate() {
            partial.log_likelihood +=
                tree.cond_log_prob_given_previous(position, gold, &given)?;
            if window_size > 1 {
                given.rotate_left(1);
                given[window_size - 2] = gold;
            }
        }

        if !want_counts {
            return Ok(());
        }
        for position in 0..doc.len() {
            for (j, label_index) in self.label_indices.iter().enumerate() {
                let feature_ids = doc.features_at(position, j);
                if feature_ids.is_empty() {
                    continue;
                }
                let feature_vals = doc.feature_vals_at(position, j);
                for k in 0..label_index.len() {
                    let p = tree.prob_window(position, label_index.window(k))?;
                    for (m, &fid) in feature_ids.iter().enumerate() {
                        let value = feature_vals.map_or(1.0, |vals| vals[m]);
                        partial.expected[fid as usize][k] += p * value;
                    }
                }
                let gold_window =
                    Self::gold_window(doc.labels(), position, j + 1, self.background);
                let k = label_index.index_of(&gold_window).ok_or(
                    ChaincrfError::dimension_mismatch(
                        "gold label window missing from its label index",
                    ),
                )?;
                for (m, &fid) in feature_ids.iter().enumerate() {
                    let value = feature_vals.map_or(1.0, |vals| vals[m]);
                    partial.empirical[fid as usize][k] += value;
                }
            }
        }
        Ok(())
    }

    fn gold_window(
        labels: &[usize],
        position: usize,
        order: usize,
        background: usize,
    ) -> Vec<usize> {
        let mut window = vec![background; order];
        for (d, slot) in window.iter_mut().enumerate() {
            let seq_pos = position as isize - (order - 1 - d) as isize;
            if seq_pos >= 0 {
                *slot = labels[seq_pos as usize];
            }
        }
        window
    }

    fn shard_ranges(len: usize, n_shards: usize) -> Vec<Range<usize>> {
        let n_shards = n_shards.min(len).max(1);
        let per_shard = len / n_shards;
        let remainder = len % n_shards;
        let mut shards = Vec::with_capacity(n_shards);
        let mut start = 0;
        for i in 0..n_shards {
            let size = per_shard + usize::from(i < remainder);
            if size > 0 {
                shards.push(start..start + size);
            }
            start += size;
        }
        shards
    }
}

impl CostFunction for CrfObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let batch: Vec<usize> = (0..self.documents.len()).collect();
        let acc = self.run_shards(param, &batch, false)?;
        Ok(-acc.log_likelihood + self.prior.value(param, 1.0))
    }
}

impl Gradient for CrfObjective<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let batch: Vec<usize> = (0..self.documents.len()).collect();
        let acc = self.run_shards(param, &batch, true)?;
        let mut derivative = self.count_difference(&acc.expected, &acc.empirical);
        self.prior.add_gradient(param, 1.0, &mut derivative);
        Ok(derivative)
    }
}
