//! Calibrated clique trees over label chains.
//!
//! A clique tree holds one dense [`FactorTable`] per sequence position,
//! covering the window of labels ending there. Construction runs two-pass
//! belief propagation over the chain, after which every marginal and
//! conditional query is a table lookup plus a log-sum-exp. Total work is
//! `O(n * num_classes^window_size)` instead of enumerating label
//! sequences.

use crate::document::Document;
use crate::errors::{ChaincrfError, Result};
use crate::factor_table::FactorTable;
use crate::labels::LabelIndex;
use crate::potential::CliquePotentialFunction;

/// The query contract decoders consume: sequence length, window geometry,
/// candidate labels, and conditional scores, without exposing factor-table
/// internals.
pub trait SequenceModel {
    /// Gets the sequence length.
    fn length(&self) -> usize;

    /// Gets the number of conditioning positions to the left.
    fn left_window(&self) -> usize;

    /// Gets the number of conditioning positions to the right.
    fn right_window(&self) -> usize;

    /// Gets the candidate labels at a position.
    fn possible_values(&self, position: usize) -> Vec<usize>;

    /// Scores every candidate label at `position` given the surrounding
    /// labels of `sequence` (log conditional probabilities).
    fn scores_of(&self, sequence: &[usize], position: usize) -> Result<Vec<f64>>;

    /// Scores the label `sequence` holds at `position`.
    fn score_of_at(&self, sequence: &[usize], position: usize) -> Result<f64>;

    /// Scores a complete sequence: the boundary term plus the chained
    /// conditional log probabilities, a forward score.
    fn score_of(&self, sequence: &[usize]) -> Result<f64>;
}

/// A chain of per-position factor tables calibrated by belief propagation.
///
/// A tree has exactly two states: *raw* while [`Self::calibrated`] builds
/// it, and *calibrated* once construction returns. Every query is
/// read-only; a calibrated tree is never mutated and never shared across
/// threads mid-build.
pub struct CliqueTree {
    tables: Vec<FactorTable>,
    log_z: f64,
    start_boundary: f64,
    num_classes: usize,
    window_size: usize,
    background: usize,
}

impl CliqueTree {
    /// Builds the per-position factor tables for a document and calibrates
    /// them in place.
    ///
    /// For every position, one table per clique order is filled from
    /// `potential` over that order's label index and the tables are
    /// combined end-aligned into the full window table. The forward pass
    /// then propagates prefix messages, and the backward pass cancels each
    /// forward message out of the suffix summary before incorporating it,
    /// leaving every table equal to the true joint marginal of its window.
    ///
    /// # Arguments
    ///
    /// * `doc` - the encoded document.
    /// * `label_indices` - one label index per clique order; their count is
    ///   the window size.
    /// * `num_classes` - number of label classes.
    /// * `background` - label id assumed outside the sequence boundary.
    /// * `potential` - clique potential plug-in.
    ///
    /// # Errors
    ///
    /// Shape disagreements between the document, the label indices, and
    /// the potential's weights are dimension mismatches; an empty label
    /// index list or an out-of-range background label is rejected.
    pub fn calibrated<P>(
        doc: &Document,
        label_indices: &[LabelIndex],
        num_classes: usize,
        background: usize,
        potential: &P,
    ) -> Result<Self>
    where
        P: CliquePotentialFunction + ?Sized,
    {
        let window_size = label_indices.len();
        if window_size == 0 {
            return Err(ChaincrfError::invalid_argument(
                "at least one clique order is required",
            ));
        }
        if doc.num_orders() != window_size {
            return Err(ChaincrfError::dimension_mismatch(
                "document clique orders do not match the label indices",
            ));
        }
        if background >= num_classes {
            return Err(ChaincrfError::dimension_mismatch(
                "background label out of range for num_classes",
            ));
        }

        let mut tables = Vec::with_capacity(doc.len());
        for position in 0..doc.len() {
            tables.push(Self::position_table(
                doc,
                label_indices,
                num_classes,
                potential,
                position,
            )?);
        }

        // forward pass: push prefix messages down the chain
        let mut messages = Vec::with_capacity(tables.len().saturating_sub(1));
        for i in 1..tables.len() {
            let message = tables[i - 1].sum_out_front()?;
            tables[i].multiply_in_front(&message)?;
            messages.push(message);
        }

        // backward pass: the suffix summary of table i+1 already contains
        // the forward message, so cancel it before multiplying in
        for i in (0..tables.len().saturating_sub(1)).rev() {
            let mut summed_out = tables[i + 1].sum_out_end()?;
            summed_out.divide_by(&messages[i])?;
            tables[i].multiply_in_end(&summed_out)?;
        }

        let log_z = tables[0].total_mass();
        let start_boundary = if window_size == 1 {
            0.0
        } else {
            tables[0].log_prob_front(&vec![background; window_size - 1])?
        };

        Ok(Self {
            tables,
            log_z,
            start_boundary,
            num_classes,
            window_size,
            background,
        })
    }

    fn position_table<P>(
        doc: &Document,
        label_indices: &[LabelIndex],
        num_classes: usize,
        potential: &P,
        position: usize,
    ) -> Result<FactorTable>
    where
        P: CliquePotentialFunction + ?Sized,
    {
        let mut combined: Option<FactorTable> = None;
        for (j, label_index) in label_indices.iter().enumerate() {
            if !label_index.is_empty() && label_index.order() != j + 1 {
                return Err(ChaincrfError::dimension_mismatch(
                    "label index order does not match its clique order",
                ));
            }
            let mut ft = FactorTable::new(num_classes, j + 1)?;
            let feature_ids = doc.features_at(position, j);
            let feature_vals = doc.feature_vals_at(position, j);
            for k in 0..label_index.len() {
                let score =
                    potential.compute_clique_potential(j + 1, k, feature_ids, feature_vals, position)?;
                ft.set_value(label_index.window(k), score)?;
            }
            combined = Some(match combined {
                None => ft,
                Some(narrower) => {
                    // the order-j table covers the last j window labels
                    ft.multiply_in_end(&narrower)?;
                    ft
                }
            });
        }
        combined.ok_or(ChaincrfError::invalid_argument(
            "at least one clique order is required",
        ))
    }

    /// Gets the number of positions.
    #[inline(always)]
    #[must_use]
    pub fn length(&self) -> usize {
        self.tables.len()
    }

    /// Gets the clique window size.
    #[inline(always)]
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Gets the number of label classes.
    #[inline(always)]
    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Gets the background label id.
    #[inline(always)]
    #[must_use]
    pub const fn background(&self) -> usize {
        self.background
    }

    /// Gets the log partition mass, `tables[0].total_mass()` after
    /// calibration. Every table of a calibrated tree carries this mass.
    #[inline(always)]
    #[must_use]
    pub const fn log_z(&self) -> f64 {
        self.log_z
    }

    fn table(&self, position: usize) -> Result<&FactorTable> {
        self.tables.get(position).ok_or(ChaincrfError::invalid_argument(
            "position out of range",
        ))
    }

    /// Log marginal probability of `label` at `position`.
    pub fn log_prob(&self, position: usize, label: usize) -> Result<f64> {
        self.table(position)?.log_prob_end(&[label])
    }

    /// Marginal probability of `label` at `position`.
    pub fn prob(&self, position: usize, label: usize) -> Result<f64> {
        Ok(self.log_prob(position, label)?.exp())
    }

    /// Log marginal probability of a label window *ending* at `position`.
    ///
    /// Windows no wider than the clique window are a single-table marginal;
    /// wider windows are composed by chaining conditional probabilities
    /// across positions, which is exact on a calibrated tree.
    pub fn log_prob_window(&self, position: usize, labels: &[usize]) -> Result<f64> {
        if labels.is_empty() {
            return Ok(0.0);
        }
        if labels.len() <= self.window_size {
            return self.table(position)?.log_prob_end(labels);
        }
        if position + self.window_size < labels.len() {
            return Err(ChaincrfError::invalid_argument(
                "label window extends beyond the sequence start",
            ));
        }
        let first_end = position + self.window_size - labels.len();
        let mut window = labels[..self.window_size].to_vec();
        let mut log_p = self.table(first_end)?.log_prob(&window)?;
        for (i, &next) in labels[self.window_size..].iter().enumerate() {
            log_p += self
                .table(first_end + i + 1)?
                .conditional_log_prob_given_previous(&window[1..], next)?;
            window.remove(0);
            window.push(next);
        }
        Ok(log_p)
    }

    /// Marginal probability of a label window ending at `position`.
    pub fn prob_window(&self, position: usize, labels: &[usize]) -> Result<f64> {
        Ok(self.log_prob_window(position, labels)?.exp())
    }

    /// Log probability of `label` at `position` conditioned on the
    /// `window_size - 1` labels before it.
    pub fn cond_log_prob_given_previous(
        &self,
        position: usize,
        label: usize,
        prev_labels: &[usize],
    ) -> Result<f64> {
        self.table(position)?
            .conditional_log_prob_given_previous(prev_labels, label)
    }

    /// Log probability of `label` at `position` conditioned on the labels
    /// following it.
    pub fn cond_log_prob_given_next(
        &self,
        position: usize,
        label: usize,
        next_labels: &[usize],
    ) -> Result<f64> {
        let end = position + next_labels.len();
        let mut labels = Vec::with_capacity(next_labels.len() + 1);
        labels.push(label);
        labels.extend_from_slice(next_labels);
        Ok(self.log_prob_window(end, &labels)? - self.log_prob_window(end, next_labels)?)
    }

    /// Log probability that the positions before the sequence carry the
    /// background label, the boundary term opening every forward score.
    #[inline(always)]
    #[must_use]
    pub const fn log_prob_start_pos(&self) -> f64 {
        self.start_boundary
    }

    /// Conditional label distribution at `position` given the surrounding
    /// labels of `sequence`, as probabilities.
    pub fn conditional_distribution(
        &self,
        sequence: &[usize],
        position: usize,
    ) -> Result<Vec<f64>> {
        let scores = self.scores_of(sequence, position)?;
        Ok(scores.iter().map(|&s| s.exp()).collect())
    }

    fn previous_window(&self, sequence: &[usize], position: usize) -> Vec<usize> {
        let mut given = vec![self.background; self.window_size - 1];
        for (d, slot) in given.iter_mut().enumerate() {
            let seq_pos = position as isize + d as isize + 1 - self.window_size as isize;
            if seq_pos >= 0 {
                *slot = sequence[seq_pos as usize];
            }
        }
        given
    }
}

impl SequenceModel for CliqueTree {
    fn length(&self) -> usize {
        self.tables.len()
    }

    fn left_window(&self) -> usize {
        self.window_size - 1
    }

    fn right_window(&self) -> usize {
        0
    }

    fn possible_values(&self, _position: usize) -> Vec<usize> {
        (0..self.num_classes).collect()
    }

    fn scores_of(&self, sequence: &[usize], position: usize) -> Result<Vec<f64>> {
        let given = self.previous_window(sequence, position);
        let mut scores = Vec::with_capacity(self.num_classes);
        for label in 0..self.num_classes {
            scores.push(self.cond_log_prob_given_previous(position, label, &given)?);
        }
        Ok(scores)
    }

    fn score_of_at(&self, sequence: &[usize], position: usize) -> Result<f64> {
        let given = self.previous_window(sequence, position);
        self.cond_log_prob_given_previous(position, sequence[position], &given)
    }

    fn score_of(&self, sequence: &[usize]) -> Result<f64> {
        if sequence.len() != self.tables.len() {
            return Err(ChaincrfError::dimension_mismatch(
                "sequence length does not match the tree",
            ));
        }
        let mut log_p = self.start_boundary;
        let mut given = vec![self.background; self.window_size - 1];
        for (position, &label) in sequence.iter().enumerate() {
            log_p += self.cond_log_prob_given_previous(position, label, &given)?;
            if self.window_size > 1 {
                given.rotate_left(1);
                given[self.window_size - 2] = label;
            }
        }
        Ok(log_p)
    }
}
