//! Trained models and exact MAP decoding.

use bincode::{Decode, Encode};

use crate::clique_tree::CliqueTree;
use crate::document::Document;
use crate::errors::{ChaincrfError, Result};
use crate::factor_table::WindowIndex;
use crate::labels::LabelIndex;
use crate::potential::LinearCliquePotentialFunction;

/// A trained linear-chain CRF: the weight rows plus the label-index
/// metadata needed to rebuild clique trees for decoding.
#[derive(Decode, Encode)]
pub struct Model {
    weights: Vec<Vec<f64>>,
    label_indices: Vec<LabelIndex>,
    num_classes: usize,
    background: usize,
}

impl Model {
    /// Creates a model from trained weight rows.
    ///
    /// # Arguments
    ///
    /// * `weights` - one row per feature id, one column per compact label
    ///   id of the feature's clique order.
    /// * `label_indices` - one label index per clique order.
    /// * `num_classes` - number of label classes.
    /// * `background` - label assumed outside the sequence boundary.
    ///
    /// # Errors
    ///
    /// The label indices must be non-empty with orders 1, 2, ... and the
    /// background label must be a valid class.
    pub fn new(
        weights: Vec<Vec<f64>>,
        label_indices: Vec<LabelIndex>,
        num_classes: usize,
        background: usize,
    ) -> Result<Self> {
        if label_indices.is_empty() {
            return Err(ChaincrfError::invalid_argument(
                "at least one clique order is required",
            ));
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
        Ok(Self {
            weights,
            label_indices,
            num_classes,
            background,
        })
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

    /// Gets the clique window size.
    #[inline(always)]
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.label_indices.len()
    }

    /// Gets the label indices, one per clique order.
    #[inline(always)]
    #[must_use]
    pub fn label_indices(&self) -> &[LabelIndex] {
        &self.label_indices
    }

    /// Gets the weight rows.
    #[must_use]
    pub fn weight_rows(&self) -> Vec<&[f64]> {
        self.weights.iter().map(Vec::as_slice).collect()
    }

    /// Calibrates a clique tree for a document under this model's weights.
    ///
    /// # Errors
    ///
    /// Shape disagreements between the document and the model are
    /// dimension mismatches.
    pub fn clique_tree(&self, doc: &Document) -> Result<CliqueTree> {
        let potential = LinearCliquePotentialFunction::new(self.weight_rows());
        CliqueTree::calibrated(
            doc,
            &self.label_indices,
            self.num_classes,
            self.background,
            &potential,
        )
    }

    /// Decodes the most probable label sequence for a document.
    ///
    /// Runs Viterbi over the calibrated tree's conditional probabilities;
    /// the chained conditionals telescope to the exact sequence log
    /// probability, so the result is the exact MAP path.
    ///
    /// # Errors
    ///
    /// See [`Self::clique_tree`].
    pub fn best_sequence(&self, doc: &Document) -> Result<Vec<usize>> {
        let tree = self.clique_tree(doc)?;
        let window_size = self.window_size();
        let n = doc.len();

        if window_size == 1 {
            // no conditioning context: every position decodes independently
            let mut best = Vec::with_capacity(n);
            for position in 0..n {
                let mut best_label = 0;
                let mut best_score = f64::NEG_INFINITY;
                for label in 0..self.num_classes {
                    let score = tree.cond_log_prob_given_previous(position, label, &[])?;
                    if score > best_score {
                        best_score = score;
                        best_label = label;
                    }
                }
                best.push(best_label);
            }
            return Ok(best);
        }

        // state = the window_size - 1 labels preceding the next position
        let state_codec = WindowIndex::new(self.num_classes, window_size - 1)?;
        let num_states = state_codec.len();
        let mut delta = vec![f64::NEG_INFINITY; num_states];
        let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(n.saturating_sub(1));

        let boundary = vec![self.background; window_size - 1];
        for label in 0..self.num_classes {
            let score = tree.cond_log_prob_given_previous(0, label, &boundary)?;
            let mut state_labels = boundary.clone();
            state_labels.rotate_left(1);
            state_labels[window_size - 2] = label;
            let state = state_codec.encode(&state_labels)?;
            if score > delta[state] {
                delta[state] = score;
            }
        }

        for position in 1..n {
            let mut next = vec![f64::NEG_INFINITY; num_states];
            let mut pointers = vec![0; num_states];
            for state in 0..num_states {
                if delta[state] == f64::NEG_INFINITY {
                    continue;
                }
                let state_labels = state_codec.decode(state);
                for label in 0..self.num_classes {
                    let score = delta[state]
                        + tree.cond_log_prob_given_previous(position, label, &state_labels)?;
                    let mut successor = state_labels.clone();
                    successor.rotate_left(1);
                    successor[window_size - 2] = label;
                    let successor = state_codec.encode(&successor)?;
                    if score > next[successor] {
                        next[successor] = score;
                        pointers[successor] = state;
                    }
                }
            }
            backptr.push(pointers);
            delta = next;
        }

        let mut state = delta
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .ok_or(ChaincrfError::invalid_argument("no decodable state"))?;
        let mut best = vec![0; n];
        for position in (0..n).rev() {
            best[position] = state_codec.decode(state)[window_size - 2];
            if position > 0 {
                state = backptr[position - 1][state];
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clique_tree::SequenceModel;
    use crate::test_utils::every_window_indices;

    fn toy_model(node: [f64; 2], edge: [f64; 4]) -> Model {
        Model::new(
            vec![node.to_vec(), edge.to_vec()],
            every_window_indices(2, 2),
            2,
            0,
        )
        .unwrap()
    }

    fn toy_doc(positions: usize) -> Document {
        let features = (0..positions)
            .map(|_| vec![vec![0], vec![1]])
            .collect();
        Document::new(features, None, vec![0; positions]).unwrap()
    }

    #[test]
    fn test_best_sequence_matches_exhaustive_search() {
        let model = toy_model([0.2, -0.1], [0.7, -0.4, 0.3, 1.1]);
        let doc = toy_doc(4);
        let tree = model.clique_tree(&doc).unwrap();

        let mut best = (f64::NEG_INFINITY, vec![]);
        for assignment in 0..16usize {
            let seq: Vec<usize> = (0..4).map(|p| (assignment >> p) & 1).collect();
            let score = tree.score_of(&seq).unwrap();
            if score > best.0 {
                best = (score, seq);
            }
        }
        assert_eq!(best.1, model.best_sequence(&doc).unwrap());
    }

    #[test]
    fn test_best_sequence_prefers_strong_node_evidence() {
        // class 1 strongly favored everywhere except by the edge penalty
        // for repeating it; node evidence dominates
        let model = toy_model([0.0, 2.0], [0.0, 0.0, 0.0, -0.5]);
        let doc = toy_doc(3);
        assert_eq!(vec![1, 1, 1], model.best_sequence(&doc).unwrap());
    }

    #[test]
    fn test_best_sequence_node_only_window() {
        let model = Model::new(
            vec![vec![-0.3, 0.4]],
            every_window_indices(2, 1),
            2,
            0,
        )
        .unwrap();
        let doc = Document::new(
            vec![vec![vec![0]], vec![vec![0]]],
            None,
            vec![0, 0],
        )
        .unwrap();
        assert_eq!(vec![1, 1], model.best_sequence(&doc).unwrap());
    }

    #[test]
    fn test_bincode_round_trip() {
        let model = toy_model([0.5, -0.25], [0.1, 0.2, 0.3, 0.4]);
        let doc = toy_doc(3);
        let decoded_before = model.best_sequence(&doc).unwrap();

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&model, config).unwrap();
        let (restored, _): (Model, usize) =
            bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(model.num_classes(), restored.num_classes());
        assert_eq!(model.background(), restored.background());
        assert_eq!(model.window_size(), restored.window_size());
        assert_eq!(model.weight_rows(), restored.weight_rows());
        assert_eq!(decoded_before, restored.best_sequence(&doc).unwrap());
    }

    #[test]
    fn test_new_validates_metadata() {
        assert!(Model::new(vec![], vec![], 2, 0).is_err());
        assert!(Model::new(vec![], every_window_indices(2, 2), 2, 5).is_err());
    }
}
