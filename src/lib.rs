//! # chaincrf
//!
//! Linear-chain Conditional Random Fields with exact clique-tree inference
//! implemented in pure Rust
#![cfg_attr(
    feature = "train",
    doc = "
## Examples

```rust
use chaincrf::{Document, LabelIndex, Prior, Trainer};

// Two classes: 0 = OTHER, 1 = NAME, scored by node and edge cliques
// (window size 2).
//
// Features:
// 0: capitalized token (node clique)
// 1: transition bias (edge clique, fires at every position)

let label_indices = vec![
    LabelIndex::every_window(2, 1).unwrap(),
    LabelIndex::every_window(2, 2).unwrap(),
];

// \"the Painter paints\" with the capitalized token labeled NAME
let doc = Document::new(
    vec![
        vec![vec![], vec![1]],
        vec![vec![0], vec![1]],
        vec![vec![], vec![1]],
    ],
    None,
    vec![0, 1, 0],
).unwrap();

// Generates a model
let trainer = Trainer::new()
    .max_iter(100).unwrap()
    .prior(Prior::Quadratic { sigma: 1.0 });
let model = trainer
    .train(&[doc.clone()], label_indices, vec![0, 1], 2, 0)
    .unwrap();

// Exact MAP decoding over the calibrated clique tree
assert_eq!(vec![0, 1, 0], model.best_sequence(&doc).unwrap());
```
"
)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod clique_tree;
mod document;
pub mod errors;
mod factor_table;
mod labels;
mod math;
mod model;
mod potential;

#[cfg(feature = "train")]
mod objective;
#[cfg(feature = "train")]
mod prior;
#[cfg(feature = "train")]
mod trainer;

#[cfg(test)]
mod test_utils;

pub use clique_tree::{CliqueTree, SequenceModel};
pub use document::Document;
pub use errors::{ChaincrfError, Result};
pub use factor_table::{FactorTable, WindowIndex};
pub use labels::LabelIndex;
pub use model::Model;
pub use potential::{CliquePotentialFunction, LinearCliquePotentialFunction};

#[cfg(feature = "train")]
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub use objective::CrfObjective;
#[cfg(feature = "train")]
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub use prior::{FeatureGrouping, Prior};
#[cfg(feature = "train")]
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
pub use trainer::Trainer;
