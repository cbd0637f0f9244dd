use crate::labels::LabelIndex;

macro_rules! logsumexp {
    ( $($x:expr,)* ) => {
        {
            let mut y = f64::NEG_INFINITY;
            $(
                y = $crate::math::logsumexp(y, $x);
            )*
            y
        }
    };
    ( $($x:expr),* ) => {
        logsumexp!($( $x, )*)
    };
}

/// Full label indices for clique orders 1 through `window_size`.
pub fn every_window_indices(num_classes: usize, window_size: usize) -> Vec<LabelIndex> {
    (1..=window_size)
        .map(|order| LabelIndex::every_window(num_classes, order).unwrap())
        .collect()
}

pub(crate) use logsumexp;
