use itertools::Itertools;

use ndarray::ArrayView2;

/// Indices of an anchor, a sample sharing its label and a sample that does not.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

/// Outcome of mining one batch.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Mined {
    pub(crate) triplets: Vec<Triplet>,
    pub(crate) positive_pairs: Vec<(usize, usize)>,
    /// Sum of the hinges of the mined triplets.
    pub(crate) rank_loss: f32,
    /// Sum of the distances of the positive pairs.
    pub(crate) pair_loss: f32,
}

/// Mines the triplets of a batch given its labels and squared distance matrix.
///
/// Every unordered pair of samples with the same label is a positive pair. Each of its two
/// samples acts in turn as the anchor against every sample with another label, and the triplet
/// is kept only while it violates the margin, i.e. when `margin + d(a, p) - d(a, n) > 0`.
pub(crate) fn mine(labels: &[i64], dist: ArrayView2<f32>, margin: f32) -> Mined {
    let mut mined = Mined::default();

    for (first, second) in (0..labels.len()).tuple_combinations() {
        if labels[first] != labels[second] {
            continue;
        }

        mined.positive_pairs.push((first, second));
        mined.pair_loss += dist[[first, second]];

        let negatives = (0..labels.len()).filter(|&idx| labels[idx] != labels[first]);
        for negative in negatives {
            for (anchor, positive) in [(first, second), (second, first)] {
                let hinge = margin + dist[[anchor, positive]] - dist[[anchor, negative]];
                if hinge > 0. {
                    mined.triplets.push(Triplet {
                        anchor,
                        positive,
                        negative,
                    });
                    mined.rank_loss += hinge;
                }
            }
        }
    }

    mined
}
