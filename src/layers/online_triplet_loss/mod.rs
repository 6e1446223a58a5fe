mod mining;

pub use mining::Triplet;

use ndarray::{Array2, ArrayView1, ArrayViewMut2, Zip};

use tracing::{debug, trace};

use crate::{
    blob::Blob,
    device::Device,
    error::{LayerError, Result},
    layer::{BlobCounts, Layer},
    param::OnlineTripletLossParameter,
    utils::{squared_distance, Shared},
};

use mining::mine;

/// Ranking loss with triplets mined inside each batch.
///
/// Bottoms:
/// 1. embeddings `x`, shape `N × D × …`;
/// 2. integer-valued labels, `N` of them.
///
/// Tops:
/// 1. the loss `E = mu * rank_loss + (1 - mu) * pair_loss`;
/// 2. optionally, the number of triplets mined from the batch.
///
/// `rank_loss` is the mean hinge `margin + d(a, p) - d(a, n)` over the mined triplets,
/// `pair_loss` the mean squared distance over all pairs of samples sharing a label. Distances
/// are squared euclidean. A batch without any such pair has zero loss and zero gradient.
///
/// With `mu = 1` this is the FaceNet triplet loss.
#[derive(Debug)]
pub struct OnlineTripletLoss {
    margin: f32,
    mu: f32,
    device: Device,
    loss_weight: f32,
    triplets: Vec<Triplet>,
    positive_pairs: Vec<(usize, usize)>,
    dist: Array2<f32>,
}

impl OnlineTripletLoss {
    pub fn new(param: OnlineTripletLossParameter) -> Result<Self> {
        if !(param.margin.is_finite() && param.margin >= 0.) {
            return Err(LayerError::invalid_parameter(
                "OnlineTripletLoss",
                format!("margin must be non-negative, got {}", param.margin),
            ));
        }
        if !(0. ..=1.).contains(&param.mu) {
            return Err(LayerError::invalid_parameter(
                "OnlineTripletLoss",
                format!("mu must lie in [0, 1], got {}", param.mu),
            ));
        }

        Ok(Self {
            margin: param.margin,
            mu: param.mu,
            device: Device::default(),
            loss_weight: 1.,
            triplets: Vec::new(),
            positive_pairs: Vec::new(),
            dist: Array2::zeros((0, 0)),
        })
    }

    pub fn with_device(self, device: Device) -> Self {
        Self { device, ..self }
    }

    pub fn with_loss_weight(self, loss_weight: f32) -> Self {
        Self {
            loss_weight,
            ..self
        }
    }

    /// Triplets mined by the last forward pass.
    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    /// Positive pairs found by the last forward pass.
    pub fn positive_pairs(&self) -> &[(usize, usize)] {
        &self.positive_pairs
    }
}

/// Adds `2 weight (lhs - rhs)` to row `idx` of `gradient`.
fn accumulate(
    gradient: &mut ArrayViewMut2<f32>,
    idx: usize,
    lhs: ArrayView1<f32>,
    rhs: ArrayView1<f32>,
    weight: f32,
) {
    Zip::from(gradient.row_mut(idx))
        .and(lhs)
        .and(rhs)
        .for_each(|grad_el, &l, &r| *grad_el += 2. * weight * (l - r));
}

impl Layer for OnlineTripletLoss {
    fn kind(&self) -> &'static str {
        "OnlineTripletLoss"
    }

    fn blob_counts(&self) -> BlobCounts {
        BlobCounts::exact(2, 1).with_top(1, 2)
    }

    fn loss_weight(&self, top_index: usize) -> f32 {
        if top_index == 0 {
            self.loss_weight
        } else {
            0.
        }
    }

    fn allow_force_backward(&self, bottom_index: usize) -> bool {
        bottom_index != 1
    }

    fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let (embeddings, labels) = (bottom[0].borrow(), bottom[1].borrow());
        let num = embeddings.num();
        if labels.count() != num {
            return Err(LayerError::shape_mismatch(
                self.kind(),
                format!(
                    "{} labels given for {} embeddings",
                    labels.count(),
                    num
                ),
            ));
        }

        for blob in top {
            blob.borrow_mut().reshape(&[]);
        }
        if self.dist.dim() != (num, num) {
            self.dist = Array2::zeros((num, num));
        }

        Ok(())
    }

    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let embeddings = bottom[0].borrow();
        let features = embeddings.data_matrix()?;
        let labels: Vec<i64> = bottom[1]
            .borrow()
            .data()
            .iter()
            .map(|&label| label as i64)
            .collect();

        self.device
            .for_each_row(self.dist.view_mut(), |idx, mut row| {
                let anchor = features.row(idx);
                row.iter_mut()
                    .zip(features.outer_iter())
                    .for_each(|(dist, other)| *dist = squared_distance(anchor, other));
            });

        let mined = mine(&labels, self.dist.view(), self.margin);
        let (num_triplets, num_pairs) = (mined.triplets.len(), mined.positive_pairs.len());
        debug!(
            layer = self.kind(),
            triplets = num_triplets,
            pairs = num_pairs,
            "mined batch"
        );

        let loss = if num_pairs == 0 {
            debug!(layer = self.kind(), "no positive pairs in batch, loss is zero");
            0.
        } else {
            let rank_loss = if num_triplets == 0 {
                0.
            } else {
                mined.rank_loss / num_triplets as f32
            };
            let pair_loss = mined.pair_loss / num_pairs as f32;

            self.mu * rank_loss + (1. - self.mu) * pair_loss
        };

        self.triplets = mined.triplets;
        self.positive_pairs = mined.positive_pairs;

        top[0].borrow_mut().data_mut().fill(loss);
        if let Some(count) = top.get(1) {
            count.borrow_mut().data_mut().fill(num_triplets as f32);
        }

        trace!(layer = self.kind(), loss, "forward");
        Ok(())
    }

    fn compute_input_gradient(
        &mut self,
        top: &[Shared<Blob>],
        propagate_down: &[bool],
        bottom: &[Shared<Blob>],
    ) -> Result<()> {
        if propagate_down[1] {
            return Err(LayerError::LabelGradient {
                layer: self.kind(),
                index: 1,
            });
        }
        if !propagate_down[0] {
            return Ok(());
        }

        let scale = top[0].borrow().scalar_diff();
        let mut embeddings = bottom[0].borrow_mut();
        let (features, mut gradient) = embeddings.matrices_mut()?;
        gradient.fill(0.);

        if self.positive_pairs.is_empty() {
            return Ok(());
        }

        if !self.triplets.is_empty() {
            let weight = scale * self.mu / self.triplets.len() as f32;
            for triplet in &self.triplets {
                let (a, p, n) = (
                    features.row(triplet.anchor),
                    features.row(triplet.positive),
                    features.row(triplet.negative),
                );
                accumulate(&mut gradient, triplet.anchor, n, p, weight);
                accumulate(&mut gradient, triplet.positive, p, a, weight);
                accumulate(&mut gradient, triplet.negative, a, n, weight);
            }
        }

        let weight = scale * (1. - self.mu) / self.positive_pairs.len() as f32;
        for &(first, second) in &self.positive_pairs {
            let (x1, x2) = (features.row(first), features.row(second));
            accumulate(&mut gradient, first, x1, x2, weight);
            accumulate(&mut gradient, second, x2, x1, weight);
        }

        Ok(())
    }
}
