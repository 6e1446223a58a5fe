use std::slice;

use ndarray::{ArrayView1, Zip};

use tracing::trace;

use crate::{
    blob::Blob,
    device::Device,
    error::{LayerError, Result},
    layer::{BlobCounts, Layer},
    param::MultiLabelLossParameter,
    utils::{new_shared, Shared},
};

use super::Sigmoid;

/// Sigmoid cross-entropy over independent, non-exclusive labels.
///
/// Bottoms:
/// 1. raw scores `x`, shape `N × C × …`;
/// 2. targets `t` with the same number of elements, each in `[0, 1]`.
///
/// Tops:
/// 1. the loss `E = -1/N Σ (t ln p + (1 - t) ln(1 - p))`, where `p = sigmoid(x)`;
/// 2. optionally, the loss of every single element, shaped like the scores.
///
/// Gradients flow to the scores only.
#[derive(Debug)]
pub struct MultiLabelLoss {
    ignore_label: Option<i32>,
    device: Device,
    loss_weight: f32,
    sigmoid: Sigmoid,
    sigmoid_output: Shared<Blob>,
}

impl MultiLabelLoss {
    pub fn new(param: MultiLabelLossParameter) -> Result<Self> {
        Ok(Self {
            ignore_label: param.ignore_label,
            device: Device::default(),
            loss_weight: 1.,
            sigmoid: Sigmoid::new(),
            sigmoid_output: new_shared(Blob::default()),
        })
    }

    pub fn with_device(self, device: Device) -> Self {
        Self {
            device,
            sigmoid: self.sigmoid.with_device(device),
            ..self
        }
    }

    pub fn with_loss_weight(self, loss_weight: f32) -> Self {
        Self {
            loss_weight,
            ..self
        }
    }

    fn is_ignored(&self, target: f32) -> bool {
        is_ignored(self.ignore_label, target)
    }
}

fn is_ignored(ignore_label: Option<i32>, target: f32) -> bool {
    ignore_label.map_or(false, |label| target as i32 == label && target.fract() == 0.)
}

/// Cross-entropy of the sigmoid of `score`, computed from the score itself so that it stays
/// exact where the sigmoid rounds to 0 or 1.
fn element_loss(score: f32, target: f32) -> f32 {
    let max = (-score).max(0.);
    (1. - target) * score + max + ((-max).exp() + (-score - max).exp()).ln()
}

fn row_loss(scores: ArrayView1<f32>, targets: ArrayView1<f32>, ignore_label: Option<i32>) -> f32 {
    Zip::from(scores)
        .and(targets)
        .fold(0., |loss, &score, &target| {
            if is_ignored(ignore_label, target) {
                loss
            } else {
                loss + element_loss(score, target)
            }
        })
}

impl Layer for MultiLabelLoss {
    fn kind(&self) -> &'static str {
        "MultiLabelLoss"
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
        {
            let (scores, targets) = (bottom[0].borrow(), bottom[1].borrow());
            if scores.num() != targets.num() || scores.count() != targets.count() {
                return Err(LayerError::shape_mismatch(
                    self.kind(),
                    format!(
                        "scores {:?} and targets {:?} must have the same number of elements",
                        scores.shape(),
                        targets.shape()
                    ),
                ));
            }

            top[0].borrow_mut().reshape(&[]);
            if let Some(elements) = top.get(1) {
                elements.borrow_mut().reshape_like(&scores);
            }
        }

        self.sigmoid
            .reshape(&bottom[..1], slice::from_ref(&self.sigmoid_output))
    }

    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        if bottom[0].borrow().data().iter().any(|score| !score.is_finite()) {
            return Err(LayerError::invalid_input(
                self.kind(),
                "scores must be finite",
            ));
        }
        if let Some(target) = bottom[1]
            .borrow()
            .data()
            .iter()
            .find(|&&target| !self.is_ignored(target) && !(0. ..=1.).contains(&target))
        {
            return Err(LayerError::invalid_input(
                self.kind(),
                format!("target {} lies outside [0, 1]", target),
            ));
        }

        // Probabilities are kept for the backward pass.
        self.sigmoid
            .forward(&bottom[..1], slice::from_ref(&self.sigmoid_output))?;

        let input = bottom[0].borrow();
        let scores = input.data_matrix()?;
        let labels = bottom[1].borrow();
        let targets = labels.data().view().into_shape(scores.raw_dim())?;
        let ignore_label = self.ignore_label;

        let num = scores.nrows();
        let loss = self
            .device
            .map_rows(num, |idx| row_loss(scores.row(idx), targets.row(idx), ignore_label))
            .iter()
            .sum::<f32>();
        let loss = if num == 0 { 0. } else { loss / num as f32 };
        top[0].borrow_mut().data_mut().fill(loss);

        if let Some(elements) = top.get(1) {
            self.device.for_each_row(
                elements.borrow_mut().data_matrix_mut()?,
                |idx, mut row| {
                    Zip::from(&mut row)
                        .and(scores.row(idx))
                        .and(targets.row(idx))
                        .for_each(|el, &score, &target| {
                            *el = if is_ignored(ignore_label, target) {
                                0.
                            } else {
                                element_loss(score, target)
                            }
                        })
                },
            );
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

        let sigmoid_output = self.sigmoid_output.borrow();
        let probabilities = sigmoid_output.data_matrix()?;
        // Owned, the scores are borrowed mutably below.
        let targets = bottom[1]
            .borrow()
            .data()
            .view()
            .into_shape(probabilities.raw_dim())?
            .to_owned();
        let ignore_label = self.ignore_label;

        let num = probabilities.nrows().max(1);
        let scale = top[0].borrow().scalar_diff() / num as f32;

        let mut scores = bottom[0].borrow_mut();
        self.device
            .for_each_row(scores.diff_matrix_mut()?, |idx, mut row| {
                Zip::from(&mut row)
                    .and(probabilities.row(idx))
                    .and(targets.row(idx))
                    .for_each(|op_grad_el, &probability, &target| {
                        *op_grad_el = if is_ignored(ignore_label, target) {
                            0.
                        } else {
                            (probability - target) * scale
                        }
                    })
            });

        Ok(())
    }
}
