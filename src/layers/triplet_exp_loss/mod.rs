use ndarray::{Array2, Zip};

use tracing::trace;

use crate::{
    blob::Blob,
    device::Device,
    error::{LayerError, Result},
    layer::{BlobCounts, Layer},
    param::TripletExpLossParameter,
    utils::{squared_distance, Shared},
};

/// Exponential triplet loss over pre-aligned anchor, positive and negative embeddings.
///
/// For every sample `s` the hinge `m = max(0, margin + ‖a - p‖² - ‖a - n‖²)` is computed and
/// the loss is the batch mean of `exp(m / 2) - 1`. All three bottoms are differentiable.
#[derive(Debug)]
pub struct TripletExpLoss {
    margin: f32,
    device: Device,
    loss_weight: f32,
    hinges: Vec<f32>,
}

impl TripletExpLoss {
    pub fn new(param: TripletExpLossParameter) -> Result<Self> {
        if !(param.margin.is_finite() && param.margin >= 0.) {
            return Err(LayerError::invalid_parameter(
                "TripletExpLoss",
                format!("margin must be non-negative, got {}", param.margin),
            ));
        }

        Ok(Self {
            margin: param.margin,
            device: Device::default(),
            loss_weight: 1.,
            hinges: Vec::new(),
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
}

impl Layer for TripletExpLoss {
    fn kind(&self) -> &'static str {
        "TripletExpLoss"
    }

    fn blob_counts(&self) -> BlobCounts {
        BlobCounts::exact(3, 1)
    }

    fn loss_weight(&self, top_index: usize) -> f32 {
        if top_index == 0 {
            self.loss_weight
        } else {
            0.
        }
    }

    fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let anchor = bottom[0].borrow();
        for (idx, other) in bottom.iter().enumerate().skip(1) {
            let other = other.borrow();
            if other.shape() != anchor.shape() {
                return Err(LayerError::shape_mismatch(
                    self.kind(),
                    format!(
                        "bottom {} has shape {:?}, anchors have shape {:?}",
                        idx,
                        other.shape(),
                        anchor.shape()
                    ),
                ));
            }
        }

        top[0].borrow_mut().reshape(&[]);
        self.hinges.clear();
        self.hinges.resize(anchor.num(), 0.);

        Ok(())
    }

    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let (anchor, positive, negative) =
            (bottom[0].borrow(), bottom[1].borrow(), bottom[2].borrow());
        let (anchor, positive, negative) = (
            anchor.data_matrix()?,
            positive.data_matrix()?,
            negative.data_matrix()?,
        );
        let margin = self.margin;

        self.hinges = self.device.map_rows(anchor.nrows(), |idx| {
            let (a, p, n) = (anchor.row(idx), positive.row(idx), negative.row(idx));
            (margin + squared_distance(a, p) - squared_distance(a, n)).max(0.)
        });

        let num = self.hinges.len();
        let loss = if num == 0 {
            0.
        } else {
            self.hinges
                .iter()
                .map(|hinge| (hinge * 0.5).exp_m1())
                .sum::<f32>()
                / num as f32
        };
        top[0].borrow_mut().data_mut().fill(loss);

        trace!(layer = self.kind(), loss, "forward");
        Ok(())
    }

    fn compute_input_gradient(
        &mut self,
        top: &[Shared<Blob>],
        propagate_down: &[bool],
        bottom: &[Shared<Blob>],
    ) -> Result<()> {
        let num = self.hinges.len().max(1);
        let scale = top[0].borrow().scalar_diff() / num as f32;

        // d exp(m / 2) / dm, zero where the hinge is clamped.
        let coefficients: Vec<f32> = self
            .hinges
            .iter()
            .map(|&hinge| {
                if hinge > 0. {
                    0.5 * (hinge * 0.5).exp() * scale
                } else {
                    0.
                }
            })
            .collect();

        // The gradient of input `idx` is `2c (lhs - rhs)`.
        const OPERANDS: [(usize, usize); 3] = [(2, 1), (1, 0), (0, 2)];

        for (idx, &(lhs, rhs)) in OPERANDS.iter().enumerate() {
            if !propagate_down[idx] {
                continue;
            }

            let gradient = {
                let (lhs, rhs) = (bottom[lhs].borrow(), bottom[rhs].borrow());
                let (lhs, rhs) = (lhs.data_matrix()?, rhs.data_matrix()?);
                let coefficients = &coefficients;

                let mut gradient = Array2::zeros(lhs.raw_dim());
                self.device
                    .for_each_row(gradient.view_mut(), |sample, mut row| {
                        let c = 2. * coefficients[sample];
                        Zip::from(&mut row)
                            .and(lhs.row(sample))
                            .and(rhs.row(sample))
                            .for_each(|grad_el, &l, &r| *grad_el = c * (l - r));
                    });
                gradient
            };

            bottom[idx]
                .borrow_mut()
                .diff_matrix_mut()?
                .assign(&gradient);
        }

        Ok(())
    }
}
