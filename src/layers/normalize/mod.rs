use ndarray::{ArrayView1, Zip};

use crate::{
    blob::Blob,
    device::Device,
    error::{LayerError, Result},
    layer::{BlobCounts, Layer},
    param::NormalizeParameter,
    utils::Shared,
};

/// Scales every sample to unit euclidean norm.
///
/// Each sample, the slice of the bottom along the first axis, is flattened and divided by its
/// norm; the shape of the blob is preserved. Samples whose norm does not exceed `eps` map to
/// zero and receive a zero gradient.
#[derive(Debug)]
pub struct Normalize {
    eps: f32,
    device: Device,
    norms: Vec<f32>,
}

impl Normalize {
    pub fn new(param: NormalizeParameter) -> Result<Self> {
        if !(param.eps.is_finite() && param.eps > 0.) {
            return Err(LayerError::invalid_parameter(
                "Normalize",
                format!("eps must be positive, got {}", param.eps),
            ));
        }

        Ok(Self {
            eps: param.eps,
            device: Device::default(),
            norms: Vec::new(),
        })
    }

    pub fn with_device(self, device: Device) -> Self {
        Self { device, ..self }
    }
}

/// Euclidean norm of `row`, scaled by its largest magnitude so that squaring cannot overflow.
fn norm(row: ArrayView1<f32>) -> f32 {
    let scale = row.fold(0f32, |acc, el| acc.max(el.abs()));
    if scale == 0. || !scale.is_finite() {
        return scale;
    }

    scale * row.fold(0., |acc, &el| acc + (el / scale).powi(2)).sqrt()
}

impl Layer for Normalize {
    fn kind(&self) -> &'static str {
        "Normalize"
    }

    fn blob_counts(&self) -> BlobCounts {
        BlobCounts::exact(1, 1)
    }

    fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let bottom = bottom[0].borrow();
        if bottom.num_axes() == 0 {
            return Err(LayerError::shape_mismatch(
                self.kind(),
                "input needs a batch axis",
            ));
        }

        top[0].borrow_mut().reshape_like(&bottom);
        self.norms.clear();
        self.norms.resize(bottom.num(), 0.);

        Ok(())
    }

    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        let bottom = bottom[0].borrow();
        let features = bottom.data_matrix()?;

        self.norms = self
            .device
            .map_rows(features.nrows(), |idx| norm(features.row(idx)));

        let (norms, eps) = (&self.norms, self.eps);
        let mut top = top[0].borrow_mut();
        self.device
            .for_each_row(top.data_matrix_mut()?, |idx, mut row| {
                let norm = norms[idx];
                if norm > eps {
                    Zip::from(&mut row)
                        .and(features.row(idx))
                        .for_each(|y, &x| *y = x / norm);
                } else {
                    row.fill(0.);
                }
            });

        Ok(())
    }

    fn compute_input_gradient(
        &mut self,
        top: &[Shared<Blob>],
        propagate_down: &[bool],
        bottom: &[Shared<Blob>],
    ) -> Result<()> {
        if !propagate_down[0] {
            return Ok(());
        }

        let top = top[0].borrow();
        let (data, gradient) = (top.data_matrix()?, top.diff_matrix()?);
        let (norms, eps) = (&self.norms, self.eps);

        let mut bottom = bottom[0].borrow_mut();
        self.device
            .for_each_row(bottom.diff_matrix_mut()?, |idx, mut row| {
                let norm = norms[idx];
                if norm <= eps {
                    row.fill(0.);
                    return;
                }

                // (g - (y·g) y) / ‖x‖
                let (y, g) = (data.row(idx), gradient.row(idx));
                let projection = y.dot(&g);
                Zip::from(&mut row)
                    .and(g)
                    .and(y)
                    .for_each(|op_grad_el, &grad_el, &data_el| {
                        *op_grad_el = (grad_el - projection * data_el) / norm
                    });
            });

        Ok(())
    }
}
