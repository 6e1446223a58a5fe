use std::rc::Rc;

use ndarray::Zip;

use crate::{
    blob::Blob,
    device::Device,
    error::Result,
    layer::{BlobCounts, Layer},
    utils::Shared,
};

/// Element-wise logistic function, `y = 1 / (1 + e^(-x))`.
///
/// The same blob may be passed as bottom and top, in which case the input is overwritten.
#[derive(Clone, Debug, Default)]
pub struct Sigmoid {
    device: Device,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: Device) -> Self {
        Self { device }
    }
}

fn logistic(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

impl Layer for Sigmoid {
    fn kind(&self) -> &'static str {
        "Sigmoid"
    }

    fn blob_counts(&self) -> BlobCounts {
        BlobCounts::exact(1, 1)
    }

    fn allow_in_place(&self) -> bool {
        true
    }

    fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        if Rc::ptr_eq(&bottom[0], &top[0]) {
            return Ok(());
        }

        top[0].borrow_mut().reshape_like(&bottom[0].borrow());
        Ok(())
    }

    fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
        if Rc::ptr_eq(&bottom[0], &top[0]) {
            let mut blob = top[0].borrow_mut();
            self.device
                .for_each_row(blob.data_matrix_mut()?, |_, mut row| {
                    row.mapv_inplace(logistic)
                });
            return Ok(());
        }

        let bottom = bottom[0].borrow();
        let operand = bottom.data_matrix()?;
        let mut top = top[0].borrow_mut();

        self.device
            .for_each_row(top.data_matrix_mut()?, |idx, mut row| {
                Zip::from(&mut row)
                    .and(operand.row(idx))
                    .for_each(|v, &o| *v = logistic(o))
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

        if Rc::ptr_eq(&bottom[0], &top[0]) {
            let mut blob = top[0].borrow_mut();
            let (data, gradient) = blob.matrices_mut()?;
            self.device.for_each_row(gradient, |idx, mut row| {
                Zip::from(&mut row)
                    .and(data.row(idx))
                    .for_each(|grad_el, &data_el| *grad_el *= data_el * (1. - data_el))
            });
            return Ok(());
        }

        let top = top[0].borrow();
        let (data, gradient) = (top.data_matrix()?, top.diff_matrix()?);
        let mut bottom = bottom[0].borrow_mut();

        self.device
            .for_each_row(bottom.diff_matrix_mut()?, |idx, mut row| {
                Zip::from(&mut row)
                    .and(gradient.row(idx))
                    .and(data.row(idx))
                    .for_each(|op_grad_el, &grad_el, &data_el| {
                        *op_grad_el = grad_el * data_el * (1. - data_el)
                    })
            });

        Ok(())
    }
}
