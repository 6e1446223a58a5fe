//! Finite-difference verification of layer gradients.
//!
//! The gradient computed by a layer's backward pass is compared, element by element, with the
//! central difference `(E(x + h) - E(x - h)) / 2h`, where the objective `E` is a single element
//! of one of the tops.
//!
//! ```
//! use ndarray::arr2;
//! use neuronika_layers::{check::GradientChecker, new_shared, Blob, Sigmoid};
//!
//! let bottom = [new_shared(Blob::from_ndarray(arr2(&[[-1., 0.5], [2., 0.]])))];
//! let top = [new_shared(Blob::default())];
//!
//! GradientChecker::new(1e-2, 1e-2)
//!     .check_gradient_exhaustive(&mut Sigmoid::new(), &bottom, &top, None)
//!     .unwrap();
//! ```

use tracing::debug;

use crate::{
    blob::Blob,
    error::{LayerError, Result},
    layer::Layer,
    utils::Shared,
};

/// Compares analytic gradients with numeric estimates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GradientChecker {
    stepsize: f32,
    threshold: f32,
    kink: f32,
    kink_range: f32,
}

impl GradientChecker {
    /// Creates a checker perturbing inputs by `stepsize`.
    ///
    /// A gradient passes when `|computed - estimated| <= threshold * max(|computed|,
    /// |estimated|, 1)`.
    pub fn new(stepsize: f32, threshold: f32) -> Self {
        Self {
            stepsize,
            threshold,
            kink: 0.,
            kink_range: -1.,
        }
    }

    /// Skips the inputs within `kink_range` of `kink`, where the layer is not differentiable.
    pub fn with_kink(self, kink: f32, kink_range: f32) -> Self {
        Self {
            kink,
            kink_range,
            ..self
        }
    }

    /// Sets `layer` up and checks the gradient of element `top_data_id` of top `top_id`.
    ///
    /// # Arguments
    ///
    /// * `check_bottom` - index of the only bottom to check, all of them when `None`.
    ///
    /// # Errors
    ///
    /// [`LayerError::GradientMismatch`] on the first element whose gradient is off, or any error
    /// raised by the layer itself.
    pub fn check_gradient(
        &self,
        layer: &mut dyn Layer,
        bottom: &[Shared<Blob>],
        top: &[Shared<Blob>],
        check_bottom: Option<usize>,
        top_id: usize,
        top_data_id: usize,
    ) -> Result<()> {
        layer.setup(bottom, top)?;
        self.check_gradient_single(layer, bottom, top, check_bottom, top_id, top_data_id)
    }

    /// Sets `layer` up and checks the gradient of every element of every top.
    pub fn check_gradient_exhaustive(
        &self,
        layer: &mut dyn Layer,
        bottom: &[Shared<Blob>],
        top: &[Shared<Blob>],
        check_bottom: Option<usize>,
    ) -> Result<()> {
        layer.setup(bottom, top)?;

        for (top_id, blob) in top.iter().enumerate() {
            let count = blob.borrow().count();
            for top_data_id in 0..count {
                self.check_gradient_single(layer, bottom, top, check_bottom, top_id, top_data_id)?;
            }
        }

        Ok(())
    }

    fn check_gradient_single(
        &self,
        layer: &mut dyn Layer,
        bottom: &[Shared<Blob>],
        top: &[Shared<Blob>],
        check_bottom: Option<usize>,
        top_id: usize,
        top_data_id: usize,
    ) -> Result<()> {
        let propagate_down: Vec<bool> = (0..bottom.len())
            .map(|idx| check_bottom.map_or(true, |checked| checked == idx))
            .collect();

        layer.forward(bottom, top)?;
        for (idx, blob) in top.iter().enumerate() {
            let mut blob = blob.borrow_mut();
            blob.diff_mut().fill(0.);
            if idx == top_id {
                match blob.diff_mut().iter_mut().nth(top_data_id) {
                    Some(el) => *el = 1.,
                    None => {
                        return Err(LayerError::invalid_input(
                            layer.kind(),
                            format!("top {} has no element {}", top_id, top_data_id),
                        ))
                    }
                }
            }
        }
        layer.backward(top, &propagate_down, bottom)?;

        let computed: Vec<Vec<f32>> = bottom
            .iter()
            .map(|blob| blob.borrow().diff().iter().copied().collect())
            .collect();

        for (bottom_id, blob) in bottom.iter().enumerate() {
            if !propagate_down[bottom_id] {
                continue;
            }

            for (index, &computed) in computed[bottom_id].iter().enumerate() {
                let feature = element(blob, index);

                set_element(blob, index, feature + self.stepsize);
                let positive = self.objective(layer, bottom, top, top_id, top_data_id)?;
                set_element(blob, index, feature - self.stepsize);
                let negative = self.objective(layer, bottom, top, top_id, top_data_id)?;
                set_element(blob, index, feature);

                if (feature - self.kink).abs() <= self.kink_range {
                    continue;
                }

                let estimated = (positive - negative) / (2. * self.stepsize);
                let scale = computed.abs().max(estimated.abs()).max(1.);
                if (computed - estimated).abs() > self.threshold * scale {
                    debug!(
                        layer = layer.kind(),
                        bottom = bottom_id,
                        index,
                        computed,
                        estimated,
                        "gradient check failed"
                    );
                    return Err(LayerError::GradientMismatch {
                        bottom: bottom_id,
                        index,
                        computed,
                        estimated,
                    });
                }
            }
        }

        Ok(())
    }

    fn objective(
        &self,
        layer: &mut dyn Layer,
        bottom: &[Shared<Blob>],
        top: &[Shared<Blob>],
        top_id: usize,
        top_data_id: usize,
    ) -> Result<f32> {
        layer.forward(bottom, top)?;
        let value = top[top_id]
            .borrow()
            .data()
            .iter()
            .nth(top_data_id)
            .copied()
            .unwrap_or_default();

        Ok(value)
    }
}

fn element(blob: &Shared<Blob>, index: usize) -> f32 {
    let value = blob
        .borrow()
        .data()
        .iter()
        .nth(index)
        .copied()
        .unwrap_or_default();

    value
}

fn set_element(blob: &Shared<Blob>, index: usize, value: f32) {
    if let Some(el) = blob.borrow_mut().data_mut().iter_mut().nth(index) {
        *el = value;
    }
}

#[cfg(test)]
mod test {
    use ndarray::arr2;

    use super::GradientChecker;
    use crate::{
        blob::Blob,
        error::{LayerError, Result},
        layer::{BlobCounts, Layer},
        utils::{new_shared, Shared},
    };

    /// Doubles its input but reports the gradient of the identity.
    struct Faulty;

    impl Layer for Faulty {
        fn kind(&self) -> &'static str {
            "Faulty"
        }

        fn blob_counts(&self) -> BlobCounts {
            BlobCounts::exact(1, 1)
        }

        fn reshape(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
            let input = bottom[0].borrow();
            top[0].borrow_mut().reshape_like(&input);
            Ok(())
        }

        fn compute_output(&mut self, bottom: &[Shared<Blob>], top: &[Shared<Blob>]) -> Result<()> {
            let doubled = bottom[0].borrow().data() * 2.;
            *top[0].borrow_mut().data_mut() = doubled;
            Ok(())
        }

        fn compute_input_gradient(
            &mut self,
            top: &[Shared<Blob>],
            _: &[bool],
            bottom: &[Shared<Blob>],
        ) -> Result<()> {
            let gradient = top[0].borrow().diff().clone();
            *bottom[0].borrow_mut().diff_mut() = gradient;
            Ok(())
        }
    }

    #[test]
    fn detects_wrong_gradient() {
        let bottom = [new_shared(Blob::from_ndarray(arr2(&[[1., 2.]])))];
        let top = [new_shared(Blob::default())];

        let result = GradientChecker::new(1e-2, 1e-2).check_gradient_exhaustive(
            &mut Faulty,
            &bottom,
            &top,
            None,
        );

        assert!(matches!(
            result,
            Err(LayerError::GradientMismatch { bottom: 0, index: 0, .. })
        ));
    }

    #[test]
    fn skips_kink() {
        let bottom = [new_shared(Blob::from_ndarray(arr2(&[[1., 1.]])))];
        let top = [new_shared(Blob::default())];

        GradientChecker::new(1e-2, 1e-2)
            .with_kink(1., 0.5)
            .check_gradient_exhaustive(&mut Faulty, &bottom, &top, None)
            .unwrap();
    }

    #[test]
    fn restores_inputs() {
        let bottom = [new_shared(Blob::from_ndarray(arr2(&[[0.25, -3.]])))];
        let top = [new_shared(Blob::default())];

        let _ = GradientChecker::new(1e-2, 1e-2).check_gradient(
            &mut Faulty,
            &bottom,
            &top,
            None,
            0,
            1,
        );

        let result = bottom[0].borrow().data().clone();
        assert_eq!(result, arr2(&[[0.25, -3.]]).into_dyn());
    }
}
