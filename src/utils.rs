use std::{cell::RefCell, rc::Rc};

use ndarray::{ArrayView1, Zip};

#[cfg(test)]
use ndarray::{Array, Dimension};

/// Shorthand for `Rc<RefCell<T>>`.
pub type Shared<T> = Rc<RefCell<T>>;

/// Wraps `item` so that it can be handed to layers.
pub fn new_shared<T>(item: T) -> Shared<T> {
    Rc::new(RefCell::new(item))
}

/// Squared euclidean distance between two samples.
pub(crate) fn squared_distance(lhs: ArrayView1<f32>, rhs: ArrayView1<f32>) -> f32 {
    Zip::from(lhs)
        .and(rhs)
        .fold(0., |acc, &l, &r| acc + (l - r) * (l - r))
}

#[cfg(test)]
pub(crate) const F16_EPSILON: f32 = 4.88e-04;

#[cfg(test)]
pub(crate) fn are_similar<D: Dimension>(
    result: &Array<f32, D>,
    expected: &Array<f32, D>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !result.abs_diff_eq(expected, F16_EPSILON) {
        return Err(format!("Result: {} | Expected: {}", result, expected).into());
    }

    Ok(())
}
