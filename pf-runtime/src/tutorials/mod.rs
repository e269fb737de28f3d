use itertools::Itertools;
use ndarray::ArrayD;

use pf_engine::tester::check_tensors_match;

use crate::{TutorialError, TutorialResult};

pub mod format_propagation;
pub mod get_started;
pub mod int8_matmul;

/// Compare an engine result against a host reference, reporting the first wrong value.
pub(crate) fn check_against_reference(expected: &ArrayD<f32>, actual: &ArrayD<f32>) -> TutorialResult<()> {
    match check_tensors_match(&[expected.clone()], &[actual.clone()]) {
        Ok(_) => Ok(()),
        Err(mismatch) => {
            let first = mismatch
                .first_errors
                .into_iter()
                .next()
                .map(|e| TutorialError::Accuracy {
                    index: e.indices,
                    expected: e.expected_value,
                    actual: e.actual_value,
                });
            Err(first.unwrap_or_else(|| TutorialError::Accuracy {
                index: vec![],
                expected: f32::NAN,
                actual: f32::NAN,
            }))
        }
    }
}

/// Uniform values in `[0, 1)`, the way the tutorials fill their inputs.
pub(crate) fn uniform_vec(len: usize, rng: &mut impl rand::Rng) -> Vec<f32> {
    (0..len).map(|_| rng.gen::<f32>()).collect_vec()
}
