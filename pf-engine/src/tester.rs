//! Compare computed tensors against reference values, with a small tolerance for float rounding.

use itertools::{enumerate, zip_eq};
use ndarray::{ArrayD, Dimension};

const TOLERANCE_ABS_DIFF: f64 = 0.001;
const TOLERANCE_REL_DIFF: f64 = 0.001;
const MAX_LOGGED_ERRORS: usize = 8;

#[derive(Debug, Clone)]
pub struct Match {
    pub diff_per_tensor: Vec<Difference>,
}

#[derive(Debug, Copy, Clone)]
pub struct Difference {
    pub max_rel_diff: f64,
    pub max_abs_diff: f64,
}

#[derive(Debug, Clone)]
pub struct Mismatch {
    pub error_count: u64,
    pub total_count: u64,
    pub first_errors: Vec<ValueError>,
}

#[derive(Debug, Clone)]
pub struct ValueError {
    pub tensor: usize,
    pub indices: Vec<usize>,
    pub expected_value: f32,
    pub actual_value: f32,
    pub more_omitted: bool,
}

#[derive(Default, Debug, Clone)]
struct Counts {
    total_element_count: u64,
    total_error_count: u64,
}

/// Panic with a readable report if any of the tensors differ.
pub fn assert_tensors_match(expected: &[ArrayD<f32>], actual: &[ArrayD<f32>], print_match: bool) {
    match check_tensors_match(expected, actual) {
        Ok(Match { diff_per_tensor }) => {
            if print_match {
                for (i, diff) in enumerate(diff_per_tensor) {
                    println!(
                        "Tensor {} with shape {:?} matched, max diff: abs {}, rel {}",
                        i,
                        actual[i].shape(),
                        diff.max_abs_diff,
                        diff.max_rel_diff
                    );
                }
            }
        }
        Err(Mismatch {
            error_count,
            total_count,
            first_errors,
        }) => {
            eprintln!("Mismatch in {}/{} values:", error_count, total_count);

            for error in &first_errors {
                let ValueError {
                    tensor,
                    ref indices,
                    expected_value,
                    actual_value,
                    more_omitted,
                } = *error;

                eprintln!(
                    "  Wrong value {:?}, expected {:?} at indices {:?} in tensor {} (shape {:?})",
                    actual_value,
                    expected_value,
                    indices,
                    tensor,
                    expected[tensor].shape()
                );

                if more_omitted {
                    eprintln!("  ...");
                }
            }

            panic!("Tensor mismatch");
        }
    }
}

pub fn check_tensors_match(expected: &[ArrayD<f32>], actual: &[ArrayD<f32>]) -> Result<Match, Mismatch> {
    assert_eq!(expected.len(), actual.len(), "Wrong number of tensors");

    let mut counts = Counts::default();
    let mut diff_per_tensor = vec![];
    let mut first_errors = vec![];

    for (i, (expected, actual)) in zip_eq(expected, actual).enumerate() {
        let diff = check_tensor_match(i, expected, actual, &mut counts, &mut first_errors);
        diff_per_tensor.push(diff);
    }

    if counts.total_error_count == 0 {
        Ok(Match { diff_per_tensor })
    } else {
        Err(Mismatch {
            error_count: counts.total_error_count,
            total_count: counts.total_element_count,
            first_errors,
        })
    }
}

fn check_tensor_match(
    i: usize,
    expected: &ArrayD<f32>,
    actual: &ArrayD<f32>,
    counts: &mut Counts,
    first_errors: &mut Vec<ValueError>,
) -> Difference {
    assert_eq!(expected.shape(), actual.shape(), "Wrong shape for tensor {}", i);

    let mut max_abs_diff = 0.0;
    let mut max_rel_diff = 0.0;
    let mut current_error_count = 0;

    for ((indices, &expected_value), &value) in zip_eq(expected.indexed_iter(), actual.iter()) {
        let (e, v) = (expected_value as f64, value as f64);
        let (abs_diff, rel_diff) = if e == v || e.is_nan() || v.is_nan() {
            (0.0, 0.0)
        } else {
            let abs_diff = (e - v).abs();
            (abs_diff, abs_diff / e.abs())
        };

        max_abs_diff = f64::max(max_abs_diff, abs_diff);
        max_rel_diff = f64::max(max_rel_diff, rel_diff);
        counts.total_element_count += 1;

        let exceeds_tolerance = abs_diff >= TOLERANCE_ABS_DIFF && rel_diff >= TOLERANCE_REL_DIFF;
        let nan_mismatch = e.is_nan() != v.is_nan();

        if exceeds_tolerance || nan_mismatch {
            counts.total_error_count += 1;
            current_error_count += 1;

            if current_error_count < MAX_LOGGED_ERRORS {
                first_errors.push(ValueError {
                    tensor: i,
                    indices: indices.slice().to_vec(),
                    expected_value,
                    actual_value: value,
                    more_omitted: false,
                });
            } else if let Some(last) = first_errors.last_mut() {
                last.more_omitted = true;
            }
        }
    }

    Difference {
        max_rel_diff,
        max_abs_diff,
    }
}
