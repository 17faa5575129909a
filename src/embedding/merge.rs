// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length-weighted merge of per-chunk embedding vectors.

use crate::errors::CoreError;

/// Combines chunk embeddings into one document vector.
///
/// Component `i` of the result is `Σ v[k][i] * w[k] / Σ w[k]`, summed in
/// chunk order and divided once at the end.
///
/// When `all_split` is false the document was never split, and the first
/// vector is returned as-is without looking at the weights.
pub fn merge_weighted(
    vectors: &[Vec<f32>],
    weights: &[f32],
    all_split: bool,
) -> Result<Vec<f32>, CoreError> {
    let first = vectors
        .first()
        .ok_or_else(|| CoreError::InvalidInput("no vectors to merge".to_string()))?;

    if !all_split {
        return Ok(first.clone());
    }

    if vectors.len() != weights.len() {
        return Err(CoreError::InvalidInput(format!(
            "{} vectors but {} weights",
            vectors.len(),
            weights.len()
        )));
    }

    let dim = first.len();
    if let Some((idx, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(CoreError::InvalidInput(format!(
            "vector {} has dimension {}, expected {}",
            idx,
            v.len(),
            dim
        )));
    }

    // `!(w > 0.0)` also catches NaN
    if let Some(w) = weights.iter().find(|w| !(**w > 0.0)) {
        return Err(CoreError::InvalidInput(format!(
            "weights must be positive, got {}",
            w
        )));
    }

    let mut merged = vec![0.0f32; dim];
    let mut total = 0.0f32;
    for (vector, &weight) in vectors.iter().zip(weights) {
        for (acc, value) in merged.iter_mut().zip(vector) {
            *acc += value * weight;
        }
        total += weight;
    }
    for value in merged.iter_mut() {
        *value /= total;
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_average() {
        let merged =
            merge_weighted(&[vec![1.0, 2.0], vec![3.0, 4.0]], &[1.0, 3.0], true).unwrap();
        assert_eq!(merged, vec![2.5, 3.5]);
    }

    #[test]
    fn test_unsplit_returns_first_vector() {
        let merged = merge_weighted(&[vec![9.0, 9.0], vec![1.0, 1.0]], &[1.0, 100.0], false)
            .unwrap();
        assert_eq!(merged, vec![9.0, 9.0]);

        // weights are not consulted on the short-circuit path
        let merged = merge_weighted(&[vec![9.0, 9.0]], &[], false).unwrap();
        assert_eq!(merged, vec![9.0, 9.0]);
    }

    #[test]
    fn test_count_mismatch_is_invalid_input() {
        let err = merge_weighted(&[vec![1.0], vec![2.0]], &[1.0], true).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_vectors_is_invalid_input() {
        assert!(matches!(
            merge_weighted(&[], &[], true),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            merge_weighted(&[], &[], false),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch_is_invalid_input() {
        let err = merge_weighted(&[vec![1.0, 2.0], vec![3.0]], &[1.0, 1.0], true).unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn test_non_positive_weights_rejected() {
        assert!(merge_weighted(&[vec![1.0]], &[0.0], true).is_err());
        assert!(merge_weighted(&[vec![1.0]], &[-2.0], true).is_err());
        assert!(merge_weighted(&[vec![1.0]], &[f32::NAN], true).is_err());
    }

    #[test]
    fn test_single_vector_is_identity() {
        let merged = merge_weighted(&[vec![0.25, -4.0, 8.0]], &[7.0], true).unwrap();
        assert_eq!(merged, vec![0.25, -4.0, 8.0]);
    }

    #[test]
    fn test_nan_components_propagate() {
        let merged =
            merge_weighted(&[vec![f32::NAN, 1.0], vec![1.0, 1.0]], &[1.0, 1.0], true).unwrap();
        assert!(merged[0].is_nan());
        assert_eq!(merged[1], 1.0);
    }
}
