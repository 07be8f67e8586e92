//! Small helpers over rows of probability and value tables.

/// Index of the first maximum, matching the usual `argmax` tie rule.
///
/// Returns `None` for an empty row. NaN entries are never selected unless
/// every entry is NaN, in which case the first index is returned.
pub fn argmax<'a, I>(row: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in row.into_iter().enumerate() {
        match best {
            None => best = Some((i, v)),
            Some((_, b)) if v > b || (b.is_nan() && !v.is_nan()) => best = Some((i, v)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// Largest entry of a row (`-inf` for an empty row).
pub fn max_value<'a, I>(row: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    row.into_iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Draw an index from a categorical distribution by inverting its CDF at `u ∈ [0, 1)`.
///
/// Rounding in the cumulative sum can leave `u` just past the final bucket;
/// the last index with positive mass is returned then. `None` when no entry
/// carries mass.
pub fn sample_index<'a, I>(probs: I, u: f64) -> Option<usize>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (i, &p) in probs.into_iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        cumulative += p;
        last_positive = Some(i);
        if u < cumulative {
            return Some(i);
        }
    }
    last_positive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_first_of_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[-1.0]), Some(0));
        assert_eq!(argmax(&[] as &[f64]), None);
    }

    #[test]
    fn argmax_skips_nan() {
        assert_eq!(argmax(&[f64::NAN, 0.5, 0.2]), Some(1));
    }

    #[test]
    fn max_value_basic() {
        assert_eq!(max_value(&[0.2, 0.9, -4.0]), 0.9);
        assert_eq!(max_value(&[] as &[f64]), f64::NEG_INFINITY);
    }

    #[test]
    fn sample_index_inverts_cdf() {
        let probs = [0.25, 0.0, 0.75];
        assert_eq!(sample_index(&probs, 0.0), Some(0));
        assert_eq!(sample_index(&probs, 0.2499), Some(0));
        assert_eq!(sample_index(&probs, 0.25), Some(2));
        assert_eq!(sample_index(&probs, 0.999_999), Some(2));
    }

    #[test]
    fn sample_index_rounding_falls_back_to_last_positive() {
        let probs = [0.3, 0.3, 0.3, 0.0];
        assert_eq!(sample_index(&probs, 0.95), Some(2));
        assert_eq!(sample_index(&[0.0, 0.0], 0.5), None);
    }
}
