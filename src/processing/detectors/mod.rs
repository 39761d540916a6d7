pub mod spike;

pub use spike::{Detection, SegmentReport, SpikeDetector, SpikeDetectorConfig, SpikeTimestampSet};

// EDGE COMPONENT --------------------------------------------------------------

/// Indices `i + 1` where `values[i] < values[i + 1]`. With a `leading` value,
/// index 0 also counts when the first value is above it, as if the series
/// were preceded by `leading`.
pub fn rising_edges<T: PartialOrd>(values: &[T], leading: Option<&T>) -> Vec<usize> {
    let mut edges = Vec::new();
    if let (Some(first), Some(leading)) = (values.first(), leading) {
        if first > leading {
            edges.push(0);
        }
    }
    edges.extend(
        values
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] < pair[1])
            .map(|(i, _)| i + 1),
    );
    edges
}

// STATISTICS COMPONENT --------------------------------------------------------

/// Mean of the non-NaN values; NaN when there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Median, averaging the two middle values for even lengths.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_without_leading_value() {
        assert_eq!(rising_edges(&[0u16, 0, 1, 1, 0, 1], None), vec![2, 5]);
        assert_eq!(rising_edges(&[1u16, 1, 1], None), Vec::<usize>::new());
        assert_eq!(rising_edges::<u16>(&[], None), Vec::<usize>::new());
    }

    #[test]
    fn leading_value_counts_first_sample() {
        let mask = [true, true, false, true, false, false, true];
        assert_eq!(rising_edges(&mask, Some(&false)), vec![0, 3, 6]);
        assert_eq!(rising_edges(&mask[1..], Some(&false)), vec![0, 2, 5]);
        assert_eq!(rising_edges(&mask[2..], Some(&false)), vec![1, 4]);
    }

    #[test]
    fn median_of_even_and_odd_lengths() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn mean_skips_nan() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }
}
