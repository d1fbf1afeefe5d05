pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// Sample standard deviation (n - 1 denominator). A single value has no spread.
pub fn std_dev(data: &[f64]) -> Option<f64> {
    match (mean(data), data.len()) {
        (Some(_), 1) => Some(0.0),
        (Some(data_mean), count) if count > 1 => {
            let variance = data
                .iter()
                .map(|value| {
                    let diff = data_mean - *value;

                    diff * diff
                })
                .sum::<f64>()
                / (count - 1) as f64;

            Some(variance.sqrt())
        }
        _ => None,
    }
}

/// Nearest-rank percentile over an ascending slice; `pct` is in 0..=100.
pub fn percentile(sorted: &[i64], pct: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let rank = rank.clamp(1, sorted.len());

    Some(sorted[rank - 1])
}

/// Exact incremental mean: the average of `old_count` samples plus one more.
pub fn running_mean(old_avg: i64, old_count: i64, sample: i64) -> i64 {
    let old_count = old_count.max(0);
    let total = old_avg as f64 * old_count as f64 + sample as f64;

    (total / (old_count + 1) as f64).round() as i64
}
