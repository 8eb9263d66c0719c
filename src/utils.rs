/// Index of the largest value, first occurrence on ties.
pub fn argmax<T: PartialOrd + Copy>(data: &[T]) -> Option<usize> {
    data.iter().enumerate().fold(None, |acc, (index, &value)| {
        match acc {
            None => Some((index, value)),
            Some((_, max_val)) if value > max_val => Some((index, value)),
            _ => acc
        }
    }).map(|(index, _)| index)
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Median of a slice, averaging the middle pair for even lengths.
pub fn median(data: &mut [f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = data.len();
    if n % 2 == 0 {
        Some((data[n / 2 - 1] + data[n / 2]) / 2.0)
    } else {
        Some(data[n / 2])
    }
}
