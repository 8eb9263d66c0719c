/// Running weighted sum of unit vectors.
///
/// Weights that are zero, negative or NaN, and NaN angles, are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CircularAccumulator {
    sum_cos: f64,
    sum_sin: f64,
    sum_weights: f64,
}

impl CircularAccumulator {
    pub fn push(&mut self, angle: f64, weight: f64) {
        if angle.is_nan() || !(weight > 0.0) {
            return;
        }
        self.sum_cos += weight * angle.cos();
        self.sum_sin += weight * angle.sin();
        self.sum_weights += weight;
    }

    pub fn merge(self, other: CircularAccumulator) -> CircularAccumulator {
        CircularAccumulator {
            sum_cos: self.sum_cos + other.sum_cos,
            sum_sin: self.sum_sin + other.sum_sin,
            sum_weights: self.sum_weights + other.sum_weights,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sum_weights == 0.0
    }

    /// Mean direction in radians, `(-pi, pi]`, and mean resultant length in
    /// `[0, 1]`. `None` without any contributing vector.
    pub fn finish(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        let mx = self.sum_cos / self.sum_weights;
        let my = self.sum_sin / self.sum_weights;
        Some((my.atan2(mx), (mx * mx + my * my).sqrt()))
    }
}
