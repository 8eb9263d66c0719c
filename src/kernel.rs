use rayon::prelude::*;

use crate::raster::{Pixel, Raster};

/// Square neighbourhood weights, row 0 is the row above the centre.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub radius: usize,
    pub weights: Vec<f64>,
}

impl Kernel {
    /// Fixed weights given row by row; the kernel must be square with odd side.
    pub fn fixed<const N: usize>(rows: [[f64; N]; N]) -> Kernel {
        assert!(N % 2 == 1, "kernel side must be odd, got {}", N);
        Kernel {
            radius: N / 2,
            weights: rows.iter().flat_map(|r| r.iter().copied()).collect(),
        }
    }

    /// Unit weights for every offset within `radius` pixels (Euclidean).
    pub fn euclidean(radius: usize) -> Kernel {
        let side = 2 * radius + 1;
        let r2 = (radius * radius) as isize;
        let mut weights = Vec::with_capacity(side * side);
        for dy in -(radius as isize)..=radius as isize {
            for dx in -(radius as isize)..=radius as isize {
                weights.push(if dx * dx + dy * dy <= r2 { 1.0 } else { 0.0 });
            }
        }
        Kernel { radius, weights }
    }

    pub fn side(&self) -> usize {
        2 * self.radius + 1
    }

    /// Non-zero taps as (dx, dy, weight).
    pub fn taps(&self) -> Vec<(isize, isize, f64)> {
        let side = self.side();
        let r = self.radius as isize;
        self.weights.iter()
            .enumerate()
            .filter(|(_, &w)| w != 0.0)
            .map(|(i, &w)| ((i % side) as isize - r, (i / side) as isize - r, w))
            .collect()
    }

    /// Weighted neighbourhood sum; cells outside the grid count as 0.
    pub fn convolve<T: Pixel>(&self, raster: &Raster<T>) -> Raster<f64> {
        let taps = self.taps();
        let mut out = raster.like(0.0f64);
        out.data.par_chunks_mut(raster.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, o) in row.iter_mut().enumerate() {
                    *o = taps.iter()
                        .filter_map(|&(dx, dy, w)| raster.offset(x, y, dx, dy).map(|n| (n, w)))
                        .map(|(n, w)| raster.data[n].to_f64() * w)
                        .sum();
                }
            });
        out
    }

    /// Weighted sum that skips NaN inputs, evaluated only where `at` is set.
    /// Cells outside `at` are NaN.
    pub fn convolve_masked(&self, raster: &Raster<f64>, at: &Raster<u8>) -> Raster<f64> {
        let taps = self.taps();
        let mut out = raster.like(f64::NAN);
        out.data.par_chunks_mut(raster.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, o) in row.iter_mut().enumerate() {
                    if !at.is_set(y * raster.width + x) {
                        continue;
                    }
                    *o = taps.iter()
                        .filter_map(|&(dx, dy, w)| raster.offset(x, y, dx, dy).map(|n| (n, w)))
                        .map(|(n, w)| (raster.data[n], w))
                        .filter(|(v, _)| !v.is_nan())
                        .map(|(v, w)| v * w)
                        .sum();
                }
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_unit_radius_is_cross() {
        let k = Kernel::euclidean(1);
        assert_eq!(k.weights, vec![0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_taps_orientation() {
        let k = Kernel::fixed([[0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(k.taps(), vec![(0, -1, 1.0)]);
    }

    #[test]
    fn test_convolve_reads_row_above() {
        // Only the cell above the centre carries weight.
        let k = Kernel::fixed([[0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        let r = Raster::from_vec(1, 3, vec![5.0, 6.0, 7.0]).unwrap();
        let out = k.convolve(&r);
        assert_eq!(out.data, vec![0.0, 5.0, 6.0]);
    }

    #[test]
    fn test_convolve_masked_skips_nan() {
        let k = Kernel::euclidean(1);
        let r = Raster::from_vec(3, 1, vec![1.0, f64::NAN, 2.0]).unwrap();
        let at = Raster::from_vec(3, 1, vec![1u8, 0, 1]).unwrap();
        let out = k.convolve_masked(&r, &at);
        assert_eq!(out.data[0], 1.0);
        assert!(out.data[1].is_nan());
        assert_eq!(out.data[2], 2.0);
    }
}
