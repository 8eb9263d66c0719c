use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::kernel::Kernel;
use crate::raster::Raster;

/// Boundary pattern codes and their bank orientation in radians, version 1.
const PATTERN_CODES: [u32; 44] = [
    1, 4, 16, 64, 129, 3, 6, 12, 24, 48, 96, 192, 131, 7, 14, 28, 56, 112, 224, 193,
    135, 15, 30, 60, 120, 240, 225, 195, 143, 31, 62, 124, 248, 241, 227, 199, 159,
    63, 126, 252, 249, 243, 231, 207,
];

const PATTERN_ANGLES: [f64; 44] = [
    4.712389, 0.000000, 1.570796, 3.141593, 4.467410, 4.957368, 6.038207, 0.244979,
    1.325818, 1.815775, 2.896614, 3.386571, 4.712389, 5.497787, 0.000000, 0.785398,
    1.570796, 2.356194, 3.141593, 3.926991, 5.092895, 5.902679, 0.380506, 1.190290,
    1.951303, 2.761086, 3.522099, 4.331883, 5.497787, 0.000000, 0.785398, 1.570796,
    2.356194, 3.141593, 3.926991, 4.712389, 5.695183, 0.588003, 0.982794, 2.158799,
    2.553590, 3.729595, 4.124386, 5.300392,
];

lazy_static! {
    static ref DEFAULT_ASPECTS: HashMap<u32, f64> = PATTERN_CODES.iter()
        .copied()
        .zip(PATTERN_ANGLES.iter().copied())
        .collect();

    /// Weights of the eight neighbours plus 256 for the centre, so every
    /// 3x3 water pattern has a unique code.
    static ref DIRECTION_KERNEL: Kernel = Kernel::fixed([
        [128.0, 1.0, 2.0],
        [64.0, 256.0, 4.0],
        [32.0, 16.0, 8.0],
    ]);

    static ref DERIVATIVE_KERNEL: Kernel = Kernel::fixed([
        [0.5, 0.5, 0.5],
        [0.5, -1.0, 0.5],
        [0.5, 0.5, 0.5],
    ]);
}

/// Lookup from 8-neighbour pattern code to bank orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectTable {
    pub version: u32,
    angles: HashMap<u32, f64>,
}

impl Default for AspectTable {
    fn default() -> Self {
        AspectTable { version: 1, angles: DEFAULT_ASPECTS.clone() }
    }
}

impl AspectTable {
    pub fn angle(&self, code: u32) -> Option<f64> {
        self.angles.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}

/// Bank pixels of a river mask and their per-pixel attributes.
///
/// `aspect`, `curvature` and `length` are NaN off the bank.
#[derive(Debug, Clone)]
pub struct BankFeatures {
    pub banks: Raster<u8>,
    pub aspect: Raster<f64>,
    pub curvature: Raster<f64>,
    pub length: Raster<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BankFeatureExtractor {
    pub table: AspectTable,
}

impl BankFeatureExtractor {
    pub fn new(table: AspectTable) -> Self {
        BankFeatureExtractor { table }
    }

    pub fn extract(&self, river: &Raster<u8>) -> BankFeatures {
        let codes = DIRECTION_KERNEL.convolve(river);
        let aspect = codes.map(|c| {
            self.table.angle(c.round() as u32).unwrap_or(f64::NAN)
        });
        let banks = aspect.map(|a| !a.is_nan() as u8);

        let cos = aspect.map(f64::cos);
        let sin = aspect.map(f64::sin);
        let dx = DERIVATIVE_KERNEL.convolve_masked(&cos, &banks);
        let dy = DERIVATIVE_KERNEL.convolve_masked(&sin, &banks);
        let mut curvature = dx.clone();
        for (c, &y) in curvature.data.iter_mut().zip(dy.data.iter()) {
            if !c.is_nan() {
                *c = y.atan2(*c);
            }
        }

        let length = Kernel::euclidean(1)
            .convolve(&banks)
            .from_mask(&banks, f64::NAN);

        log::debug!("{} bank pixels", banks.count_set());
        BankFeatures { banks, aspect, curvature, length }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&str]) -> Raster<u8> {
        let data = rows.iter()
            .flat_map(|r| r.chars().map(|c| (c == '#') as u8))
            .collect();
        Raster::from_vec(rows[0].len(), rows.len(), data).unwrap()
    }

    #[test]
    fn test_table_has_44_patterns() {
        let table = AspectTable::default();
        assert_eq!(table.len(), 44);
        assert_eq!(table.angle(0), None);
        assert_eq!(table.angle(511), None);
        assert_eq!(table.angle(16), Some(1.570796));
    }

    #[test]
    fn test_single_water_pixel_has_four_banks() {
        let river = grid(&[".....", ".....", "..#..", ".....", "....."]);
        let f = BankFeatureExtractor::default().extract(&river);
        assert_eq!(f.banks.count_set(), 4);
        // above the water pixel: pattern code 16
        assert!(f.banks.is_set(7));
        assert_eq!(f.aspect.data[7], 1.570796);
        // diagonal neighbours only touch water at a corner
        assert!(!f.banks.is_set(6));
        // banks are land
        assert!(!f.banks.is_set(12));
        assert!(f.aspect.data[12].is_nan());
    }

    #[test]
    fn test_straight_bank_has_zero_curvature() {
        let river = grid(&["######", "######", "......", "......"]);
        let f = BankFeatureExtractor::default().extract(&river);
        assert_eq!(f.banks.data[12..18], [1, 1, 1, 1, 1, 1]);
        assert_eq!(f.banks.count_set(), 6);
        assert_eq!(f.aspect.data[14], 4.712389);
        assert!(f.curvature.data[14].abs() < 1e-12);
        assert!(f.curvature.data[15].abs() < 1e-12);
        assert!(f.curvature.data[0].is_nan());
    }

    #[test]
    fn test_corner_curvature_points_along_the_turn() {
        let river = grid(&[".....", ".....", "..#..", ".....", "....."]);
        let f = BankFeatureExtractor::default().extract(&river);
        // the bank above bends round both sides: x' ~ 0, y' = -1
        let c = f.curvature.data[7];
        assert!((c + std::f64::consts::FRAC_PI_2).abs() < 1e-5, "{c}");
        // the bank below is the mirror image
        let c = f.curvature.data[17];
        assert!((c - std::f64::consts::FRAC_PI_2).abs() < 1e-5, "{c}");
    }

    #[test]
    fn test_bank_length_counts_cross_neighbours() {
        let river = grid(&["######", "######", "......", "......"]);
        let f = BankFeatureExtractor::default().extract(&river);
        assert_eq!(f.length.data[12], 2.0);
        assert_eq!(f.length.data[14], 3.0);
        assert!(f.length.data[20].is_nan());
    }
}
