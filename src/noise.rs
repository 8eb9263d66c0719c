//! Synthetic classification noise.
//!
//! Omission (water read as land) and commission (land read as water) rates
//! depend on how far a pixel lies from the water/land boundary. Every time
//! step is replicated into several perturbed observations that vote on the
//! noisy state of the step, and the steps vote on the noisy window mask.

use error_stack::Report;
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::cost_distance::cost_distance;
use crate::error::{MigrationError, Result};
use crate::imagery::{ImageryKind, Observation};
use crate::raster::Raster;

pub const N_BINS: usize = 10;

/// Error rates per distance bin, bin 1 first.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRates {
    pub omission: [f64; N_BINS],
    pub commission: [f64; N_BINS],
}

lazy_static! {
    pub static ref CATEGORICAL_ERRORS: ErrorRates = ErrorRates {
        omission: [0.55, 0.3, 0.15, 0.1, 0.08, 0.05, 0.03, 0.02, 0.01, 0.0],
        commission: [0.15, 0.05, 0.3, 0.02, 0.01, 0.005, 0.0, 0.0, 0.0, 0.0],
    };

    pub static ref PERCENT_ERRORS: ErrorRates = ErrorRates {
        omission: [0.4, 0.2, 0.1, 0.08, 0.05, 0.03, 0.02, 0.02, 0.01, 0.0],
        commission: [0.2, 0.1, 0.5, 0.03, 0.02, 0.01, 0.005, 0.0, 0.0, 0.0],
    };
}

impl ErrorRates {
    pub fn for_kind(kind: ImageryKind) -> ErrorRates {
        match kind {
            ImageryKind::Categorical => CATEGORICAL_ERRORS.clone(),
            ImageryKind::PercentWater => PERCENT_ERRORS.clone(),
        }
    }

    pub fn none() -> ErrorRates {
        ErrorRates { omission: [0.0; N_BINS], commission: [0.0; N_BINS] }
    }
}

#[derive(Debug, Clone)]
pub struct NoiseInjector {
    pub rates: ErrorRates,
    /// Distances beyond this fall in the last bin.
    pub max_distance: f64,
    pub bin_width: f64,
    pub observations_per_step: usize,
}

impl NoiseInjector {
    pub fn new(rates: ErrorRates) -> Self {
        NoiseInjector {
            rates,
            max_distance: 90.0,
            bin_width: 10.0,
            observations_per_step: 13,
        }
    }

    /// Distance bin in `1..=N_BINS`; NaN (unreachable or capped) is the last bin.
    pub fn bin(&self, distance: f64) -> usize {
        if distance.is_nan() {
            return N_BINS;
        }
        ((distance / self.bin_width).floor() as usize + 1).clamp(1, N_BINS)
    }

    /// Per-pixel flip thresholds of one binarized step: omission rate on
    /// water pixels, commission rate on land pixels.
    fn thresholds(&self, water: &Raster<u8>, cell_size: f64) -> Vec<f64> {
        let land = water.not();
        let land_px: Vec<usize> = (0..land.len()).filter(|&i| land.is_set(i)).collect();
        let water_px: Vec<usize> = (0..water.len()).filter(|&i| water.is_set(i)).collect();

        let (to_land, to_water) = rayon::join(
            || cost_distance(water, &land_px, cell_size, self.max_distance),
            || cost_distance(&land, &water_px, cell_size, self.max_distance),
        );

        (0..water.len())
            .map(|i| {
                if water.is_set(i) {
                    self.rates.omission[self.bin(to_land.data[i]) - 1]
                } else {
                    self.rates.commission[self.bin(to_water.data[i]) - 1]
                }
            })
            .collect()
    }

    /// Majority of the perturbed observations of one binarized step.
    ///
    /// Observation `k` draws from a generator seeded with `timestamp_ms + k`,
    /// so the result depends only on the inputs.
    pub fn perturb_step(&self, water: &Raster<u8>, timestamp_ms: i64, cell_size: f64) -> Raster<u8> {
        let thresholds = self.thresholds(water, cell_size);
        let n = water.len();

        let votes = (0..self.observations_per_step)
            .into_par_iter()
            .map(|k| {
                let seed = timestamp_ms.wrapping_add(k as i64) as u64;
                let mut rng = StdRng::seed_from_u64(seed);
                (0..n)
                    .map(|i| {
                        let draw: f64 = rng.gen();
                        let t = thresholds[i];
                        if water.is_set(i) {
                            (draw > t) as u32
                        } else {
                            (draw >= 1.0 - t) as u32
                        }
                    })
                    .collect::<Vec<u32>>()
            })
            .reduce(|| vec![0u32; n], |mut acc, v| {
                acc.iter_mut().zip(v).for_each(|(a, b)| *a += b);
                acc
            });

        let mut out = water.empty_clone();
        out.data = majority(&votes, self.observations_per_step);
        out
    }

    /// Noisy water mask of a time window; pixels outside `region` are land.
    pub fn inject(
        &self,
        kind: ImageryKind,
        observations: &[Observation],
        region: &Raster<u8>,
        cell_size: f64,
    ) -> Result<Raster<u8>> {
        if observations.is_empty() {
            return Err(Report::new(MigrationError::InsufficientData)
                .attach_printable("no imagery to perturb"));
        }

        let mut votes = vec![0u32; region.len()];
        for obs in observations {
            region.ensure_same_geometry(&obs.raster)
                .map_err(|e| e.attach_printable(format!("observation of {}", obs.year)))?;
            let water = obs.raster.map(|v| kind.is_water(v) as u8);
            let step = self.perturb_step(&water, obs.timestamp_ms, cell_size);
            for (v, &s) in votes.iter_mut().zip(step.data.iter()) {
                *v += s as u32;
            }
        }

        let mut noisy = region.empty_clone();
        noisy.data = majority(&votes, observations.len());
        for (v, &inside) in noisy.data.iter_mut().zip(region.data.iter()) {
            *v &= (inside != 0) as u8;
        }
        log::debug!("noisy watermask: {} water pixels", noisy.count_set());
        Ok(noisy)
    }
}

/// Set where at least half of `n` voters agreed.
fn majority(votes: &[u32], n: usize) -> Vec<u8> {
    votes.iter().map(|&v| (2 * v as usize >= n) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(width: usize, height: usize, rows: std::ops::Range<usize>) -> Raster<f64> {
        let mut r = Raster::filled(width, height, 1.0f64)
            .with_geometry([0.0, 30.0, 0.0, 30.0 * height as f64, 0.0, -30.0], "");
        for y in rows {
            for x in 0..width {
                r.set(x, y, 3.0);
            }
        }
        r
    }

    #[test]
    fn test_bins() {
        let noise = NoiseInjector::new(ErrorRates::none());
        assert_eq!(noise.bin(0.0), 1);
        assert_eq!(noise.bin(9.99), 1);
        assert_eq!(noise.bin(30.0), 4);
        assert_eq!(noise.bin(90.0), 10);
        assert_eq!(noise.bin(500.0), 10);
        assert_eq!(noise.bin(f64::NAN), 10);
    }

    #[test]
    fn test_zero_rates_keep_the_mask() {
        let raster = channel(12, 10, 3..6);
        let region = raster.like(1u8);
        let obs = vec![Observation::yearly(2001, raster.clone())];
        let noise = NoiseInjector::new(ErrorRates::none());
        let noisy = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        let clean = raster.map(|v| (v >= 2.0) as u8);
        assert_eq!(noisy, clean);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let raster = channel(24, 24, 8..14);
        let region = raster.like(1u8);
        let obs: Vec<Observation> = (2001..2004)
            .map(|y| Observation::yearly(y, raster.clone()))
            .collect();
        let noise = NoiseInjector::new(ErrorRates::for_kind(ImageryKind::Categorical));
        let a = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        let b = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_certain_omission_removes_water() {
        let raster = channel(10, 10, 4..6);
        let region = raster.like(1u8);
        let mut rates = ErrorRates::none();
        rates.omission = [1.0; N_BINS];
        let noise = NoiseInjector::new(rates);
        let obs = vec![Observation::yearly(2001, raster)];
        let noisy = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        assert_eq!(noisy.count_set(), 0);
    }

    #[test]
    fn test_certain_commission_floods_the_adjacent_band() {
        let raster = channel(10, 10, 4..6);
        let region = raster.like(1u8);
        let mut rates = ErrorRates::none();
        // land one cell (30 m) from the water falls in bin 4
        rates.commission[3] = 1.0;
        let noise = NoiseInjector::new(rates);
        let obs = vec![Observation::yearly(2001, raster)];
        let noisy = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        assert_eq!(noisy.count_set(), 40);
        for x in 0..10 {
            assert_eq!(noisy.get(x, 3), 1);
            assert_eq!(noisy.get(x, 6), 1);
            assert_eq!(noisy.get(x, 2), 0);
            assert_eq!(noisy.get(x, 7), 0);
        }
    }

    #[test]
    fn test_percent_water_far_from_the_shore_is_stable() {
        let mut raster = Raster::filled(30, 30, 0.0f64)
            .with_geometry([0.0, 30.0, 0.0, 900.0, 0.0, -30.0], "");
        for y in 10..20 {
            for x in 0..30 {
                raster.set(x, y, 100.0);
            }
        }
        let region = raster.like(1u8);
        let obs: Vec<Observation> = (2001..2004)
            .map(|y| Observation::yearly(y, raster.clone()))
            .collect();
        let rates = ErrorRates::for_kind(ImageryKind::PercentWater);
        assert_eq!(rates, *PERCENT_ERRORS);
        assert_eq!(rates.commission[2], 0.5);
        let noise = NoiseInjector::new(rates);
        let noisy = noise.inject(ImageryKind::PercentWater, &obs, &region, 30.0).unwrap();
        assert_eq!(noisy, noise.inject(ImageryKind::PercentWater, &obs, &region, 30.0).unwrap());

        // three or more cells from the shore both rates are 0
        for x in 0..30 {
            for y in (0..8).chain(22..30) {
                assert_eq!(noisy.get(x, y), 0, "({x}, {y})");
            }
            for y in 12..18 {
                assert_eq!(noisy.get(x, y), 1, "({x}, {y})");
            }
        }
    }

    #[test]
    fn test_outside_region_stays_land() {
        let raster = channel(6, 6, 0..6);
        let mut region = raster.like(1u8);
        region.set(0, 0, 0);
        let obs = vec![Observation::yearly(2001, raster)];
        let noise = NoiseInjector::new(ErrorRates::none());
        let noisy = noise.inject(ImageryKind::Categorical, &obs, &region, 30.0).unwrap();
        assert_eq!(noisy.get(0, 0), 0);
        assert_eq!(noisy.count_set(), 35);
    }

    #[test]
    fn test_empty_window_is_insufficient_data() {
        let region = Raster::filled(3, 3, 1u8);
        let noise = NoiseInjector::new(ErrorRates::none());
        let err = noise.inject(ImageryKind::PercentWater, &[], &region, 30.0).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InsufficientData);
    }
}
