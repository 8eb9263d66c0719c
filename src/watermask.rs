use error_stack::Report;
use rayon::prelude::*;

use crate::error::{MigrationError, Result};
use crate::imagery::{ImageryKind, ImagerySource, Observation};
use crate::raster::Raster;
use crate::utils::{mean, median};

/// Reduced water/land state of one time window.
#[derive(Debug, Clone)]
pub struct Watermask {
    pub water: Raster<u8>,
    /// Pixels lacking a valid observation in most time steps.
    pub sparse: Raster<u8>,
    pub n_steps: usize,
}

impl Watermask {
    /// No-data mask: sparse pixels that are not part of the river.
    pub fn no_data(&self, river: &Raster<u8>) -> Result<Raster<u8>> {
        self.sparse.and(&river.not())
    }
}

/// Reduces a window of classified rasters to one water mask.
///
/// Categorical sources use the median of observed codes (water if ≥ 2);
/// percent sources use the mean with missing values as 0 (water if ≥ 50).
#[derive(Debug, Clone)]
pub struct WatermaskBuilder {
    /// Fraction of unobserved time steps at which a pixel counts as sparse.
    pub sparse_fraction: f64,
}

impl Default for WatermaskBuilder {
    fn default() -> Self {
        WatermaskBuilder { sparse_fraction: 0.75 }
    }
}

impl WatermaskBuilder {
    pub fn build(
        &self,
        source: &dyn ImagerySource,
        region: &Raster<u8>,
        start_year: i32,
        end_year: i32,
    ) -> Result<Watermask> {
        if start_year > end_year {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("window {start_year}..={end_year} is reversed")));
        }
        let observations = source.query(region, start_year, end_year)?;
        self.reduce(source.kind(), &observations, region)
            .map_err(|e| e.attach_printable(format!("window {start_year}..={end_year}")))
    }

    pub fn reduce(&self, kind: ImageryKind, observations: &[Observation], region: &Raster<u8>) -> Result<Watermask> {
        if observations.is_empty() {
            return Err(Report::new(MigrationError::InsufficientData)
                .attach_printable("no imagery in the time window"));
        }
        for obs in observations {
            region.ensure_same_geometry(&obs.raster)
                .map_err(|e| e.attach_printable(format!("observation of {}", obs.year)))?;
        }

        let n = observations.len();
        let width = region.width;
        let mut water = region.like(0u8);
        let mut sparse = region.like(0u8);

        water.data.par_chunks_mut(width)
            .zip(sparse.data.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (water_row, sparse_row))| {
                let mut values = Vec::with_capacity(n);
                for x in 0..width {
                    let indx = y * width + x;
                    if !region.is_set(indx) {
                        continue;
                    }
                    values.clear();
                    let mut missing = 0;
                    for obs in observations {
                        let v = obs.raster.data[indx];
                        if kind.is_observed(v) {
                            values.push(v);
                        } else {
                            missing += 1;
                        }
                    }

                    let reduced = match kind {
                        ImageryKind::Categorical => median(&mut values),
                        ImageryKind::PercentWater => {
                            values.resize(n, 0.0);
                            mean(&values)
                        }
                    };
                    water_row[x] = reduced.map_or(false, |v| kind.is_water(v)) as u8;
                    sparse_row[x] = (missing as f64 / n as f64 >= self.sparse_fraction) as u8;
                }
            });

        log::debug!("watermask from {} steps: {} water pixels", n, water.count_set());
        Ok(Watermask { water, sparse, n_steps: n })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::InMemoryImagery;

    fn steps(values: &[&[f64]]) -> Vec<Observation> {
        values.iter()
            .enumerate()
            .map(|(i, v)| Observation::yearly(2000 + i as i32, Raster::from_vec(v.len(), 1, v.to_vec()).unwrap()))
            .collect()
    }

    #[test]
    fn test_categorical_median_ignores_unobserved() {
        // pixel 0: [0, 2, 3] -> median of [2, 3] = 2.5 -> water
        // pixel 1: [1, 1, 2] -> 1 -> land
        // pixel 2: [0, 0, 0] -> no observations -> land, sparse
        let obs = steps(&[&[0.0, 1.0, 0.0], &[2.0, 1.0, 0.0], &[3.0, 2.0, 0.0]]);
        let region = Raster::filled(3, 1, 1u8);
        let wm = WatermaskBuilder::default().reduce(ImageryKind::Categorical, &obs, &region).unwrap();
        assert_eq!(wm.water.data, vec![1, 0, 0]);
        assert_eq!(wm.sparse.data, vec![0, 0, 1]);
    }

    #[test]
    fn test_percent_mean_treats_missing_as_zero() {
        let obs = steps(&[&[100.0, 60.0], &[f64::NAN, 60.0]]);
        let region = Raster::filled(2, 1, 1u8);
        let wm = WatermaskBuilder::default().reduce(ImageryKind::PercentWater, &obs, &region).unwrap();
        assert_eq!(wm.water.data, vec![1, 1]);
        assert_eq!(wm.sparse.data, vec![0, 0]);
    }

    #[test]
    fn test_outside_region_is_land() {
        let obs = steps(&[&[3.0, 3.0]]);
        let region = Raster::from_vec(2, 1, vec![1u8, 0]).unwrap();
        let wm = WatermaskBuilder::default().reduce(ImageryKind::Categorical, &obs, &region).unwrap();
        assert_eq!(wm.water.data, vec![1, 0]);
    }

    #[test]
    fn test_empty_window_is_insufficient_data() {
        let source = InMemoryImagery { kind: ImageryKind::Categorical, observations: Vec::new() };
        let region = Raster::filled(2, 2, 1u8);
        let err = WatermaskBuilder::default().build(&source, &region, 2000, 2001).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InsufficientData);
    }

    #[test]
    fn test_no_data_never_covers_river() {
        let obs = steps(&[&[0.0, 0.0], &[0.0, 0.0], &[0.0, 0.0], &[0.0, 1.0]]);
        let region = Raster::filled(2, 1, 1u8);
        let wm = WatermaskBuilder::default().reduce(ImageryKind::Categorical, &obs, &region).unwrap();
        assert_eq!(wm.sparse.data, vec![1, 1]);
        let river = Raster::from_vec(2, 1, vec![1u8, 0]).unwrap();
        assert_eq!(wm.no_data(&river).unwrap().data, vec![0, 1]);
    }
}
