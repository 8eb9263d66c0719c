//! Change detection between two epochs.
//!
//! `diff(from, to)` finds pixels that were river in `from` and are land in
//! `to`, measures how far each lies from the `from` bank line, and converts
//! the result to rates and ground areas. Running it with `from` earlier than
//! `to` gives the accretion signal, with the epochs swapped the erosion signal.

use error_stack::Report;

use crate::components::label_components;
use crate::cost_distance::cost_distance;
use crate::epoch::WaterEpoch;
use crate::error::{MigrationError, Result};
use crate::morphology::dilate;
use crate::raster::Raster;

/// Rasters of one change direction; NaN where a pixel does not contribute.
#[derive(Debug, Clone)]
pub struct MigrationDiff {
    pub change: Raster<u8>,
    /// Ground area of changed pixels.
    pub change_area: Raster<f64>,
    /// Distance of changed pixels to the prior bank line.
    pub distance: Raster<f64>,
    /// Distance per year on `to` bank pixels, 0 where the bank did not move
    /// and NaN where a moved bank lies beyond `max_distance`.
    pub rate: Raster<f64>,
    pub noisy_change_area: Raster<f64>,
    pub dt: f64,
}

#[derive(Debug, Clone)]
pub struct MigrationDiffEngine {
    pub max_distance: f64,
    /// Ground length of one pixel step.
    pub cell_size: f64,
}

impl MigrationDiffEngine {
    pub fn new(cell_size: f64) -> Self {
        MigrationDiffEngine { max_distance: 1000.0, cell_size }
    }

    pub fn diff(
        &self,
        from: &WaterEpoch,
        to: &WaterEpoch,
        region: &Raster<u8>,
        valid: &Raster<u8>,
        pixel_area: &Raster<f64>,
    ) -> Result<MigrationDiff> {
        let dt = (to.year - from.year).abs() as f64;
        if dt == 0.0 {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("epochs {} and {} have zero elapsed time", from.year, to.year)));
        }
        region.ensure_same_geometry(&from.river)?;
        region.ensure_same_geometry(&to.river)?;
        region.ensure_same_geometry(valid)?;
        region.ensure_same_geometry(pixel_area)?;

        let inside = valid.and(region)?;
        let change = change_mask(&from.river, &to.water, &inside)?;
        let noisy = change_mask(&from.noisy_river, &to.noisy_water, &inside)?;

        let seeds: Vec<usize> = (0..inside.len())
            .filter(|&i| from.banks.banks.is_set(i) && inside.is_set(i))
            .collect();
        // uncapped, so pixels beyond the cap stay apart from unreachable ones
        let bank_dist = cost_distance(&dilate(&change), &seeds, self.cell_size, f64::INFINITY)
            .from_mask(&change, f64::NAN);

        let failed = change.zip_map(&bank_dist, |c, d| (c != 0 && (d.is_nan() || d == 0.0)) as u8)?;
        let max_distance = self.max_distance;
        let mut distance = bank_dist.map(|d| if d > max_distance { f64::NAN } else { d });
        if failed.count_set() > 0 {
            let island_dist = self.island_distance(&failed);
            for (i, d) in distance.data.iter_mut().enumerate() {
                if failed.is_set(i) {
                    *d = island_dist.data[i];
                }
            }
        }

        let mut rate = region.like(f64::NAN);
        for i in 0..rate.len() {
            if to.banks.banks.is_set(i) && inside.is_set(i) {
                rate.data[i] = if change.is_set(i) { distance.data[i] / dt } else { 0.0 };
            }
        }

        let change_area = pixel_area.from_mask(&change, f64::NAN);
        let noisy_change_area = pixel_area.from_mask(&noisy, f64::NAN);

        log::debug!(
            "diff {} -> {}: {} changed px ({} islands px), {} noisy px",
            from.year, to.year, change.count_set(), failed.count_set(), noisy.count_set());

        Ok(MigrationDiff { change, change_area, distance, rate, noisy_change_area, dt })
    }

    /// Distance of island pixels to their own component's centre pixel.
    fn island_distance(&self, islands: &Raster<u8>) -> Raster<f64> {
        let components = label_components(islands, None);
        let centers: Vec<usize> = (1..=components.count() as i32)
            .filter_map(|label| components.centroid(label))
            .collect();
        log::debug!("re-seeding {} islands at their centres", centers.len());
        cost_distance(&dilate(islands), &centers, self.cell_size, self.max_distance)
            .from_mask(islands, f64::NAN)
    }
}

/// River in the earlier state, land in the later one.
fn change_mask(from_river: &Raster<u8>, to_water: &Raster<u8>, inside: &Raster<u8>) -> Result<Raster<u8>> {
    from_river.and(&to_water.not())?.and(inside)
}
