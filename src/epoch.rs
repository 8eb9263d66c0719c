use error_stack::Report;

use crate::banks::{BankFeatureExtractor, BankFeatures};
use crate::error::{MigrationError, Result};
use crate::grid::RasterGrid;
use crate::imagery::ImagerySource;
use crate::noise::{ErrorRates, NoiseInjector};
use crate::raster::Raster;
use crate::river::extract_river;
use crate::watermask::WatermaskBuilder;

/// River state of one segment over one averaging window.
#[derive(Debug, Clone)]
pub struct WaterEpoch {
    pub year: i32,
    /// Years in the window, `end - start + 1`.
    pub n_avg: i32,
    pub river: Raster<u8>,
    pub banks: BankFeatures,
    pub water: Raster<u8>,
    pub no_data: Raster<u8>,
    pub noisy_water: Raster<u8>,
    pub noisy_river: Raster<u8>,
}

impl WaterEpoch {
    /// All bands as one grid, under their exported names.
    pub fn to_grid(&self) -> Result<RasterGrid> {
        let mut grid = RasterGrid::new()
            .with_band("mask", &self.river)?
            .with_band("banks", &self.banks.banks)?
            .with_band("bankAspect", &self.banks.aspect)?
            .with_band("bankCurv", &self.banks.curvature)?
            .with_band("bankLen", &self.banks.length)?
            .with_band("watermask", &self.water)?
            .with_band("noData", &self.no_data)?
            .with_band("noisyWaterMask", &self.noisy_water)?
            .with_band("noisyRiverMask", &self.noisy_river)?;
        grid.set_metadata("year", self.year as f64);
        grid.set_metadata("nAvg", self.n_avg as f64);
        Ok(grid)
    }
}

/// Stages that turn a window of imagery into a `WaterEpoch`.
#[derive(Debug, Clone)]
pub struct EpochBuilder {
    pub watermask: WatermaskBuilder,
    pub banks: BankFeatureExtractor,
    pub noise: NoiseInjector,
    /// Ground length of one pixel step, used by the noise distances.
    pub cell_size: f64,
}

impl EpochBuilder {
    pub fn new(rates: ErrorRates, cell_size: f64) -> Self {
        EpochBuilder {
            watermask: WatermaskBuilder::default(),
            banks: BankFeatureExtractor::default(),
            noise: NoiseInjector::new(rates),
            cell_size,
        }
    }

    pub fn build(
        &self,
        source: &dyn ImagerySource,
        region: &Raster<u8>,
        start_year: i32,
        end_year: i32,
    ) -> Result<WaterEpoch> {
        if start_year > end_year {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("window {start_year}..={end_year} is reversed")));
        }
        let kind = source.kind();
        let observations = source.query(region, start_year, end_year)?;
        let window = |e: Report<MigrationError>| e.attach_printable(format!("window {start_year}..={end_year}"));

        let (clean, noisy_water) = rayon::join(
            || -> Result<_> {
                let mask = self.watermask.reduce(kind, &observations, region)?;
                let river = extract_river(&mask.water, region);
                let no_data = mask.no_data(&river)?;
                let banks = self.banks.extract(&river);
                Ok((mask.water, river, no_data, banks))
            },
            || self.noise.inject(kind, &observations, region, self.cell_size),
        );
        let (water, river, no_data, banks) = clean.map_err(window)?;
        let noisy_water = noisy_water.map_err(window)?;
        let noisy_river = extract_river(&noisy_water, region);

        log::info!(
            "epoch {}..={}: {} steps, {} river px, {} bank px, {} noisy river px",
            start_year, end_year, observations.len(),
            river.count_set(), banks.banks.count_set(), noisy_river.count_set());

        Ok(WaterEpoch {
            year: start_year,
            n_avg: end_year - start_year + 1,
            river,
            banks,
            water,
            no_data,
            noisy_water,
            noisy_river,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::{ImageryKind, InMemoryImagery, Observation};

    fn source() -> InMemoryImagery {
        let gt = [1000.0, 30.0, 0.0, 2000.0, 0.0, -30.0];
        let observations = (2001..2003)
            .map(|year| {
                let mut r = Raster::filled(12, 10, 1.0f64).with_geometry(gt, "");
                for y in 3..6 {
                    for x in 0..12 {
                        r.set(x, y, 3.0);
                    }
                }
                Observation::yearly(year, r)
            })
            .collect();
        InMemoryImagery { kind: ImageryKind::Categorical, observations }
    }

    #[test]
    fn test_epoch_bands_share_region_geometry() {
        let source = source();
        let region = source.observations[0].raster.like(1u8);
        let builder = EpochBuilder::new(ErrorRates::for_kind(ImageryKind::Categorical), 30.0);
        let epoch = builder.build(&source, &region, 2001, 2002).unwrap();

        assert_eq!(epoch.n_avg, 2);
        assert_eq!(epoch.river.count_set(), 36);
        let grid = epoch.to_grid().unwrap();
        assert_eq!(grid.len(), 9);
        assert!(grid.is_consistent());
        for name in grid.band_names() {
            assert!(grid.band(name).unwrap().same_geometry(&region), "{name}");
        }
        assert_eq!(grid.metadata["year"], 2001.0);
        assert_eq!(grid.metadata["nAvg"], 2.0);
    }

    #[test]
    fn test_river_pixels_are_never_no_data() {
        let source = source();
        let region = source.observations[0].raster.like(1u8);
        let builder = EpochBuilder::new(ErrorRates::none(), 30.0);
        let epoch = builder.build(&source, &region, 2001, 2001).unwrap();
        let overlap = epoch.river.and(&epoch.no_data).unwrap();
        assert_eq!(overlap.count_set(), 0);
        assert_eq!(epoch.noisy_river, epoch.river);
    }

    #[test]
    fn test_window_without_imagery() {
        let source = source();
        let region = source.observations[0].raster.like(1u8);
        let builder = EpochBuilder::new(ErrorRates::none(), 30.0);
        let err = builder.build(&source, &region, 1990, 1995).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InsufficientData);
    }

    #[test]
    fn test_reversed_window() {
        let source = source();
        let region = source.observations[0].raster.like(1u8);
        let builder = EpochBuilder::new(ErrorRates::none(), 30.0);
        let err = builder.build(&source, &region, 2003, 2001).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InvalidParameter);
    }
}
