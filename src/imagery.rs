use std::path::PathBuf;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::raster::Raster;

/// Value semantics of a classified imagery source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ImageryKind {
    /// 0 no observation, 1 land, 2 seasonal water, 3 permanent water.
    Categorical,
    /// Percent of the year the pixel was water, 0..=100; NaN is missing.
    PercentWater,
}

impl ImageryKind {
    pub fn is_water(&self, v: f64) -> bool {
        match self {
            ImageryKind::Categorical => v >= 2.0,
            ImageryKind::PercentWater => v >= 50.0,
        }
    }

    pub fn is_observed(&self, v: f64) -> bool {
        match self {
            ImageryKind::Categorical => !v.is_nan() && v != 0.0,
            ImageryKind::PercentWater => !v.is_nan(),
        }
    }
}

/// One time step of classified imagery.
#[derive(Debug, Clone)]
pub struct Observation {
    pub year: i32,
    /// Start of the time step in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub raster: Raster<f64>,
}

impl Observation {
    pub fn yearly(year: i32, raster: Raster<f64>) -> Self {
        Observation { year, timestamp_ms: year_start_ms(year), raster }
    }
}

/// Time-indexed classified rasters queryable over a grid.
///
/// `query` returns the observations of years `start_year..=end_year` in time
/// order, each on exactly the grid of `template`.
pub trait ImagerySource: Send + Sync {
    fn kind(&self) -> ImageryKind;

    fn query(&self, template: &Raster<u8>, start_year: i32, end_year: i32) -> Result<Vec<Observation>>;
}

/// Observations held in memory, cropped to the query grid on demand.
#[derive(Debug, Clone)]
pub struct InMemoryImagery {
    pub kind: ImageryKind,
    pub observations: Vec<Observation>,
}

impl ImagerySource for InMemoryImagery {
    fn kind(&self) -> ImageryKind {
        self.kind
    }

    fn query(&self, template: &Raster<u8>, start_year: i32, end_year: i32) -> Result<Vec<Observation>> {
        let mut out = Vec::new();
        for obs in self.observations.iter().filter(|o| o.year >= start_year && o.year <= end_year) {
            let (ox, oy) = obs.raster.window_offset(template)
                .map_err(|e| e.attach_printable(format!("observation of {}", obs.year)))?;
            out.push(Observation {
                year: obs.year,
                timestamp_ms: obs.timestamp_ms,
                raster: obs.raster.crop(ox, oy, template.width, template.height),
            });
        }
        out.sort_by_key(|o| o.timestamp_ms);
        Ok(out)
    }
}

/// Yearly GeoTIFFs named `<year>.tif` in one directory.
///
/// Missing years are skipped; the raster no-data value becomes NaN.
#[derive(Debug, Clone)]
pub struct GeoTiffImagery {
    pub kind: ImageryKind,
    pub dir: PathBuf,
}

impl GeoTiffImagery {
    pub fn new<P: Into<PathBuf>>(kind: ImageryKind, dir: P) -> Self {
        GeoTiffImagery { kind, dir: dir.into() }
    }
}

impl ImagerySource for GeoTiffImagery {
    fn kind(&self) -> ImageryKind {
        self.kind
    }

    fn query(&self, template: &Raster<u8>, start_year: i32, end_year: i32) -> Result<Vec<Observation>> {
        if !self.dir.is_dir() {
            return Err(Report::new(MigrationError::ExternalService)
                .attach_printable(format!("imagery directory {} unavailable", self.dir.display())));
        }
        let mut out = Vec::new();
        for year in start_year..=end_year {
            let path = self.dir.join(format!("{year}.tif"));
            if !path.exists() {
                log::debug!("no imagery for {} in {}", year, self.dir.display());
                continue;
            }
            let mut raster = Raster::<f64>::read_like(&path, template)
                .map_err(|e| {
                    let kind = *e.current_context();
                    if kind == MigrationError::InvalidParameter { e } else { e.change_context(MigrationError::ExternalService) }
                })
                .attach_printable_lazy(|| format!("imagery year {year}"))?;
            if let Some(nd) = raster.no_data.take() {
                for v in raster.data.iter_mut() {
                    if *v == nd {
                        *v = f64::NAN;
                    }
                }
            }
            out.push(Observation::yearly(year, raster));
        }
        Ok(out)
    }
}

/// Milliseconds from the Unix epoch to January 1st of `year`, UTC.
pub fn year_start_ms(year: i32) -> i64 {
    let is_leap = |y: i32| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    let days: i64 = if year >= 1970 {
        (1970..year).map(|y| if is_leap(y) { 366 } else { 365 }).sum()
    } else {
        -(year..1970).map(|y| if is_leap(y) { 366 } else { 365 }).sum::<i64>()
    };
    days * 86_400_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_start_ms() {
        assert_eq!(year_start_ms(1970), 0);
        assert_eq!(year_start_ms(1971), 365 * 86_400_000);
        // 2001-01-01T00:00:00Z
        assert_eq!(year_start_ms(2001), 978_307_200_000);
    }

    #[test]
    fn test_water_thresholds() {
        assert!(ImageryKind::Categorical.is_water(2.0));
        assert!(!ImageryKind::Categorical.is_water(1.0));
        assert!(ImageryKind::PercentWater.is_water(50.0));
        assert!(!ImageryKind::PercentWater.is_water(49.9));
        assert!(!ImageryKind::Categorical.is_observed(0.0));
        assert!(!ImageryKind::PercentWater.is_observed(f64::NAN));
    }

    #[test]
    fn test_in_memory_query_filters_years_and_crops() {
        let gt = [0.0, 30.0, 0.0, 120.0, 0.0, -30.0];
        let obs = (2000..2004)
            .map(|y| Observation::yearly(y, Raster::filled(4, 4, y as f64).with_geometry(gt, "")))
            .collect();
        let source = InMemoryImagery { kind: ImageryKind::Categorical, observations: obs };
        let template = Raster::filled(4, 4, 0u8).with_geometry(gt, "").crop(1, 1, 2, 2);

        let got = source.query(&template, 2001, 2002).unwrap();
        assert_eq!(got.iter().map(|o| o.year).collect::<Vec<_>>(), vec![2001, 2002]);
        assert!(got[0].raster.same_geometry(&template));
        assert_eq!(got[1].raster.data, vec![2002.0; 4]);
    }

    #[test]
    fn test_missing_directory_is_external_failure() {
        let source = GeoTiffImagery::new(ImageryKind::Categorical, "/nonexistent/imagery");
        let template = Raster::filled(2, 2, 0u8);
        let err = source.query(&template, 2000, 2001).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::ExternalService);
    }
}
