use std::collections::BTreeMap;

use error_stack::Report;

use crate::error::{MigrationError, Result};
use crate::raster::{Pixel, Raster};

/// Named bands sharing one grid, plus scalar metadata.
///
/// Band order is insertion order. Inserting a band whose geometry differs
/// from the first band is rejected.
#[derive(Debug, Clone, Default)]
pub struct RasterGrid {
    bands: Vec<(String, Raster<f64>)>,
    pub metadata: BTreeMap<String, f64>,
}

impl RasterGrid {
    pub fn new() -> Self {
        RasterGrid::default()
    }

    pub fn add_band<T: Pixel>(&mut self, name: &str, band: &Raster<T>) -> Result<()> {
        if let Some((_, first)) = self.bands.first() {
            first.ensure_same_geometry(band)
                .map_err(|e| e.attach_printable(format!("band '{name}'")))?;
        }
        if self.band(name).is_some() {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("duplicate band '{name}'")));
        }
        let as_float = band.map(|v| v.to_f64());
        self.bands.push((name.to_string(), as_float));
        Ok(())
    }

    pub fn with_band<T: Pixel>(mut self, name: &str, band: &Raster<T>) -> Result<Self> {
        self.add_band(name, band)?;
        Ok(self)
    }

    pub fn set_metadata(&mut self, key: &str, value: f64) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn band(&self, name: &str) -> Option<&Raster<f64>> {
        self.bands.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// True when every band shares the geometry of the first band.
    pub fn is_consistent(&self) -> bool {
        match self.bands.first() {
            None => true,
            Some((_, first)) => self.bands.iter().all(|(_, b)| first.same_geometry(b)),
        }
    }
}
