use std::fs;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::imagery::ImageryKind;
use crate::network::ReachFilter;

/// Run configuration. Every field has a default, so a JSON file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First year of the first epoch.
    pub year1: i32,
    /// Years between the starts of the two epochs.
    pub dt: i32,
    /// Extra years averaged into each epoch.
    pub avg_window: i32,
    /// Region half-width in channel widths.
    pub width_buffer: f64,
    /// Cap of the bank distance transform, in ground units.
    pub max_distance: f64,
    pub noise_max_distance: f64,
    pub noise_bin_width: f64,
    pub observations_per_step: usize,
    /// Largest segment window processed in one pass.
    pub max_pixels: usize,
    pub max_concurrent: usize,
    pub min_width: f64,
    pub river_type_only: bool,
    pub imagery_kind: ImageryKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            year1: 2001,
            dt: 18,
            avg_window: 0,
            width_buffer: 2.0,
            max_distance: 1000.0,
            noise_max_distance: 90.0,
            noise_bin_width: 10.0,
            observations_per_step: 13,
            max_pixels: 100_000_000,
            max_concurrent: 4,
            min_width: 150.0,
            river_type_only: true,
            imagery_kind: ImageryKind::PercentWater,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(contents)
            .change_context(MigrationError::InvalidParameter)
            .attach_printable("parsing pipeline configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("reading {}", path.display()))?;
        PipelineConfig::from_json_str(&contents)
            .attach_printable_lazy(|| format!("config file {}", path.display()))
    }

    /// Inclusive year windows of the two epochs.
    pub fn windows(&self) -> ((i32, i32), (i32, i32)) {
        let start2 = self.year1 + self.dt;
        ((self.year1, self.year1 + self.avg_window), (start2, start2 + self.avg_window))
    }

    pub fn reach_filter(&self) -> ReachFilter {
        ReachFilter { min_width: self.min_width, river_type_only: self.river_type_only }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Report::new(MigrationError::InvalidParameter).attach_printable(msg));
        if self.dt == 0 {
            return invalid("dt must not be 0".to_string());
        }
        if self.avg_window < 0 {
            return invalid(format!("avg_window {} is negative", self.avg_window));
        }
        if !(self.width_buffer > 0.0) {
            return invalid(format!("width_buffer {} must be positive", self.width_buffer));
        }
        if !(self.noise_bin_width > 0.0) || !(self.max_distance > 0.0) {
            return invalid("distance settings must be positive".to_string());
        }
        if self.observations_per_step == 0 || self.max_concurrent == 0 || self.max_pixels == 0 {
            return invalid("counts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.windows(), ((2001, 2001), (2019, 2019)));
        assert_eq!(c.observations_per_step, 13);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = PipelineConfig::from_json_str(r#"{"year1": 1990, "avg_window": 2, "imagery_kind": "categorical"}"#).unwrap();
        assert_eq!(c.windows(), ((1990, 1992), (2008, 2010)));
        assert_eq!(c.imagery_kind, ImageryKind::Categorical);
        assert_eq!(c.max_distance, 1000.0);
    }

    #[test]
    fn test_zero_dt_is_invalid() {
        let err = PipelineConfig::from_json_str(r#"{"dt": 0}"#).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InvalidParameter);
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json_str("{year1: }").unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InvalidParameter);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{"max_concurrent": 2}"#).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().max_concurrent, 2);
        let err = PipelineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::Io);
    }
}
