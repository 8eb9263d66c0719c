//! Ordered stages that turn one river segment into node records.

use error_stack::Report;

use crate::aggregate::{aggregate_nodes, sentinel_rows, NodeStat, SegmentRasters};
use crate::config::PipelineConfig;
use crate::epoch::{EpochBuilder, WaterEpoch};
use crate::error::{MigrationError, Result};
use crate::imagery::ImagerySource;
use crate::migration::MigrationDiffEngine;
use crate::network::RiverSegment;
use crate::noise::{ErrorRates, NoiseInjector};
use crate::raster::Raster;

/// Inputs shared by every segment of a run.
pub struct SegmentContext<'a> {
    pub config: &'a PipelineConfig,
    /// Node ids on the working grid; NaN or no-data where no node.
    pub node_raster: &'a Raster<f64>,
    pub imagery: &'a dyn ImagerySource,
}

/// Runs one segment.
///
/// Missing imagery and segments without any river become sentinel rows for
/// every node; every other failure is returned with its kind.
pub fn run_segment(ctx: &SegmentContext, segment: &RiverSegment) -> Result<Vec<NodeStat>> {
    match compute_segment(ctx, segment) {
        Ok(rows) => Ok(rows),
        Err(report) if report.current_context().is_data_gap() => {
            log::warn!(
                "reach {}: {}, writing sentinel rows for {} nodes",
                segment.id, report.current_context(), segment.node_ids.len());
            log::debug!("reach {}: {:?}", segment.id, report);
            Ok(sentinel_rows(segment.id, &segment.node_ids))
        }
        Err(report) => Err(report.attach_printable(format!("reach {}", segment.id))),
    }
}

fn compute_segment(ctx: &SegmentContext, segment: &RiverSegment) -> Result<Vec<NodeStat>> {
    let config = ctx.config;
    let Some((x0, y0, width, height)) = segment.bounding_window(ctx.node_raster)? else {
        return Err(Report::new(MigrationError::InsufficientData)
            .attach_printable("buffered centerline misses the node-id grid"));
    };
    let n_pixels = width * height;
    if n_pixels > config.max_pixels {
        return Err(Report::new(MigrationError::ResourceExceeded)
            .attach_printable(format!(
                "window of {n_pixels} pixels exceeds max_pixels {}", config.max_pixels)));
    }

    let grid = ctx.node_raster.crop(x0, y0, width, height);
    let region = segment.region_mask(&grid)?;
    if region.count_set() == 0 {
        return Err(Report::new(MigrationError::InsufficientData)
            .attach_printable("region covers no pixel centre"));
    }
    let pixel_area = grid.pixel_area()?;
    let cell_size = mean_cell_size(&pixel_area, &region);
    log::info!(
        "reach {}: {}x{} window at ({}, {}), {} region px, cell {:.2}",
        segment.id, width, height, x0, y0, region.count_set(), cell_size);

    let builder = epoch_builder(config, ErrorRates::for_kind(ctx.imagery.kind()), cell_size);
    let ((start1, end1), (start2, end2)) = config.windows();
    let (t1, t2) = rayon::join(
        || builder.build(ctx.imagery, &region, start1, end1),
        || builder.build(ctx.imagery, &region, start2, end2),
    );
    let (t1, t2) = (t1?, t2?);
    ensure_river(&t1, &t2)?;

    let valid = t1.no_data.or(&t2.no_data)?.not();
    let engine = MigrationDiffEngine { max_distance: config.max_distance, cell_size };
    let (accretion, erosion) = rayon::join(
        || engine.diff(&t1, &t2, &region, &valid, &pixel_area),
        || engine.diff(&t2, &t1, &region, &valid, &pixel_area),
    );
    let (accretion, erosion) = (accretion?, erosion?);

    let rasters = SegmentRasters {
        t1: &t1,
        t2: &t2,
        accretion: &accretion,
        erosion: &erosion,
        pixel_area: &pixel_area,
        region: &region,
        valid: &valid,
    };
    aggregate_nodes(segment.id, &segment.node_ids, &grid, &rasters)
}

fn epoch_builder(config: &PipelineConfig, rates: ErrorRates, cell_size: f64) -> EpochBuilder {
    let mut builder = EpochBuilder::new(rates, cell_size);
    builder.noise = NoiseInjector {
        max_distance: config.noise_max_distance,
        bin_width: config.noise_bin_width,
        observations_per_step: config.observations_per_step,
        ..builder.noise
    };
    builder
}

fn ensure_river(t1: &WaterEpoch, t2: &WaterEpoch) -> Result<()> {
    if t1.river.count_set() == 0 && t2.river.count_set() == 0 {
        return Err(Report::new(MigrationError::DegenerateGeometry)
            .attach_printable(format!("no river in {} or {}", t1.year, t2.year)));
    }
    Ok(())
}

/// Side of a square with the mean pixel area of the region.
fn mean_cell_size(pixel_area: &Raster<f64>, region: &Raster<u8>) -> f64 {
    let (sum, n) = pixel_area.data.iter()
        .zip(region.data.iter())
        .filter(|(_, &r)| r != 0)
        .fold((0.0, 0usize), |(s, n), (&a, _)| (s + a, n + 1));
    if n == 0 {
        return pixel_area.cellsize();
    }
    (sum / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::{ImageryKind, InMemoryImagery, Observation};

    const GT: [f64; 6] = [0.0, 30.0, 0.0, 600.0, 0.0, -30.0];

    fn imagery(years: &[i32]) -> InMemoryImagery {
        let observations = years.iter()
            .map(|&y| {
                let mut r = Raster::filled(20, 20, 1.0f64).with_geometry(GT, "");
                for row in 7..13 {
                    for x in 0..20 {
                        r.set(x, row, 3.0);
                    }
                }
                Observation::yearly(y, r)
            })
            .collect();
        InMemoryImagery { kind: ImageryKind::Categorical, observations }
    }

    fn segment() -> RiverSegment {
        RiverSegment {
            id: 81,
            centerline: vec![(0.0, 300.0), (600.0, 300.0)],
            width: 180.0,
            width_buffer: 2.0,
            node_ids: vec![1],
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig { year1: 2000, dt: 10, ..PipelineConfig::default() }
    }

    #[test]
    fn test_missing_imagery_gives_sentinel_rows() {
        let nodes = Raster::filled(20, 20, 1.0f64).with_geometry(GT, "");
        let source = imagery(&[2000]);
        let config = config();
        let ctx = SegmentContext { config: &config, node_raster: &nodes, imagery: &source };
        let rows = run_segment(&ctx, &segment()).unwrap();
        assert_eq!(rows, vec![NodeStat::sentinel(81, 1)]);
    }

    #[test]
    fn test_oversized_window_fails() {
        let nodes = Raster::filled(20, 20, 1.0f64).with_geometry(GT, "");
        let source = imagery(&[2000, 2010]);
        let config = PipelineConfig { max_pixels: 50, ..config() };
        let ctx = SegmentContext { config: &config, node_raster: &nodes, imagery: &source };
        let err = run_segment(&ctx, &segment()).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::ResourceExceeded);
    }

    #[test]
    fn test_mismatched_imagery_grid_fails() {
        let nodes = Raster::filled(20, 20, 1.0f64)
            .with_geometry([0.0, 10.0, 0.0, 200.0, 0.0, -10.0], "");
        let source = imagery(&[2000, 2010]);
        let config = config();
        let ctx = SegmentContext { config: &config, node_raster: &nodes, imagery: &source };
        let seg = RiverSegment { centerline: vec![(0.0, 100.0), (200.0, 100.0)], width: 50.0, ..segment() };
        let err = run_segment(&ctx, &seg).unwrap_err();
        assert_eq!(*err.current_context(), MigrationError::InvalidParameter);
    }

    #[test]
    fn test_stable_channel_has_no_change() {
        let nodes = Raster::filled(20, 20, 1.0f64).with_geometry(GT, "");
        let source = imagery(&[2000, 2010]);
        let config = config();
        let ctx = SegmentContext { config: &config, node_raster: &nodes, imagery: &source };
        let rows = run_segment(&ctx, &segment()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.a_diff, 0.0);
        assert_eq!(row.e_diff, 0.0);
        assert_eq!(row.t1_mask, 6.0 * 20.0 * 900.0);
        assert_eq!(row.t1_mask, row.t2_mask);
        assert_eq!(row.a_rate, 0.0);
        assert_eq!(row.a_dir, -9999.0);
    }
}
