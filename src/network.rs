use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use error_stack::{Report, ResultExt};
use geojson::{GeoJson, Value};
use proj::Proj;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::raster::{Pixel, Raster};

/// Width reported by the network for reaches without a measured width.
pub const MISSING_WIDTH: f64 = 1.0;
/// Width substituted for `MISSING_WIDTH`.
pub const DEFAULT_WIDTH: f64 = 500.0;

const LONLAT_CRS: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// A centerline node of the river network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub reach_id: i64,
    pub node_id: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
}

/// A reach: a stretch of channel, its nodes, and its buffered region.
///
/// Centerline coordinates are in the working grid's CRS, widths in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct RiverSegment {
    pub id: i64,
    pub centerline: Vec<(f64, f64)>,
    pub width: f64,
    pub width_buffer: f64,
    pub node_ids: Vec<i64>,
}

impl RiverSegment {
    /// Builds a segment from its nodes, ordered by node id.
    ///
    /// The segment width is the mean node width, with `MISSING_WIDTH`
    /// replaced by `DEFAULT_WIDTH`.
    pub fn from_nodes(reach_id: i64, nodes: &[NodeRecord], width_buffer: f64) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("reach {reach_id} has no nodes")));
        }
        let mut nodes: Vec<&NodeRecord> = nodes.iter().collect();
        nodes.sort_by_key(|n| n.node_id);

        let mut width = nodes.iter().map(|n| n.width).sum::<f64>() / nodes.len() as f64;
        if width == MISSING_WIDTH {
            width = DEFAULT_WIDTH;
        }
        if !(width > 0.0) || !width.is_finite() {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("reach {reach_id} has width {width}")));
        }
        if !(width_buffer > 0.0) {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("width buffer must be positive, got {width_buffer}")));
        }

        Ok(RiverSegment {
            id: reach_id,
            centerline: nodes.iter().map(|n| (n.x, n.y)).collect(),
            width,
            width_buffer,
            node_ids: nodes.iter().map(|n| n.node_id).collect(),
        })
    }

    /// Radius of the region of interest around the centerline.
    pub fn buffer_distance(&self) -> f64 {
        self.width * self.width_buffer
    }

    /// Reach type digit (1 = river).
    pub fn reach_type(&self) -> i64 {
        self.id % 10
    }

    /// Ground distance from a point to the nearest part of the centerline,
    /// with `scale` the ground length of one CRS unit along x and y.
    pub fn distance_to_centerline(&self, x: f64, y: f64, scale: (f64, f64)) -> f64 {
        let (sx, sy) = scale;
        let at = |p: (f64, f64)| (p.0 * sx, p.1 * sy);
        match self.centerline.len() {
            0 => f64::INFINITY,
            1 => {
                let (cx, cy) = at(self.centerline[0]);
                ((x * sx - cx).powi(2) + (y * sy - cy).powi(2)).sqrt()
            }
            _ => self.centerline.windows(2)
                .map(|w| point_segment_distance(x * sx, y * sy, at(w[0]), at(w[1])))
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Metres per CRS unit along x and y at the middle of the centerline.
    ///
    /// Grids without a projection are taken to be in metres. Anything else
    /// is measured through PROJ in a local azimuthal equidistant frame, so
    /// geographic grids get their degree lengths at the segment's latitude.
    pub fn ground_scale<T: Pixel>(&self, grid: &Raster<T>) -> Result<(f64, f64)> {
        if grid.projection.trim().is_empty() || self.centerline.is_empty() {
            return Ok((1.0, 1.0));
        }
        let n = self.centerline.len() as f64;
        let cx = self.centerline.iter().map(|p| p.0).sum::<f64>() / n;
        let cy = self.centerline.iter().map(|p| p.1).sum::<f64>() / n;

        let proj_err = |e: proj::ProjError| Report::new(MigrationError::InvalidParameter)
            .attach_printable(format!("reach {}: {e}", self.id));
        let to_lonlat = Proj::new_known_crs(&grid.projection, LONLAT_CRS, None)
            .map_err(|e| Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("cannot transform grid crs to lon/lat: {e}")))?;
        let (lon, lat): (f64, f64) = to_lonlat.convert((cx, cy)).map_err(proj_err)?;
        let local = format!("+proj=aeqd +lat_0={lat} +lon_0={lon} +datum=WGS84 +units=m +no_defs");
        let to_local = Proj::new_known_crs(&grid.projection, &local, None)
            .map_err(|e| Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("cannot build local frame at ({lon}, {lat}): {e}")))?;

        let dx = grid.geo_transform[1].abs();
        let dy = grid.geo_transform[5].abs();
        let origin: (f64, f64) = to_local.convert((cx, cy)).map_err(proj_err)?;
        let east: (f64, f64) = to_local.convert((cx + dx, cy)).map_err(proj_err)?;
        let north: (f64, f64) = to_local.convert((cx, cy + dy)).map_err(proj_err)?;
        let length = |p: (f64, f64)| ((p.0 - origin.0).powi(2) + (p.1 - origin.1).powi(2)).sqrt();
        let scale = (length(east) / dx, length(north) / dy);
        if !(scale.0 > 0.0 && scale.1 > 0.0) || !scale.0.is_finite() || !scale.1.is_finite() {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("reach {}: degenerate ground scale {scale:?}", self.id)));
        }
        Ok(scale)
    }

    /// Pixel window (x0, y0, width, height) of `grid` covering the buffered
    /// centerline, or `None` if the region misses the grid. North-up grids only.
    pub fn bounding_window<T: Pixel>(&self, grid: &Raster<T>) -> Result<Option<(usize, usize, usize, usize)>> {
        let (sx, sy) = self.ground_scale(grid)?;
        let (bx, by) = (self.buffer_distance() / sx, self.buffer_distance() / sy);
        let gt = &grid.geo_transform;
        let (mut px0, mut py0) = (f64::INFINITY, f64::INFINITY);
        let (mut px1, mut py1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in &self.centerline {
            for (gx, gy) in [(x - bx, y - by), (x + bx, y + by)] {
                let px = (gx - gt[0]) / gt[1];
                let py = (gy - gt[3]) / gt[5];
                px0 = px0.min(px);
                px1 = px1.max(px);
                py0 = py0.min(py);
                py1 = py1.max(py);
            }
        }
        let x0 = px0.floor().max(0.0);
        let y0 = py0.floor().max(0.0);
        let x1 = px1.ceil().min(grid.width as f64);
        let y1 = py1.ceil().min(grid.height as f64);
        if x1 <= x0 || y1 <= y0 {
            return Ok(None);
        }
        Ok(Some((x0 as usize, y0 as usize, (x1 - x0) as usize, (y1 - y0) as usize)))
    }

    /// Rasterizes the buffered centerline onto `grid` (pixel centres).
    pub fn region_mask<T: Pixel>(&self, grid: &Raster<T>) -> Result<Raster<u8>> {
        let scale = self.ground_scale(grid)?;
        let buffer = self.buffer_distance();
        let mut mask = grid.like(0u8);
        mask.data.par_chunks_mut(grid.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, m) in row.iter_mut().enumerate() {
                    let (gx, gy) = grid.px_to_geo(x as f64 + 0.5, y as f64 + 0.5);
                    *m = (self.distance_to_centerline(gx, gy, scale) <= buffer) as u8;
                }
            });
        Ok(mask)
    }
}

fn point_segment_distance(x: f64, y: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((x - a.0) * dx + (y - a.1) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    ((x - px).powi(2) + (y - py).powi(2)).sqrt()
}

/// Which reaches a run processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachFilter {
    /// Reaches at or below this width are skipped.
    pub min_width: f64,
    /// Keep only reaches whose type digit is 1.
    pub river_type_only: bool,
}

impl ReachFilter {
    pub fn accepts(&self, segment: &RiverSegment) -> bool {
        segment.width > self.min_width && (!self.river_type_only || segment.reach_type() == 1)
    }
}

/// Reads node points from a GeoJSON FeatureCollection with numeric
/// `reach_id`, `node_id` and `width` properties.
pub fn read_nodes_geojson<P: AsRef<Path>>(path: P) -> Result<Vec<NodeRecord>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .change_context(MigrationError::ExternalService)
        .attach_printable_lazy(|| format!("reading {}", path.display()))?;
    parse_nodes_geojson(&contents)
        .attach_printable_lazy(|| format!("parsing {}", path.display()))
}

pub fn parse_nodes_geojson(contents: &str) -> Result<Vec<NodeRecord>> {
    let geojson = contents.parse::<GeoJson>()
        .change_context(MigrationError::InvalidParameter)?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(Report::new(MigrationError::InvalidParameter)
            .attach_printable("node network must be a FeatureCollection"));
    };

    let mut nodes = Vec::with_capacity(collection.features.len());
    for (i, feature) in collection.features.iter().enumerate() {
        let number = |key: &str| -> Result<f64> {
            feature.property(key)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| Report::new(MigrationError::InvalidParameter)
                    .attach_printable(format!("feature {i} lacks numeric '{key}'")))
        };
        let point = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coords)) if coords.len() >= 2 => (coords[0], coords[1]),
            _ => {
                return Err(Report::new(MigrationError::InvalidParameter)
                    .attach_printable(format!("feature {i} is not a point")));
            }
        };
        nodes.push(NodeRecord {
            reach_id: number("reach_id")? as i64,
            node_id: number("node_id")? as i64,
            x: point.0,
            y: point.1,
            width: number("width")?,
        });
    }
    Ok(nodes)
}

/// Groups nodes into segments, ordered by reach id.
pub fn group_segments(nodes: &[NodeRecord], width_buffer: f64) -> Result<Vec<RiverSegment>> {
    let mut by_reach: BTreeMap<i64, Vec<NodeRecord>> = BTreeMap::new();
    for node in nodes {
        by_reach.entry(node.reach_id).or_default().push(node.clone());
    }
    by_reach.iter()
        .map(|(&reach_id, members)| RiverSegment::from_nodes(reach_id, members, width_buffer))
        .collect()
}
