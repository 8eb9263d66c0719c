use std::path::Path;

use error_stack::{Report, ResultExt};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use proj::Proj;
use rayon::prelude::*;

use crate::error::{MigrationError, Result};

/// Equal-area target used to measure the true ground footprint of a pixel.
pub const EQUAL_AREA_CRS: &str = "+proj=cea +lon_0=0 +lat_ts=0 +datum=WGS84 +units=m +no_defs";

/// Cell value types the pipeline stores in rasters.
pub trait Pixel: Copy + Default + PartialEq + Send + Sync + 'static {
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Pixel for u8 {
    fn from_f64(v: f64) -> Self { v as u8 }
    fn to_f64(self) -> f64 { self as f64 }
}

impl Pixel for i32 {
    fn from_f64(v: f64) -> Self { v as i32 }
    fn to_f64(self) -> f64 { self as f64 }
}

impl Pixel for f64 {
    fn from_f64(v: f64) -> Self { v }
    fn to_f64(self) -> f64 { self }
}

/// Single band grid in row-major order.
///
/// `geo_transform` follows the GDAL convention
/// `[x0, dx, row_rot, y0, col_rot, dy]`. Floating rasters use NaN for masked
/// cells, binary masks are `Raster<u8>` holding 0 or 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub projection: String,
    pub no_data: Option<T>,
}

impl<T: Pixel> Raster<T> {
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Raster {
            data: vec![value; width * height],
            width,
            height,
            geo_transform: [0.0, 1.0, 0.0, height as f64, 0.0, -1.0],
            projection: String::new(),
            no_data: None,
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!(
                    "{} values do not fill a {}x{} grid", data.len(), width, height)));
        }
        let mut raster = Raster::filled(width, height, T::default());
        raster.data = data;
        Ok(raster)
    }

    pub fn with_geometry(mut self, geo_transform: [f64; 6], projection: &str) -> Self {
        self.geo_transform = geo_transform;
        self.projection = projection.to_string();
        self
    }

    /// New raster on the same grid filled with `value`.
    pub fn like<U: Pixel>(&self, value: U) -> Raster<U> {
        Raster {
            data: vec![value; self.data.len()],
            width: self.width,
            height: self.height,
            geo_transform: self.geo_transform,
            projection: self.projection.clone(),
            no_data: None,
        }
    }

    pub fn empty_clone(&self) -> Raster<T> {
        self.like(T::default())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn cellsize(&self) -> f64 {
        self.geo_transform[1].abs()
    }

    pub fn same_geometry<U>(&self, other: &Raster<U>) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.geo_transform == other.geo_transform
            && self.projection == other.projection
    }

    pub fn ensure_same_geometry<U>(&self, other: &Raster<U>) -> Result<()> {
        if self.same_geometry(other) {
            return Ok(());
        }
        Err(Report::new(MigrationError::InvalidParameter)
            .attach_printable(format!(
                "grid mismatch: {}x{} {:?} vs {}x{} {:?}",
                self.width, self.height, self.geo_transform,
                other.width, other.height, other.geo_transform))
            .attach_printable(format!(
                "projections: '{}' vs '{}'", self.projection, other.projection)))
    }

    pub fn map<U: Pixel, F>(&self, f: F) -> Raster<U>
    where
        F: Fn(T) -> U + Sync + Send,
    {
        let mut out = self.like(U::default());
        out.data = self.data.par_iter().map(|&v| f(v)).collect();
        out
    }

    /// Cell-wise combination of two rasters on the same grid.
    pub fn zip_map<U: Pixel, V: Pixel, F>(&self, other: &Raster<U>, f: F) -> Result<Raster<V>>
    where
        F: Fn(T, U) -> V + Sync + Send,
    {
        self.ensure_same_geometry(other)?;
        let mut out = self.like(V::default());
        out.data = self.data.par_iter()
            .zip(other.data.par_iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(out)
    }

    /// Keeps cells where `mask` is set, `fill` elsewhere.
    pub fn from_mask(&self, mask: &Raster<u8>, fill: T) -> Raster<T> {
        let mut out = self.clone();
        for (v, &m) in out.data.iter_mut().zip(mask.data.iter()) {
            if m == 0 {
                *v = fill;
            }
        }
        out
    }

    pub fn index_to_xy(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    pub fn xy_to_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.xy_to_index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let indx = self.xy_to_index(x, y);
        self.data[indx] = value;
    }

    /// In-grid 4-connected neighbours of a cell.
    pub fn get_4d_neighbors(&self, index: usize) -> Vec<usize> {
        let (x, y) = self.index_to_xy(index);
        [(0, -1), (-1, 0), (1, 0), (0, 1)]
            .iter()
            .filter_map(|&(dx, dy)| self.offset(x, y, dx, dy))
            .collect()
    }

    pub fn offset(&self, x: usize, y: usize, dx: isize, dy: isize) -> Option<usize> {
        let nx = x as isize + dx;
        let ny = y as isize + dy;
        if nx < 0 || ny < 0 || nx >= self.width as isize || ny >= self.height as isize {
            return None;
        }
        Some(self.xy_to_index(nx as usize, ny as usize))
    }

    /// Sub-grid starting at pixel (x0, y0); the window must lie inside the grid.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Raster<T> {
        assert!(x0 + width <= self.width && y0 + height <= self.height,
            "crop {}x{}+{}+{} outside {}x{}", width, height, x0, y0, self.width, self.height);
        let mut data = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            let start = self.xy_to_index(x0, y);
            data.extend_from_slice(&self.data[start..start + width]);
        }
        let (ox, oy) = self.px_to_geo(x0 as f64, y0 as f64);
        let mut geo_transform = self.geo_transform;
        geo_transform[0] = ox;
        geo_transform[3] = oy;
        Raster {
            data,
            width,
            height,
            geo_transform,
            projection: self.projection.clone(),
            no_data: self.no_data,
        }
    }

    /// Pixel offset of `template`'s origin inside this grid.
    ///
    /// Both grids must share resolution, rotation and projection, be aligned
    /// on whole pixels, and the template must fit inside this grid.
    pub fn window_offset<U>(&self, template: &Raster<U>) -> Result<(usize, usize)> {
        locate_window(
            &self.geo_transform, &self.projection, self.width, self.height,
            &template.geo_transform, &template.projection, template.width, template.height)
    }

    /// Map coordinates of a pixel corner (fractional pixel offsets allowed).
    pub fn px_to_geo(&self, px: f64, py: f64) -> (f64, f64) {
        let gt = &self.geo_transform;
        (gt[0] + px * gt[1] + py * gt[2], gt[3] + px * gt[4] + py * gt[5])
    }

    /// Ground area of every pixel.
    ///
    /// With a projection set, the four corners of each cell are projected to
    /// an equal-area cylindrical CRS and the cell polygon area is measured.
    /// Without one the nominal `|dx * dy|` applies everywhere.
    pub fn pixel_area(&self) -> Result<Raster<f64>> {
        let gt = &self.geo_transform;
        let nominal = (gt[1] * gt[5] - gt[2] * gt[4]).abs();
        if self.projection.trim().is_empty() {
            return Ok(self.like(nominal));
        }

        let to_equal_area = Proj::new_known_crs(&self.projection, EQUAL_AREA_CRS, None)
            .map_err(|e| Report::new(MigrationError::InvalidParameter)
                .attach_printable(format!("cannot transform to equal-area crs: {e}")))?;

        let cw = self.width + 1;
        let mut corners: Vec<(f64, f64)> = Vec::with_capacity(cw * (self.height + 1));
        for y in 0..=self.height {
            for x in 0..=self.width {
                let geo = self.px_to_geo(x as f64, y as f64);
                let projected = to_equal_area.convert(geo)
                    .map_err(|e| Report::new(MigrationError::InvalidParameter)
                        .attach_printable(format!("cannot project corner {geo:?}: {e}")))?;
                corners.push(projected);
            }
        }

        let mut area = self.like(0.0f64);
        area.data.par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, a) in row.iter_mut().enumerate() {
                    let ring = [
                        corners[y * cw + x],
                        corners[y * cw + x + 1],
                        corners[(y + 1) * cw + x + 1],
                        corners[(y + 1) * cw + x],
                    ];
                    *a = polygon_area(&ring);
                }
            });
        Ok(area)
    }
}

impl Raster<u8> {
    pub fn is_set(&self, index: usize) -> bool {
        self.data[index] != 0
    }

    pub fn count_set(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn and(&self, other: &Raster<u8>) -> Result<Raster<u8>> {
        self.zip_map(other, |a, b| (a != 0 && b != 0) as u8)
    }

    pub fn or(&self, other: &Raster<u8>) -> Result<Raster<u8>> {
        self.zip_map(other, |a, b| (a != 0 || b != 0) as u8)
    }

    pub fn not(&self) -> Raster<u8> {
        self.map(|v| (v == 0) as u8)
    }
}

impl<T: Pixel + GdalType> Raster<T> {
    /// Reads band 1 of any GDAL readable raster.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Raster<T>> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("opening {}", path.display()))?;
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("{} has no geotransform", path.display()))?;
        let projection = dataset.projection();

        let band = dataset.rasterband(1)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("{} has no band 1", path.display()))?;
        let buffer = band.read_as::<T>((0, 0), (width, height), (width, height), None)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("reading {}", path.display()))?;
        let no_data = band.no_data_value().map(T::from_f64);

        Ok(Raster {
            data: buffer.data,
            width,
            height,
            geo_transform,
            projection,
            no_data,
        })
    }

    /// Reads the window of band 1 covering `template`'s grid.
    pub fn read_like<P: AsRef<Path>, U>(path: P, template: &Raster<U>) -> Result<Raster<T>> {
        let path = path.as_ref();
        let dataset = Dataset::open(path)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("opening {}", path.display()))?;
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("{} has no geotransform", path.display()))?;
        let projection = dataset.projection();
        let (ox, oy) = locate_window(
            &geo_transform, &projection, width, height,
            &template.geo_transform, &template.projection, template.width, template.height)
            .map_err(|e| e.attach_printable(format!("reading {}", path.display())))?;

        let band = dataset.rasterband(1)
            .change_context(MigrationError::Io)?;
        let size = (template.width, template.height);
        let buffer = band.read_as::<T>((ox as isize, oy as isize), size, size, None)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("reading window of {}", path.display()))?;

        Ok(Raster {
            data: buffer.data,
            width: template.width,
            height: template.height,
            geo_transform: template.geo_transform,
            projection: template.projection.clone(),
            no_data: band.no_data_value().map(T::from_f64),
        })
    }

    /// Writes the raster as a single band GeoTIFF.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let driver = DriverManager::get_driver_by_name("GTiff")
            .change_context(MigrationError::Io)?;
        let mut dataset = driver
            .create_with_band_type::<T, _>(path, self.width as isize, self.height as isize, 1)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("creating {}", path.display()))?;
        dataset.set_geo_transform(&self.geo_transform)
            .change_context(MigrationError::Io)?;
        if !self.projection.is_empty() {
            dataset.set_projection(&self.projection)
                .change_context(MigrationError::Io)?;
        }

        let mut band = dataset.rasterband(1)
            .change_context(MigrationError::Io)?;
        if let Some(nd) = self.no_data {
            band.set_no_data_value(Some(nd.to_f64()))
                .change_context(MigrationError::Io)?;
        }
        let buffer = Buffer::new((self.width, self.height), self.data.clone());
        band.write((0, 0), (self.width, self.height), &buffer)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn locate_window(
    gt: &[f64; 6], projection: &str, width: usize, height: usize,
    tgt: &[f64; 6], tprojection: &str, twidth: usize, theight: usize,
) -> Result<(usize, usize)> {
    const TOL: f64 = 1e-6;
    let same_axes = [1, 2, 4, 5].iter().all(|&k| (gt[k] - tgt[k]).abs() <= TOL * gt[k].abs().max(1.0));
    if !same_axes || projection != tprojection {
        return Err(Report::new(MigrationError::InvalidParameter)
            .attach_printable(format!("resolution/projection mismatch: {gt:?} vs {tgt:?}")));
    }
    let fx = (tgt[0] - gt[0]) / gt[1];
    let fy = (tgt[3] - gt[3]) / gt[5];
    if (fx - fx.round()).abs() > 1e-3 || (fy - fy.round()).abs() > 1e-3 {
        return Err(Report::new(MigrationError::InvalidParameter)
            .attach_printable(format!("grids not pixel aligned (offset {fx:.4}, {fy:.4})")));
    }
    let (ox, oy) = (fx.round(), fy.round());
    if ox < 0.0 || oy < 0.0 || ox as usize + twidth > width || oy as usize + theight > height {
        return Err(Report::new(MigrationError::InvalidParameter)
            .attach_printable(format!(
                "window {twidth}x{theight}+{ox}+{oy} outside {width}x{height} grid")));
    }
    Ok((ox as usize, oy as usize))
}

/// Shoelace area of a closed ring.
pub fn polygon_area(ring: &[(f64, f64)]) -> f64 {
    let n = ring.len();
    let mut twice = 0.0;
    for i in 0..n {
        let (x0, y0) = ring[i];
        let (x1, y1) = ring[(i + 1) % n];
        twice += x0 * y1 - x1 * y0;
    }
    twice.abs() / 2.0
}
