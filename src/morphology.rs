//! Binary morphology with a radius-1 circular (4-connected) element.
//!
//! `dilate` and `erode` truncate the neighbourhood at the grid edge. `close`
//! works on a copy padded with one clear pixel on every side, so it neither
//! erodes bodies touching the border nor grows bodies towards it.

use rayon::prelude::*;

use crate::raster::Raster;

fn focal(mask: &Raster<u8>, want_any: bool) -> Raster<u8> {
    let mut out = mask.empty_clone();
    out.data.par_chunks_mut(mask.width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, o) in row.iter_mut().enumerate() {
                let indx = y * mask.width + x;
                let mut cells = mask.get_4d_neighbors(indx);
                cells.push(indx);
                let hit = if want_any {
                    cells.iter().any(|&n| mask.data[n] != 0)
                } else {
                    cells.iter().all(|&n| mask.data[n] != 0)
                };
                *o = hit as u8;
            }
        });
    out
}

/// Focal maximum.
pub fn dilate(mask: &Raster<u8>) -> Raster<u8> {
    focal(mask, true)
}

/// Focal minimum.
pub fn erode(mask: &Raster<u8>) -> Raster<u8> {
    focal(mask, false)
}

fn pad(mask: &Raster<u8>) -> Raster<u8> {
    let width = mask.width + 2;
    let mut padded = Raster::filled(width, mask.height + 2, 0u8);
    for y in 0..mask.height {
        let src = &mask.data[y * mask.width..(y + 1) * mask.width];
        let start = (y + 1) * width + 1;
        padded.data[start..start + mask.width].copy_from_slice(src);
    }
    padded
}

/// One dilation followed by one erosion.
pub fn close(mask: &Raster<u8>) -> Raster<u8> {
    let closed = erode(&dilate(&pad(mask)));
    let mut out = closed.crop(1, 1, mask.width, mask.height);
    out.geo_transform = mask.geo_transform;
    out.projection = mask.projection.clone();
    out.no_data = mask.no_data;
    out
}
