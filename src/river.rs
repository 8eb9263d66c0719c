use crate::components::label_components;
use crate::morphology::close;
use crate::raster::Raster;

/// Isolates the river channel: the largest 4-connected water body inside the
/// region, closed with one dilation and one erosion.
///
/// An empty water raster yields an all-zero mask.
pub fn extract_river(water: &Raster<u8>, region: &Raster<u8>) -> Raster<u8> {
    let components = label_components(water, Some(region));
    let Some(largest) = components.largest() else {
        log::debug!("no water bodies inside the region");
        return water.like(0u8);
    };
    log::debug!(
        "{} water bodies, keeping label {} ({} px)",
        components.count(), largest, components.sizes[(largest - 1) as usize]);
    // closing may reach outside the region
    let mut river = close(&components.mask_of(largest));
    for (r, inside) in river.data.iter_mut().zip(&region.data) {
        *r &= (*inside != 0) as u8;
    }
    river
}
