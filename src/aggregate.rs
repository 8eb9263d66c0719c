use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::epoch::WaterEpoch;
use crate::error::Result;
use crate::migration::MigrationDiff;
use crate::raster::Raster;
use crate::support::CircularAccumulator;

/// Sentinel of areas, lengths, rates and magnitudes.
pub const MISSING_VALUE: f64 = -1.0;
/// Sentinel of angles.
pub const MISSING_ANGLE: f64 = -9999.0;

/// Summary of one node; field order is the output column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStat {
    pub reach_id: i64,
    pub node_id: i64,
    #[serde(rename = "ADiff")]
    pub a_diff: f64,
    #[serde(rename = "EDiff")]
    pub e_diff: f64,
    pub t1_mask: f64,
    pub t2_mask: f64,
    #[serde(rename = "t1_bankLen")]
    pub t1_bank_len: f64,
    #[serde(rename = "t2_bankLen")]
    pub t2_bank_len: f64,
    #[serde(rename = "noisyADiff")]
    pub noisy_a_diff: f64,
    #[serde(rename = "noisyEDiff")]
    pub noisy_e_diff: f64,
    #[serde(rename = "ARate")]
    pub a_rate: f64,
    #[serde(rename = "ERate")]
    pub e_rate: f64,
    #[serde(rename = "ADir")]
    pub a_dir: f64,
    #[serde(rename = "ADirR")]
    pub a_dir_r: f64,
    #[serde(rename = "EDir")]
    pub e_dir: f64,
    #[serde(rename = "EDirR")]
    pub e_dir_r: f64,
}

impl NodeStat {
    /// Record of a node without any contributing pixel.
    pub fn sentinel(reach_id: i64, node_id: i64) -> Self {
        NodeStat {
            reach_id,
            node_id,
            a_diff: MISSING_VALUE,
            e_diff: MISSING_VALUE,
            t1_mask: MISSING_VALUE,
            t2_mask: MISSING_VALUE,
            t1_bank_len: MISSING_VALUE,
            t2_bank_len: MISSING_VALUE,
            noisy_a_diff: MISSING_VALUE,
            noisy_e_diff: MISSING_VALUE,
            a_rate: MISSING_VALUE,
            e_rate: MISSING_VALUE,
            a_dir: MISSING_ANGLE,
            a_dir_r: MISSING_VALUE,
            e_dir: MISSING_ANGLE,
            e_dir_r: MISSING_VALUE,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == NodeStat::sentinel(self.reach_id, self.node_id)
    }
}

/// One sentinel row per distinct node id, ordered by node id.
pub fn sentinel_rows(reach_id: i64, node_ids: &[i64]) -> Vec<NodeStat> {
    node_ids.iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|&id| NodeStat::sentinel(reach_id, id))
        .collect()
}

/// Everything the aggregation reads, on one grid.
pub struct SegmentRasters<'a> {
    pub t1: &'a WaterEpoch,
    pub t2: &'a WaterEpoch,
    /// Diff from `t1` to `t2`.
    pub accretion: &'a MigrationDiff,
    /// Diff from `t2` to `t1`.
    pub erosion: &'a MigrationDiff,
    pub pixel_area: &'a Raster<f64>,
    pub region: &'a Raster<u8>,
    pub valid: &'a Raster<u8>,
}

const N_SUMS: usize = 8;

#[derive(Debug, Clone, Default)]
struct NodeAccumulator {
    pixels: usize,
    sums: [f64; N_SUMS],
    rate_sums: [f64; 2],
    rate_counts: [usize; 2],
    a_dir: CircularAccumulator,
    e_dir: CircularAccumulator,
}

impl NodeAccumulator {
    fn add(&mut self, d: &SegmentRasters, i: usize) {
        self.pixels += 1;
        let area = d.pixel_area.data[i];
        let values = [
            d.accretion.change_area.data[i],
            d.erosion.change_area.data[i],
            if d.t1.river.is_set(i) { area } else { f64::NAN },
            if d.t2.river.is_set(i) { area } else { f64::NAN },
            d.t1.banks.length.data[i],
            d.t2.banks.length.data[i],
            d.accretion.noisy_change_area.data[i],
            d.erosion.noisy_change_area.data[i],
        ];
        for (s, v) in self.sums.iter_mut().zip(values) {
            if !v.is_nan() {
                *s += v;
            }
        }

        for (k, rate) in [d.accretion.rate.data[i], d.erosion.rate.data[i]].into_iter().enumerate() {
            if !rate.is_nan() {
                self.rate_sums[k] += rate;
                self.rate_counts[k] += 1;
            }
        }

        // each direction uses the bank of the epoch it migrated into
        if d.t2.banks.banks.is_set(i) {
            self.a_dir.push(d.t2.banks.aspect.data[i], d.accretion.distance.data[i]);
        }
        if d.t1.banks.banks.is_set(i) {
            self.e_dir.push(d.t1.banks.aspect.data[i], d.erosion.distance.data[i]);
        }
    }

    fn merge(mut self, other: NodeAccumulator) -> NodeAccumulator {
        self.pixels += other.pixels;
        for k in 0..N_SUMS {
            self.sums[k] += other.sums[k];
        }
        for k in 0..2 {
            self.rate_sums[k] += other.rate_sums[k];
            self.rate_counts[k] += other.rate_counts[k];
        }
        self.a_dir = self.a_dir.merge(other.a_dir);
        self.e_dir = self.e_dir.merge(other.e_dir);
        self
    }

    fn finish(&self, reach_id: i64, node_id: i64) -> NodeStat {
        if self.pixels == 0 {
            return NodeStat::sentinel(reach_id, node_id);
        }
        let mean = |k: usize| {
            if self.rate_counts[k] == 0 {
                MISSING_VALUE
            } else {
                self.rate_sums[k] / self.rate_counts[k] as f64
            }
        };
        let (a_dir, a_dir_r) = self.a_dir.finish().unwrap_or((MISSING_ANGLE, MISSING_VALUE));
        let (e_dir, e_dir_r) = self.e_dir.finish().unwrap_or((MISSING_ANGLE, MISSING_VALUE));
        let [a_diff, e_diff, t1_mask, t2_mask, t1_bank_len, t2_bank_len, noisy_a_diff, noisy_e_diff] = self.sums;
        NodeStat {
            reach_id,
            node_id,
            a_diff,
            e_diff,
            t1_mask,
            t2_mask,
            t1_bank_len,
            t2_bank_len,
            noisy_a_diff,
            noisy_e_diff,
            a_rate: mean(0),
            e_rate: mean(1),
            a_dir,
            a_dir_r,
            e_dir,
            e_dir_r,
        }
    }
}

/// Summarises a segment to its nodes.
///
/// Only pixels whose node id is one of `node_ids`, inside the region and
/// valid in both epochs, contribute. Every distinct id of `node_ids` yields
/// exactly one row, ordered by node id.
pub fn aggregate_nodes(
    reach_id: i64,
    node_ids: &[i64],
    node_raster: &Raster<f64>,
    data: &SegmentRasters,
) -> Result<Vec<NodeStat>> {
    data.region.ensure_same_geometry(node_raster)?;
    data.region.ensure_same_geometry(data.valid)?;
    data.region.ensure_same_geometry(data.pixel_area)?;
    data.region.ensure_same_geometry(&data.t1.river)?;
    data.region.ensure_same_geometry(&data.t2.river)?;
    data.region.ensure_same_geometry(&data.accretion.rate)?;
    data.region.ensure_same_geometry(&data.erosion.rate)?;

    if node_raster.is_empty() {
        return Ok(sentinel_rows(reach_id, node_ids));
    }
    let owned: BTreeSet<i64> = node_ids.iter().copied().collect();
    let nodata = node_raster.no_data;
    let width = node_raster.width;

    let groups: BTreeMap<i64, NodeAccumulator> = node_raster.data
        .par_chunks(width)
        .enumerate()
        .fold(BTreeMap::new, |mut groups, (y, row)| {
            for (x, &v) in row.iter().enumerate() {
                let i = y * width + x;
                if v.is_nan() || Some(v) == nodata || !data.region.is_set(i) || !data.valid.is_set(i) {
                    continue;
                }
                let id = v.round() as i64;
                if !owned.contains(&id) {
                    continue;
                }
                groups.entry(id).or_insert_with(NodeAccumulator::default).add(data, i);
            }
            groups
        })
        .reduce(BTreeMap::new, |mut a, b| {
            for (id, acc) in b {
                let merged = match a.remove(&id) {
                    Some(prev) => prev.merge(acc),
                    None => acc,
                };
                a.insert(id, merged);
            }
            a
        });

    let empty = NodeAccumulator::default();
    let rows: Vec<NodeStat> = owned.iter()
        .map(|&id| groups.get(&id).unwrap_or(&empty).finish(reach_id, id))
        .collect();
    let missing = rows.iter().filter(|r| r.is_sentinel()).count();
    if missing > 0 {
        log::debug!("reach {}: {} of {} nodes without pixels", reach_id, missing, rows.len());
    }
    Ok(rows)
}
