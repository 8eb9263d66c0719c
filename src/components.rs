use std::collections::VecDeque;

use crate::raster::Raster;
use crate::utils::argmax;

/// 4-connected component labels of a binary mask.
///
/// Label 0 is background; components are numbered from 1 in scan order.
/// `sizes[k]` is the pixel count of label `k + 1`.
#[derive(Debug, Clone)]
pub struct Components {
    pub labels: Raster<i32>,
    pub sizes: Vec<usize>,
}

impl Components {
    pub fn count(&self) -> usize {
        self.sizes.len()
    }

    /// Label of the largest component, lowest label on ties.
    pub fn largest(&self) -> Option<i32> {
        argmax(&self.sizes).map(|k| k as i32 + 1)
    }

    pub fn mask_of(&self, label: i32) -> Raster<u8> {
        self.labels.map(move |l| (l == label) as u8)
    }

    pub fn members(&self, label: i32) -> Vec<usize> {
        self.labels.data.iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Member pixel closest to the component's mean position.
    pub fn centroid(&self, label: i32) -> Option<usize> {
        let members = self.members(label);
        if members.is_empty() {
            return None;
        }
        let n = members.len() as f64;
        let (sx, sy) = members.iter().fold((0.0, 0.0), |(sx, sy), &i| {
            let (x, y) = self.labels.index_to_xy(i);
            (sx + x as f64, sy + y as f64)
        });
        let (cx, cy) = (sx / n, sy / n);
        let d2: Vec<f64> = members.iter()
            .map(|&i| {
                let (x, y) = self.labels.index_to_xy(i);
                -((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2))
            })
            .collect();
        argmax(&d2).map(|k| members[k])
    }
}

/// Labels set cells of `mask`, optionally restricted to set cells of `region`.
pub fn label_components(mask: &Raster<u8>, region: Option<&Raster<u8>>) -> Components {
    let mut labels = mask.like(0i32);
    let mut sizes = Vec::new();
    let inside = |i: usize| mask.is_set(i) && region.map_or(true, |r| r.is_set(i));

    for start in 0..mask.len() {
        if labels.data[start] != 0 || !inside(start) {
            continue;
        }
        let label = sizes.len() as i32 + 1;
        let mut queue = VecDeque::new();
        let mut size = 0;
        labels.data[start] = label;
        queue.push_back(start);

        while let Some(indx) = queue.pop_front() {
            size += 1;
            for neighbor in mask.get_4d_neighbors(indx) {
                if labels.data[neighbor] == 0 && inside(neighbor) {
                    labels.data[neighbor] = label;
                    queue.push_back(neighbor);
                }
            }
        }
        sizes.push(size);
    }

    Components { labels, sizes }
}
