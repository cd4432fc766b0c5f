//! Proximity grid for efficient spatial queries in crowd simulation
//!
//! A uniform spatial hash over the xz-plane. Occupants are inserted with an
//! axis-aligned bounding box and land in every cell the box overlaps, so a
//! single occupant may appear in several cell chains; queries de-duplicate
//! by id. The grid holds no state across ticks: the crowd clears and
//! rebuilds it every update.

use std::collections::HashMap;

/// Grid cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridCoord {
    x: i32,
    z: i32,
}

/// One pooled chain link: an occupant id and the pool index of the next
/// link in the same cell (`u16::MAX` terminates the chain).
#[derive(Debug, Clone, Copy)]
struct Item {
    id: u16,
    next: u16,
}

const CHAIN_END: u16 = u16::MAX;

/// Uniform spatial hash over the xz-plane
#[derive(Debug)]
pub struct ProximityGrid {
    cell_size: f32,
    inv_cell_size: f32,
    pool: Vec<Item>,
    pool_size: usize,
    buckets: HashMap<GridCoord, u16>,
}

impl ProximityGrid {
    /// Creates a grid with the given cell size and item-pool capacity.
    /// The pool bounds the total number of (occupant, cell) insertions
    /// per tick; `add` becomes a no-op once it is exhausted.
    pub fn new(pool_capacity: usize, cell_size: f32) -> Self {
        let capacity = pool_capacity.min(CHAIN_END as usize);
        Self {
            cell_size: cell_size.max(0.1),
            inv_cell_size: 1.0 / cell_size.max(0.1),
            pool: vec![Item { id: 0, next: CHAIN_END }; capacity],
            pool_size: 0,
            buckets: HashMap::new(),
        }
    }

    /// Removes all occupants
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.pool_size = 0;
    }

    /// Inserts an occupant into every cell its bounding box overlaps.
    /// Silently stops when the item pool is exhausted.
    pub fn add(&mut self, id: u16, min_x: f32, min_z: f32, max_x: f32, max_z: f32) {
        let ix0 = (min_x * self.inv_cell_size).floor() as i32;
        let iz0 = (min_z * self.inv_cell_size).floor() as i32;
        let ix1 = (max_x * self.inv_cell_size).floor() as i32;
        let iz1 = (max_z * self.inv_cell_size).floor() as i32;

        for z in iz0..=iz1 {
            for x in ix0..=ix1 {
                if self.pool_size >= self.pool.len() {
                    return;
                }
                let idx = self.pool_size as u16;
                let coord = GridCoord { x, z };
                let head = self.buckets.insert(coord, idx).unwrap_or(CHAIN_END);
                self.pool[self.pool_size] = Item { id, next: head };
                self.pool_size += 1;
            }
        }
    }

    /// Collects distinct occupant ids whose boxes may overlap the circle
    /// at (`cx`, `cz`) with `radius`. Returns the number written to `out`;
    /// truncates silently when `out` is too small.
    pub fn query_circle(&self, cx: f32, cz: f32, radius: f32, out: &mut [u16]) -> usize {
        self.query_rect(cx - radius, cz - radius, cx + radius, cz + radius, out)
    }

    /// Collects distinct occupant ids registered in cells intersecting the
    /// given rectangle. Returns the number written to `out`; truncates
    /// silently when `out` is too small. No ordering guarantee.
    pub fn query_rect(
        &self,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        out: &mut [u16],
    ) -> usize {
        let ix0 = (min_x * self.inv_cell_size).floor() as i32;
        let iz0 = (min_z * self.inv_cell_size).floor() as i32;
        let ix1 = (max_x * self.inv_cell_size).floor() as i32;
        let iz1 = (max_z * self.inv_cell_size).floor() as i32;

        let mut count = 0;
        for z in iz0..=iz1 {
            for x in ix0..=ix1 {
                let Some(&head) = self.buckets.get(&GridCoord { x, z }) else {
                    continue;
                };
                let mut idx = head;
                while idx != CHAIN_END {
                    let item = self.pool[idx as usize];
                    if !out[..count].contains(&item.id) {
                        if count >= out.len() {
                            return count;
                        }
                        out[count] = item.id;
                        count += 1;
                    }
                    idx = item.next;
                }
            }
        }
        count
    }

    /// Cell size in world units
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of pooled (occupant, cell) entries in use
    pub fn item_count(&self) -> usize {
        self.pool_size
    }
}
