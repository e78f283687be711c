//! Spatial index for collision and proximity queries
//!
//! Tracks every trackable object's axis-aligned bounding box in a uniform
//! grid keyed by cell coordinates, alongside an exact membership map. Range
//! queries touch only the cells covered by the query rectangle, so they stay
//! sub-linear on sparse scenes; insert, remove, and update are constant-time
//! per covered cell.
//!
//! Moving an object is a remove followed by a reinsert of its current bounds.
//! Callers observe the same two-step semantic the index has always had, and
//! both steps happen under one `&mut self` call so no reader can see the
//! object at neither its old nor its new bounds.

use bitflags::bitflags;
use shared::Rect;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Identifier the game registry assigns to every simulated object. The index
/// stores these as back-references; it never owns the objects themselves.
pub type ObjectId = u32;

/// World units per grid cell. Sized for small actors (player AABBs are a
/// fraction of a unit) while keeping building-scale boxes to a few cells.
const DEFAULT_CELL_SIZE: f64 = 8.0;

bitflags! {
    /// Object type bit flags used to filter spatial queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// A player controlled object.
        const PLAYER = 1 << 0;
        /// A non-player controlled object.
        const NPC = 1 << 1;
        /// A building or structure.
        const BUILDING = 1 << 2;
        /// Unable to take damage.
        const INVULNERABLE = 1 << 3;
        /// Unable to move in the game map.
        const IMMOVABLE = 1 << 4;
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("object {0} is already tracked")]
    AlreadyTracked(ObjectId),
    #[error("object {0} is not tracked")]
    NotTracked(ObjectId),
    #[error("object {id} has negative bounds {width}x{height}")]
    InvalidBounds {
        id: ObjectId,
        width: f64,
        height: f64,
    },
}

#[derive(Debug, Clone)]
struct TrackedNode {
    rect: Rect,
    flags: TypeFlags,
}

/// Mutable 2D bounding-box index over the live set of trackable objects.
pub struct SpatialIndex {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<ObjectId>>,
    nodes: HashMap<ObjectId, TrackedNode>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }

    pub fn with_cell_size(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    /// Adds an object's AABB to the index. If the object moves or resizes, it
    /// MUST be re-registered with [`SpatialIndex::update`].
    pub fn insert(&mut self, id: ObjectId, rect: Rect, flags: TypeFlags) -> Result<(), SpatialError> {
        if self.nodes.contains_key(&id) {
            return Err(SpatialError::AlreadyTracked(id));
        }
        if rect.size.width < 0.0 || rect.size.height < 0.0 {
            return Err(SpatialError::InvalidBounds {
                id,
                width: rect.size.width,
                height: rect.size.height,
            });
        }

        for cell in self.covered_cells(&rect) {
            self.cells.entry(cell).or_default().push(id);
        }
        self.nodes.insert(id, TrackedNode { rect, flags });
        Ok(())
    }

    /// Removes a tracked object. Returns false if the object was not tracked;
    /// callers are expected to know their own membership.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };

        for cell in self.covered_cells(&node.rect) {
            if let Some(ids) = self.cells.get_mut(&cell) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
        true
    }

    /// Re-registers an object at its current bounds: a remove followed by an
    /// insert, preserving the object's type flags.
    pub fn update(&mut self, id: ObjectId, rect: Rect) -> Result<(), SpatialError> {
        let flags = self
            .nodes
            .get(&id)
            .map(|node| node.flags)
            .ok_or(SpatialError::NotTracked(id))?;

        self.remove(id);
        self.insert(id, rect, flags)
    }

    /// Returns every tracked object whose AABB intersects the query
    /// rectangle. Order is unspecified.
    pub fn query_rect(&self, rect: &Rect) -> Vec<ObjectId> {
        self.query_impl(rect, None)
    }

    /// As [`SpatialIndex::query_rect`], but keeps only objects whose type
    /// flags contain every bit of `mask`.
    pub fn query_rect_filtered(&self, rect: &Rect, mask: TypeFlags) -> Vec<ObjectId> {
        self.query_impl(rect, Some(mask))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn query_impl(&self, rect: &Rect, mask: Option<TypeFlags>) -> Vec<ObjectId> {
        // An object spanning several cells shows up once per cell; dedupe.
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for cell in self.covered_cells(rect) {
            let Some(ids) = self.cells.get(&cell) else {
                continue;
            };

            for &id in ids {
                if !seen.insert(id) {
                    continue;
                }
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                if !node.rect.intersects(rect) {
                    continue;
                }
                if let Some(mask) = mask {
                    if !node.flags.contains(mask) {
                        continue;
                    }
                }
                matches.push(id);
            }
        }

        matches
    }

    fn covered_cells(&self, rect: &Rect) -> Vec<(i64, i64)> {
        let min_x = (rect.origin.x / self.cell_size).floor() as i64;
        let min_y = (rect.origin.y / self.cell_size).floor() as i64;
        let max_x = (rect.max_x() / self.cell_size).floor() as i64;
        let max_y = (rect.max_y() / self.cell_size).floor() as i64;

        let mut cells = Vec::with_capacity(((max_x - min_x + 1) * (max_y - min_y + 1)) as usize);
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                cells.push((x, y));
            }
        }
        cells
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Size, Vec2};

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::new(Vec2::new(x, y), Size::new(w, h))
    }

    #[test]
    fn insert_then_query_exact_bounds() {
        let mut index = SpatialIndex::new();
        let bounds = rect(10.0, 20.0, 2.0, 3.0);
        index.insert(1, bounds, TypeFlags::PLAYER).unwrap();

        // Querying an object's exact current AABB always returns it.
        assert_eq!(index.query_rect(&bounds), vec![1]);
    }

    #[test]
    fn query_has_no_false_positives() {
        let mut index = SpatialIndex::new();
        index.insert(1, rect(0.0, 0.0, 1.0, 1.0), TypeFlags::PLAYER).unwrap();
        index.insert(2, rect(100.0, 100.0, 1.0, 1.0), TypeFlags::NPC).unwrap();

        let found = index.query_rect(&rect(-1.0, -1.0, 3.0, 3.0));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn query_finds_object_in_same_cell_but_disjoint() {
        // Two objects share a grid cell; only the intersecting one matches.
        let mut index = SpatialIndex::with_cell_size(100.0);
        index.insert(1, rect(1.0, 1.0, 1.0, 1.0), TypeFlags::PLAYER).unwrap();
        index.insert(2, rect(50.0, 50.0, 1.0, 1.0), TypeFlags::PLAYER).unwrap();

        assert_eq!(index.query_rect(&rect(0.0, 0.0, 5.0, 5.0)), vec![1]);
    }

    #[test]
    fn query_dedupes_objects_spanning_cells() {
        let mut index = SpatialIndex::with_cell_size(1.0);
        index.insert(1, rect(0.0, 0.0, 5.0, 5.0), TypeFlags::BUILDING).unwrap();

        let found = index.query_rect(&rect(0.0, 0.0, 10.0, 10.0));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn filtered_query_requires_all_mask_bits() {
        let mut index = SpatialIndex::new();
        let everywhere = rect(0.0, 0.0, 10.0, 10.0);
        index
            .insert(1, rect(1.0, 1.0, 1.0, 1.0), TypeFlags::PLAYER)
            .unwrap();
        index
            .insert(
                2,
                rect(2.0, 2.0, 1.0, 1.0),
                TypeFlags::BUILDING | TypeFlags::IMMOVABLE,
            )
            .unwrap();
        index
            .insert(3, rect(3.0, 3.0, 1.0, 1.0), TypeFlags::BUILDING)
            .unwrap();

        let mask = TypeFlags::BUILDING | TypeFlags::IMMOVABLE;
        // AND-equality against the mask: id 3 has only one of the two bits.
        assert_eq!(index.query_rect_filtered(&everywhere, mask), vec![2]);

        // The filtered result is a subset of the unfiltered one.
        let all = index.query_rect(&everywhere);
        assert!(all.contains(&1) && all.contains(&2) && all.contains(&3));
    }

    #[test]
    fn update_moves_object_between_bounds() {
        let mut index = SpatialIndex::new();
        let old_bounds = rect(0.0, 0.0, 1.0, 1.0);
        let new_bounds = rect(50.0, 50.0, 1.0, 1.0);
        index.insert(1, old_bounds, TypeFlags::PLAYER).unwrap();

        index.update(1, new_bounds).unwrap();

        assert!(index.query_rect(&rect(0.0, 0.0, 2.0, 2.0)).is_empty());
        assert_eq!(index.query_rect(&new_bounds), vec![1]);
        // Flags survive the move.
        assert_eq!(
            index.query_rect_filtered(&new_bounds, TypeFlags::PLAYER),
            vec![1]
        );
    }

    #[test]
    fn update_untracked_object_fails() {
        let mut index = SpatialIndex::new();
        assert_eq!(
            index.update(9, rect(0.0, 0.0, 1.0, 1.0)),
            Err(SpatialError::NotTracked(9))
        );
    }

    #[test]
    fn remove_absent_object_is_safe() {
        let mut index = SpatialIndex::new();
        assert!(!index.remove(42));

        index.insert(1, rect(0.0, 0.0, 1.0, 1.0), TypeFlags::NPC).unwrap();
        assert!(index.remove(1));
        assert!(!index.remove(1));
        assert!(index.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected_without_corruption() {
        let mut index = SpatialIndex::new();
        let bounds = rect(5.0, 5.0, 1.0, 1.0);
        index.insert(1, bounds, TypeFlags::PLAYER).unwrap();

        assert_eq!(
            index.insert(1, rect(90.0, 90.0, 1.0, 1.0), TypeFlags::NPC),
            Err(SpatialError::AlreadyTracked(1))
        );

        // The existing node is untouched.
        assert_eq!(index.len(), 1);
        assert_eq!(index.query_rect(&bounds), vec![1]);
        assert!(index.query_rect(&rect(89.0, 89.0, 3.0, 3.0)).is_empty());
    }

    #[test]
    fn negative_bounds_are_rejected() {
        let mut index = SpatialIndex::new();
        let result = index.insert(1, rect(0.0, 0.0, -1.0, 1.0), TypeFlags::PLAYER);
        assert!(matches!(result, Err(SpatialError::InvalidBounds { .. })));
        assert!(index.is_empty());
    }

    #[test]
    fn zero_size_bounds_are_valid() {
        let mut index = SpatialIndex::new();
        index.insert(1, rect(3.5, 3.5, 0.0, 0.0), TypeFlags::NPC).unwrap();
        assert_eq!(index.query_rect(&rect(3.0, 3.0, 1.0, 1.0)), vec![1]);
    }

    #[test]
    fn negative_coordinates_are_indexed() {
        let mut index = SpatialIndex::new();
        index
            .insert(1, rect(-20.0, -20.0, 2.0, 2.0), TypeFlags::PLAYER)
            .unwrap();
        assert_eq!(index.query_rect(&rect(-21.0, -21.0, 4.0, 4.0)), vec![1]);
        assert!(index.query_rect(&rect(5.0, 5.0, 1.0, 1.0)).is_empty());
    }

    #[test]
    fn interleaved_operations_stay_consistent() {
        let mut index = SpatialIndex::new();
        for id in 0..50u32 {
            let offset = id as f64;
            index
                .insert(id, rect(offset, offset, 1.0, 1.0), TypeFlags::NPC)
                .unwrap();
        }
        for id in (0..50u32).step_by(2) {
            index.remove(id);
        }
        for id in (1..50u32).step_by(2) {
            let offset = id as f64 + 100.0;
            index.update(id, rect(offset, offset, 1.0, 1.0)).unwrap();
        }

        assert_eq!(index.len(), 25);
        // Every survivor is findable at its exact current bounds.
        for id in (1..50u32).step_by(2) {
            let offset = id as f64 + 100.0;
            assert_eq!(index.query_rect(&rect(offset, offset, 1.0, 1.0)), vec![id]);
        }
        // Nothing is findable at the vacated bounds.
        assert!(index.query_rect(&rect(0.0, 0.0, 50.0, 50.0)).is_empty());
    }
}
