// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A set of named substructures queried together.
//!
//! Different kinds of bodies often want different structures: a tree for
//! static geometry, a grid for dense dynamic bodies. A
//! [`SpatialAccelerationCollection`] holds several of them under
//! [`SpatialIdx`] keys. Methods with an `_in` suffix take an
//! `Option<SpatialIdx>`: `Some` targets one substructure and `None` fans out
//! over all of them.

use alloc::string::String;
use alloc::vec::Vec;

use glam::Vec3;

use crate::accel::SpatialAcceleration;
use crate::error::AccelError;
use crate::grid::{GridAccel, UniformGrid};
use crate::query::{Cast, QueryLength};
use crate::tree::AabbTree;
use crate::types::{Aabb3D, BoundsElement, Payload};
use crate::visitor::{CastVisitor, OverlapVisitor};

/// Key of a substructure inside a collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpatialIdx {
    /// Coarse grouping, e.g. one bucket per body kind.
    pub bucket: u16,
    /// Position within the bucket.
    pub inner: u16,
}

impl SpatialIdx {
    /// Create a key.
    pub const fn new(bucket: u16, inner: u16) -> Self {
        Self { bucket, inner }
    }
}

/// One structure stored in a collection.
#[derive(Clone, Debug)]
pub enum Substructure<P: Payload> {
    /// Tree with array leaves.
    Tree(AabbTree<P>),
    /// Tree with uniform grid leaves.
    GridTree(AabbTree<P, UniformGrid<P>>),
    /// A standalone uniform grid.
    Grid(GridAccel<P>),
}

macro_rules! dispatch {
    ($s:expr, $inner:ident => $body:expr) => {
        match $s {
            Substructure::Tree($inner) => $body,
            Substructure::GridTree($inner) => $body,
            Substructure::Grid($inner) => $body,
        }
    };
}

impl<P: Payload> Substructure<P> {
    /// Start tracking a payload in this substructure.
    pub fn insert_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        dispatch!(self, s => s.insert_element(payload, bounds, has_bounds))
    }
}

impl<P: Payload> From<AabbTree<P>> for Substructure<P> {
    fn from(tree: AabbTree<P>) -> Self {
        Self::Tree(tree)
    }
}

impl<P: Payload> From<AabbTree<P, UniformGrid<P>>> for Substructure<P> {
    fn from(tree: AabbTree<P, UniformGrid<P>>) -> Self {
        Self::GridTree(tree)
    }
}

impl<P: Payload> From<GridAccel<P>> for Substructure<P> {
    fn from(grid: GridAccel<P>) -> Self {
        Self::Grid(grid)
    }
}

impl<P: Payload> SpatialAcceleration<P> for Substructure<P> {
    fn cast_with<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        dispatch!(self, s => s.cast_with(cast, length, visitor))
    }

    fn overlap_with<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        dispatch!(self, s => s.overlap_with(bounds, visitor))
    }

    fn update_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        dispatch!(self, s => s.update_element(payload, bounds, has_bounds))
    }

    fn remove_element(&mut self, payload: P) -> Result<(), AccelError> {
        dispatch!(self, s => s.remove_element(payload))
    }

    fn contains_payload(&self, payload: P) -> bool {
        dispatch!(self, s => s.contains_payload(payload))
    }

    fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    fn global_objects(&self) -> Vec<BoundsElement<P>> {
        dispatch!(self, s => s.global_objects())
    }

    fn num_dirty_elements(&self) -> usize {
        dispatch!(self, s => s.num_dirty_elements())
    }

    fn is_build_complete(&self) -> bool {
        dispatch!(self, s => s.is_build_complete())
    }

    fn progress_time_slicing(&mut self, force_complete: bool) -> Result<bool, AccelError> {
        dispatch!(self, s => s.progress_time_slicing(force_complete))
    }
}

#[derive(Clone, Debug)]
struct Entry<P: Payload> {
    idx: SpatialIdx,
    name: String,
    structure: Substructure<P>,
}

/// Named substructures keyed by [`SpatialIdx`].
///
/// Entries are kept ordered by key, so fan-out queries visit substructures
/// in key order.
#[derive(Clone, Debug)]
pub struct SpatialAccelerationCollection<P: Payload> {
    entries: Vec<Entry<P>>,
}

impl<P: Payload> Default for SpatialAccelerationCollection<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P: Payload> SpatialAccelerationCollection<P> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a substructure under `idx`.
    pub fn add_substructure(
        &mut self,
        idx: SpatialIdx,
        name: impl Into<String>,
        structure: impl Into<Substructure<P>>,
    ) -> Result<(), AccelError> {
        match self.position(idx) {
            Ok(_) => Err(AccelError::DuplicateSubstructure(idx)),
            Err(at) => {
                self.entries.insert(
                    at,
                    Entry {
                        idx,
                        name: name.into(),
                        structure: structure.into(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Unregister and return the substructure at `idx`.
    pub fn remove_substructure(&mut self, idx: SpatialIdx) -> Option<Substructure<P>> {
        let at = self.position(idx).ok()?;
        Some(self.entries.remove(at).structure)
    }

    /// The substructure at `idx`.
    pub fn get(&self, idx: SpatialIdx) -> Option<&Substructure<P>> {
        let at = self.position(idx).ok()?;
        Some(&self.entries[at].structure)
    }

    /// The substructure at `idx`, mutably.
    pub fn get_mut(&mut self, idx: SpatialIdx) -> Option<&mut Substructure<P>> {
        let at = self.position(idx).ok()?;
        Some(&mut self.entries[at].structure)
    }

    /// The name the substructure at `idx` was registered with.
    pub fn name(&self, idx: SpatialIdx) -> Option<&str> {
        let at = self.position(idx).ok()?;
        Some(&self.entries[at].name)
    }

    /// Number of registered substructures.
    pub fn num_substructures(&self) -> usize {
        self.entries.len()
    }

    /// Iterate `(key, name, substructure)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (SpatialIdx, &str, &Substructure<P>)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.idx, e.name.as_str(), &e.structure))
    }

    /// Start tracking a payload in the substructure at `idx`.
    ///
    /// A payload may live in only one substructure at a time.
    pub fn insert_element(
        &mut self,
        idx: SpatialIdx,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        if self.contains_payload(payload) {
            return Err(AccelError::DuplicatePayload);
        }
        self.target_mut(idx)?
            .insert_element(payload, bounds, has_bounds)
    }

    /// Move a payload, in the substructure at `target` or wherever it lives.
    pub fn update_element_in(
        &mut self,
        target: Option<SpatialIdx>,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        self.owner_mut(target, payload)?
            .update_element(payload, bounds, has_bounds)
    }

    /// Stop tracking a payload, in the substructure at `target` or wherever it lives.
    pub fn remove_element_in(
        &mut self,
        target: Option<SpatialIdx>,
        payload: P,
    ) -> Result<(), AccelError> {
        self.owner_mut(target, payload)?.remove_element(payload)
    }

    /// Raycast one substructure, or all of them sharing one query length.
    pub fn raycast_in<V: CastVisitor<P>>(
        &self,
        target: Option<SpatialIdx>,
        origin: Vec3,
        dir: Vec3,
        length: f32,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        let mut length = QueryLength::new(length);
        self.cast_in(target, &Cast::raycast(origin, dir), &mut length, visitor)
    }

    /// Sweep a box through one substructure, or all of them sharing one query length.
    pub fn sweep_in<V: CastVisitor<P>>(
        &self,
        target: Option<SpatialIdx>,
        origin: Vec3,
        dir: Vec3,
        length: f32,
        half_extents: Vec3,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        let mut length = QueryLength::new(length);
        let cast = Cast::sweep(origin, dir, half_extents);
        self.cast_in(target, &cast, &mut length, visitor)
    }

    /// Overlap query against one substructure or all of them.
    pub fn overlap_in<V: OverlapVisitor<P>>(
        &self,
        target: Option<SpatialIdx>,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        match target {
            Some(idx) => self.target(idx)?.overlap_with(bounds, visitor),
            None => self.overlap_with(bounds, visitor),
        }
    }

    /// Payloads intersecting `bounds` in one substructure or all of them.
    pub fn find_all_intersections_in(
        &self,
        target: Option<SpatialIdx>,
        bounds: &Aabb3D,
    ) -> Result<Vec<P>, AccelError> {
        match target {
            Some(idx) => self.target(idx)?.find_all_intersections(bounds),
            None => self.find_all_intersections(bounds),
        }
    }

    /// Key of the substructure tracking `payload`.
    pub fn owner_of(&self, payload: P) -> Option<SpatialIdx> {
        self.entries
            .iter()
            .find(|e| e.structure.contains_payload(payload))
            .map(|e| e.idx)
    }

    fn cast_in<V: CastVisitor<P>>(
        &self,
        target: Option<SpatialIdx>,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        match target {
            Some(idx) => self.target(idx)?.cast_with(cast, length, visitor),
            None => self.cast_with(cast, length, visitor),
        }
    }

    fn position(&self, idx: SpatialIdx) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&idx, |e| e.idx)
    }

    fn target(&self, idx: SpatialIdx) -> Result<&Substructure<P>, AccelError> {
        self.get(idx).ok_or(AccelError::UnknownSubstructure(idx))
    }

    fn target_mut(&mut self, idx: SpatialIdx) -> Result<&mut Substructure<P>, AccelError> {
        self.get_mut(idx).ok_or(AccelError::UnknownSubstructure(idx))
    }

    fn owner_mut(
        &mut self,
        target: Option<SpatialIdx>,
        payload: P,
    ) -> Result<&mut Substructure<P>, AccelError> {
        match target {
            Some(idx) => self.target_mut(idx),
            None => self
                .entries
                .iter_mut()
                .find(|e| e.structure.contains_payload(payload))
                .map(|e| &mut e.structure)
                .ok_or(AccelError::UnknownPayload),
        }
    }
}

/// Fan-out over every substructure.
impl<P: Payload> SpatialAcceleration<P> for SpatialAccelerationCollection<P> {
    fn cast_with<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        for entry in &self.entries {
            if !entry.structure.cast_with(cast, length, visitor)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn overlap_with<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        for entry in &self.entries {
            if !entry.structure.overlap_with(bounds, visitor)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn update_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        self.update_element_in(None, payload, bounds, has_bounds)
    }

    fn remove_element(&mut self, payload: P) -> Result<(), AccelError> {
        self.remove_element_in(None, payload)
    }

    fn contains_payload(&self, payload: P) -> bool {
        self.entries
            .iter()
            .any(|e| e.structure.contains_payload(payload))
    }

    fn len(&self) -> usize {
        self.entries.iter().map(|e| e.structure.len()).sum()
    }

    fn global_objects(&self) -> Vec<BoundsElement<P>> {
        self.entries
            .iter()
            .flat_map(|e| e.structure.global_objects())
            .collect()
    }

    fn num_dirty_elements(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.structure.num_dirty_elements())
            .sum()
    }

    fn is_build_complete(&self) -> bool {
        self.entries.iter().all(|e| e.structure.is_build_complete())
    }

    fn progress_time_slicing(&mut self, force_complete: bool) -> Result<bool, AccelError> {
        let mut complete = true;
        for entry in &mut self.entries {
            if !entry.structure.is_build_complete() {
                complete &= entry.structure.progress_time_slicing(force_complete)?;
            }
        }
        Ok(complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::query::CastHit;
    use alloc::vec;

    const STATIC: SpatialIdx = SpatialIdx::new(0, 0);
    const DYNAMIC: SpatialIdx = SpatialIdx::new(1, 0);

    fn cube(x: f32, size: f32) -> Aabb3D {
        Aabb3D::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + size, size, size))
    }

    fn collection() -> SpatialAccelerationCollection<u32> {
        let config = TreeConfig::default().with_max_children_in_leaf(2);
        let statics = (0..5).map(|i| (i, Some(cube(i as f32 * 10.0, 1.0))));
        let dynamics = (100..105).map(|i| (i, Some(cube((i - 100) as f32 * 10.0 + 5.0, 1.0))));
        let mut c = SpatialAccelerationCollection::new();
        c.add_substructure(
            DYNAMIC,
            "dynamic",
            GridAccel::from_elements(dynamics, config).unwrap(),
        )
        .unwrap();
        c.add_substructure(
            STATIC,
            "static",
            AabbTree::<u32>::from_elements(statics, config).unwrap(),
        )
        .unwrap();
        c
    }

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn entries_are_ordered_and_named() {
        let mut c = collection();
        let keys: Vec<_> = c.iter().map(|(idx, name, _)| (idx, name)).collect();
        assert_eq!(keys, vec![(STATIC, "static"), (DYNAMIC, "dynamic")]);
        assert_eq!(
            c.add_substructure(STATIC, "again", AabbTree::<u32>::new(TreeConfig::default())),
            Err(AccelError::DuplicateSubstructure(STATIC))
        );
        assert!(c.remove_substructure(STATIC).is_some());
        assert_eq!(c.num_substructures(), 1);
        assert_eq!(c.name(DYNAMIC), Some("dynamic"));
    }

    #[test]
    fn targeted_and_fanned_out_overlap() {
        let c = collection();
        let q = Aabb3D::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(16.0, 1.0, 1.0));
        assert_eq!(
            sorted(c.find_all_intersections_in(Some(STATIC), &q).unwrap()),
            vec![0, 1]
        );
        assert_eq!(
            sorted(c.find_all_intersections_in(Some(DYNAMIC), &q).unwrap()),
            vec![100, 101]
        );
        assert_eq!(
            sorted(c.find_all_intersections_in(None, &q).unwrap()),
            vec![0, 1, 100, 101]
        );
        let missing = SpatialIdx::new(9, 9);
        assert_eq!(
            c.find_all_intersections_in(Some(missing), &q),
            Err(AccelError::UnknownSubstructure(missing))
        );
    }

    #[test]
    fn fan_out_cast_shares_blocking_length() {
        let c = collection();
        let mut best = None;
        c.raycast_in(
            None,
            Vec3::new(-1.0, 0.5, 0.5),
            Vec3::X,
            1000.0,
            &mut |h: &CastHit<u32>, len: &mut QueryLength| {
                assert!(h.toi <= len.get(), "hit reported beyond the shared length");
                len.shrink_to(h.toi);
                best = Some(h.payload);
                true
            },
        )
        .unwrap();
        // The static tree is visited first and blocks the grid beyond x = 0.
        assert_eq!(best, Some(0));
    }

    #[test]
    fn mutations_find_the_owning_substructure() {
        let mut c = collection();
        assert_eq!(
            c.insert_element(STATIC, 101, cube(0.0, 1.0), true),
            Err(AccelError::DuplicatePayload)
        );
        c.insert_element(STATIC, 7, cube(200.0, 1.0), true).unwrap();
        assert_eq!(c.owner_of(7), Some(STATIC));

        c.update_element_in(None, 102, cube(300.0, 1.0), true).unwrap();
        let far = Aabb3D::new(Vec3::new(150.0, 0.0, 0.0), Vec3::new(400.0, 1.0, 1.0));
        assert_eq!(sorted(c.find_all_intersections(&far).unwrap()), vec![7, 102]);

        c.remove_element_in(Some(DYNAMIC), 102).unwrap();
        assert_eq!(
            c.remove_element_in(Some(STATIC), 103),
            Err(AccelError::UnknownPayload)
        );
        assert_eq!(c.remove_element(999), Err(AccelError::UnknownPayload));
        assert_eq!(c.len(), 10);
    }
}
