// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational body registry with batched commits into a collection.

use alloc::vec::Vec;

use understory_accel::{AccelError, Aabb3D, SpatialAccelerationCollection, SpatialIdx};

use crate::pairs::{CollisionGroup, ParticleView};

/// Generational handle for bodies.
///
/// Also the payload stored in the acceleration structures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyKey(u32, u32);

impl BodyKey {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Body keys are intentionally 32-bit; higher bits are truncated by design."
    )]
    const fn new(idx: usize, generation: u32) -> Self {
        Self(idx as u32, generation)
    }

    const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Per-body data.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Body {
    /// World-space bounds, or `None` for an unbounded body.
    pub bounds: Option<Aabb3D>,
    /// Margin added on every side of `bounds` when indexing and querying.
    pub thickness: f32,
    /// Collision filtering group.
    pub group: CollisionGroup,
    /// Substructure the body is indexed in.
    pub target: SpatialIdx,
}

impl Body {
    /// A body with no thickness in the default group.
    pub fn new(target: SpatialIdx, bounds: Option<Aabb3D>) -> Self {
        Self {
            bounds,
            thickness: 0.0,
            group: CollisionGroup::ALL,
            target,
        }
    }

    /// Set the thickness.
    pub fn with_thickness(mut self, thickness: f32) -> Self {
        self.thickness = thickness;
        self
    }

    /// Set the collision group.
    pub fn with_group(mut self, group: CollisionGroup) -> Self {
        self.group = group;
        self
    }

    /// Bounds as stored in the acceleration structure.
    pub fn indexed_bounds(&self) -> Option<Aabb3D> {
        self.bounds.map(|b| b.thickened(self.thickness))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mark {
    Added,
    Updated,
    Removed,
}

#[derive(Clone, Debug)]
struct Live {
    body: Body,
    mark: Option<Mark>,
    // Bounds last written to the collection, for moved damage.
    committed: Option<Option<Aabb3D>>,
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    live: Option<Live>,
}

/// Keys touched by a [`BodySet::commit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Damage {
    /// Bodies inserted into the collection.
    pub added: Vec<BodyKey>,
    /// Bodies removed from the collection.
    pub removed: Vec<BodyKey>,
    /// Bodies whose indexed bounds changed.
    pub moved: Vec<BodyKey>,
}

impl Damage {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty()
    }
}

/// A [`BodySet::commit`] that stopped on an index error.
///
/// `damage` lists the changes applied before the failure; they are no longer
/// pending and will not be reported by a retry.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("commit stopped after a partial flush: {source}")]
pub struct CommitError {
    /// Changes applied before the failure.
    pub damage: Damage,
    /// The index error that stopped the commit.
    pub source: AccelError,
}

/// Bodies with pending changes, flushed into a
/// [`SpatialAccelerationCollection`] by [`commit`][BodySet::commit].
///
/// Inserting, updating, and removing only record marks. A slot freed by
/// [`remove`][BodySet::remove] is reused only after the removal has been
/// committed, and reuse bumps the slot's generation, so a stale key never
/// resolves to a newer body.
#[derive(Clone, Debug, Default)]
pub struct BodySet {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    len: usize,
}

impl BodySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bodies, committed or not.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no live bodies.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a body. It is indexed on the next commit.
    pub fn insert(&mut self, body: Body) -> BodyKey {
        self.len += 1;
        let live = Some(Live {
            body,
            mark: Some(Mark::Added),
            committed: None,
        });
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx];
            slot.generation = slot.generation.wrapping_add(1);
            slot.live = live;
            BodyKey::new(idx, slot.generation)
        } else {
            self.slots.push(Slot {
                generation: 1,
                live,
            });
            BodyKey::new(self.slots.len() - 1, 1)
        }
    }

    /// Data of a live body.
    pub fn get(&self, key: BodyKey) -> Option<&Body> {
        self.live(key).map(|l| &l.body)
    }

    /// Whether `key` refers to a live body.
    pub fn contains(&self, key: BodyKey) -> bool {
        self.live(key).is_some()
    }

    /// Iterate live bodies in key order.
    pub fn iter(&self) -> impl Iterator<Item = (BodyKey, &Body)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            let live = slot.live.as_ref()?;
            (live.mark != Some(Mark::Removed)).then_some((BodyKey::new(idx, slot.generation), &live.body))
        })
    }

    /// Change a body's bounds. Returns `false` for a stale key.
    pub fn update(&mut self, key: BodyKey, bounds: Option<Aabb3D>) -> bool {
        self.modify(key, |body| body.bounds = bounds)
    }

    /// Change a body's thickness. Returns `false` for a stale key.
    pub fn set_thickness(&mut self, key: BodyKey, thickness: f32) -> bool {
        self.modify(key, |body| body.thickness = thickness)
    }

    /// Change a body's collision group. Returns `false` for a stale key.
    ///
    /// Groups only filter pairs, so this does not touch the collection.
    pub fn set_group(&mut self, key: BodyKey, group: CollisionGroup) -> bool {
        match self.live_mut(key) {
            Some(live) => {
                live.body.group = group;
                true
            }
            None => false,
        }
    }

    /// Remove a body. Returns `false` for a stale key.
    ///
    /// A body that was never committed disappears at once; otherwise it is
    /// removed from the collection on the next commit.
    pub fn remove(&mut self, key: BodyKey) -> bool {
        let Some(live) = self.live_mut(key) else {
            return false;
        };
        if live.mark == Some(Mark::Added) {
            self.slots[key.idx()].live = None;
            self.free_list.push(key.idx());
        } else {
            live.mark = Some(Mark::Removed);
        }
        self.len -= 1;
        true
    }

    /// Flush pending changes into `collection`: removals first, then
    /// additions, then moves.
    ///
    /// On error the failing change and everything after it stay pending, so
    /// the commit can be retried. The error carries the damage of the changes
    /// that were applied.
    pub fn commit(
        &mut self,
        collection: &mut SpatialAccelerationCollection<BodyKey>,
    ) -> Result<Damage, CommitError> {
        let mut damage = Damage::default();
        match self.flush(collection, &mut damage) {
            Ok(()) => {
                tracing::debug!(
                    added = damage.added.len(),
                    removed = damage.removed.len(),
                    moved = damage.moved.len(),
                    "committed body changes"
                );
                Ok(damage)
            }
            Err(source) => {
                tracing::debug!(%source, applied = ?damage, "body commit stopped");
                Err(CommitError { damage, source })
            }
        }
    }

    fn flush(
        &mut self,
        collection: &mut SpatialAccelerationCollection<BodyKey>,
        damage: &mut Damage,
    ) -> Result<(), AccelError> {

        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            let Some(live) = slot.live.as_ref() else {
                continue;
            };
            if live.mark != Some(Mark::Removed) {
                continue;
            }
            let key = BodyKey::new(idx, slot.generation);
            collection.remove_element_in(Some(live.body.target), key)?;
            slot.live = None;
            self.free_list.push(idx);
            damage.removed.push(key);
        }

        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            let Some(live) = slot.live.as_mut() else {
                continue;
            };
            if live.mark != Some(Mark::Added) {
                continue;
            }
            let key = BodyKey::new(idx, slot.generation);
            let bounds = live.body.indexed_bounds();
            collection.insert_element(
                live.body.target,
                key,
                bounds.unwrap_or(Aabb3D::INFINITE),
                bounds.is_some(),
            )?;
            live.mark = None;
            live.committed = Some(bounds);
            damage.added.push(key);
        }

        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            let Some(live) = slot.live.as_mut() else {
                continue;
            };
            if live.mark != Some(Mark::Updated) {
                continue;
            }
            let key = BodyKey::new(idx, slot.generation);
            let bounds = live.body.indexed_bounds();
            if live.committed != Some(bounds) {
                collection.update_element_in(
                    Some(live.body.target),
                    key,
                    bounds.unwrap_or(Aabb3D::INFINITE),
                    bounds.is_some(),
                )?;
                live.committed = Some(bounds);
                damage.moved.push(key);
            }
            live.mark = None;
        }
        Ok(())
    }

    fn live(&self, key: BodyKey) -> Option<&Live> {
        let slot = self.slots.get(key.idx())?;
        if slot.generation != key.1 {
            return None;
        }
        slot.live.as_ref().filter(|l| l.mark != Some(Mark::Removed))
    }

    fn live_mut(&mut self, key: BodyKey) -> Option<&mut Live> {
        let slot = self.slots.get_mut(key.idx())?;
        if slot.generation != key.1 {
            return None;
        }
        slot.live.as_mut().filter(|l| l.mark != Some(Mark::Removed))
    }

    fn modify(&mut self, key: BodyKey, f: impl FnOnce(&mut Body)) -> bool {
        let Some(live) = self.live_mut(key) else {
            return false;
        };
        f(&mut live.body);
        if live.mark.is_none() {
            live.mark = Some(Mark::Updated);
        }
        true
    }
}

impl ParticleView<BodyKey> for BodySet {
    fn world_bounds(&self, body: BodyKey) -> Option<Aabb3D> {
        self.get(body).and_then(|b| b.bounds)
    }

    fn thickness(&self, body: BodyKey) -> f32 {
        self.get(body).map_or(0.0, |b| b.thickness)
    }

    fn should_ignore(&self, a: BodyKey, b: BodyKey) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => !a.group.collides_with(b.group),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use glam::Vec3;
    use understory_accel::{AabbTree, SpatialAcceleration, TreeConfig};

    const IDX: SpatialIdx = SpatialIdx::new(0, 0);

    fn collection() -> SpatialAccelerationCollection<BodyKey> {
        let mut c = SpatialAccelerationCollection::new();
        c.add_substructure(IDX, "bodies", AabbTree::<BodyKey>::new(TreeConfig::default()))
            .unwrap();
        c
    }

    fn cube(x: f32) -> Aabb3D {
        Aabb3D::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    fn everything() -> Aabb3D {
        Aabb3D::new(Vec3::splat(-1000.0), Vec3::splat(1000.0))
    }

    #[test]
    fn insert_update_commit_and_query() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k1 = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        let dmg = bodies.commit(&mut c).unwrap();
        assert_eq!(dmg.added, vec![k1]);

        bodies.update(k1, Some(cube(10.0)));
        let dmg = bodies.commit(&mut c).unwrap();
        assert_eq!(dmg.moved, vec![k1]);
        assert_eq!(c.find_all_intersections(&cube(10.5)).unwrap(), vec![k1]);
        assert!(c.find_all_intersections(&cube(0.0)).unwrap().is_empty());
    }

    #[test]
    fn added_then_removed_before_commit_is_ignored() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        assert!(bodies.remove(k));
        let dmg = bodies.commit(&mut c).unwrap();
        assert!(dmg.is_empty());
        assert_eq!(c.len(), 0);
        assert!(!bodies.contains(k));
    }

    #[test]
    fn removed_after_commit_reports_removed() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        bodies.commit(&mut c).unwrap();
        bodies.remove(k);
        assert!(!bodies.update(k, Some(cube(3.0))), "a removed body cannot move");
        let dmg = bodies.commit(&mut c).unwrap();
        assert_eq!(dmg.removed, vec![k]);
        assert!(dmg.added.is_empty());
        assert!(c.find_all_intersections(&everything()).unwrap().is_empty());
    }

    #[test]
    fn slot_is_not_reused_before_removal_is_flushed() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let a = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        bodies.commit(&mut c).unwrap();

        bodies.remove(a);
        let b = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        assert_ne!(a.idx(), b.idx(), "slot reused before the removal was committed");
        bodies.commit(&mut c).unwrap();

        let c_key = bodies.insert(Body::new(IDX, Some(cube(5.0))));
        assert_eq!(c_key.idx(), a.idx());
        assert_ne!(c_key, a);
        assert!(bodies.get(a).is_none(), "stale key resolved to a newer body");
        bodies.commit(&mut c).unwrap();

        let mut all = c.find_all_intersections(&everything()).unwrap();
        all.sort_unstable();
        assert_eq!(all, vec![c_key, b]);
    }

    #[test]
    fn unchanged_bounds_report_no_move() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        bodies.commit(&mut c).unwrap();
        bodies.update(k, Some(cube(0.0)));
        assert!(bodies.commit(&mut c).unwrap().is_empty());
    }

    #[test]
    fn thickness_inflates_indexed_bounds() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k = bodies.insert(Body::new(IDX, Some(cube(0.0))).with_thickness(2.0));
        bodies.commit(&mut c).unwrap();
        assert_eq!(c.find_all_intersections(&cube(2.5)).unwrap(), vec![k]);

        bodies.set_thickness(k, 0.0);
        let dmg = bodies.commit(&mut c).unwrap();
        assert_eq!(dmg.moved, vec![k]);
        assert!(c.find_all_intersections(&cube(2.5)).unwrap().is_empty());
    }

    #[test]
    fn unbounded_bodies_are_global() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let k = bodies.insert(Body::new(IDX, None));
        bodies.commit(&mut c).unwrap();
        let global: Vec<_> = c.global_objects().iter().map(|e| e.payload).collect();
        assert_eq!(global, vec![k]);
    }

    #[test]
    fn unknown_target_keeps_the_change_pending() {
        let mut c = collection();
        let mut bodies = BodySet::new();
        let gone = bodies.insert(Body::new(IDX, Some(cube(0.0))));
        bodies.commit(&mut c).unwrap();

        bodies.remove(gone);
        let placed = bodies.insert(Body::new(IDX, Some(cube(3.0))));
        let missing = SpatialIdx::new(7, 7);
        let late = bodies.insert(Body::new(missing, Some(cube(6.0))));
        let err = bodies.commit(&mut c).unwrap_err();
        assert_eq!(err.source, AccelError::UnknownSubstructure(missing));
        assert_eq!(err.damage.removed, vec![gone]);
        assert_eq!(err.damage.added, vec![placed], "applied changes are reported with the error");

        c.add_substructure(missing, "late", AabbTree::<BodyKey>::new(TreeConfig::default()))
            .unwrap();
        let retry = bodies.commit(&mut c).unwrap();
        assert_eq!(retry.added, vec![late]);
        assert!(retry.removed.is_empty());
    }
}
