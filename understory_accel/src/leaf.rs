// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Leaf storage used at the bottom of an [`AabbTree`][crate::AabbTree].

use alloc::vec::Vec;
use core::fmt::Debug;

use smallvec::SmallVec;

use crate::config::TreeConfig;
use crate::error::AccelError;
use crate::query::{Cast, QueryLength};
use crate::types::{Aabb3D, BoundsElement, Payload};
use crate::visitor::{CastVisitor, OverlapVisitor, cast_element, overlap_element};

/// Storage for the elements of one tree leaf.
///
/// Query methods return `false` once the visitor asks to stop.
pub trait LeafStorage<P: Payload>: Clone + Debug {
    /// Build a leaf from the elements of one finished build job.
    ///
    /// Elements the leaf refuses to store are pushed to `overflow`; the
    /// owner keeps them in its global list.
    fn build(
        elements: Vec<BoundsElement<P>>,
        config: &TreeConfig,
        overflow: &mut Vec<BoundsElement<P>>,
    ) -> Result<Self, AccelError>;

    /// Number of stored elements.
    fn len(&self) -> usize;

    /// Whether the leaf stores no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the leaf would store an element with these bounds.
    ///
    /// Bounds the leaf refuses are moved out by the owner instead of being
    /// updated in place.
    fn accepts(&self, _bounds: &Aabb3D) -> bool {
        true
    }

    /// Replace the bounds of a stored payload. Returns `false` if absent.
    fn update(&mut self, payload: P, bounds: Aabb3D) -> bool;

    /// Remove a stored payload.
    fn remove(&mut self, payload: P) -> Option<BoundsElement<P>>;

    /// Call `f` for every stored element.
    fn for_each_element<F: FnMut(&BoundsElement<P>)>(&self, f: F);

    /// Visit stored elements intersecting `bounds`.
    fn overlap_fast<V: OverlapVisitor<P>>(&self, bounds: &Aabb3D, visitor: &mut V) -> bool;

    /// Visit stored elements hit by the cast.
    fn cast_fast<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> bool;
}

/// Unordered bucket of elements, queried by linear scan.
#[derive(Clone, Debug)]
pub struct LeafArray<P> {
    elements: SmallVec<[BoundsElement<P>; 8]>,
}

impl<P> Default for LeafArray<P> {
    fn default() -> Self {
        Self {
            elements: SmallVec::new(),
        }
    }
}

impl<P: Payload> LeafStorage<P> for LeafArray<P> {
    fn build(
        elements: Vec<BoundsElement<P>>,
        _config: &TreeConfig,
        _overflow: &mut Vec<BoundsElement<P>>,
    ) -> Result<Self, AccelError> {
        Ok(Self {
            elements: SmallVec::from_vec(elements),
        })
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn update(&mut self, payload: P, bounds: Aabb3D) -> bool {
        match self.elements.iter_mut().find(|e| e.payload == payload) {
            Some(e) => {
                e.bounds = bounds;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, payload: P) -> Option<BoundsElement<P>> {
        let pos = self.elements.iter().position(|e| e.payload == payload)?;
        Some(self.elements.swap_remove(pos))
    }

    fn for_each_element<F: FnMut(&BoundsElement<P>)>(&self, f: F) {
        self.elements.iter().for_each(f);
    }

    fn overlap_fast<V: OverlapVisitor<P>>(&self, bounds: &Aabb3D, visitor: &mut V) -> bool {
        self.elements
            .iter()
            .all(|e| overlap_element(e, bounds, visitor))
    }

    fn cast_fast<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> bool {
        self.elements
            .iter()
            .all(|e| cast_element(e, cast, length, visitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CastHit;
    use alloc::vec;
    use glam::Vec3;

    fn leaf() -> LeafArray<u32> {
        let elements = (0..4)
            .map(|i| {
                let x = i as f32 * 10.0;
                BoundsElement::new(i, Aabb3D::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0)))
            })
            .collect();
        LeafArray::build(elements, &TreeConfig::default(), &mut Vec::new()).unwrap()
    }

    #[test]
    fn remove_swaps_and_update_is_in_place() {
        let mut l = leaf();
        assert_eq!(l.remove(1).map(|e| e.payload), Some(1));
        assert_eq!(l.len(), 3);
        assert!(l.remove(1).is_none());
        let moved = Aabb3D::new(Vec3::splat(-5.0), Vec3::splat(-4.0));
        assert!(l.update(2, moved));
        assert!(!l.update(1, moved), "update of an absent payload is a no-op");
        let mut hits = Vec::new();
        l.overlap_fast(&Aabb3D::new(Vec3::splat(-6.0), Vec3::splat(-4.5)), &mut |e: &BoundsElement<u32>| {
            hits.push(e.payload);
            true
        });
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn cast_visits_every_hit_until_stopped() {
        let l = leaf();
        let cast = Cast::raycast(Vec3::new(-1.0, 0.5, 0.5), Vec3::X);
        let mut all = Vec::new();
        let mut len = QueryLength::new(100.0);
        let finished = l.cast_fast(&cast, &mut len, &mut |h: &CastHit<u32>, _: &mut QueryLength| {
            all.push(h.payload);
            true
        });
        assert!(finished);
        assert_eq!(all, vec![0, 1, 2, 3]);

        let mut first = Vec::new();
        let mut len = QueryLength::new(100.0);
        let finished = l.cast_fast(&cast, &mut len, &mut |h: &CastHit<u32>, _: &mut QueryLength| {
            first.push(h.payload);
            false
        });
        assert!(!finished);
        assert_eq!(first.len(), 1);
    }
}
