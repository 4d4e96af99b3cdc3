// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The query and mutation interface shared by every structure.

use alloc::vec::Vec;

use glam::Vec3;

use crate::error::AccelError;
use crate::query::{Cast, QueryLength};
use crate::types::{Aabb3D, BoundsElement, Payload};
use crate::visitor::{CastVisitor, OverlapVisitor};

/// A spatial acceleration structure over payloads with 3D bounds.
///
/// Implemented by [`AabbTree`][crate::AabbTree], [`GridAccel`][crate::GridAccel],
/// [`Substructure`][crate::Substructure] and
/// [`SpatialAccelerationCollection`][crate::SpatialAccelerationCollection].
///
/// Query methods return `Ok(false)` when a visitor stopped the query early.
pub trait SpatialAcceleration<P: Payload> {
    /// Visit everything hit by `cast` within `length`.
    ///
    /// The visitor may shrink `length`; the remaining traversal honors it.
    fn cast_with<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError>;

    /// Visit everything whose bounds intersect `bounds`.
    fn overlap_with<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError>;

    /// Move a tracked payload to new bounds.
    ///
    /// With `has_bounds == false` the payload becomes unbounded and joins the
    /// global list; `bounds` is ignored.
    fn update_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError>;

    /// Stop tracking a payload.
    fn remove_element(&mut self, payload: P) -> Result<(), AccelError>;

    /// Whether the payload is tracked.
    fn contains_payload(&self, payload: P) -> bool;

    /// Number of tracked payloads.
    fn len(&self) -> usize;

    /// Whether no payloads are tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements kept outside the spatial topology (unbounded or oversized).
    fn global_objects(&self) -> Vec<BoundsElement<P>>;

    /// Elements waiting for the next rebuild.
    fn num_dirty_elements(&self) -> usize;

    /// Whether any time-sliced build has finished.
    fn is_build_complete(&self) -> bool;

    /// Advance a time-sliced build by one slice, or to completion with
    /// `force_complete`. Returns whether the build is complete.
    fn progress_time_slicing(&mut self, force_complete: bool) -> Result<bool, AccelError>;

    /// Cast a ray from `origin` along `dir`.
    ///
    /// Times of impact are in multiples of `dir`, so with a unit direction
    /// `length` is a distance.
    fn raycast<V: CastVisitor<P>>(
        &self,
        origin: Vec3,
        dir: Vec3,
        length: f32,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        let mut length = QueryLength::new(length);
        self.cast_with(&Cast::raycast(origin, dir), &mut length, visitor)
    }

    /// Sweep a box of `half_extents` centered on `origin` along `dir`.
    fn sweep<V: CastVisitor<P>>(
        &self,
        origin: Vec3,
        dir: Vec3,
        length: f32,
        half_extents: Vec3,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        let mut length = QueryLength::new(length);
        self.cast_with(&Cast::sweep(origin, dir, half_extents), &mut length, visitor)
    }

    /// Visit everything whose bounds intersect `bounds`.
    fn overlap<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        self.overlap_with(bounds, visitor)
    }

    /// Collect the payloads whose bounds intersect `bounds`.
    ///
    /// Order is unspecified.
    fn find_all_intersections(&self, bounds: &Aabb3D) -> Result<Vec<P>, AccelError> {
        let mut out = Vec::new();
        self.overlap_with(bounds, &mut |e: &BoundsElement<P>| {
            out.push(e.payload);
            true
        })?;
        Ok(out)
    }
}
