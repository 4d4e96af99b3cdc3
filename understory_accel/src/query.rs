// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ray and sweep query parameters shared by every structure.

use glam::Vec3;

use crate::types::Aabb3D;

bitflags::bitflags! {
    /// Axes along which a query direction has no component.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ParallelAxes: u8 {
        /// Direction has no X component.
        const X = 0b0000_0001;
        /// Direction has no Y component.
        const Y = 0b0000_0010;
        /// Direction has no Z component.
        const Z = 0b0000_0100;
    }
}

impl ParallelAxes {
    /// Flag for a single axis index (0, 1 or 2).
    #[inline]
    pub const fn from_axis(axis: usize) -> Self {
        match axis {
            0 => Self::X,
            1 => Self::Y,
            _ => Self::Z,
        }
    }

    /// Whether the axis with this index is parallel.
    #[inline]
    pub const fn is_parallel(self, axis: usize) -> bool {
        self.contains(Self::from_axis(axis))
    }
}

/// A ray with its reciprocal direction precomputed.
///
/// Axes with a zero direction component are flagged in [`ParallelAxes`]
/// and their reciprocal is left at zero; slab tests never divide by them.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueryRay {
    /// Start of the ray.
    pub origin: Vec3,
    /// Direction. Times of impact are measured in multiples of this vector.
    pub dir: Vec3,
    /// Per-axis reciprocal of `dir`, zero on parallel axes.
    pub inv_dir: Vec3,
    /// Axes the ray does not move along.
    pub parallel: ParallelAxes,
}

impl QueryRay {
    /// Precompute a ray. A zero `dir` is valid and degenerates to a point test.
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        let mut inv_dir = Vec3::ZERO;
        let mut parallel = ParallelAxes::empty();
        for axis in 0..3 {
            if dir[axis] == 0.0 {
                parallel |= ParallelAxes::from_axis(axis);
            } else {
                inv_dir[axis] = 1.0 / dir[axis];
            }
        }
        Self {
            origin,
            dir,
            inv_dir,
            parallel,
        }
    }

    /// End point of the ray after `length`, keeping parallel axes exact.
    pub(crate) fn end_point(&self, length: f32) -> Vec3 {
        let mut end = self.origin;
        for axis in 0..3 {
            if !self.parallel.is_parallel(axis) {
                end[axis] += self.dir[axis] * length;
            }
        }
        end
    }
}

/// A raycast or a sweep of a box along a ray.
///
/// Sweeps are raycasts against bounds inflated by `half_extents`, so both
/// share one traversal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Cast {
    /// The swept ray.
    pub ray: QueryRay,
    /// Half extents of the swept box; zero for a raycast.
    pub half_extents: Vec3,
}

impl Cast {
    /// A plain raycast.
    pub fn raycast(origin: Vec3, dir: Vec3) -> Self {
        Self {
            ray: QueryRay::new(origin, dir),
            half_extents: Vec3::ZERO,
        }
    }

    /// A box of `half_extents` swept along the ray.
    pub fn sweep(origin: Vec3, dir: Vec3, half_extents: Vec3) -> Self {
        Self {
            ray: QueryRay::new(origin, dir),
            half_extents,
        }
    }

    /// Test `bounds` against the cast within `max_length`.
    #[inline]
    pub fn hit(&self, bounds: &Aabb3D, max_length: f32) -> Option<(f32, Vec3)> {
        if self.half_extents == Vec3::ZERO {
            bounds.raycast_fast(&self.ray, max_length)
        } else {
            bounds
                .inflated(self.half_extents)
                .raycast_fast(&self.ray, max_length)
        }
    }

    /// Bounds of everything the cast can touch within `length`.
    pub(crate) fn swept_bounds(&self, length: f32) -> Aabb3D {
        let end = self.ray.end_point(length);
        Aabb3D::new(self.ray.origin.min(end), self.ray.origin.max(end)).inflated(self.half_extents)
    }
}

/// The current reach of a raycast or sweep.
///
/// Visitors may shorten it to implement "closest blocking hit" queries.
/// It never grows, and shortening it only prunes work not yet done: hits
/// already reported stay reported.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueryLength {
    current: f32,
}

impl QueryLength {
    /// Start a query with the given reach.
    #[inline]
    pub const fn new(length: f32) -> Self {
        Self { current: length }
    }

    /// Current reach.
    #[inline]
    pub const fn get(&self) -> f32 {
        self.current
    }

    /// Shorten the reach to `length` if that is shorter than the current one.
    #[inline]
    pub fn shrink_to(&mut self, length: f32) {
        if length < self.current {
            self.current = length;
        }
    }
}

/// A candidate reported by a raycast or sweep.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CastHit<P> {
    /// Identity of the hit element.
    pub payload: P,
    /// Bounds of the hit element.
    pub bounds: Aabb3D,
    /// Entry time of impact along the ray.
    pub toi: f32,
    /// Position of the ray at `toi`.
    pub position: Vec3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_components_are_flagged_parallel() {
        let ray = QueryRay::new(Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(ray.parallel, ParallelAxes::X | ParallelAxes::Z);
        assert_eq!(ray.inv_dir, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(ray.end_point(f32::INFINITY).x, 0.0);
    }

    #[test]
    fn length_only_shrinks() {
        let mut len = QueryLength::new(10.0);
        len.shrink_to(20.0);
        assert_eq!(len.get(), 10.0);
        len.shrink_to(4.0);
        assert_eq!(len.get(), 4.0);
    }

    #[test]
    fn sweep_hits_inflated_bounds() {
        let b = Aabb3D::new(Vec3::new(5.0, 2.0, -1.0), Vec3::new(6.0, 3.0, 1.0));
        let ray_only = Cast::raycast(Vec3::ZERO, Vec3::X);
        assert!(ray_only.hit(&b, 100.0).is_none());
        let swept = Cast::sweep(Vec3::ZERO, Vec3::X, Vec3::splat(2.0));
        let (toi, _) = swept.hit(&b, 100.0).unwrap();
        assert_eq!(toi, 3.0);
    }
}
