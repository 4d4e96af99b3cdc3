// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use core::fmt::Debug;
use core::hash::Hash;

use glam::Vec3;

use crate::query::QueryRay;

/// Identity stored by the acceleration structures.
///
/// Payloads are weak references to simulated bodies (indices or handles).
/// Structures copy and hash them for lookup but never own what they refer to.
pub trait Payload: Copy + Eq + Hash + Debug {}

impl<T: Copy + Eq + Hash + Debug> Payload for T {}

/// Axis-aligned bounding box in 3D.
///
/// The edge of the box is part of the box: two boxes sharing a face
/// intersect.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb3D {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb3D {
    /// A box covering all of space. Bodies without bounds are stored with it.
    pub const INFINITE: Self = Self {
        min: Vec3::NEG_INFINITY,
        max: Vec3::INFINITY,
    };

    /// Create a new AABB from min/max corners.
    #[inline(always)]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Whether `other` lies entirely inside this AABB.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Determines whether this AABB overlaps with another in any way.
    ///
    /// # Examples
    ///
    /// ```
    /// use glam::Vec3;
    /// use understory_accel::Aabb3D;
    ///
    /// let a = Aabb3D::new(Vec3::ZERO, Vec3::splat(10.0));
    /// let b = Aabb3D::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0));
    /// assert!(a.intersects(&b));
    ///
    /// let c = Aabb3D::new(Vec3::new(11.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0));
    /// assert!(!a.intersects(&c));
    /// ```
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Grow this AABB so it also encloses `other`.
    #[inline]
    pub fn grow_to_include(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// The smallest AABB enclosing both AABBs.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Size of the box along each axis.
    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Largest extent over all axes.
    #[inline]
    pub fn max_extent(&self) -> f32 {
        self.extents().max_element()
    }

    /// Index of the axis with the largest extent. Ties go to the earlier axis.
    #[inline]
    pub fn largest_axis(&self) -> usize {
        let e = self.extents();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }

    /// Whether both corners are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Grow the box by `thickness` on every side.
    #[inline]
    pub fn thickened(&self, thickness: f32) -> Self {
        self.inflated(Vec3::splat(thickness))
    }

    /// Minkowski sum of the box with a box of the given half extents.
    #[inline]
    pub fn inflated(&self, half_extents: Vec3) -> Self {
        Self {
            min: self.min - half_extents,
            max: self.max + half_extents,
        }
    }

    /// Slab test of a ray against this box within `[0, max_length]`.
    ///
    /// Returns the entry time of impact and the entry position. A ray that
    /// starts inside the box hits at time zero. Axes flagged parallel in the
    /// ray are tested by containment of the origin and never divide.
    #[inline]
    pub fn raycast_fast(&self, ray: &QueryRay, max_length: f32) -> Option<(f32, Vec3)> {
        let mut t_enter = 0.0_f32;
        let mut t_exit = max_length;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            if ray.parallel.is_parallel(axis) {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = ray.inv_dir[axis];
            let t0 = (self.min[axis] - origin) * inv;
            let t1 = (self.max[axis] - origin) * inv;
            let (near, far) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            t_enter = t_enter.max(near);
            t_exit = t_exit.min(far);
            if t_enter > t_exit {
                return None;
            }
        }
        Some((t_enter, ray.origin + ray.dir * t_enter))
    }
}

/// A payload together with its world-space bounds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundsElement<P> {
    /// Identity of the body.
    pub payload: P,
    /// Bounds of the body. Bodies without bounds use [`Aabb3D::INFINITE`].
    pub bounds: Aabb3D,
}

impl<P> BoundsElement<P> {
    /// Pair a payload with its bounds.
    #[inline]
    pub const fn new(payload: P, bounds: Aabb3D) -> Self {
        Self { payload, bounds }
    }
}

pub(crate) fn union_all<'a, P: 'a>(
    elements: impl IntoIterator<Item = &'a BoundsElement<P>>,
) -> Option<Aabb3D> {
    let mut it = elements.into_iter();
    let first = it.next()?.bounds;
    Some(it.fold(first, |acc, e| acc.union(&e.bounds)))
}
