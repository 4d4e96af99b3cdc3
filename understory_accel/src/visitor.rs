// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query visitors.
//!
//! Visitors receive candidates and return whether the query should continue.
//! Returning `false` stops the query at once (any-hit semantics).

use crate::query::{Cast, CastHit, QueryLength};
use crate::types::{Aabb3D, BoundsElement};

/// Receives elements whose bounds intersect an overlap query.
pub trait OverlapVisitor<P> {
    /// Visit one element. Return `false` to stop the query.
    fn visit_overlap(&mut self, element: &BoundsElement<P>) -> bool;
}

impl<P, F> OverlapVisitor<P> for F
where
    F: FnMut(&BoundsElement<P>) -> bool,
{
    #[inline]
    fn visit_overlap(&mut self, element: &BoundsElement<P>) -> bool {
        self(element)
    }
}

/// Receives elements hit by a raycast or sweep.
///
/// The visitor may shorten `length`; elements and subtrees entered beyond
/// the new length are skipped from then on.
pub trait CastVisitor<P> {
    /// Visit one hit. Return `false` to stop the query.
    fn visit_cast(&mut self, hit: &CastHit<P>, length: &mut QueryLength) -> bool;
}

impl<P, F> CastVisitor<P> for F
where
    F: FnMut(&CastHit<P>, &mut QueryLength) -> bool,
{
    #[inline]
    fn visit_cast(&mut self, hit: &CastHit<P>, length: &mut QueryLength) -> bool {
        self(hit, length)
    }
}

#[inline]
pub(crate) fn overlap_element<P, V: OverlapVisitor<P>>(
    element: &BoundsElement<P>,
    bounds: &Aabb3D,
    visitor: &mut V,
) -> bool {
    if element.bounds.intersects(bounds) {
        visitor.visit_overlap(element)
    } else {
        true
    }
}

#[inline]
pub(crate) fn cast_element<P: Copy, V: CastVisitor<P>>(
    element: &BoundsElement<P>,
    cast: &Cast,
    length: &mut QueryLength,
    visitor: &mut V,
) -> bool {
    match cast.hit(&element.bounds, length.get()) {
        Some((toi, position)) => {
            let hit = CastHit {
                payload: element.payload,
                bounds: element.bounds,
                toi,
                position,
            };
            visitor.visit_cast(&hit, length)
        }
        None => true,
    }
}
