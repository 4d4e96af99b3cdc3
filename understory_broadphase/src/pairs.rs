// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Candidate pair generation.

use alloc::vec::Vec;

use understory_accel::{AccelError, Aabb3D, BoundsElement, Payload, SpatialAcceleration};

/// Collision filtering group.
///
/// Group `0` collides with everything and [`DISABLED`][Self::DISABLED] with
/// nothing. Any other two groups collide only when they are equal.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CollisionGroup(pub i32);

impl CollisionGroup {
    /// Collides with every enabled group.
    pub const ALL: Self = Self(0);
    /// Collides with nothing.
    pub const DISABLED: Self = Self(-1);

    /// Whether bodies in these groups may collide.
    pub const fn collides_with(self, other: Self) -> bool {
        if self.0 == Self::DISABLED.0 || other.0 == Self::DISABLED.0 {
            return false;
        }
        self.0 == 0 || other.0 == 0 || self.0 == other.0
    }
}

/// What the pair producer needs to know about bodies.
pub trait ParticleView<P> {
    /// World-space bounds, or `None` for an unbounded body.
    fn world_bounds(&self, body: P) -> Option<Aabb3D>;

    /// Margin added around the bounds when querying.
    fn thickness(&self, _body: P) -> f32 {
        0.0
    }

    /// Whether a candidate pair should be dropped.
    fn should_ignore(&self, a: P, b: P) -> bool;
}

/// Find every pair of bodies whose indexed bounds overlap.
///
/// Each body in `bodies` is queried with its thickened bounds. Unbounded
/// bodies are paired with the structure's global objects only; pairs between
/// an unbounded and a bounded body are found from the bounded side.
///
/// Pairs are `(min, max)`, sorted, and free of duplicates and self pairs.
pub fn find_pairs<P, V, S>(
    view: &V,
    accel: &S,
    bodies: impl IntoIterator<Item = P>,
) -> Result<Vec<(P, P)>, AccelError>
where
    P: Payload + Ord,
    V: ParticleView<P>,
    S: SpatialAcceleration<P>,
{
    let mut pairs = Vec::new();
    let mut candidates = Vec::new();
    for body in bodies {
        candidates.clear();
        match view.world_bounds(body) {
            Some(bounds) => {
                let query = bounds.thickened(view.thickness(body));
                accel.overlap(&query, &mut |e: &BoundsElement<P>| {
                    candidates.push(e.payload);
                    true
                })?;
            }
            None => candidates.extend(accel.global_objects().iter().map(|e| e.payload)),
        }
        for &other in &candidates {
            if other == body || view.should_ignore(body, other) {
                continue;
            }
            pairs.push(if body < other { (body, other) } else { (other, body) });
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
    tracing::trace!(pairs = pairs.len(), "found candidate pairs");
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bodies::{Body, BodyKey, BodySet};
    use alloc::vec;
    use glam::Vec3;
    use understory_accel::{AabbTree, GridAccel, SpatialAccelerationCollection, SpatialIdx, TreeConfig};

    const STATIC: SpatialIdx = SpatialIdx::new(0, 0);
    const DYNAMIC: SpatialIdx = SpatialIdx::new(1, 0);

    fn cube(x: f32) -> Aabb3D {
        Aabb3D::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    fn world() -> SpatialAccelerationCollection<BodyKey> {
        let mut c = SpatialAccelerationCollection::new();
        c.add_substructure(STATIC, "static", AabbTree::<BodyKey>::new(TreeConfig::default()))
            .unwrap();
        c.add_substructure(DYNAMIC, "dynamic", GridAccel::<BodyKey>::new(TreeConfig::default()))
            .unwrap();
        c
    }

    fn all_pairs(bodies: &BodySet, c: &SpatialAccelerationCollection<BodyKey>) -> Vec<(BodyKey, BodyKey)> {
        find_pairs(bodies, c, bodies.iter().map(|(k, _)| k)).unwrap()
    }

    #[test]
    fn group_rules() {
        let a = CollisionGroup(3);
        let b = CollisionGroup(4);
        assert!(CollisionGroup::ALL.collides_with(a));
        assert!(a.collides_with(a));
        assert!(!a.collides_with(b));
        assert!(!CollisionGroup::DISABLED.collides_with(CollisionGroup::ALL));
        assert!(!CollisionGroup::ALL.collides_with(CollisionGroup::DISABLED));
    }

    #[test]
    fn overlapping_bodies_pair_once_across_substructures() {
        let mut c = world();
        let mut bodies = BodySet::new();
        let floor = bodies.insert(Body::new(STATIC, Some(cube(0.0))));
        let ball = bodies.insert(Body::new(DYNAMIC, Some(cube(0.5))));
        let far = bodies.insert(Body::new(DYNAMIC, Some(cube(50.0))));
        bodies.commit(&mut c).unwrap();

        assert_eq!(all_pairs(&bodies, &c), vec![(floor, ball)]);
        bodies.update(far, Some(cube(1.2)));
        bodies.commit(&mut c).unwrap();
        assert_eq!(all_pairs(&bodies, &c), vec![(floor, ball), (ball, far)]);
    }

    #[test]
    fn thickness_and_groups_filter_pairs() {
        let mut c = world();
        let mut bodies = BodySet::new();
        let a = bodies.insert(Body::new(DYNAMIC, Some(cube(0.0))).with_group(CollisionGroup(1)));
        let b = bodies.insert(Body::new(DYNAMIC, Some(cube(1.5))).with_group(CollisionGroup(2)));
        bodies.commit(&mut c).unwrap();
        assert!(all_pairs(&bodies, &c).is_empty(), "separated bodies must not pair");

        bodies.set_thickness(a, 0.6);
        bodies.commit(&mut c).unwrap();
        assert!(all_pairs(&bodies, &c).is_empty(), "different groups must not pair");

        bodies.set_group(b, CollisionGroup::ALL);
        assert_eq!(all_pairs(&bodies, &c), vec![(a, b)]);

        bodies.set_group(a, CollisionGroup::DISABLED);
        assert!(all_pairs(&bodies, &c).is_empty());
    }

    #[test]
    fn unbounded_bodies_pair_with_everything() {
        let mut c = world();
        let mut bodies = BodySet::new();
        let field = bodies.insert(Body::new(STATIC, None));
        let a = bodies.insert(Body::new(DYNAMIC, Some(cube(0.0))));
        let b = bodies.insert(Body::new(DYNAMIC, Some(cube(100.0))));
        bodies.commit(&mut c).unwrap();
        assert_eq!(all_pairs(&bodies, &c), vec![(field, a), (field, b)]);
    }
}
